//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::game::SessionConfig;

/// Supabase credentials; present only when results should be stored there
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,

    /// Seconds the player on turn has to move
    pub move_deadline: Duration,
    /// Seconds a disconnected player has to come back
    pub reconnect_grace: Duration,
    /// Period of the per-match timer tick
    pub timer_tick: Duration,

    /// Allowed client origins for CORS; empty means any
    pub client_origins: Vec<String>,

    pub supabase: Option<SupabaseConfig>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match get("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => get("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let supabase = match (get("SUPABASE_URL"), get("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: log_format(get("LOG_FORMAT"))?,

            move_deadline: Duration::from_secs(positive(&get, "MOVE_DEADLINE_SECS", 30)?),
            reconnect_grace: Duration::from_secs(positive(&get, "RECONNECT_GRACE_SECS", 15)?),
            timer_tick: Duration::from_millis(positive(&get, "TIMER_TICK_MS", 250)?),

            client_origins: get("CLIENT_ORIGIN")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty() && s != "*")
                        .collect()
                })
                .unwrap_or_default(),

            supabase,
        })
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            move_deadline: self.move_deadline,
            reconnect_grace: self.reconnect_grace,
            tick_interval: self.timer_tick,
        }
    }
}

fn log_format(raw: Option<String>) -> Result<LogFormat, ConfigError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(LogFormat::default()),
        Some(v) if v.eq_ignore_ascii_case("text") => Ok(LogFormat::Text),
        Some(v) if v.eq_ignore_ascii_case("json") => Ok(LogFormat::Json),
        Some(other) => Err(ConfigError::Invalid {
            key: "LOG_FORMAT",
            value: other.to_string(),
            expected: "`text` or `json`",
        }),
    }
}

fn positive(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(ConfigError::Invalid {
                key,
                value: raw,
                expected: "a positive integer",
            }),
        },
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.move_deadline, Duration::from_secs(30));
        assert_eq!(config.reconnect_grace, Duration::from_secs(15));
        assert_eq!(config.timer_tick, Duration::from_millis(250));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.client_origins.is_empty());
        assert!(config.supabase.is_none());
    }

    #[test]
    fn reads_explicit_values() {
        let config = load(&[
            ("PORT", "9000"),
            ("MOVE_DEADLINE_SECS", "12"),
            ("RECONNECT_GRACE_SECS", "4"),
            ("CLIENT_ORIGIN", "https://a.example, https://b.example"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "secret"),
        ])
        .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
        assert_eq!(config.session().move_deadline, Duration::from_secs(12));
        assert_eq!(config.session().reconnect_grace, Duration::from_secs(4));
        assert_eq!(config.client_origins.len(), 2);
        assert_eq!(config.supabase.unwrap().url, "https://x.supabase.co");
    }

    #[test]
    fn rejects_non_positive_timings() {
        for bad in ["0", "-5", "soon"] {
            assert!(matches!(
                load(&[("MOVE_DEADLINE_SECS", bad)]),
                Err(ConfigError::Invalid { key: "MOVE_DEADLINE_SECS", .. })
            ));
        }
    }

    #[test]
    fn log_format_is_parsed_and_validated() {
        assert_eq!(load(&[("LOG_FORMAT", "JSON")]).unwrap().log_format, LogFormat::Json);
        assert_eq!(load(&[("LOG_FORMAT", "text")]).unwrap().log_format, LogFormat::Text);
        assert!(matches!(
            load(&[("LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { key: "LOG_FORMAT", .. })
        ));
    }

    #[test]
    fn half_configured_supabase_is_an_error() {
        assert!(matches!(
            load(&[("SUPABASE_URL", "https://x.supabase.co")]),
            Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))
        ));
    }
}
