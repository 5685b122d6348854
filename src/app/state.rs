//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::matchmaking::MatchmakingService;
use crate::store::{InMemoryLeaderboard, ResultSink, SupabaseClient, SupabaseStatsStore};
use crate::util::time::{SharedClock, SystemClock};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub results: Arc<dyn ResultSink>,
    pub matchmaking: Arc<MatchmakingService>,
    pub match_registry: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Supabase when configured, memory otherwise
        let results: Arc<dyn ResultSink> = match &config.supabase {
            Some(supabase) => {
                info!(url = %supabase.url, "Storing match results in Supabase");
                let client = SupabaseClient::new(&supabase.url, &supabase.service_role_key);
                Arc::new(SupabaseStatsStore::new(client))
            }
            None => {
                info!("Storing match results in memory");
                Arc::new(InMemoryLeaderboard::new())
            }
        };

        let clock: SharedClock = Arc::new(SystemClock);
        let match_registry = Arc::new(MatchRegistry::new());

        // Arc for sharing across cloned AppState
        let matchmaking = Arc::new(MatchmakingService::new(
            match_registry.clone(),
            config.session(),
            clock,
            results.clone(),
        ));

        Self {
            config,
            results,
            matchmaking,
            match_registry,
        }
    }
}
