//! HTTP route definitions

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::matchmaking::MatchmakingError;
use crate::store::{PlayerStats, StoreError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/matchmaking/join", post(matchmaking_join_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/stats/:player_id", get(stats_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.client_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    // Support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    if allowed.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(allowed)
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    seated_players: usize,
    connected_players: usize,
    queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.matchmaking.queue_size().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        seated_players: state.match_registry.seated_players(),
        connected_players: state.matchmaking.connected_players(),
        queue_size,
    })
}

// ============================================================================
// Matchmaking endpoints
// ============================================================================

#[derive(Deserialize)]
struct JoinMatchRequest {
    device_id: Uuid,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Serialize)]
struct JoinMatchResponse {
    status: &'static str,
    queue_size: usize,
}

/// Queue an already connected socket; the pairing arrives over that socket
async fn matchmaking_join_handler(
    State(state): State<AppState>,
    Json(req): Json<JoinMatchRequest>,
) -> Result<Json<JoinMatchResponse>, AppError> {
    let queue_size = state
        .matchmaking
        .join_queue(req.device_id, req.display_name)
        .await?;

    Ok(Json(JoinMatchResponse {
        status: "queued",
        queue_size,
    }))
}

// ============================================================================
// Stats endpoints
// ============================================================================

#[derive(Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<PlayerStats>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);

    Ok(Json(state.results.leaderboard(limit).await?))
}

async fn stats_handler(
    State(state): State<AppState>,
    Path(player_id): Path<Uuid>,
) -> Result<Json<PlayerStats>, AppError> {
    state
        .results
        .player_stats(player_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no stats for player {player_id}")))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MatchmakingError> for AppError {
    fn from(e: MatchmakingError) -> Self {
        match e {
            MatchmakingError::AlreadyInMatch => AppError::Conflict(e.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "Result store request failed");
        AppError::Internal("result store unavailable".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
