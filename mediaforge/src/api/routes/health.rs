//! Health check routes.
//!
//! Served at the root, outside authentication and rate limiting.

use std::collections::BTreeMap;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use process_utils::find_program;

use crate::api::models::{HealthResponse, ReadinessResponse};
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .route("/health/live", get(liveness_check))
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "mediaforge media processing API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
    }))
}

/// Health check endpoint.
///
/// `degraded` when the engine binary cannot be found.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ffmpeg_available = find_program(&state.config.engine.ffmpeg_path).is_some();
    Json(HealthResponse {
        status: if ffmpeg_available { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        ffmpeg_available,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Readiness check - are both engine binaries installed?
/// Returns HTTP 200 when ready, HTTP 503 otherwise.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let engine = &state.config.engine;
    let checks: BTreeMap<String, bool> = [
        ("ffmpeg", &engine.ffmpeg_path),
        ("ffprobe", &engine.ffprobe_path),
    ]
    .into_iter()
    .map(|(name, path)| (name.to_string(), find_program(path).is_some()))
    .collect();
    let ready = checks.values().all(|ok| *ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessResponse { ready, checks }))
}

/// Liveness check - is the service alive?
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}
