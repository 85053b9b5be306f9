//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" while the offline shell is not installed
    pub status: String,
    /// Module name ("inspect-detect")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Current shell cache version is installed
    pub offline_ready: bool,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let offline_ready = state.shell.is_offline_ready().await;
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if offline_ready { "ok" } else { "degraded" }.to_string(),
        module: "inspect-detect".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        offline_ready,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
