//! Detector lifecycle endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use crate::{types::DetectorStatus, AppState};

/// GET /api/detectors
///
/// Registered variants in preference order with their load state.
pub async fn list_detectors(State(state): State<AppState>) -> Json<Vec<DetectorStatus>> {
    Json(state.registry.status())
}

/// POST /api/detectors/unload
///
/// Release every loaded variant. The next analysis loads on demand again.
pub async fn unload_detectors(State(state): State<AppState>) -> Json<Vec<DetectorStatus>> {
    state.registry.unload_all().await;
    info!("All detectors unloaded");
    Json(state.registry.status())
}

/// Build detector routes
pub fn detector_routes() -> Router<AppState> {
    Router::new()
        .route("/api/detectors", get(list_detectors))
        .route("/api/detectors/unload", post(unload_detectors))
}
