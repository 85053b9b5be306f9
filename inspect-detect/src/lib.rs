//! inspect-detect library interface
//!
//! Defect detection for apartment inspections: interchangeable detector
//! variants behind one registry with fallback, a normalizer producing the
//! canonical result shape, and an offline cache for the inspection UI shell.

pub mod api;
pub mod detectors;
pub mod error;
pub mod normalizer;
pub mod registry;
pub mod shell_cache;
pub mod types;

pub use crate::error::{ApiError, ApiResult, CacheError, DetectionError};
pub use crate::registry::{DetectorRegistry, RegistryConfig};
pub use crate::shell_cache::OfflineShell;

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DetectorRegistry>,
    pub shell: Arc<OfflineShell>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(registry: Arc<DetectorRegistry>, shell: Arc<OfflineShell>) -> Self {
        Self {
            registry,
            shell,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Record an error for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::analyze_routes())
        .merge(api::detector_routes())
        .merge(api::health_routes())
        .fallback(api::shell_fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
