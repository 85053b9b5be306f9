//! HTTP API handlers for inspect-detect
//!
//! - `POST /api/analyze` - run one image through the detector registry
//! - `GET /api/detectors`, `POST /api/detectors/unload` - variant lifecycle
//! - `GET /health` - liveness and offline readiness
//! - any other `GET` - offline shell (cache-first application assets)

pub mod analyze;
pub mod detectors;
pub mod health;
pub mod shell;

pub use analyze::analyze_routes;
pub use detectors::detector_routes;
pub use health::health_routes;
pub use shell::shell_fallback;
