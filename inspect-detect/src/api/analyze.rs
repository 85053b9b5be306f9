//! Analysis endpoint
//!
//! POST /api/analyze?preferred_source=auto&allow_fallback=false
//!
//! The body is the raw image; its `Content-Type` header is passed to the
//! detectors as the declared image type.

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, DefaultBodyLimit, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    types::{AnalyzeOptions, ImageInput},
    AppState,
};

/// Largest accepted upload; per-variant limits apply on top
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Content type assumed when the client sends none
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// POST /api/analyze
///
/// Returns the normalized `DetectionResult`, tagged with an `x-analysis-id`
/// header that also appears in the server log.
pub async fn analyze(
    State(state): State<AppState>,
    options: Result<Query<AnalyzeOptions>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let Query(options) = options.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if body.is_empty() {
        return Err(ApiError::BadRequest("request body must contain an image".to_string()));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let analysis_id = Uuid::new_v4();
    info!(
        analysis_id = %analysis_id,
        bytes = body.len(),
        content_type = %content_type,
        preferred_source = ?options.preferred_source,
        allow_fallback = options.allow_fallback,
        "Analysis requested"
    );

    let image = ImageInput::new(body, content_type);
    match state.registry.analyze(&image, options).await {
        Ok(result) => {
            info!(
                analysis_id = %analysis_id,
                source = %result.source,
                defect_type = %result.defect_type,
                confidence = result.confidence,
                processing_time_ms = result.processing_time_ms,
                "Analysis complete"
            );
            Ok(([("x-analysis-id", analysis_id.to_string())], Json(result)))
        }
        Err(e) => {
            warn!(analysis_id = %analysis_id, error = %e, "Analysis failed");
            state.record_error(e.to_string()).await;
            Err(e.into())
        }
    }
}

/// Build analysis routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
