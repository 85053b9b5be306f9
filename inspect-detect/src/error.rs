//! Error types for inspect-detect
//!
//! - [`DetectionError`] - detector variants and the registry
//! - [`CacheError`] - the offline shell cache
//! - [`ApiError`] - HTTP handlers, rendered as JSON error bodies

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::types::DetectionSource;

/// Category of a single failed analysis attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisFailure {
    /// Input unreadable or unsupported by the variant
    InvalidInput,
    /// Model inference failed
    Inference,
    /// Transport-level failure talking to a remote service
    Network,
    /// Remote service answered with an error
    Remote,
    /// Attempt exceeded its time budget
    Timeout,
}

impl fmt::Display for AnalysisFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisFailure::InvalidInput => "invalid input",
            AnalysisFailure::Inference => "inference failure",
            AnalysisFailure::Network => "network failure",
            AnalysisFailure::Remote => "remote error",
            AnalysisFailure::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// One variant's failure inside an aggregated error
#[derive(Debug, Clone)]
pub struct DetectorFailure {
    pub detector: String,
    pub error: DetectionError,
}

impl fmt::Display for DetectorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.detector, self.error)
    }
}

/// Detection pipeline error
///
/// `Clone` so a single in-flight model load can report the same outcome to
/// every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum DetectionError {
    /// Model could not be loaded; the variant stays retryable
    #[error("Model load failed for '{detector}': {cause}")]
    ModelLoad { detector: String, cause: String },

    /// `analyze` called before a successful `load_model`
    #[error("Detector '{detector}' is not loaded")]
    NotLoaded { detector: String },

    /// A single analysis attempt failed
    #[error("Analysis failed in '{detector}' ({kind}): {message}")]
    Analysis {
        detector: String,
        kind: AnalysisFailure,
        message: String,
    },

    /// Every attempted variant failed
    #[error("All detectors failed: {}", format_failures(.failures))]
    AllDetectorsFailed { failures: Vec<DetectorFailure> },

    /// Explicitly requested variant is not registered
    #[error("No detector registered for source '{0}'")]
    SourceUnavailable(DetectionSource),
}

fn format_failures(failures: &[DetectorFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl DetectionError {
    pub fn model_load(detector: impl Into<String>, cause: impl fmt::Display) -> Self {
        DetectionError::ModelLoad {
            detector: detector.into(),
            cause: cause.to_string(),
        }
    }

    pub fn not_loaded(detector: impl Into<String>) -> Self {
        DetectionError::NotLoaded {
            detector: detector.into(),
        }
    }

    pub fn analysis(
        detector: impl Into<String>,
        kind: AnalysisFailure,
        message: impl fmt::Display,
    ) -> Self {
        DetectionError::Analysis {
            detector: detector.into(),
            kind,
            message: message.to_string(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DetectionError::ModelLoad { .. } => "MODEL_LOAD_ERROR",
            DetectionError::NotLoaded { .. } => "NOT_LOADED",
            DetectionError::Analysis { .. } => "ANALYSIS_ERROR",
            DetectionError::AllDetectorsFailed { .. } => "ALL_DETECTORS_FAILED",
            DetectionError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
        }
    }
}

/// Offline shell cache error
#[derive(Debug, Error)]
pub enum CacheError {
    /// Network fetch failed
    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Fetch succeeded with a non-success status (not cacheable)
    #[error("Fetch for {url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    /// Cache storage backend failure
    #[error("Cache storage error: {0}")]
    Storage(String),

    /// Request URL could not be resolved against the shell origin
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Detection pipeline failure
    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// Shell asset could not be served (502)
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Detection(err) => match err {
                DetectionError::NotLoaded { .. } => StatusCode::CONFLICT,
                DetectionError::SourceUnavailable(_) => StatusCode::BAD_REQUEST,
                DetectionError::Analysis {
                    kind: AnalysisFailure::InvalidInput,
                    ..
                } => StatusCode::UNPROCESSABLE_ENTITY,
                DetectionError::Analysis {
                    kind: AnalysisFailure::Timeout,
                    ..
                } => StatusCode::GATEWAY_TIMEOUT,
                DetectionError::Analysis { .. }
                | DetectionError::ModelLoad { .. }
                | DetectionError::AllDetectorsFailed { .. } => StatusCode::BAD_GATEWAY,
            },
            ApiError::Cache(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Detection(err) => err.code(),
            ApiError::Cache(_) => "SHELL_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let mut error = json!({
            "code": code,
            "message": self.to_string(),
        });

        if let ApiError::Detection(DetectionError::AllDetectorsFailed { failures }) = &self {
            error["failures"] = failures
                .iter()
                .map(|f| json!({ "detector": f.detector, "message": f.error.to_string() }))
                .collect();
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
