//! Cloud Detector
//!
//! Sends images to an external inference service over HTTP.
//!
//! # Contract with the service
//! - `GET {endpoint}/health` - warm-up; any 2xx establishes the session
//! - `POST {endpoint}/analyze` - JSON `{ "contentType", "image" (base64) }`,
//!   answers with a JSON object (optionally wrapped in `{"result": {...}}`)
//!
//! Requests carry `Authorization: Bearer <token>` when a token is configured.
//! The token comes from the authentication backend via configuration.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::detectors::Detector;
use crate::error::{AnalysisFailure, DetectionError};
use crate::types::{DetectionSource, ImageInput, RawDetection};

/// Default timeout for inference requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Connection settings for the cloud detector
#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub endpoint: String,
    pub api_token: Option<String>,
    pub requests_per_second: NonZeroU32,
    pub request_timeout: Duration,
}

impl CloudSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            requests_per_second: NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN),
            request_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Established connection to the inference service
#[derive(Debug, Clone)]
struct CloudSession {
    established_at: DateTime<Utc>,
    service_version: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    content_type: &'a str,
    image: String,
}

/// Cloud inference detector
pub struct CloudDetector {
    http_client: Client,
    endpoint: String,
    api_token: Option<String>,
    rate_limiter: DefaultDirectRateLimiter,
    session: RwLock<Option<CloudSession>>,
}

impl CloudDetector {
    pub fn new(settings: CloudSettings) -> Result<Self, DetectionError> {
        let http_client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| DetectionError::model_load("cloud", format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_token: settings.api_token.filter(|t| !t.trim().is_empty()),
            rate_limiter: RateLimiter::direct(Quota::per_second(settings.requests_per_second)),
            session: RwLock::new(None),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> DetectionError {
        let kind = if e.is_timeout() {
            AnalysisFailure::Timeout
        } else {
            AnalysisFailure::Network
        };
        DetectionError::analysis(self.name(), kind, e)
    }

    fn status_error(&self, status: StatusCode, body: &str) -> DetectionError {
        let kind = match status {
            StatusCode::BAD_REQUEST
            | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::UNSUPPORTED_MEDIA_TYPE
            | StatusCode::UNPROCESSABLE_ENTITY => AnalysisFailure::InvalidInput,
            _ => AnalysisFailure::Remote,
        };
        let detail: String = body.chars().take(200).collect();
        DetectionError::analysis(self.name(), kind, format!("service returned {}: {}", status, detail))
    }
}

#[async_trait]
impl Detector for CloudDetector {
    fn name(&self) -> &str {
        "cloud"
    }

    fn source(&self) -> DetectionSource {
        DetectionSource::Cloud
    }

    async fn load_model(&self) -> Result<(), DetectionError> {
        let mut session = self.session.write().await;
        if session.is_some() {
            return Ok(());
        }

        let url = format!("{}/health", self.endpoint);
        debug!(url = %url, "Warming cloud detector connection");

        let response = self
            .authorized(self.http_client.get(&url))
            .send()
            .await
            .map_err(|e| DetectionError::model_load(self.name(), format!("health check failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectionError::model_load(
                self.name(),
                format!("health check returned {}", status),
            ));
        }

        let service_version = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body.get("version").and_then(Value::as_str).map(str::to_string));

        info!(
            endpoint = %self.endpoint,
            service_version = service_version.as_deref().unwrap_or("unknown"),
            "Cloud detector session established"
        );
        *session = Some(CloudSession {
            established_at: Utc::now(),
            service_version,
        });
        Ok(())
    }

    async fn analyze(&self, image: &ImageInput) -> Result<RawDetection, DetectionError> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or_else(|| DetectionError::not_loaded(self.name()))?;

        self.rate_limiter.until_ready().await;

        let body = AnalyzeRequest {
            content_type: &image.content_type,
            image: BASE64.encode(&image.bytes),
        };
        let url = format!("{}/analyze", self.endpoint);
        debug!(
            url = %url,
            bytes = image.len(),
            session_age_s = (Utc::now() - session.established_at).num_seconds(),
            "Submitting image to cloud detector"
        );

        let response = self
            .authorized(self.http_client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, &text));
        }

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                DetectionError::analysis(
                    self.name(),
                    AnalysisFailure::Inference,
                    format!("malformed response: {}", e),
                )
            }
        })?;

        let payload = match payload {
            Value::Object(mut map) if matches!(map.get("result"), Some(Value::Object(_))) => {
                map.remove("result").unwrap_or(Value::Null)
            }
            other => other,
        };

        let mut raw = RawDetection::from_value(payload).ok_or_else(|| {
            DetectionError::analysis(
                self.name(),
                AnalysisFailure::Inference,
                "response is not a JSON object",
            )
        })?;
        if let Some(version) = session.service_version {
            raw.insert("serviceVersion", version);
        }
        Ok(raw)
    }

    async fn unload(&self) {
        if self.session.write().await.take().is_some() {
            debug!(endpoint = %self.endpoint, "Cloud detector session released");
        }
    }
}
