//! Network side of the shell cache

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;

use crate::error::CacheError;
use crate::shell_cache::{AssetRequest, AssetResponse};

/// Issues network requests on behalf of the shell cache
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request
    ///
    /// Non-success statuses are returned as responses, not errors; only
    /// transport failures are `Err`.
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, CacheError>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Storage(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, CacheError> {
        let fetch_error = |e: reqwest::Error| CacheError::Fetch {
            url: request.url.to_string(),
            message: e.to_string(),
        };

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(fetch_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(fetch_error)?;

        Ok(AssetResponse {
            status,
            content_type,
            body,
        })
    }
}
