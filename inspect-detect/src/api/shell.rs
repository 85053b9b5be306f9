//! Offline shell fallback
//!
//! Every GET the router does not otherwise handle is mapped onto the shell
//! origin (request path and query only) and answered through [`OfflineShell::fetch`], so a tablet
//! pointed at this service keeps its UI while the upstream is unreachable.
//!
//! [`OfflineShell::fetch`]: crate::shell_cache::OfflineShell::fetch

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{
    error::{ApiError, ApiResult},
    shell_cache::AssetRequest,
    AppState,
};

/// Header reporting whether a shell asset came from cache or network
pub const SERVED_FROM_HEADER: &str = "x-served-from";

/// Router fallback
pub async fn shell_fallback(State(state): State<AppState>, method: Method, uri: Uri) -> ApiResult<Response> {
    if method != Method::GET {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    // `//host/...` is scheme-relative; never forward it anywhere
    if uri.path().starts_with("//") {
        debug!(path = uri.path(), "Rejecting scheme-relative shell path");
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let manifest = state.shell.manifest();
    let url = manifest.local_url(uri.path(), uri.query());
    if !manifest.is_same_origin(&url) {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    debug!(path = uri.path(), url = %url, "Resolving shell asset");

    let served = state.shell.fetch(&AssetRequest::get(url)).await?;

    let status = StatusCode::from_u16(served.response.status)
        .map_err(|e| ApiError::Internal(format!("upstream status {}: {}", served.response.status, e)))?;

    let mut response = (status, served.response.body).into_response();
    let headers = response.headers_mut();
    if let Some(value) = served
        .response
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(
        SERVED_FROM_HEADER,
        HeaderValue::from_static(served.served_from.as_str()),
    );
    Ok(response)
}
