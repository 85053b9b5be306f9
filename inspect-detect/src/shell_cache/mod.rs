//! Offline Shell Cache
//!
//! Cache-first storage for the application shell (HTML entry point,
//! stylesheet, script bundles), independent of detection. Driven by three
//! lifecycle steps:
//!
//! - **install** - fetch every listed asset; any failure fails the whole
//!   install and nothing is stored
//! - **activate** - delete every cache whose name is not the current version
//! - **fetch** - same-origin GET is served cache-first, falling back to the
//!   network without storing; cross-origin and non-GET requests always go to
//!   the network untouched
//!
//! Detection results are never cached here.

pub mod fetcher;
pub mod storage;

pub use fetcher::{Fetcher, HttpFetcher};
pub use storage::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};

use bytes::Bytes;
use futures::future::try_join_all;
use reqwest::{Method, Url};
use std::sync::Arc;
use tracing::{debug, info, warn};

use inspect_common::config::ShellConfig;

use crate::error::CacheError;

/// A request routed through the shell cache
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub method: Method,
    pub url: Url,
}

impl AssetRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
        }
    }
}

/// A response from cache or network
#[derive(Debug, Clone, PartialEq)]
pub struct AssetResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl AssetResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where a shell response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Cache,
    Network,
}

impl ServedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedFrom::Cache => "cache",
            ServedFrom::Network => "network",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShellResponse {
    pub response: AssetResponse,
    pub served_from: ServedFrom,
}

/// Versioned list of shell assets
#[derive(Debug, Clone)]
pub struct ShellManifest {
    /// Cache name; bump on every asset-list change
    pub cache_version: String,
    pub origin: Url,
    /// Origin-relative paths
    pub assets: Vec<String>,
}

impl ShellManifest {
    pub fn new(
        cache_version: impl Into<String>,
        origin: &str,
        assets: Vec<String>,
    ) -> Result<Self, CacheError> {
        let origin = Url::parse(origin).map_err(|e| CacheError::InvalidUrl(format!("{}: {}", origin, e)))?;
        if !origin.has_host() {
            return Err(CacheError::InvalidUrl(format!("origin {} has no host", origin)));
        }
        Ok(Self {
            cache_version: cache_version.into(),
            origin,
            assets,
        })
    }

    pub fn from_config(config: &ShellConfig) -> Result<Self, CacheError> {
        Self::new(config.cache_version.clone(), &config.origin, config.assets.clone())
    }

    /// Resolve an origin-relative path (with optional query) to a cache key URL
    ///
    /// Scheme-relative paths such as `//other.host/x` would leave the shell
    /// origin and are rejected.
    pub fn resolve(&self, path: &str) -> Result<Url, CacheError> {
        let mut url = self
            .origin
            .join(path)
            .map_err(|e| CacheError::InvalidUrl(format!("{}: {}", path, e)))?;
        if !self.is_same_origin(&url) {
            return Err(CacheError::InvalidUrl(format!("{} leaves origin {}", path, self.origin)));
        }
        url.set_fragment(None);
        Ok(url)
    }

    /// URL on the shell origin for an incoming request target
    ///
    /// Only path and query are taken from the request, so the result always
    /// shares the origin's scheme, host and port.
    pub fn local_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.origin.clone();
        url.set_path(path);
        url.set_query(query);
        url.set_fragment(None);
        url
    }

    pub fn asset_urls(&self) -> Result<Vec<Url>, CacheError> {
        self.assets.iter().map(|path| self.resolve(path)).collect()
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }
}

/// Cache-first shell with install/activate/fetch lifecycle
pub struct OfflineShell {
    manifest: ShellManifest,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl OfflineShell {
    pub fn new(manifest: ShellManifest, storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            manifest,
            storage,
            fetcher,
        }
    }

    pub fn manifest(&self) -> &ShellManifest {
        &self.manifest
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Prime the current cache version with every listed asset
    ///
    /// Returns the number of assets stored.
    ///
    /// # Errors
    /// Fails if any asset fetch errors or returns a non-success status; in
    /// that case nothing is written.
    pub async fn install(&self) -> Result<usize, CacheError> {
        let urls = self.manifest.asset_urls()?;
        info!(
            cache = %self.manifest.cache_version,
            assets = urls.len(),
            "Installing offline shell"
        );

        let fetches = urls.into_iter().map(|url| async move {
            let response = self.fetcher.fetch(&AssetRequest::get(url.clone())).await?;
            if !response.is_success() {
                return Err(CacheError::BadStatus {
                    url: url.to_string(),
                    status: response.status,
                });
            }
            Ok((url.to_string(), response))
        });

        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(cache = %self.manifest.cache_version, error = %e, "Offline shell install failed");
                return Err(e);
            }
        };

        let count = entries.len();
        self.storage.put_all(&self.manifest.cache_version, entries).await?;
        info!(cache = %self.manifest.cache_version, assets = count, "Offline shell installed");
        Ok(count)
    }

    /// Delete every cache other than the current version
    ///
    /// Returns the deleted cache names.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if name != self.manifest.cache_version && self.storage.delete(&name).await? {
                info!(cache = %name, "Deleted stale shell cache");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Route one request through the cache policy
    pub async fn fetch(&self, request: &AssetRequest) -> Result<ShellResponse, CacheError> {
        if request.method != Method::GET {
            return self.network(request).await;
        }

        if !self.manifest.is_same_origin(&request.url) {
            debug!(url = %request.url, "Cross-origin request bypasses shell cache");
            return self.network(request).await;
        }

        let mut key = request.url.clone();
        key.set_fragment(None);

        match self.storage.match_any(key.as_str()).await {
            Ok(Some(response)) => {
                debug!(url = %key, "Shell cache hit");
                return Ok(ShellResponse {
                    response,
                    served_from: ServedFrom::Cache,
                });
            }
            Ok(None) => debug!(url = %key, "Shell cache miss"),
            Err(e) => warn!(url = %key, error = %e, "Shell cache lookup failed, using network"),
        }

        self.network(request).await
    }

    /// True when the current cache version exists
    pub async fn is_offline_ready(&self) -> bool {
        self.storage
            .has(&self.manifest.cache_version)
            .await
            .unwrap_or(false)
    }

    async fn network(&self, request: &AssetRequest) -> Result<ShellResponse, CacheError> {
        let response = self.fetcher.fetch(request).await?;
        Ok(ShellResponse {
            response,
            served_from: ServedFrom::Network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted network: path -> (status, body)
    struct ScriptedFetcher {
        routes: HashMap<String, (u16, &'static str)>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(routes: &[(&str, u16, &'static str)]) -> Self {
            Self {
                routes: routes
                    .iter()
                    .map(|(url, status, body)| (url.to_string(), (*status, *body)))
                    .collect(),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(format!("{} {}", request.method, request.url));
            match self.routes.get(request.url.as_str()) {
                Some((status, body)) => Ok(AssetResponse {
                    status: *status,
                    content_type: Some("text/plain".to_string()),
                    body: Bytes::from_static(body.as_bytes()),
                }),
                None => Err(CacheError::Fetch {
                    url: request.url.to_string(),
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn build_shell(version: &str, assets: &[&str], fetcher: Arc<ScriptedFetcher>) -> (OfflineShell, Arc<MemoryCacheStorage>) {
        let storage = Arc::new(MemoryCacheStorage::new());
        let manifest = ShellManifest::new(
            version,
            "https://inspect.test",
            assets.iter().map(|a| a.to_string()).collect(),
        )
        .unwrap();
        (OfflineShell::new(manifest, storage.clone(), fetcher), storage)
    }

    #[tokio::test]
    async fn test_install_stores_every_asset() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("https://inspect.test/", 200, "<html>"),
            ("https://inspect.test/static/app.js", 200, "app()"),
        ]));
        let (shell, storage) = build_shell("v1", &["/", "/static/app.js"], fetcher);

        assert_eq!(shell.install().await.unwrap(), 2);
        assert!(shell.is_offline_ready().await);
        assert_eq!(
            storage.urls("v1").await.unwrap(),
            vec!["https://inspect.test/", "https://inspect.test/static/app.js"]
        );
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("https://inspect.test/", 200, "<html>"),
            ("https://inspect.test/static/app.css", 404, "missing"),
        ]));
        let (shell, storage) = build_shell("v1", &["/", "/static/app.css"], fetcher);

        let err = shell.install().await.unwrap_err();
        assert!(matches!(err, CacheError::BadStatus { status: 404, .. }));
        assert!(storage.keys().await.unwrap().is_empty());
        assert!(!shell.is_offline_ready().await);
    }

    #[tokio::test]
    async fn test_install_fails_on_transport_error() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("https://inspect.test/", 200, "<html>")]));
        let (shell, storage) = build_shell("v1", &["/", "/static/app.js"], fetcher);

        assert!(matches!(shell.install().await, Err(CacheError::Fetch { .. })));
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activate_keeps_only_current_version() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("https://inspect.test/", 200, "<html>")]));
        let (shell, storage) = build_shell("v2", &["/"], fetcher);

        let stale = AssetResponse {
            status: 200,
            content_type: None,
            body: Bytes::from_static(b"old"),
        };
        storage
            .put_all("v1", vec![("https://inspect.test/".to_string(), stale.clone())])
            .await
            .unwrap();
        storage
            .put_all("v0", vec![("https://inspect.test/".to_string(), stale)])
            .await
            .unwrap();

        shell.install().await.unwrap();
        let mut deleted = shell.activate().await.unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["v0", "v1"]);
        assert_eq!(storage.keys().await.unwrap(), vec!["v2"]);

        // Second activation has nothing left to do
        assert!(shell.activate().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_origin_get_served_from_cache() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("https://inspect.test/index.html", 200, "<html>")]));
        let (shell, _) = build_shell("v1", &["/index.html"], fetcher.clone());
        shell.install().await.unwrap();
        let after_install = fetcher.calls();

        let url = Url::parse("https://inspect.test/index.html#top").unwrap();
        let served = shell.fetch(&AssetRequest::get(url)).await.unwrap();

        assert_eq!(served.served_from, ServedFrom::Cache);
        assert_eq!(served.response.body, Bytes::from_static(b"<html>"));
        assert_eq!(fetcher.calls(), after_install);
    }

    #[tokio::test]
    async fn test_cache_miss_goes_to_network_without_storing() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("https://inspect.test/", 200, "<html>"),
            ("https://inspect.test/reports/42", 200, "report"),
        ]));
        let (shell, storage) = build_shell("v1", &["/"], fetcher.clone());
        shell.install().await.unwrap();

        let url = Url::parse("https://inspect.test/reports/42").unwrap();
        for _ in 0..2 {
            let served = shell.fetch(&AssetRequest::get(url.clone())).await.unwrap();
            assert_eq!(served.served_from, ServedFrom::Network);
        }

        assert_eq!(storage.urls("v1").await.unwrap(), vec!["https://inspect.test/"]);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_cross_origin_bypasses_cache_even_when_path_cached() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("https://inspect.test/index.html", 200, "shell"),
            ("https://cdn.inspect.test/index.html", 200, "cdn"),
        ]));
        let (shell, storage) = build_shell("v1", &["/index.html"], fetcher.clone());
        shell.install().await.unwrap();

        let url = Url::parse("https://cdn.inspect.test/index.html").unwrap();
        let served = shell.fetch(&AssetRequest::get(url)).await.unwrap();

        assert_eq!(served.served_from, ServedFrom::Network);
        assert_eq!(served.response.body, Bytes::from_static(b"cdn"));
        assert_eq!(storage.urls("v1").await.unwrap(), vec!["https://inspect.test/index.html"]);
    }

    #[tokio::test]
    async fn test_non_get_always_uses_network() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("https://inspect.test/index.html", 200, "shell")]));
        let (shell, _) = build_shell("v1", &["/index.html"], fetcher.clone());
        shell.install().await.unwrap();

        let request = AssetRequest {
            method: Method::POST,
            url: Url::parse("https://inspect.test/index.html").unwrap(),
        };
        let served = shell.fetch(&request).await.unwrap();

        assert_eq!(served.served_from, ServedFrom::Network);
        assert_eq!(
            fetcher.seen.lock().unwrap().last().map(String::as_str),
            Some("POST https://inspect.test/index.html")
        );
    }

    #[tokio::test]
    async fn test_network_failure_surfaces_on_miss() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[]));
        let (shell, _) = build_shell("v1", &[], fetcher);

        let url = Url::parse("https://inspect.test/missing").unwrap();
        assert!(matches!(
            shell.fetch(&AssetRequest::get(url)).await,
            Err(CacheError::Fetch { .. })
        ));
    }

    #[test]
    fn test_manifest_resolves_relative_assets() {
        let manifest = ShellManifest::new(
            "v1",
            "https://inspect.test",
            vec!["/".to_string(), "/static/app.js".to_string()],
        )
        .unwrap();

        let urls: Vec<String> = manifest.asset_urls().unwrap().iter().map(Url::to_string).collect();
        assert_eq!(urls, vec!["https://inspect.test/", "https://inspect.test/static/app.js"]);
    }

    #[test]
    fn test_resolve_drops_fragment() {
        let manifest = ShellManifest::new("v1", "https://inspect.test", Vec::new()).unwrap();
        let url = manifest.resolve("/index.html#cases").unwrap();
        assert_eq!(url.as_str(), "https://inspect.test/index.html");
    }

    #[test]
    fn test_same_origin_check() {
        let manifest = ShellManifest::new("v1", "https://inspect.test", Vec::new()).unwrap();
        assert!(manifest.is_same_origin(&Url::parse("https://inspect.test/a").unwrap()));
        assert!(!manifest.is_same_origin(&Url::parse("https://api.inspect.test/a").unwrap()));
        assert!(!manifest.is_same_origin(&Url::parse("http://inspect.test/a").unwrap()));
        assert!(!manifest.is_same_origin(&Url::parse("https://inspect.test:8443/a").unwrap()));
    }

    #[test]
    fn test_resolve_rejects_scheme_relative_path() {
        let manifest = ShellManifest::new("v1", "https://inspect.test", Vec::new()).unwrap();
        assert!(matches!(
            manifest.resolve("//169.254.169.254/latest/meta-data"),
            Err(CacheError::InvalidUrl(_))
        ));
        assert!(manifest.resolve("https://elsewhere.test/").is_err());
    }

    #[test]
    fn test_local_url_stays_on_origin() {
        let manifest = ShellManifest::new("v1", "https://inspect.test", Vec::new()).unwrap();

        let url = manifest.local_url("//169.254.169.254/latest/meta-data", None);
        assert!(manifest.is_same_origin(&url));
        assert_eq!(url.host_str(), Some("inspect.test"));

        let url = manifest.local_url("/reports", Some("unit=4B"));
        assert_eq!(url.as_str(), "https://inspect.test/reports?unit=4B");
    }

    #[test]
    fn test_origin_must_have_host() {
        assert!(ShellManifest::new("v1", "not a url", Vec::new()).is_err());
        assert!(ShellManifest::new("v1", "data:text/plain,hi", Vec::new()).is_err());
    }
}
