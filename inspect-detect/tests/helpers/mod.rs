//! Test Helper Utilities
//!
//! Scripted detectors and an in-memory network for inspect-detect tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inspect_detect::error::{AnalysisFailure, CacheError, DetectionError};
use inspect_detect::shell_cache::{
    AssetRequest, AssetResponse, Fetcher, MemoryCacheStorage, OfflineShell, ShellManifest,
};
use inspect_detect::types::{DetectionSource, ImageInput, RawDetection};
use inspect_detect::{AppState, DetectorRegistry};

/// Origin used by every test shell
pub const SHELL_ORIGIN: &str = "https://inspect.test";

/// What a scripted detector does when asked
#[derive(Clone)]
pub enum Script {
    /// Load and analyze succeed with this payload
    Succeed(RawDetection),
    /// `load_model` fails
    FailLoad(String),
    /// `load_model` succeeds, `analyze` fails
    FailAnalyze(AnalysisFailure, String),
}

/// Detector whose behavior and call counts are controlled by the test
pub struct ScriptedDetector {
    name: String,
    source: DetectionSource,
    script: Script,
    load_delay: Duration,
    loaded: AtomicBool,
    loads: AtomicUsize,
    analyses: AtomicUsize,
    unloads: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(source: DetectionSource, script: Script) -> Arc<Self> {
        Arc::new(Self::build(source, script, Duration::ZERO))
    }

    pub fn slow_loading(source: DetectionSource, script: Script, load_delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(source, script, load_delay))
    }

    fn build(source: DetectionSource, script: Script, load_delay: Duration) -> Self {
        Self {
            name: source.as_str().to_string(),
            source,
            script,
            load_delay,
            loaded: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            analyses: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn analyses(&self) -> usize {
        self.analyses.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }

    /// Load or analyze was called at least once
    pub fn was_invoked(&self) -> bool {
        self.loads() > 0 || self.analyses() > 0
    }
}

#[async_trait]
impl inspect_detect::detectors::Detector for ScriptedDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> DetectionSource {
        self.source
    }

    async fn load_model(&self) -> Result<(), DetectionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        match &self.script {
            Script::FailLoad(cause) => Err(DetectionError::model_load(&self.name, cause)),
            _ => {
                self.loaded.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn analyze(&self, _image: &ImageInput) -> Result<RawDetection, DetectionError> {
        self.analyses.fetch_add(1, Ordering::SeqCst);
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(DetectionError::not_loaded(&self.name));
        }
        match &self.script {
            Script::Succeed(raw) => Ok(raw.clone()),
            Script::FailAnalyze(kind, message) => Err(DetectionError::analysis(&self.name, *kind, message)),
            Script::FailLoad(_) => Err(DetectionError::not_loaded(&self.name)),
        }
    }

    async fn unload(&self) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        self.loaded.store(false, Ordering::SeqCst);
    }
}

/// Raw payload a well-behaved detector might return
pub fn crack_payload(confidence: f64) -> RawDetection {
    RawDetection::new()
        .with("defectType", "crack")
        .with("confidence", confidence)
        .with("location", "living room wall")
        .with("severity", "minor")
}

/// Minimal PNG-signed image body
pub fn sample_image() -> ImageInput {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend((0u8..=255).cycle().take(512));
    ImageInput::new(bytes, "image/png")
}

/// In-memory network: URL -> response, switchable offline
#[derive(Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<String, AssetResponse>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `body` at `path` under [`SHELL_ORIGIN`]
    pub fn with_asset(self: Arc<Self>, path: &str, content_type: &str, body: &'static str) -> Arc<Self> {
        self.route(&format!("{}{}", SHELL_ORIGIN, path), 200, content_type, body);
        self
    }

    pub fn route(&self, url: &str, status: u16, content_type: &str, body: &'static str) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            AssetResponse {
                status,
                content_type: Some(content_type.to_string()),
                body: Bytes::from_static(body.as_bytes()),
            },
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Fetch {
                url: request.url.to_string(),
                message: "network unreachable".to_string(),
            });
        }
        let routes = self.routes.lock().unwrap();
        Ok(routes.get(request.url.as_str()).cloned().unwrap_or(AssetResponse {
            status: 404,
            content_type: Some("text/plain".to_string()),
            body: Bytes::from_static(b"not found"),
        }))
    }
}

/// Shell assets served by [`standard_fetcher`]
pub const SHELL_ASSETS: [&str; 3] = ["/", "/index.html", "/static/app.js"];

pub fn standard_fetcher() -> Arc<StaticFetcher> {
    StaticFetcher::new()
        .with_asset("/", "text/html", "<html>inspect</html>")
        .with_asset("/index.html", "text/html", "<html>inspect</html>")
        .with_asset("/static/app.js", "application/javascript", "boot()")
}

pub fn shell_manifest(version: &str) -> ShellManifest {
    ShellManifest::new(
        version,
        SHELL_ORIGIN,
        SHELL_ASSETS.iter().map(|a| a.to_string()).collect(),
    )
    .unwrap()
}

/// App state over a memory-backed shell
pub fn test_app_state(registry: DetectorRegistry, fetcher: Arc<StaticFetcher>) -> AppState {
    let shell = OfflineShell::new(
        shell_manifest("inspect-shell-test"),
        Arc::new(MemoryCacheStorage::new()),
        fetcher,
    );
    AppState::new(Arc::new(registry), Arc::new(shell))
}
