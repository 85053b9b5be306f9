//! Detector Registry
//!
//! Holds the detector variants in preference order and exposes a single
//! `analyze` entry point with fallback.
//!
//! # Selection policy
//! - **auto**: try every variant in configured order; first success wins
//! - **explicit, no fallback**: try only the requested variant, surface its error
//! - **explicit, with fallback**: requested variant first, then the rest in order
//!
//! Attempts are strictly sequential. Each attempt loads the variant on
//! demand, analyzes under the per-variant timeout and normalizes the output.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use inspect_common::config::DetectorsConfig;

use crate::detectors::cloud::CloudSettings;
use crate::detectors::{CloudDetector, Detector, DetectorEntry, LocalModelDetector, MockDetector};
use crate::error::{DetectionError, DetectorFailure};
use crate::normalizer::normalize;
use crate::types::{AnalyzeOptions, DetectionResult, DetectionSource, DetectorStatus, ImageInput};

/// Per-variant time budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub load_timeout: Duration,
    pub analyze_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(15),
            analyze_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&DetectorsConfig> for RegistryConfig {
    fn from(config: &DetectorsConfig) -> Self {
        Self {
            load_timeout: Duration::from_millis(config.load_timeout_ms),
            analyze_timeout: Duration::from_millis(config.analyze_timeout_ms),
        }
    }
}

/// Ordered set of detector variants
pub struct DetectorRegistry {
    entries: Vec<DetectorEntry>,
    config: RegistryConfig,
}

impl DetectorRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: Vec::new(),
            config,
        }
    }

    /// Append a variant at the lowest preference so far
    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.register(detector);
        self
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        if self.entry(detector.source()).is_some() {
            warn!(
                detector = detector.name(),
                source = %detector.source(),
                "Source already registered; explicit requests will use the earlier variant"
            );
        }
        self.entries.push(DetectorEntry::new(
            detector,
            self.config.load_timeout,
            self.config.analyze_timeout,
        ));
    }

    /// Build the configured variants in their configured order
    pub fn from_config(config: &DetectorsConfig) -> inspect_common::Result<Self> {
        let mut registry = Self::new(RegistryConfig::from(config));

        for name in config.effective_order() {
            let source: DetectionSource = name.parse().map_err(inspect_common::Error::Config)?;
            let detector: Arc<dyn Detector> = match source {
                DetectionSource::Local => Arc::new(LocalModelDetector::new(&config.local.model_path)),
                DetectionSource::Cloud => {
                    let endpoint = config.cloud.endpoint.clone().ok_or_else(|| {
                        inspect_common::Error::Config("cloud detector has no endpoint".to_string())
                    })?;
                    let mut settings = CloudSettings::new(endpoint)
                        .with_timeout(Duration::from_millis(config.cloud.request_timeout_ms));
                    settings.api_token = config.cloud.api_token.clone();
                    settings.requests_per_second = std::num::NonZeroU32::new(config.cloud.requests_per_second)
                        .ok_or_else(|| {
                            inspect_common::Error::Config("requests_per_second must be at least 1".to_string())
                        })?;
                    let cloud = CloudDetector::new(settings)
                        .map_err(|e| inspect_common::Error::Config(e.to_string()))?;
                    Arc::new(cloud)
                }
                DetectionSource::Mock => Arc::new(MockDetector::new()),
            };
            registry.register(detector);
        }

        info!(
            order = %registry.entries.iter().map(|e| e.name()).collect::<Vec<_>>().join(" > "),
            "Detector registry configured"
        );
        Ok(registry)
    }

    pub fn entries(&self) -> &[DetectorEntry] {
        &self.entries
    }

    /// First registered entry for a source
    pub fn entry(&self, source: DetectionSource) -> Option<&DetectorEntry> {
        self.entries.iter().find(|e| e.source() == source)
    }

    pub fn status(&self) -> Vec<DetectorStatus> {
        self.entries.iter().map(DetectorEntry::status).collect()
    }

    /// Analyze one image according to `options`
    ///
    /// # Errors
    /// * explicit source without fallback - that variant's error, or
    ///   `SourceUnavailable` when it is not registered
    /// * otherwise `AllDetectorsFailed` with every attempt's error, in order
    pub async fn analyze(
        &self,
        image: &ImageInput,
        options: AnalyzeOptions,
    ) -> Result<DetectionResult, DetectionError> {
        let preferred = options.preferred_source.source();

        if let (Some(source), false) = (preferred, options.allow_fallback) {
            let entry = self
                .entry(source)
                .ok_or(DetectionError::SourceUnavailable(source))?;
            return Self::attempt(entry, image).await.map_err(|e| {
                warn!(detector = entry.name(), error = %e, "Requested detector failed");
                e
            });
        }

        let mut failures = Vec::new();
        let mut order: Vec<&DetectorEntry> = Vec::with_capacity(self.entries.len());

        if let Some(source) = preferred {
            match self.entry(source) {
                Some(entry) => order.push(entry),
                None => failures.push(DetectorFailure {
                    detector: source.to_string(),
                    error: DetectionError::SourceUnavailable(source),
                }),
            }
        }
        for entry in &self.entries {
            if !order.iter().any(|chosen| std::ptr::eq(*chosen, entry)) {
                order.push(entry);
            }
        }

        for entry in order {
            match Self::attempt(entry, image).await {
                Ok(result) => {
                    if !failures.is_empty() {
                        info!(
                            detector = entry.name(),
                            failed_before = failures.len(),
                            "Detection served by fallback detector"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!(detector = entry.name(), error = %e, "Detector failed, trying next");
                    failures.push(DetectorFailure {
                        detector: entry.name().to_string(),
                        error: e,
                    });
                }
            }
        }

        Err(DetectionError::AllDetectorsFailed { failures })
    }

    /// Unload every loaded variant
    pub async fn unload_all(&self) {
        for entry in &self.entries {
            entry.unload().await;
        }
    }

    async fn attempt(entry: &DetectorEntry, image: &ImageInput) -> Result<DetectionResult, DetectionError> {
        entry.load_model().await?;
        let (raw, elapsed) = entry.analyze(image).await?;
        Ok(normalize(&raw, entry.source(), elapsed))
    }
}
