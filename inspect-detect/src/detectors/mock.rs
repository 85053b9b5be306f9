//! Mock Detector
//!
//! Deterministic, dependency-free variant used as the terminal fallback.
//! The SHA-256 digest of the image bytes selects category, severity,
//! location and confidence, so the same photo always yields the same result.
//! Loading cannot fail and analysis succeeds for any input, including empty
//! bytes.

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::detectors::Detector;
use crate::error::DetectionError;
use crate::types::{DefectType, DetectionSource, ImageInput, RawDetection, Severity};

const LOCATIONS: [&str; 6] = [
    "living room",
    "kitchen",
    "bathroom",
    "bedroom",
    "balcony",
    "entrance",
];

const SEVERITIES: [Severity; 3] = [Severity::Minor, Severity::Moderate, Severity::Severe];

/// Mock detector
pub struct MockDetector {
    loaded: AtomicBool,
}

impl MockDetector {
    pub fn new() -> Self {
        Self {
            loaded: AtomicBool::new(false),
        }
    }

    /// Deterministic raw output for a byte payload
    pub fn classify(bytes: &[u8]) -> RawDetection {
        let digest = Sha256::digest(bytes);

        let defect = DefectType::DETECTABLE[digest[0] as usize % DefectType::DETECTABLE.len()];
        let severity = SEVERITIES[digest[1] as usize % SEVERITIES.len()];
        let location = LOCATIONS[digest[2] as usize % LOCATIONS.len()];
        // 0.50-0.89 in hundredths
        let confidence = f64::from(50 + digest[3] % 40) / 100.0;

        RawDetection::new()
            .with("defectType", defect.as_str())
            .with("severity", severity.as_str())
            .with("location", location)
            .with("confidence", confidence)
            .with(
                "description",
                format!("Simulated {} finding for review", defect.label()),
            )
            .with("source", "mock")
            .with("processingTimeMs", 0)
            .with("fingerprint", json!(format!("{:x}", digest)))
    }
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn name(&self) -> &str {
        "mock"
    }

    fn source(&self) -> DetectionSource {
        DetectionSource::Mock
    }

    async fn load_model(&self) -> Result<(), DetectionError> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn analyze(&self, image: &ImageInput) -> Result<RawDetection, DetectionError> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(DetectionError::not_loaded(self.name()));
        }
        Ok(Self::classify(&image.bytes))
    }

    async fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }
}
