//! Local Model Detector
//!
//! On-device variant: a small linear classifier stored as a JSON model file.
//!
//! # Model
//! Features are a 16-bin histogram of the image payload (high nibble of
//! each byte, normalized to sum to 1). Each class carries 16 weights and a
//! bias; class scores go through softmax and the top class is reported with
//! its probability as confidence.
//!
//! # Model file
//! ```json
//! {
//!   "name": "defect-linear",
//!   "version": "1.2.0",
//!   "max_input_bytes": 10485760,
//!   "classes": [
//!     { "defect_type": "crack", "severity": "moderate", "location": "wall",
//!       "weights": [0.1, ...16 values...], "bias": 0.0 }
//!   ]
//! }
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::detectors::Detector;
use crate::error::{AnalysisFailure, DetectionError};
use crate::types::{DetectionSource, ImageInput, RawDetection};

/// Histogram bins (and weights per class)
pub const FEATURE_BINS: usize = 16;

/// Default upper bound on accepted image size
const DEFAULT_MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

fn default_max_input_bytes() -> usize {
    DEFAULT_MAX_INPUT_BYTES
}

/// Parsed model file
#[derive(Debug, Clone, Deserialize)]
pub struct LocalModel {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
    pub classes: Vec<ModelClass>,
}

/// One output class of the model
#[derive(Debug, Clone, Deserialize)]
pub struct ModelClass {
    pub defect_type: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: Option<String>,
    pub weights: Vec<f32>,
    #[serde(default)]
    pub bias: f32,
}

/// Top-scoring class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub probability: f64,
}

impl LocalModel {
    /// Parse and validate a model from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let model: LocalModel =
            serde_json::from_slice(bytes).map_err(|e| format!("invalid model file: {}", e))?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), String> {
        if self.classes.is_empty() {
            return Err("model has no classes".to_string());
        }
        for (i, class) in self.classes.iter().enumerate() {
            if class.weights.len() != FEATURE_BINS {
                return Err(format!(
                    "class {} ('{}') has {} weights, expected {}",
                    i,
                    class.defect_type,
                    class.weights.len(),
                    FEATURE_BINS
                ));
            }
            if class.weights.iter().any(|w| !w.is_finite()) || !class.bias.is_finite() {
                return Err(format!("class {} ('{}') has non-finite parameters", i, class.defect_type));
            }
        }
        if self.max_input_bytes == 0 {
            return Err("max_input_bytes must be positive".to_string());
        }
        Ok(())
    }

    /// Softmax over linear class scores
    pub fn predict(&self, bytes: &[u8]) -> Prediction {
        let features = histogram(bytes);

        let scores: Vec<f64> = self
            .classes
            .iter()
            .map(|class| {
                let dot: f32 = class.weights.iter().zip(features.iter()).map(|(w, f)| w * f).sum();
                f64::from(dot + class.bias)
            })
            .collect();

        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = exps.iter().sum();

        let (class_index, best) = exps
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (i, e)| if e > acc.1 { (i, e) } else { acc });

        Prediction {
            class_index,
            probability: best / total,
        }
    }
}

/// Normalized 16-bin histogram over byte high nibbles
pub fn histogram(bytes: &[u8]) -> [f32; FEATURE_BINS] {
    let mut bins = [0f32; FEATURE_BINS];
    if bytes.is_empty() {
        return bins;
    }
    for byte in bytes {
        bins[(byte >> 4) as usize] += 1.0;
    }
    let total = bytes.len() as f32;
    for bin in bins.iter_mut() {
        *bin /= total;
    }
    bins
}

/// On-device model detector
pub struct LocalModelDetector {
    model_path: PathBuf,
    model: RwLock<Option<Arc<LocalModel>>>,
}

impl LocalModelDetector {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            model: RwLock::new(None),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn invalid_input(&self, message: impl std::fmt::Display) -> DetectionError {
        DetectionError::analysis(self.name(), AnalysisFailure::InvalidInput, message)
    }
}

#[async_trait]
impl Detector for LocalModelDetector {
    fn name(&self) -> &str {
        "local"
    }

    fn source(&self) -> DetectionSource {
        DetectionSource::Local
    }

    async fn load_model(&self) -> Result<(), DetectionError> {
        let mut slot = self.model.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let bytes = tokio::fs::read(&self.model_path).await.map_err(|e| {
            DetectionError::model_load(
                self.name(),
                format!("cannot read {}: {}", self.model_path.display(), e),
            )
        })?;

        let model = LocalModel::from_json(&bytes).map_err(|e| DetectionError::model_load(self.name(), e))?;

        debug!(
            model = %model.name,
            version = %model.version,
            classes = model.classes.len(),
            "Local model parsed"
        );
        *slot = Some(Arc::new(model));
        Ok(())
    }

    async fn analyze(&self, image: &ImageInput) -> Result<RawDetection, DetectionError> {
        let model = self
            .model
            .read()
            .await
            .clone()
            .ok_or_else(|| DetectionError::not_loaded(self.name()))?;

        if image.is_empty() {
            return Err(self.invalid_input("image payload is empty"));
        }
        if image.len() > model.max_input_bytes {
            return Err(self.invalid_input(format!(
                "image is {} bytes, model accepts at most {}",
                image.len(),
                model.max_input_bytes
            )));
        }
        match infer::get(&image.bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {}
            _ => {
                return Err(self.invalid_input(format!(
                    "payload is not a recognized image (declared {})",
                    image.content_type
                )))
            }
        }

        let bytes = image.bytes.clone();
        let inference_model = Arc::clone(&model);
        let prediction = tokio::task::spawn_blocking(move || inference_model.predict(&bytes))
            .await
            .map_err(|e| DetectionError::analysis(self.name(), AnalysisFailure::Inference, e))?;

        let class = &model.classes[prediction.class_index];
        let mut raw = RawDetection::new()
            .with("defectType", class.defect_type.clone())
            .with("confidence", prediction.probability)
            .with("location", class.location.clone())
            .with("model", format!("{}@{}", model.name, model.version));
        if let Some(severity) = &class.severity {
            raw.insert("severity", severity.clone());
        }
        if let Some(description) = &class.description {
            raw.insert("description", description.clone());
        }
        Ok(raw)
    }

    async fn unload(&self) {
        self.model.write().await.take();
    }
}
