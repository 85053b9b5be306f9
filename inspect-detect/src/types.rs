//! Core Types for the Defect Detection Pipeline
//!
//! Value objects shared by the detector variants, the registry and the
//! normalizer:
//! - [`ImageInput`] - what callers hand to the pipeline
//! - [`RawDetection`] - what a variant returns before normalization
//! - [`DetectionResult`] - the canonical, validated result shape

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Vocabulary
// ============================================================================

/// Controlled vocabulary of defect categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectType {
    Crack,
    WaterLeak,
    Mold,
    TileDamage,
    PaintPeeling,
    FloorDamage,
    WindowSeal,
    FixtureDamage,
    Electrical,
    Unknown,
}

impl DefectType {
    /// Every category a detector may positively report (excludes `Unknown`)
    pub const DETECTABLE: [DefectType; 9] = [
        DefectType::Crack,
        DefectType::WaterLeak,
        DefectType::Mold,
        DefectType::TileDamage,
        DefectType::PaintPeeling,
        DefectType::FloorDamage,
        DefectType::WindowSeal,
        DefectType::FixtureDamage,
        DefectType::Electrical,
    ];

    /// Wire identifier (snake_case)
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectType::Crack => "crack",
            DefectType::WaterLeak => "water_leak",
            DefectType::Mold => "mold",
            DefectType::TileDamage => "tile_damage",
            DefectType::PaintPeeling => "paint_peeling",
            DefectType::FloorDamage => "floor_damage",
            DefectType::WindowSeal => "window_seal",
            DefectType::FixtureDamage => "fixture_damage",
            DefectType::Electrical => "electrical",
            DefectType::Unknown => "unknown",
        }
    }

    /// Human-readable label for descriptions
    pub fn label(&self) -> &'static str {
        match self {
            DefectType::Crack => "crack",
            DefectType::WaterLeak => "water leak",
            DefectType::Mold => "mold growth",
            DefectType::TileDamage => "tile damage",
            DefectType::PaintPeeling => "peeling paint",
            DefectType::FloorDamage => "floor damage",
            DefectType::WindowSeal => "window seal failure",
            DefectType::FixtureDamage => "fixture damage",
            DefectType::Electrical => "electrical fault",
            DefectType::Unknown => "unclassified defect",
        }
    }

    /// Lenient parse used on untrusted detector output
    ///
    /// Case, surrounding whitespace, spaces and hyphens are ignored. Anything
    /// outside the vocabulary maps to `Unknown`.
    pub fn from_label(raw: &str) -> DefectType {
        let key: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match key.as_str() {
            "crack" | "cracks" | "cracking" => DefectType::Crack,
            "water_leak" | "leak" | "leakage" | "water_damage" => DefectType::WaterLeak,
            "mold" | "mould" | "mildew" => DefectType::Mold,
            "tile_damage" | "tile" | "broken_tile" => DefectType::TileDamage,
            "paint_peeling" | "peeling" | "peeling_paint" => DefectType::PaintPeeling,
            "floor_damage" | "floor" => DefectType::FloorDamage,
            "window_seal" | "window" => DefectType::WindowSeal,
            "fixture_damage" | "fixture" => DefectType::FixtureDamage,
            "electrical" | "wiring" => DefectType::Electrical,
            _ => DefectType::Unknown,
        }
    }
}

impl fmt::Display for DefectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defect severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    #[default]
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }

    /// Lenient parse; `None` when the label is not recognized
    pub fn from_label(raw: &str) -> Option<Severity> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "minor" | "low" => Some(Severity::Minor),
            "moderate" | "medium" => Some(Severity::Moderate),
            "severe" | "high" | "critical" => Some(Severity::Severe),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which detector variant produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Local,
    Cloud,
    Mock,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Local => "local",
            DetectionSource::Cloud => "cloud",
            DetectionSource::Mock => "mock",
        }
    }
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(DetectionSource::Local),
            "cloud" => Ok(DetectionSource::Cloud),
            "mock" => Ok(DetectionSource::Mock),
            other => Err(format!("unknown detection source: {}", other)),
        }
    }
}

/// Caller's source preference for one analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferredSource {
    #[default]
    Auto,
    Local,
    Cloud,
    Mock,
}

impl PreferredSource {
    /// The explicitly requested variant, `None` for auto mode
    pub fn source(&self) -> Option<DetectionSource> {
        match self {
            PreferredSource::Auto => None,
            PreferredSource::Local => Some(DetectionSource::Local),
            PreferredSource::Cloud => Some(DetectionSource::Cloud),
            PreferredSource::Mock => Some(DetectionSource::Mock),
        }
    }
}

impl From<DetectionSource> for PreferredSource {
    fn from(source: DetectionSource) -> Self {
        match source {
            DetectionSource::Local => PreferredSource::Local,
            DetectionSource::Cloud => PreferredSource::Cloud,
            DetectionSource::Mock => PreferredSource::Mock,
        }
    }
}

// ============================================================================
// Pipeline Input / Output
// ============================================================================

/// One image handed to the pipeline: raw bytes plus declared content type
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Bytes,
    pub content_type: String,
}

impl ImageInput {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Variant-specific output before normalization
///
/// A loose JSON object: nothing in it is trusted until it passes the
/// normalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDetection(Map<String, Value>);

impl RawDetection {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value; `None` unless it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// First present key among the given spellings
    pub fn get_any(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|key| self.0.get(*key))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Canonical detection result returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub defect_type: DefectType,
    /// Always within 0.0-1.0
    pub confidence: f64,
    /// Free text, empty when unknown
    pub location: String,
    pub severity: Severity,
    pub description: String,
    /// Variant that actually produced this result
    pub source: DetectionSource,
    /// Wall-clock duration of the variant's analyze call
    pub processing_time_ms: u64,
}

/// Options for a single registry analysis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AnalyzeOptions {
    #[serde(default, alias = "preferredSource")]
    pub preferred_source: PreferredSource,
    #[serde(default, alias = "allowFallback")]
    pub allow_fallback: bool,
}

impl AnalyzeOptions {
    /// Explicit preference without fallback
    pub fn only(source: DetectionSource) -> Self {
        Self {
            preferred_source: source.into(),
            allow_fallback: false,
        }
    }

    /// Explicit preference, falling back to the rest in configured order
    pub fn prefer(source: DetectionSource) -> Self {
        Self {
            preferred_source: source.into(),
            allow_fallback: true,
        }
    }
}

/// Load state snapshot of one registered variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectorStatus {
    pub name: String,
    pub source: DetectionSource,
    pub loaded: bool,
    pub loading: bool,
}
