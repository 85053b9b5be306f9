//! Result Normalizer
//!
//! Converts a variant's [`RawDetection`] into the canonical
//! [`DetectionResult`]. Never fails: missing or malformed fields degrade to
//! defaults because results feed a human-reviewed inspection workflow.
//!
//! Trust boundary: `source` and `processing_time_ms` always come from the
//! caller, never from the raw payload.

use serde_json::Value;
use std::time::Duration;

use crate::types::{DefectType, DetectionResult, DetectionSource, RawDetection, Severity};

const DEFECT_TYPE_KEYS: &[&str] = &["defectType", "defect_type"];
const SEVERITY_KEYS: &[&str] = &["severity"];
const CONFIDENCE_KEYS: &[&str] = &["confidence"];
const LOCATION_KEYS: &[&str] = &["location"];
const DESCRIPTION_KEYS: &[&str] = &["description"];

/// Normalize raw variant output
///
/// # Arguments
/// * `raw` - payload returned by the variant
/// * `source` - variant that produced it
/// * `elapsed` - caller-measured duration of the analyze call
pub fn normalize(raw: &RawDetection, source: DetectionSource, elapsed: Duration) -> DetectionResult {
    let defect_type = raw
        .get_any(DEFECT_TYPE_KEYS)
        .and_then(Value::as_str)
        .map(DefectType::from_label)
        .unwrap_or(DefectType::Unknown);

    let severity = raw
        .get_any(SEVERITY_KEYS)
        .and_then(Value::as_str)
        .and_then(Severity::from_label)
        .unwrap_or_default();

    let confidence = clamp_confidence(raw.get_any(CONFIDENCE_KEYS));

    let location = text_field(raw, LOCATION_KEYS).unwrap_or_default();

    let description = text_field(raw, DESCRIPTION_KEYS)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| default_description(defect_type, severity));

    DetectionResult {
        defect_type,
        confidence,
        location,
        severity,
        description,
        source,
        processing_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Clamp a raw confidence into [0, 1]
///
/// Numbers and numeric strings are accepted; anything else (including NaN)
/// is 0.
pub fn clamp_confidence(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_nan() => 0.0,
        Some(v) => v.clamp(0.0, 1.0),
        None => 0.0,
    }
}

fn text_field(raw: &RawDetection, keys: &[&str]) -> Option<String> {
    raw.get_any(keys)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
}

fn default_description(defect_type: DefectType, severity: Severity) -> String {
    match defect_type {
        DefectType::Unknown => "Possible defect detected; manual review required".to_string(),
        known => format!("{} {} detected", capitalize(severity.as_str()), known.label()),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
