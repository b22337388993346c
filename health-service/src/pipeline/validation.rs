//! Deterministic checks on LLM-extracted biomarkers, overall confidence and
//! the verified / review_needed routing decision.

use crate::models::{BiomarkerStatus, ProcessingStatus};
use serde_json::Value;
use std::collections::HashSet;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const VERIFIED_THRESHOLD: f64 = 0.9;
pub const IMPLAUSIBLY_HIGH_VALUE: f64 = 100_000.0;
const NEGATIVE_VALUE_PENALTY: f64 = 0.5;
const HIGH_VALUE_PENALTY: f64 = 0.3;
const MISSING_BIOMARKER_WEIGHT: f64 = 0.3;

/// A biomarker that survived validation, with its adjusted confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBiomarker {
    pub code: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub reference_range_low: Option<f64>,
    pub reference_range_high: Option<f64>,
    pub confidence: f64,
}

impl ExtractedBiomarker {
    pub fn status(&self) -> BiomarkerStatus {
        biomarker_status(
            self.value,
            self.reference_range_low,
            self.reference_range_high,
        )
    }
}

/// Validate raw extraction output and compute the overall confidence.
///
/// Entries need `biomarker_code` and `unit` strings and a numeric `value`
/// (JSON number or numeric string); others are dropped. Individual
/// confidence defaults to 0.5, is clamped to `[0, 1]`, then halved for
/// negative values and multiplied by 0.3 above 100 000. The overall score is
/// the minimum individual confidence, reduced by up to 30% in proportion to
/// expected panel codes that were not found. No survivors gives `([], 0.0)`.
pub fn validate_extraction(
    raw: Vec<Value>,
    expected_codes: &[String],
) -> (Vec<ExtractedBiomarker>, f64) {
    let validated: Vec<ExtractedBiomarker> = raw.iter().filter_map(validate_entry).collect();

    if validated.is_empty() {
        return (validated, 0.0);
    }

    let mut overall = validated
        .iter()
        .map(|b| b.confidence)
        .fold(f64::INFINITY, f64::min);

    let expected: HashSet<&str> = expected_codes.iter().map(String::as_str).collect();
    if !expected.is_empty() {
        let found: HashSet<&str> = validated.iter().map(|b| b.code.as_str()).collect();
        let missing = expected.difference(&found).count();
        let missing_ratio = missing as f64 / expected.len() as f64;
        overall *= 1.0 - missing_ratio * MISSING_BIOMARKER_WEIGHT;
    }

    (validated, overall)
}

fn validate_entry(entry: &Value) -> Option<ExtractedBiomarker> {
    let obj = entry.as_object()?;
    let code = obj.get("biomarker_code")?.as_str()?.trim();
    let unit = obj.get("unit")?.as_str()?.trim();
    let value = numeric(obj.get("value")?)?;

    if code.is_empty() {
        return None;
    }

    let mut confidence = obj
        .get("confidence")
        .and_then(numeric)
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    if value < 0.0 {
        confidence *= NEGATIVE_VALUE_PENALTY;
    }
    if value > IMPLAUSIBLY_HIGH_VALUE {
        confidence *= HIGH_VALUE_PENALTY;
    }

    let name = obj
        .get("biomarker_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(code);

    Some(ExtractedBiomarker {
        code: code.to_string(),
        name: name.to_string(),
        value,
        unit: unit.to_string(),
        reference_range_low: obj.get("reference_range_low").and_then(numeric),
        reference_range_high: obj.get("reference_range_high").and_then(numeric),
        confidence,
    })
}

/// Finite number from a JSON number or a numeric string.
fn numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

pub fn route_by_confidence(overall: f64) -> ProcessingStatus {
    if overall >= VERIFIED_THRESHOLD {
        ProcessingStatus::Verified
    } else {
        ProcessingStatus::ReviewNeeded
    }
}

/// `flagged` when both bounds are known and the value falls outside them.
pub fn biomarker_status(value: f64, low: Option<f64>, high: Option<f64>) -> BiomarkerStatus {
    match (low, high) {
        (Some(low), Some(high)) if value < low || value > high => BiomarkerStatus::Flagged,
        _ => BiomarkerStatus::Normal,
    }
}

/// Codes a panel promises: either a JSON array of codes or an object keyed by code.
pub fn expected_codes(panel_biomarkers: &Value) -> Vec<String> {
    let mut codes: Vec<String> = match panel_biomarkers {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .collect(),
        Value::Object(map) => map.keys().map(|k| k.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    codes.retain(|c| !c.is_empty());
    codes.sort();
    codes.dedup();
    codes
}
