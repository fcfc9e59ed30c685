//! Input rows handed over by ingestion.

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde_json::Value;

/// One input record: an ordered mapping from feature name to value.
pub type FeatureRow = IndexMap<String, Value>;

/// Reads a feature as a number. Numeric strings (as produced by CSV
/// readers) are accepted.
pub fn numeric(row: &FeatureRow, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Extracts the row timestamp from `field`, accepting RFC 3339 or a bare
/// `YYYY-MM-DD` date (taken as midnight UTC).
pub fn extract_timestamp(row: &FeatureRow, field: &str) -> Option<DateTime<Utc>> {
    let raw = row.get(field)?.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Structural checks applied before a row reaches the inference adapter.
/// Returns the reason when the row must be skipped.
pub fn validate(row: &FeatureRow) -> Result<(), String> {
    if row.is_empty() {
        return Err("row has no features".to_string());
    }
    if let Some(key) = row.keys().find(|k| k.trim().is_empty()) {
        return Err(format!("row has an empty feature name ({key:?})"));
    }
    Ok(())
}
