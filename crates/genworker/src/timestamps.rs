//! Tolerant timestamp parsing for worker responses.
//!
//! The worker emits timestamps in several RFC 3339-like layouts, sometimes
//! without an offset, sometimes as empty strings. A value that matches none
//! of the known layouts becomes `None` instead of failing the response.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Offset-less layouts, tried after RFC 3339. Interpreted as UTC.
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Parse a worker timestamp, returning `None` for empty or unknown input.
pub fn parse_lenient(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
        .map(|naive| naive.and_utc())
}

/// Serde adapter: any JSON value to an optional timestamp.
///
/// Strings go through [`parse_lenient`]; `null`, numbers and other shapes
/// resolve to `None`.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => parse_lenient(&s),
        _ => None,
    })
}
