//! Extraction of records and totals from loosely-shaped upstream responses.
//!
//! The upstream search API does not commit to a response envelope, so the
//! known shapes are modeled as ordered lists of paths tried in priority
//! order. The first structurally-valid match wins.

use serde_json::Value;

/// Candidate locations for the records array, in priority order. The empty
/// path covers responses that are a bare top-level array.
const RECORD_PATHS: &[&[&str]] = &[
    &[],
    &["data"],
    &["data", "data"],
    &["data", "results"],
    &["data", "items"],
    &["results"],
    &["items"],
];

/// Candidate locations for the numeric total, in priority order.
const TOTAL_PATHS: &[&[&str]] = &[
    &["total"],
    &["count"],
    &["meta", "total"],
    &["pagination", "total"],
    &["data", "total"],
    &["data", "count"],
];

fn value_at<'a>(body: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = body;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Pull the records array out of an upstream response body.
///
/// A response that matches none of the known shapes yields an empty vec, not
/// an error; the page loop treats that as upstream exhaustion.
pub fn extract_records(body: &Value) -> Vec<Value> {
    for path in RECORD_PATHS {
        if let Some(Value::Array(items)) = value_at(body, path) {
            return items.clone();
        }
    }
    Vec::new()
}

/// Pull the total count out of an upstream response body, falling back to
/// the number of records actually extracted.
pub fn extract_total(body: &Value, record_count: usize) -> i64 {
    for path in TOTAL_PATHS {
        let candidate = value_at(body, path)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)));
        if let Some(total) = candidate {
            return total;
        }
    }
    record_count as i64
}
