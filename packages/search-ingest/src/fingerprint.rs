//! Stable fingerprints for search filters and block payloads.
//!
//! Two searches with the same filter set must map to the same run, no matter
//! what order the filter keys were written in. Canonicalization sorts object
//! keys recursively but leaves array order alone, because array order carries
//! meaning upstream (e.g. ranked location lists).

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value to a canonical string.
///
/// Primitives keep their literal JSON form, arrays keep their element order,
/// and object keys are sorted lexicographically at every nesting level.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let pairs: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", pairs.join(","))
        }
        Value::Array(items) => {
            let elements: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", elements.join(","))
        }
        other => other.to_string(),
    }
}

/// SHA-256 of an arbitrary payload string, hex-encoded.
///
/// The same primitive backs filter fingerprints and block checksums.
pub fn checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint a filter set. Absent or null filters hash as the empty object.
pub fn fingerprint_filters(filters: Option<&Value>) -> String {
    let canonical = match filters {
        Some(value) if !value.is_null() => canonical_json(value),
        _ => "{}".to_string(),
    };
    checksum(&canonical)
}
