// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON serialization and SHA-256 hashing.
//!
//! Everything hashed or signed in the substrate goes through this module so
//! that producers and verifiers agree byte-for-byte: object keys sorted,
//! no insignificant whitespace, arrays in declared order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Produce the canonical JSON string for any serializable value.
///
/// Keys are sorted at every nesting level (maps are re-collected into
/// `BTreeMap` ordering via [`Value`] object normalization) and the output
/// carries no insignificant whitespace.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the value cannot be serialized.
///
/// # Examples
///
/// ```
/// let a = serde_json::json!({"b": 1, "a": 2});
/// let s = mzn_core::canonical_string(&a).unwrap();
/// assert_eq!(s, r#"{"a":2,"b":1}"#);
/// ```
pub fn canonical_string<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    let normalized = normalize(v);
    serde_json::to_string(&normalized)
}

/// Hex-encoded SHA-256 of raw bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hex-encoded SHA-256 of the canonical JSON form of `value`.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the value cannot be serialized.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_string(value)?.as_bytes()))
}

/// Recursively rebuild a [`Value`] so that all object keys sort.
///
/// `serde_json::Map` preserves insertion order by default; rebuilding via an
/// intermediate sorted collection yields deterministic output regardless of
/// how the value was constructed.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, normalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}
