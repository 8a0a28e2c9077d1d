//! Deterministic fingerprinting for canonical JSON documents.
//!
//! Used by the workflow crate to compute `plan_hash`: the
//! first 16 hex chars of SHA-256 over a stable (sorted-keys) JSON encoding.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Re-serialize `value` with object keys sorted at every level, so the
/// same logical document always hashes the same way.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// First 16 hex chars of SHA-256 over the canonical encoding of `value`.
pub fn fingerprint(value: &Value) -> String {
    let canonical = canonicalize(value);
    let bytes = serde_json::to_vec(&canonical).expect("canonical JSON always serializes");
    let digest = Sha256::digest(&bytes);
    let hex = hex_encode(&digest);
    hex[..16].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_plans_produce_equal_hashes_regardless_of_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn any_field_edit_changes_the_hash() {
        let a = json!({"phases": [{"id": "phase-1", "name": "Plan"}]});
        let b = json!({"phases": [{"id": "phase-1", "name": "Plan!"}]});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_sixteen_hex_chars() {
        let h = fingerprint(&json!({"x": 1}));
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nested_array_order_matters() {
        let a = json!({"tasks": ["a", "b"]});
        let b = json!({"tasks": ["b", "a"]});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
