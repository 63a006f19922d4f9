//! Idempotency key derivation: canonicalize the payload, then hash it.
//!
//! Canonicalization strips null fields, sorts object keys recursively,
//! and re-serializes with no incidental whitespace, so two payloads
//! that differ only in field order or `null` presence collapse to the
//! same key.

use serde_json::Value;
use sha2::{Digest, Sha256};

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
            for (k, v) in map {
                if v.is_null() {
                    continue;
                }
                sorted.insert(k.clone(), canonicalize(v));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `key = SHA256(partner ‖ sortedJSON(payload_after_redaction))` — the
/// partner is mandatory in the pre-image so the same payload sent to
/// two different partners never collapses onto one cache entry.
pub fn derive_key(partner: &str, payload: &Value) -> String {
    let canonical = canonicalize(payload);
    let payload_bytes = serde_json::to_vec(&canonical).expect("canonicalized value always serializes");

    let mut hasher = Sha256::new();
    hasher.update(partner.as_bytes());
    hasher.update(&payload_bytes);
    hex::encode(hasher.finalize())
}
