//! Canonical JSON serialization
//!
//! The canonical form is compact JSON with recursively sorted object keys.
//! It is pure and deterministic: the same value always produces the same
//! bytes, across processes and time. All content hashes and signatures in
//! Anumate are computed over this form.

use serde::Serialize;
use serde_json::Value;

use crate::{CryptoError, CryptoResult};

/// Serialize a value to its canonical byte form
pub fn canonical_bytes<T: Serialize>(value: &T) -> CryptoResult<Vec<u8>> {
    let value = serde_json::to_value(value)
        .map_err(|e| CryptoError::CanonicalizationFailed(e.to_string()))?;
    let normalized = normalize(value)?;
    // Keys are sorted by normalize() regardless of the underlying map
    // representation; the default writer emits the compact separators.
    serde_json::to_vec(&normalized).map_err(|e| CryptoError::CanonicalizationFailed(e.to_string()))
}

/// Serialize a value to its canonical string form
pub fn canonical_string<T: Serialize>(value: &T) -> CryptoResult<String> {
    let bytes = canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| CryptoError::CanonicalizationFailed(e.to_string()))
}

// Numbers must be normalized so that 1.0 and 1 hash identically. NaN and
// infinities cannot appear in JSON values and are rejected upstream by serde.
fn normalize(value: Value) -> CryptoResult<Value> {
    Ok(match value {
        Value::Object(map) => {
            // Sort entries before re-insertion so the output key order is
            // deterministic independent of the map implementation
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut normalized = serde_json::Map::new();
            for (k, v) in entries {
                normalized.insert(k, normalize(v)?);
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(normalize)
                .collect::<CryptoResult<Vec<_>>>()?,
        ),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                // Collapse integral floats to integers
                if n.as_i64().is_none() && n.as_u64().is_none() && f.fract() == 0.0 {
                    if f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        return Ok(Value::Number((f as i64).into()));
                    }
                }
            }
            Value::Number(n)
        }
        other => other,
    })
}
