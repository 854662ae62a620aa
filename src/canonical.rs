//! Canonical serialization and digest computation
//!
//! Every byte that is hashed or persisted by the engine passes through this
//! module: UTF-8 JSON with object keys sorted, no incidental whitespace,
//! and stable number formatting. Identical logical values canonicalize to
//! identical bytes on any machine.

use std::fmt;

use blake3::Hasher as Blake3Hasher;
use serde::Serialize;
use serde_json::Value;

use crate::error::SerializationError;
use crate::types::{ReceiptHashes, RunInputs};

/// JSON path accumulator used to locate rejected values in error messages.
#[derive(Debug, Clone)]
struct Path {
    segments: Vec<String>,
}

impl Path {
    fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    fn field(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    fn index(&self, idx: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(format!("[{}]", idx));
        Self { segments }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "root")
        } else {
            write!(f, "{}", self.segments.join("."))
        }
    }
}

/// Produce canonical bytes for a JSON value.
///
/// Object keys come out sorted because `serde_json::Map` is ordered by key;
/// validation rejects non-finite numbers instead of coercing them.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, SerializationError> {
    validate(value, Path::root())?;
    serde_json::to_vec(value).map_err(|e| SerializationError::CanonicalizationFailed {
        reason: e.to_string(),
    })
}

fn validate(value: &Value, path: Path) -> Result<(), SerializationError> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                validate(child, path.field(key))?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                validate(item, path.index(idx))?;
            }
            Ok(())
        }
        Value::Number(num) => {
            if num.is_f64() {
                // serde_json cannot represent NaN/Infinity as a Number, but
                // the check keeps the contract explicit at this boundary.
                let f = num.as_f64().unwrap();
                if !f.is_finite() {
                    return Err(SerializationError::NonFiniteNumber {
                        path: path.to_string(),
                    });
                }
            }
            Ok(())
        }
        Value::String(_) | Value::Bool(_) | Value::Null => Ok(()),
    }
}

/// Blake3 digest of raw bytes as 64 lowercase hex characters
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Blake3Hasher::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize().as_bytes())
}

/// Canonicalize a JSON value and digest the resulting bytes
pub fn canonical_digest(value: &Value) -> Result<String, SerializationError> {
    Ok(digest(&canonicalize(value)?))
}

/// Serialize any value into a canonical `serde_json::Value`
pub fn to_canonical_value<T: Serialize>(value: &T) -> Result<Value, SerializationError> {
    let json = serde_json::to_value(value).map_err(|e| {
        SerializationError::CanonicalizationFailed {
            reason: e.to_string(),
        }
    })?;
    validate(&json, Path::root())?;
    Ok(json)
}

/// Canonical fingerprint of a run's recorded inputs
pub fn input_fingerprint(inputs: &RunInputs) -> Result<String, SerializationError> {
    canonical_digest(&to_canonical_value(inputs)?)
}

/// Combined digest over the ordered receipt hashes plus the input
/// fingerprint. This is the `state_hash` of a bundle.
pub fn state_hash(receipts: &ReceiptHashes, input_fingerprint: &str) -> String {
    let mut hasher = Blake3Hasher::new();
    for receipt in receipts.ordered() {
        hasher.update(receipt.as_bytes());
    }
    hasher.update(input_fingerprint.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}
