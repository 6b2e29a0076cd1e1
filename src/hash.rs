//! Content hashing for change detection.
//!
//! Hashing the serialized JSON of a value gives a deterministic fingerprint
//! that can be compared without walking every field.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::model::Feature;

/// SHA-256 hex digest of a serializable value's JSON form.
///
/// # Errors
///
/// Returns a JSON error if the value cannot be serialized.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fingerprint of a feature's content, ignoring its primary key.
///
/// Two features with equal fingerprints differ at most in their key, which
/// is what identifies a moved row.
///
/// # Errors
///
/// Returns a JSON error if the feature cannot be serialized.
pub fn feature_fingerprint(feature: &Feature, pk_field: &str) -> Result<String> {
    let body: Vec<_> = feature.iter().filter(|(k, _)| *k != pk_field).collect();
    content_hash(&body)
}
