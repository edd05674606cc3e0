//! Envelope parsing, validation and the integrity digest
//!
//! The digest is a fast 32-bit rolling hash meant to hint at corruption or
//! hand-editing. It is not a security measure, and a mismatch never rejects
//! a save.

use semver::Version;
use serde_json::Value;

use super::envelope::{SaveEnvelope, SaveMetadata};
use super::error::PersistenceError;

/// Outcome of the advisory integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// Stored digest matches the document
    Verified,
    /// No digest was stored
    Unsigned,
    /// Stored digest differs from the recomputed one
    Mismatch { stored: String, computed: String },
    /// Not checked (document came from the backup copy)
    Unchecked,
}

impl IntegrityStatus {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, IntegrityStatus::Mismatch { .. })
    }
}

/// An envelope that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEnvelope {
    pub envelope: SaveEnvelope,
    /// Parsed `metadata.schema_version`
    pub version: Version,
    pub integrity: IntegrityStatus,
}

/// Digest of a document's compact JSON form
pub fn compute_digest(document: &Value) -> String {
    digest_str(&document.to_string())
}

/// `hash = hash * 31 + unit` over UTF-16 code units in wrapping `i32`,
/// rendered as lowercase hex of the absolute value
pub fn digest_str(text: &str) -> String {
    let mut hash: i32 = 0;
    for unit in text.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(i32::from(unit));
    }
    // Widen first: |i32::MIN| does not fit in i32
    format!("{:x}", i64::from(hash).abs())
}

/// Syntactic parse of stored text
pub fn parse_envelope(text: &str) -> Result<Value, PersistenceError> {
    serde_json::from_str(text).map_err(|e| PersistenceError::CorruptSave(e.to_string()))
}

/// Check a parsed envelope against the running schema version
pub fn validate_envelope(
    raw: Value,
    current: &Version,
) -> Result<ValidatedEnvelope, PersistenceError> {
    let Value::Object(mut map) = raw else {
        return Err(PersistenceError::ValidationFailure(
            "envelope is not a JSON object".to_string(),
        ));
    };

    let metadata = map
        .remove("metadata")
        .ok_or_else(|| PersistenceError::ValidationFailure("missing 'metadata'".to_string()))?;
    let document = map
        .remove("document")
        .ok_or_else(|| PersistenceError::ValidationFailure("missing 'document'".to_string()))?;

    let metadata: SaveMetadata = serde_json::from_value(metadata)
        .map_err(|e| PersistenceError::ValidationFailure(format!("bad metadata: {e}")))?;
    let version = metadata.version()?;

    if version.major > current.major {
        return Err(PersistenceError::UnsupportedVersion {
            found: version.to_string(),
            supported: current.to_string(),
        });
    }

    let integrity = match &metadata.integrity_digest {
        None => IntegrityStatus::Unsigned,
        Some(stored) => {
            let computed = compute_digest(&document);
            if *stored == computed {
                IntegrityStatus::Verified
            } else {
                log::warn!(
                    "Integrity digest mismatch (stored {}, computed {}); loading anyway",
                    stored,
                    computed
                );
                IntegrityStatus::Mismatch {
                    stored: stored.clone(),
                    computed,
                }
            }
        }
    };

    Ok(ValidatedEnvelope {
        envelope: SaveEnvelope { metadata, document },
        version,
        integrity,
    })
}
