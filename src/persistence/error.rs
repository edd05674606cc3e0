//! Persistence error taxonomy

use thiserror::Error;

use crate::platform::StorageError;

/// Errors raised inside the persistence layer.
///
/// These never cross the public `PersistenceManager` operations; they are
/// turned into a `false`/`None` return plus a failure event carrying the
/// error. "No save present" is not an error and has no variant here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// The storage medium is inaccessible or out of quota
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The document could not be turned into storable text
    #[error("Serialization failed: {0}")]
    SerializationFailure(String),

    /// Stored text is not valid JSON
    #[error("Corrupt save: {0}")]
    CorruptSave(String),

    /// Parsed envelope is missing required keys or has malformed metadata
    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    /// Save was written by a newer major schema version than this build reads
    #[error("Unsupported schema version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: String, supported: String },

    /// Slot outside the canonical range
    #[error("Invalid slot '{slot}' (valid slots are 1..={max})")]
    InvalidSlot { slot: String, max: u8 },
}

impl PersistenceError {
    /// Whether `load` may fall back to the slot's backup copy.
    ///
    /// Only damaged or malformed primaries qualify. An unreadable medium
    /// fails the backup read the same way, and a future-version primary
    /// means the backup was written by that same newer build.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CorruptSave(_) | Self::ValidationFailure(_))
    }
}

impl From<StorageError> for PersistenceError {
    fn from(e: StorageError) -> Self {
        PersistenceError::StorageUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        use serde_json::error::Category;
        match e.classify() {
            Category::Syntax | Category::Eof => PersistenceError::CorruptSave(e.to_string()),
            Category::Data => PersistenceError::ValidationFailure(e.to_string()),
            Category::Io => PersistenceError::SerializationFailure(e.to_string()),
        }
    }
}
