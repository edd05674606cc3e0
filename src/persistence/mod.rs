//! Save/load persistence with integrity verification
//!
//! Features:
//! - Versioned JSON envelope per slot
//! - Rolling 32-bit integrity digest (advisory)
//! - One rolling backup per slot, used when the primary is unreadable
//! - Forward-only schema migration chain
//! - Slot index for listing saves without reading documents
//! - Debounced auto-save on lifecycle events plus a periodic save

pub mod autosave;
pub mod envelope;
pub mod error;
pub mod events;
pub mod manager;
pub mod migration;
pub mod normalize;
pub mod validation;

pub use autosave::{AutoSaveOutcome, AutoSaver, LifecycleEvent};
pub use envelope::{
    GameStateDocument, SaveContext, SaveEnvelope, SaveMetadata, SaveSlotDescriptor, SlotId,
    SlotIndex, SlotIndexEntry, StorageKeys,
};
pub use error::PersistenceError;
pub use events::{EventBus, PersistenceEvent, SubscriptionId};
pub use manager::{LoadSource, LoadedSave, PersistenceManager};
pub use migration::{
    KnownSchema, MigrationRegistry, MigrationReport, MigrationStep, default_registry,
};
pub use normalize::normalize_document;
pub use validation::{IntegrityStatus, compute_digest};
