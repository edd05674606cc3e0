//! Love & Pets Cafe - save system for the cafe management game
//!
//! Core modules:
//! - `persistence`: Slot saves, migration, integrity checks, backup recovery, auto-save
//! - `platform`: Browser/native platform abstraction (storage, clock, JS bridge)
//! - `settings`: Persistence tunables
//! - `state`: Typed game state the saves are built from

pub mod persistence;
pub mod platform;
pub mod settings;
pub mod state;

pub use persistence::{
    AutoSaver, LifecycleEvent, LoadedSave, PersistenceEvent, PersistenceManager, SaveContext,
    SlotId,
};
pub use settings::PersistenceSettings;
pub use state::CafeState;

/// Save system constants
pub mod consts {
    /// Schema version new saves are written with
    pub const CURRENT_SCHEMA_VERSION: &str = "1.2.0";

    /// Number of canonical save slots
    pub const DEFAULT_SLOT_COUNT: u8 = 3;
    /// Prefix for every storage key owned by the save system
    pub const DEFAULT_KEY_PREFIX: &str = "lovepets";

    /// Minimum gap between a successful save and an event-triggered auto-save
    pub const AUTOSAVE_DEBOUNCE_MS: u64 = 5_000;
    /// Period of the time-based auto-save
    pub const AUTOSAVE_INTERVAL_MS: u64 = 60_000;

    /// Coins a new player starts with
    pub const STARTING_COINS: u64 = 500;
}
