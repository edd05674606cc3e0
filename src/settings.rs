//! Persistence settings
//!
//! Persisted separately from game saves, under `<prefix>_persistence_settings`.

use serde::{Deserialize, Serialize};

use crate::consts::{
    AUTOSAVE_DEBOUNCE_MS, AUTOSAVE_INTERVAL_MS, DEFAULT_KEY_PREFIX, DEFAULT_SLOT_COUNT,
};
use crate::persistence::StorageKeys;
use crate::platform::{StorageBackend, StorageError};

/// Tunables for the save system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Number of canonical save slots (`slot_1..=slot_N`)
    pub slot_count: u8,
    /// Prefix for every storage key the save system owns
    pub key_prefix: String,
    /// Event-triggered auto-saves inside this window after a save are dropped
    pub autosave_debounce_ms: u64,
    /// Period of the time-based auto-save
    pub autosave_interval_ms: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            autosave_debounce_ms: AUTOSAVE_DEBOUNCE_MS,
            autosave_interval_ms: AUTOSAVE_INTERVAL_MS,
        }
    }
}

impl PersistenceSettings {
    /// Storage key layout for these settings
    pub fn keys(&self) -> StorageKeys {
        StorageKeys::new(self.key_prefix.clone())
    }

    fn storage_key(prefix: &str) -> String {
        format!("{}_persistence_settings", prefix)
    }

    /// Load settings stored under `prefix`, falling back to defaults
    pub fn load(storage: &impl StorageBackend, prefix: &str) -> Self {
        match storage.get_item(&Self::storage_key(prefix)) {
            Ok(Some(json)) => match serde_json::from_str::<PersistenceSettings>(&json) {
                Ok(mut settings) => {
                    // The prefix the settings were found under wins
                    settings.key_prefix = prefix.to_string();
                    if settings.slot_count == 0 {
                        log::warn!("Stored slot count is 0; using {}", DEFAULT_SLOT_COUNT);
                        settings.slot_count = DEFAULT_SLOT_COUNT;
                    }
                    log::info!("Loaded persistence settings");
                    return settings;
                }
                Err(e) => log::warn!("Ignoring unreadable persistence settings: {}", e),
            },
            Ok(None) => {}
            Err(e) => log::warn!("Could not read persistence settings: {}", e),
        }

        log::info!("Using default persistence settings");
        Self {
            key_prefix: prefix.to_string(),
            ..Self::default()
        }
    }

    /// Store settings under their own prefix
    pub fn save(&self, storage: &mut impl StorageBackend) -> Result<(), StorageError> {
        let json = serde_json::to_string(self)
            .map_err(|e| StorageError::Unavailable(format!("settings not serializable: {}", e)))?;
        storage.set_item(&Self::storage_key(&self.key_prefix), &json)?;
        log::info!("Persistence settings saved");
        Ok(())
    }
}
