//! Slot-based save manager
//!
//! Owns the storage backend, clock, migration registry and event bus. The
//! application root creates one manager and lends it to whatever needs to
//! save or load. Public operations never return errors: failures come back
//! as `false`/`None` plus a failure event carrying the cause.

use serde::Serialize;
use serde_json::Value;

use super::envelope::{
    GameStateDocument, SaveContext, SaveEnvelope, SaveMetadata, SaveSlotDescriptor, SlotId,
    SlotIndex, SlotIndexEntry, StorageKeys, default_display_name,
};
use super::error::PersistenceError;
use super::events::{EventBus, PersistenceEvent, SubscriptionId};
use super::migration::{MigrationRegistry, MigrationReport, default_registry};
use super::normalize::normalize_document;
use super::validation::{IntegrityStatus, compute_digest, parse_envelope, validate_envelope};
use crate::platform::{Clock, StorageBackend};
use crate::settings::PersistenceSettings;

/// Where a loaded document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    /// Primary was unreadable; this is the slot's rolling backup
    Backup,
}

/// A successfully loaded save
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSave {
    pub slot: SlotId,
    /// Stored metadata; `schema_version` is the running version after a migration.
    /// A backup load with unreadable metadata carries `SaveMetadata::empty()`.
    pub metadata: SaveMetadata,
    /// Migrated and normalized document
    pub document: GameStateDocument,
    pub integrity: IntegrityStatus,
    pub source: LoadSource,
    /// Present when the primary record was loaded
    pub migration: Option<MigrationReport>,
}

pub struct PersistenceManager<S: StorageBackend, C: Clock> {
    storage: S,
    clock: C,
    registry: MigrationRegistry,
    settings: PersistenceSettings,
    keys: StorageKeys,
    events: EventBus,
    last_saved_at: Option<u64>,
}

impl<S: StorageBackend, C: Clock> PersistenceManager<S, C> {
    pub fn new(
        storage: S,
        clock: C,
        registry: MigrationRegistry,
        settings: PersistenceSettings,
    ) -> Self {
        let keys = settings.keys();
        Self {
            storage,
            clock,
            registry,
            settings,
            keys,
            events: EventBus::new(),
            last_saved_at: None,
        }
    }

    /// Shipped migrations, settings read from `storage` (or defaults)
    pub fn open(storage: S, clock: C) -> Self {
        let settings =
            PersistenceSettings::load(&storage, crate::consts::DEFAULT_KEY_PREFIX);
        Self::new(storage, clock, default_registry(), settings)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn settings(&self) -> &PersistenceSettings {
        &self.settings
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Timestamp of the most recent successful save by this manager
    pub fn last_saved_at(&self) -> Option<u64> {
        self.last_saved_at
    }

    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&PersistenceEvent) + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    pub(crate) fn emit(&mut self, event: PersistenceEvent) {
        log::debug!("Persistence event: {}", event.name());
        self.events.emit(&event);
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Save `document` into `slot`, keeping the previous record as backup
    pub fn save<D: Serialize + ?Sized>(
        &mut self,
        document: &D,
        slot: SlotId,
        context: &SaveContext,
    ) -> bool {
        match self.try_save(document, slot, context) {
            Ok(metadata) => {
                let timestamp = metadata.saved_at_epoch_millis;
                self.last_saved_at = Some(timestamp);
                log::info!(
                    "Saved {} (schema {}, {}s played)",
                    slot,
                    metadata.schema_version,
                    metadata.cumulative_play_seconds
                );
                self.emit(PersistenceEvent::SaveSucceeded { slot, timestamp });
                true
            }
            Err(cause) => {
                log::error!("Save to {} failed: {}", slot, cause);
                self.emit(PersistenceEvent::SaveFailed { slot, cause });
                false
            }
        }
    }

    /// Parse a document handed over as JSON text for a save into `slot`.
    /// Bad text fails that save: `None` plus a `SaveFailed` event.
    pub fn document_from_json(&mut self, slot: SlotId, json: &str) -> Option<GameStateDocument> {
        match serde_json::from_str(json) {
            Ok(document) => Some(document),
            Err(e) => {
                let cause = PersistenceError::SerializationFailure(e.to_string());
                log::error!("Save to {} failed: {}", slot, cause);
                self.emit(PersistenceEvent::SaveFailed { slot, cause });
                None
            }
        }
    }

    /// Load `slot`; `None` if it is empty or unreadable (see events)
    pub fn load(&mut self, slot: SlotId) -> Option<LoadedSave> {
        match self.try_load(slot) {
            Ok(Some(loaded)) => {
                log::info!(
                    "Loaded {} from {:?} (schema {})",
                    slot,
                    loaded.source,
                    loaded.metadata.schema_version
                );
                self.emit(PersistenceEvent::LoadSucceeded {
                    slot,
                    metadata: loaded.metadata.clone(),
                });
                Some(loaded)
            }
            Ok(None) => {
                log::info!("No save in {}", slot);
                None
            }
            Err(cause) => {
                log::error!("Load of {} failed: {}", slot, cause);
                self.emit(PersistenceEvent::LoadFailed { slot, cause });
                None
            }
        }
    }

    /// Descriptors for the first `max_slots` canonical slots, in slot order.
    /// Reads only the slot index.
    pub fn list_slots(&self, max_slots: u8) -> Vec<SaveSlotDescriptor> {
        let index = self.read_index().unwrap_or_else(|e| {
            log::warn!("Slot index unreadable ({}); listing empty slots", e);
            SlotIndex::default()
        });
        SlotId::canonical(max_slots)
            .map(|slot| index.descriptor(slot))
            .collect()
    }

    /// `list_slots` over every configured slot
    pub fn list_all_slots(&self) -> Vec<SaveSlotDescriptor> {
        self.list_slots(self.settings.slot_count)
    }

    /// Remove the slot's record and index entry. The backup copy stays.
    pub fn delete_slot(&mut self, slot: SlotId) -> bool {
        match self.try_delete(slot) {
            Ok(()) => {
                log::info!("Deleted {}", slot);
                self.emit(PersistenceEvent::SlotDeleted { slot });
                true
            }
            Err(e) => {
                log::error!("Delete of {} failed: {}", slot, e);
                false
            }
        }
    }

    /// Last-resort read of the slot's backup copy.
    ///
    /// No digest check and no migration; the document is returned as stored.
    pub fn recover(&self, slot: SlotId) -> Option<GameStateDocument> {
        match self.read_backup(slot) {
            Ok(found) => found.map(|(_, document)| document),
            Err(e) => {
                log::warn!("Backup of {} unreadable: {}", slot, e);
                None
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_slot(&self, slot: SlotId) -> Result<(), PersistenceError> {
        if (1..=self.settings.slot_count).contains(&slot.number()) {
            Ok(())
        } else {
            Err(PersistenceError::InvalidSlot {
                slot: slot.to_string(),
                max: self.settings.slot_count,
            })
        }
    }

    fn try_save<D: Serialize + ?Sized>(
        &mut self,
        document: &D,
        slot: SlotId,
        context: &SaveContext,
    ) -> Result<SaveMetadata, PersistenceError> {
        self.check_slot(slot)?;

        let document = serde_json::to_value(document)
            .map_err(|e| PersistenceError::SerializationFailure(e.to_string()))?;
        let metadata = SaveMetadata {
            schema_version: self.registry.current_version().to_string(),
            saved_at_epoch_millis: self.clock.now_millis(),
            cumulative_play_seconds: context.cumulative_play_seconds,
            last_active_screen_id: context.last_active_screen_id.clone(),
            integrity_digest: Some(compute_digest(&document)),
        };
        let envelope = SaveEnvelope { metadata, document };
        let json = envelope.to_json()?;

        let primary_key = self.keys.primary(slot);
        let backup_key = self.keys.backup(slot);
        let previous = self.storage.get_item(&primary_key)?;
        let previous_backup = match previous {
            Some(_) => self.storage.get_item(&backup_key)?,
            None => None,
        };

        if let Some(previous) = &previous {
            self.storage.set_item(&backup_key, previous)?;
        }
        let written = self
            .storage
            .set_item(&primary_key, &json)
            .map_err(PersistenceError::from)
            .and_then(|()| self.update_index(slot, context, &envelope.metadata));

        if let Err(cause) = written {
            // Primary first: {previous, previous} is a state that already fit
            self.restore(&primary_key, previous.as_deref());
            if previous.is_some() {
                self.restore(&backup_key, previous_backup.as_deref());
            }
            return Err(cause);
        }

        Ok(envelope.metadata)
    }

    fn update_index(
        &mut self,
        slot: SlotId,
        context: &SaveContext,
        metadata: &SaveMetadata,
    ) -> Result<(), PersistenceError> {
        let mut index = self.read_index().unwrap_or_else(|e| {
            log::warn!("Slot index unreadable ({}); rebuilding", e);
            SlotIndex::default()
        });
        let display_name = context
            .display_name
            .clone()
            .or_else(|| index.get(slot).map(|entry| entry.display_name.clone()))
            .unwrap_or_else(|| default_display_name(slot));
        index.insert(
            slot,
            SlotIndexEntry {
                display_name,
                metadata: metadata.clone(),
                thumbnail: context.thumbnail.clone(),
            },
        );
        self.write_index(&index)
    }

    /// Put `key` back to `value` (absent when `None`) after a failed save
    fn restore(&mut self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.storage.set_item(key, value),
            None => self.storage.remove_item(key),
        };
        if let Err(e) = result {
            log::error!("Could not roll back '{}': {}", key, e);
        }
    }

    fn try_load(&self, slot: SlotId) -> Result<Option<LoadedSave>, PersistenceError> {
        self.check_slot(slot)?;

        let Some(text) = self.storage.get_item(&self.keys.primary(slot))? else {
            return Ok(None);
        };

        match self.read_primary(slot, &text) {
            Ok(loaded) => Ok(Some(loaded)),
            Err(cause) if cause.is_recoverable() => {
                log::warn!("Save in {} is unreadable ({}); trying backup", slot, cause);
                match self.read_backup(slot) {
                    Ok(Some((metadata, mut document))) => {
                        log::warn!("Recovered {} from backup", slot);
                        normalize_document(&mut document);
                        Ok(Some(LoadedSave {
                            slot,
                            metadata,
                            document,
                            integrity: IntegrityStatus::Unchecked,
                            source: LoadSource::Backup,
                            migration: None,
                        }))
                    }
                    Ok(None) => Err(cause),
                    Err(backup_err) => {
                        log::warn!("Backup of {} unreadable: {}", slot, backup_err);
                        Err(cause)
                    }
                }
            }
            Err(cause) => Err(cause),
        }
    }

    fn read_primary(&self, slot: SlotId, text: &str) -> Result<LoadedSave, PersistenceError> {
        let raw = parse_envelope(text)?;
        let validated = validate_envelope(raw, self.registry.current_version())?;

        let SaveEnvelope {
            mut metadata,
            mut document,
        } = validated.envelope;
        let report = self.registry.migrate(&mut document, &validated.version);
        if report.migrated() {
            log::info!(
                "Migrated {} from {} to {} ({} steps)",
                slot,
                report.original_version,
                report.final_version,
                report.steps_applied
            );
            metadata.schema_version = report.final_version.to_string();
        }
        normalize_document(&mut document);

        Ok(LoadedSave {
            slot,
            metadata,
            document,
            integrity: validated.integrity,
            source: LoadSource::Primary,
            migration: Some(report),
        })
    }

    /// Backup metadata (empty if unreadable) and document, if any
    fn read_backup(
        &self,
        slot: SlotId,
    ) -> Result<Option<(SaveMetadata, GameStateDocument)>, PersistenceError> {
        self.check_slot(slot)?;

        let Some(text) = self.storage.get_item(&self.keys.backup(slot))? else {
            return Ok(None);
        };
        let Ok(Value::Object(mut map)) = parse_envelope(&text) else {
            log::warn!("Backup of {} is not a readable envelope", slot);
            return Ok(None);
        };
        let Some(document) = map.remove("document") else {
            return Ok(None);
        };
        let metadata = match map.remove("metadata").map(serde_json::from_value) {
            Some(Ok(metadata)) => metadata,
            Some(Err(e)) => {
                log::warn!("Backup of {} has unreadable metadata ({}); using empty", slot, e);
                SaveMetadata::empty()
            }
            None => {
                log::warn!("Backup of {} has no metadata; using empty", slot);
                SaveMetadata::empty()
            }
        };

        Ok(Some((metadata, document)))
    }

    fn try_delete(&mut self, slot: SlotId) -> Result<(), PersistenceError> {
        self.check_slot(slot)?;
        self.storage.remove_item(&self.keys.primary(slot))?;

        let mut index = self.read_index().unwrap_or_else(|e| {
            log::warn!("Slot index unreadable ({}); rebuilding", e);
            SlotIndex::default()
        });
        if index.remove(slot).is_some() {
            self.write_index(&index)?;
        }
        Ok(())
    }

    fn read_index(&self) -> Result<SlotIndex, PersistenceError> {
        match self.storage.get_item(&self.keys.index())? {
            Some(json) => SlotIndex::from_json(&json),
            None => Ok(SlotIndex::default()),
        }
    }

    fn write_index(&mut self, index: &SlotIndex) -> Result<(), PersistenceError> {
        let json = index.to_json()?;
        self.storage.set_item(&self.keys.index(), &json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migration::{KnownSchema, MigrationStep};
    use crate::platform::{ManualClock, MemoryStorage, StorageError};
    use crate::state::{CafeState, Memory, PlayerStatistics};
    use proptest::prelude::*;
    use semver::Version;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    type TestManager = PersistenceManager<MemoryStorage, ManualClock>;
    type EventLog = Rc<RefCell<Vec<PersistenceEvent>>>;

    const START: u64 = 1_700_000_000_000;

    fn slot(n: u8) -> SlotId {
        SlotId::new(n).unwrap()
    }

    fn manager_with(registry: MigrationRegistry) -> (TestManager, ManualClock, EventLog) {
        let clock = ManualClock::new(START);
        let mut manager = PersistenceManager::new(
            MemoryStorage::new(),
            clock.clone(),
            registry,
            PersistenceSettings::default(),
        );
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        manager.subscribe(move |e| sink.borrow_mut().push(e.clone()));
        (manager, clock, log)
    }

    fn manager() -> (TestManager, ManualClock, EventLog) {
        manager_with(default_registry())
    }

    fn sample_document() -> Value {
        let mut state = CafeState::new_game("Mina");
        state.record_shift(
            "s1",
            80,
            Some(Memory {
                id: "m1".to_string(),
                title: "Biscuit naps on the counter".to_string(),
                pet_id: None,
                created_at: 10,
                published: false,
            }),
        );
        state.to_document().unwrap()
    }

    fn write_raw(manager: &mut TestManager, key: String, value: &Value) {
        manager
            .storage_mut()
            .set_item(&key, &value.to_string())
            .unwrap();
    }

    fn raw_envelope(version: &str, document: Value) -> Value {
        json!({
            "metadata": {
                "schemaVersion": version,
                "savedAtEpochMillis": START,
                "cumulativePlaySeconds": 30,
                "lastActiveScreenId": null,
                "integrityDigest": null,
            },
            "document": document,
        })
    }

    fn event_names(log: &EventLog) -> Vec<&'static str> {
        log.borrow().iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let (mut manager, _, log) = manager();
        let document = sample_document();
        let context = SaveContext::new(321).with_screen("blog_feed");

        assert!(manager.save(&document, slot(1), &context));
        let loaded = manager.load(slot(1)).unwrap();

        assert_eq!(loaded.document, document);
        assert_eq!(loaded.source, LoadSource::Primary);
        assert_eq!(loaded.integrity, IntegrityStatus::Verified);
        assert_eq!(loaded.metadata.schema_version, crate::consts::CURRENT_SCHEMA_VERSION);
        assert_eq!(loaded.metadata.saved_at_epoch_millis, START);
        assert_eq!(loaded.metadata.cumulative_play_seconds, 321);
        assert_eq!(loaded.metadata.last_active_screen_id.as_deref(), Some("blog_feed"));
        assert_eq!(event_names(&log), vec!["save-succeeded", "load-succeeded"]);
        assert_eq!(manager.last_saved_at(), Some(START));
    }

    #[test]
    fn test_round_trip_modulo_normalization() {
        let (mut manager, _, _) = manager();
        let document = json!({ "player": { "name": "Mina" }, "currencies": { "coins": 5 } });
        assert!(manager.save(&document, slot(2), &SaveContext::default()));

        let loaded = manager.load(slot(2)).unwrap();
        assert_eq!(loaded.document["player"], json!({ "name": "Mina" }));
        assert_eq!(loaded.document["currencies"], json!({ "coins": 5, "gems": 0, "hearts": 0 }));
        assert_eq!(loaded.document["pets"], json!([]));
        assert_eq!(loaded.document["activeShifts"], json!([]));
    }

    #[test]
    fn test_save_typed_state_directly() {
        let (mut manager, _, _) = manager();
        let state = CafeState::new_game("Mina");
        assert!(manager.save(&state, slot(1), &SaveContext::default()));

        let loaded = manager.load(slot(1)).unwrap();
        assert_eq!(CafeState::from_document(&loaded.document).unwrap(), state);
    }

    #[test]
    fn test_load_empty_slot_is_not_an_error() {
        let (mut manager, _, log) = manager();
        assert!(manager.load(slot(3)).is_none());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_second_save_rotates_previous_into_backup() {
        let (mut manager, clock, _) = manager();
        let first = json!({ "player": { "name": "first" } });
        let second = json!({ "player": { "name": "second" } });

        assert!(manager.save(&first, slot(1), &SaveContext::default()));
        let after_first = manager
            .storage()
            .get_item(&manager.keys().primary(slot(1)))
            .unwrap();
        assert_eq!(
            manager.storage().get_item(&manager.keys().backup(slot(1))).unwrap(),
            None
        );

        clock.advance(1_000);
        assert!(manager.save(&second, slot(1), &SaveContext::default()));

        let primary = manager
            .storage()
            .get_item(&manager.keys().primary(slot(1)))
            .unwrap()
            .unwrap();
        let backup = manager
            .storage()
            .get_item(&manager.keys().backup(slot(1)))
            .unwrap();
        assert_eq!(backup, after_first);

        let primary: SaveEnvelope = serde_json::from_str(&primary).unwrap();
        assert_eq!(primary.document, second);
        assert_eq!(primary.metadata.saved_at_epoch_millis, START + 1_000);
    }

    #[test]
    fn test_corrupt_primary_recovers_from_backup() {
        let (mut manager, _, log) = manager();
        let older = json!({ "player": { "name": "older" } });
        assert!(manager.save(&older, slot(1), &SaveContext::default()));
        assert!(manager.save(&json!({ "player": { "name": "newer" } }), slot(1), &SaveContext::default()));

        let key = manager.keys().primary(slot(1));
        manager.storage_mut().set_item(&key, "{\"metadata\": {trunc").unwrap();

        let loaded = manager.load(slot(1)).unwrap();
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.integrity, IntegrityStatus::Unchecked);
        assert_eq!(loaded.document["player"]["name"], json!("older"));
        assert_eq!(log.borrow().last().unwrap().name(), "load-succeeded");
    }

    #[test]
    fn test_invalid_primary_recovers_from_backup() {
        let (mut manager, _, _) = manager();
        assert!(manager.save(&json!({ "pets": [1] }), slot(1), &SaveContext::default()));
        let key = manager.keys().primary(slot(1));
        write_raw(&mut manager, key, &json!({ "metadata": {} }));
        // The backup is whatever the primary held before: write one by hand
        let backup_key = manager.keys().backup(slot(1));
        write_raw(&mut manager, backup_key, &raw_envelope("1.2.0", json!({ "pets": [2] })));

        let loaded = manager.load(slot(1)).unwrap();
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.document["pets"], json!([2]));
    }

    #[test]
    fn test_corrupt_primary_without_backup_fails() {
        let (mut manager, _, log) = manager();
        let key = manager.keys().primary(slot(1));
        manager.storage_mut().set_item(&key, "not json at all").unwrap();

        assert!(manager.load(slot(1)).is_none());
        let events = log.borrow();
        assert!(matches!(
            events.as_slice(),
            [PersistenceEvent::LoadFailed { cause: PersistenceError::CorruptSave(_), .. }]
        ));
    }

    #[test]
    fn test_future_major_version_is_rejected_without_migration() {
        fn must_not_run(_: &mut Value) {
            panic!("migration ran for a future save");
        }
        let registry = MigrationRegistry::builder(Version::new(1, 2, 0))
            .register(MigrationStep::new(Version::new(1, 0, 0), "boom", must_not_run))
            .build();
        let (mut manager, _, log) = manager_with(registry);

        let key = manager.keys().primary(slot(1));
        write_raw(&mut manager, key, &raw_envelope("2.0.0", json!({})));
        // A backup alone does not rescue a future-version primary
        let backup_key = manager.keys().backup(slot(1));
        write_raw(&mut manager, backup_key, &raw_envelope("2.0.0", json!({})));

        assert!(manager.load(slot(1)).is_none());
        assert!(matches!(
            log.borrow().as_slice(),
            [PersistenceEvent::LoadFailed { cause: PersistenceError::UnsupportedVersion { .. }, .. }]
        ));
    }

    #[test]
    fn test_migration_adds_statistics_block() {
        fn add_statistics(document: &mut Value) {
            let player = document["player"].as_object_mut().unwrap();
            if !player.contains_key("statistics") {
                player.insert("statistics".to_string(), json!({ "shiftsCompleted": 0 }));
            }
        }
        let registry = MigrationRegistry::builder(Version::new(1, 1, 0))
            .register(MigrationStep::new(Version::new(1, 0, 0), "statistics", add_statistics))
            .build();
        let (mut manager, _, log) = manager_with(registry);

        let key = manager.keys().primary(slot(1));
        write_raw(&mut manager, key, &raw_envelope("1.0.0", json!({ "player": { "name": "Mina" } })));

        let loaded = manager.load(slot(1)).unwrap();
        assert_eq!(loaded.document["player"]["statistics"], json!({ "shiftsCompleted": 0 }));
        assert_eq!(loaded.metadata.schema_version, "1.1.0");
        let report = loaded.migration.unwrap();
        assert_eq!(report.steps_applied, 1);
        assert_eq!(report.original_version, Version::new(1, 0, 0));
        match &log.borrow()[0] {
            PersistenceEvent::LoadSucceeded { metadata, .. } => {
                assert_eq!(metadata.schema_version, "1.1.0")
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_shipped_migrations_match_native_document() {
        let (mut manager, _, _) = manager();
        let legacy = json!({
            "player": { "name": "Mina", "cafeName": "Mina's Cafe", "level": 1, "experience": 0, "subscribers": 0 },
            "currencies": { "coins": 500, "gems": 0, "hearts": 0 },
            "pets": [],
            "npcBonds": { "barista_rin": { "affection": 0, "messagesExchanged": 0 } },
            "memories": [],
            "activeShifts": [],
            "session": { "currentScreen": null, "tutorialComplete": false },
        });
        let key = manager.keys().primary(slot(1));
        write_raw(&mut manager, key, &raw_envelope(KnownSchema::V1_0_0.as_str(), legacy));

        let loaded = manager.load(slot(1)).unwrap();

        let mut native = CafeState::new_game("Mina");
        native
            .npc_bonds
            .insert("barista_rin".to_string(), Default::default());
        let native = native.to_document().unwrap();

        assert_eq!(
            loaded.document["player"]["statistics"],
            serde_json::to_value(PlayerStatistics::default()).unwrap()
        );
        assert_eq!(loaded.document["memories"], native["memories"]);
        assert_eq!(loaded.document["npcBonds"], native["npcBonds"]);
        assert_eq!(loaded.document, native);
    }

    #[test]
    fn test_integrity_mismatch_is_advisory() {
        let (mut manager, _, log) = manager();
        assert!(manager.save(&json!({ "currencies": { "coins": 10 } }), slot(1), &SaveContext::default()));

        let key = manager.keys().primary(slot(1));
        let text = manager.storage().get_item(&key).unwrap().unwrap();
        let tampered = text.replace("\"coins\":10", "\"coins\":99999");
        assert_ne!(text, tampered);
        manager.storage_mut().set_item(&key, &tampered).unwrap();

        let loaded = manager.load(slot(1)).unwrap();
        assert!(loaded.integrity.is_mismatch());
        assert_eq!(loaded.source, LoadSource::Primary);
        assert_eq!(loaded.document["currencies"]["coins"], json!(99999));
        assert_eq!(event_names(&log).last(), Some(&"load-succeeded"));
    }

    #[test]
    fn test_list_slots_synthesizes_placeholders() {
        let (mut manager, _, _) = manager();
        let context = SaveContext::new(42)
            .with_display_name("Sunday brunch")
            .with_thumbnail("data:image/png;base64,AAAA");
        assert!(manager.save(&sample_document(), slot(2), &context));

        let slots = manager.list_slots(3);
        assert_eq!(slots.len(), 3);
        assert_eq!(
            slots.iter().map(|d| d.slot_id).collect::<Vec<_>>(),
            vec![slot(1), slot(2), slot(3)]
        );
        assert!(slots[0].is_empty());
        assert_eq!(slots[0].display_name, "Slot 1");
        assert!(!slots[1].is_empty());
        assert_eq!(slots[1].display_name, "Sunday brunch");
        assert_eq!(slots[1].metadata.cumulative_play_seconds, 42);
        assert_eq!(slots[1].thumbnail.as_deref(), Some("data:image/png;base64,AAAA"));
        assert!(slots[2].is_empty());

        // Exactly N, even past the configured slot count
        assert_eq!(manager.list_slots(5).len(), 5);
        assert_eq!(manager.list_slots(0).len(), 0);
        assert_eq!(manager.list_all_slots().len(), 3);
    }

    #[test]
    fn test_list_slots_never_reads_documents() {
        let (mut manager, _, _) = manager();
        assert!(manager.save(&sample_document(), slot(1), &SaveContext::default()));
        let key = manager.keys().primary(slot(1));
        manager.storage_mut().set_item(&key, "garbage").unwrap();

        let slots = manager.list_slots(3);
        assert!(!slots[0].is_empty());
    }

    #[test]
    fn test_display_name_kept_across_saves() {
        let (mut manager, _, _) = manager();
        let named = SaveContext::default().with_display_name("Cozy run");
        assert!(manager.save(&json!({}), slot(1), &named));
        assert!(manager.save(&json!({}), slot(1), &SaveContext::default()));
        assert_eq!(manager.list_slots(1)[0].display_name, "Cozy run");
    }

    #[test]
    fn test_descriptor_tracks_last_successful_write() {
        let (mut manager, clock, log) = manager();
        assert!(manager.save(&json!({}), slot(1), &SaveContext::new(10)));

        clock.advance(5_000);
        manager.storage_mut().set_unavailable(true);
        assert!(!manager.save(&json!({}), slot(1), &SaveContext::new(20)));
        manager.storage_mut().set_unavailable(false);

        let descriptor = &manager.list_slots(1)[0];
        assert_eq!(descriptor.metadata.cumulative_play_seconds, 10);
        assert_eq!(descriptor.metadata.saved_at_epoch_millis, START);
        assert_eq!(manager.last_saved_at(), Some(START));
        assert!(matches!(
            log.borrow().last(),
            Some(PersistenceEvent::SaveFailed { cause: PersistenceError::StorageUnavailable(_), .. })
        ));
    }

    #[test]
    fn test_quota_exceeded_reports_failure() {
        let clock = ManualClock::new(START);
        let mut manager = PersistenceManager::new(
            MemoryStorage::with_quota(64),
            clock,
            default_registry(),
            PersistenceSettings::default(),
        );
        let pets = vec!["a very long pet name"; 20];
        let big = json!({ "pets": pets });
        assert!(!manager.save(&big, slot(1), &SaveContext::default()));
        assert!(manager.load(slot(1)).is_none());
        assert_eq!(manager.last_saved_at(), None);
    }

    #[test]
    fn test_unserializable_document_fails() {
        let (mut manager, _, log) = manager();
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);

        assert!(!manager.save(&bad, slot(1), &SaveContext::default()));
        assert!(matches!(
            log.borrow().as_slice(),
            [PersistenceEvent::SaveFailed { cause: PersistenceError::SerializationFailure(_), .. }]
        ));
        assert!(manager.storage().is_empty());
    }

    #[test]
    fn test_slot_outside_range_is_rejected() {
        let (mut manager, _, log) = manager();
        assert!(!manager.save(&json!({}), slot(4), &SaveContext::default()));
        assert!(manager.load(slot(4)).is_none());
        assert!(!manager.delete_slot(slot(4)));

        let events = log.borrow();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(
            e,
            PersistenceEvent::SaveFailed { cause: PersistenceError::InvalidSlot { max: 3, .. }, .. }
                | PersistenceEvent::LoadFailed { cause: PersistenceError::InvalidSlot { max: 3, .. }, .. }
        )));
    }

    #[test]
    fn test_delete_slot_keeps_backup() {
        let (mut manager, _, log) = manager();
        let first = json!({ "player": { "name": "first" } });
        assert!(manager.save(&first, slot(1), &SaveContext::default()));
        assert!(manager.save(&json!({ "player": { "name": "second" } }), slot(1), &SaveContext::default()));

        assert!(manager.delete_slot(slot(1)));
        assert!(manager.load(slot(1)).is_none());
        assert!(manager.list_slots(1)[0].is_empty());
        assert_eq!(event_names(&log).last(), Some(&"slot-deleted"));

        let recovered = manager.recover(slot(1)).unwrap();
        assert_eq!(recovered, first);
    }

    #[test]
    fn test_delete_slot_failure_returns_false() {
        let (mut manager, _, log) = manager();
        assert!(manager.save(&json!({}), slot(1), &SaveContext::default()));
        manager.storage_mut().set_unavailable(true);

        assert!(!manager.delete_slot(slot(1)));
        assert_eq!(event_names(&log), vec!["save-succeeded"]);
    }

    #[test]
    fn test_unavailable_storage_on_load_does_not_recover() {
        let (mut manager, _, log) = manager();
        assert!(manager.save(&json!({}), slot(1), &SaveContext::default()));
        assert!(manager.save(&json!({}), slot(1), &SaveContext::default()));
        manager.storage_mut().set_unavailable(true);

        assert!(manager.load(slot(1)).is_none());
        assert!(matches!(
            log.borrow().last(),
            Some(PersistenceEvent::LoadFailed { cause: PersistenceError::StorageUnavailable(_), .. })
        ));
    }

    #[test]
    fn test_recover_handles_missing_and_garbage_backup() {
        let (mut manager, _, _) = manager();
        assert_eq!(manager.recover(slot(1)), None);

        let key = manager.keys().backup(slot(1));
        manager.storage_mut().set_item(&key, "][").unwrap();
        assert_eq!(manager.recover(slot(1)), None);

        write_raw(&mut manager, key.clone(), &json!({ "metadata": {} }));
        assert_eq!(manager.recover(slot(1)), None);

        // Metadata is not required on the recovery path
        write_raw(&mut manager, key, &json!({ "document": { "pets": [] } }));
        assert_eq!(manager.recover(slot(1)), Some(json!({ "pets": [] })));
    }

    #[test]
    fn test_corrupt_index_is_rebuilt_by_next_save() {
        let (mut manager, _, _) = manager();
        let index_key = manager.keys().index();
        manager.storage_mut().set_item(&index_key, "{{{{").unwrap();

        assert!(manager.list_slots(3).iter().all(|d| d.is_empty()));
        assert!(manager.save(&json!({}), slot(3), &SaveContext::default()));

        let slots = manager.list_slots(3);
        assert!(!slots[2].is_empty());
        assert!(SlotIndex::from_json(&manager.storage().get_item(&index_key).unwrap().unwrap()).is_ok());
    }

    #[test]
    fn test_open_reads_stored_settings() {
        let mut storage = MemoryStorage::new();
        PersistenceSettings {
            slot_count: 5,
            ..PersistenceSettings::default()
        }
        .save(&mut storage)
        .unwrap();

        let manager = PersistenceManager::open(storage, ManualClock::new(START));
        assert_eq!(manager.settings().slot_count, 5);
        assert_eq!(manager.list_all_slots().len(), 5);
        assert_eq!(manager.registry().current_version(), &KnownSchema::LATEST.version());
    }

    /// Memory storage whose slot index writes can be made to fail
    #[derive(Default)]
    struct FlakyIndexStorage {
        inner: MemoryStorage,
        fail_index: bool,
    }

    impl StorageBackend for FlakyIndexStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get_item(key)
        }

        fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.fail_index && key.ends_with("_save_index") {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
            self.inner.set_item(key, value)
        }

        fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
            self.inner.remove_item(key)
        }
    }

    #[test]
    fn test_index_over_quota_leaves_new_slot_empty() {
        let document = json!({ "player": { "name": "new" } });

        // Same clock and document, so the primary record is byte-identical
        let (mut sizing, _, _) = manager();
        assert!(sizing.save(&document, slot(1), &SaveContext::default()));
        let key = sizing.keys().primary(slot(1));
        let primary = sizing.storage().get_item(&key).unwrap().unwrap();
        let quota = key.encode_utf16().count() + primary.encode_utf16().count() + 10;

        let mut manager = PersistenceManager::new(
            MemoryStorage::with_quota(quota),
            ManualClock::new(START),
            default_registry(),
            PersistenceSettings::default(),
        );
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        manager.subscribe(move |e| sink.borrow_mut().push(e.clone()));

        assert!(!manager.save(&document, slot(1), &SaveContext::default()));
        assert!(manager.load(slot(1)).is_none());
        assert!(manager.list_slots(1)[0].is_empty());
        assert_eq!(manager.last_saved_at(), None);
        assert!(manager.storage().is_empty());
        assert!(matches!(
            log.borrow().as_slice(),
            [PersistenceEvent::SaveFailed { cause: PersistenceError::StorageUnavailable(_), .. }]
        ));
    }

    #[test]
    fn test_index_write_failure_restores_previous_records() {
        let clock = ManualClock::new(START);
        let mut manager = PersistenceManager::new(
            FlakyIndexStorage::default(),
            clock.clone(),
            default_registry(),
            PersistenceSettings::default(),
        );
        assert!(manager.save(&json!({ "player": { "name": "first" } }), slot(1), &SaveContext::default()));
        clock.advance(1_000);
        assert!(manager.save(&json!({ "player": { "name": "second" } }), slot(1), &SaveContext::default()));

        let keys = manager.keys().clone();
        let snapshot = |m: &PersistenceManager<FlakyIndexStorage, ManualClock>| {
            [keys.primary(slot(1)), keys.backup(slot(1)), keys.index()]
                .map(|key| m.storage().get_item(&key).unwrap())
        };
        let before = snapshot(&manager);

        clock.advance(1_000);
        manager.storage_mut().fail_index = true;
        assert!(!manager.save(&json!({ "player": { "name": "third" } }), slot(1), &SaveContext::default()));
        assert_eq!(snapshot(&manager), before);
        assert_eq!(manager.last_saved_at(), Some(START + 1_000));

        manager.storage_mut().fail_index = false;
        let loaded = manager.load(slot(1)).unwrap();
        assert_eq!(loaded.document["player"]["name"], json!("second"));
        assert_eq!(manager.recover(slot(1)), Some(json!({ "player": { "name": "first" } })));
    }

    #[test]
    fn test_backup_without_metadata_loads_with_empty_metadata() {
        let (mut manager, _, log) = manager();
        let key = manager.keys().primary(slot(1));
        manager.storage_mut().set_item(&key, "garbage{").unwrap();
        let backup_key = manager.keys().backup(slot(1));
        write_raw(&mut manager, backup_key, &json!({ "document": { "pets": [7] } }));

        let loaded = manager.load(slot(1)).unwrap();
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.metadata, SaveMetadata::empty());
        assert_eq!(loaded.document["pets"], json!([7]));
        match log.borrow().as_slice() {
            [PersistenceEvent::LoadSucceeded { metadata, .. }] => {
                assert_eq!(metadata.saved_at_epoch_millis, 0)
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_slot_zero_is_rejected() {
        let (mut manager, _, log) = manager();
        let zero = SlotId::from_number(0);

        assert!(!manager.save(&json!({}), zero, &SaveContext::default()));
        assert!(manager.load(zero).is_none());
        assert!(manager.recover(zero).is_none());
        assert!(!manager.delete_slot(zero));
        assert!(manager.storage().is_empty());

        let events = log.borrow();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            PersistenceEvent::SaveFailed { cause: PersistenceError::InvalidSlot { slot, .. }, .. }
                if slot.as_str() == "slot_0"
        ));
        assert!(matches!(
            &events[1],
            PersistenceEvent::LoadFailed { cause: PersistenceError::InvalidSlot { .. }, .. }
        ));
    }

    #[test]
    fn test_document_from_bad_json_reports_save_failure() {
        let (mut manager, _, log) = manager();
        assert_eq!(
            manager.document_from_json(slot(2), r#"{"pets": [1]}"#),
            Some(json!({ "pets": [1] }))
        );
        assert!(log.borrow().is_empty());

        assert_eq!(manager.document_from_json(slot(2), r#"{"pets": [1"#), None);
        assert!(matches!(
            log.borrow().as_slice(),
            [PersistenceEvent::SaveFailed { slot: failed, cause: PersistenceError::SerializationFailure(_) }]
                if *failed == slot(2)
        ));
    }

    proptest! {
        #[test]
        fn prop_save_load_round_trip(
            name in "[A-Za-z]{1,12}",
            coins in any::<u32>(),
            play in any::<u32>(),
            slot_no in 1u8..=3,
        ) {
            let (mut manager, _, _) = manager();
            let mut state = CafeState::new_game(&name);
            state.currencies.coins = u64::from(coins);
            let document = state.to_document().unwrap();

            prop_assert!(manager.save(&document, slot(slot_no), &SaveContext::new(u64::from(play))));
            let loaded = manager.load(slot(slot_no)).unwrap();
            prop_assert_eq!(loaded.document, document);
            prop_assert_eq!(loaded.metadata.cumulative_play_seconds, u64::from(play));
            prop_assert_eq!(loaded.integrity, IntegrityStatus::Verified);
        }
    }
}
