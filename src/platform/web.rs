//! JS-facing save facade (WASM only)
//!
//! The UI layer hands documents over as JSON text and gets JSON text back.
//! Persistence events are mirrored to the browser console.

use serde_json::Value;
use wasm_bindgen::prelude::*;

use super::storage::LocalStorage;
use super::time::SystemClock;
use crate::persistence::{
    AutoSaveOutcome, AutoSaver, LifecycleEvent, PersistenceEvent, PersistenceManager,
    SaveContext, SlotId,
};

#[wasm_bindgen]
pub struct CafeSaves {
    manager: PersistenceManager<LocalStorage, SystemClock>,
    autosaver: AutoSaver,
}

#[wasm_bindgen]
impl CafeSaves {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<CafeSaves, JsValue> {
        let storage = LocalStorage::open().map_err(|e| JsValue::from_str(&e.to_string()))?;
        let mut manager = PersistenceManager::open(storage, SystemClock);
        manager.subscribe(|event| match event {
            PersistenceEvent::SaveFailed { slot, cause }
            | PersistenceEvent::LoadFailed { slot, cause } => {
                log::warn!("[{}] {}: {}", event.name(), slot, cause)
            }
            _ => log::info!("[{}]", event.name()),
        });
        let autosaver = AutoSaver::for_manager(&manager);
        Ok(Self { manager, autosaver })
    }

    /// Save a JSON document; false on any failure
    pub fn save(
        &mut self,
        slot: u8,
        document_json: &str,
        play_seconds: f64,
        screen_id: Option<String>,
        display_name: Option<String>,
    ) -> bool {
        let Some((slot, document, mut context)) =
            self.request(slot, document_json, play_seconds, screen_id)
        else {
            return false;
        };
        context.display_name = display_name;
        self.manager.save(&document, slot, &context)
    }

    /// Loaded document as JSON, or undefined
    pub fn load(&mut self, slot: u8) -> Option<String> {
        self.manager
            .load(SlotId::from_number(slot))
            .map(|loaded| loaded.document.to_string())
    }

    /// Slot descriptors as a JSON array
    #[wasm_bindgen(js_name = listSlots)]
    pub fn list_slots(&self) -> String {
        serde_json::to_string(&self.manager.list_all_slots()).unwrap_or_else(|_| "[]".to_string())
    }

    #[wasm_bindgen(js_name = deleteSlot)]
    pub fn delete_slot(&mut self, slot: u8) -> bool {
        self.manager.delete_slot(SlotId::from_number(slot))
    }

    /// Backup document as JSON, or undefined
    pub fn recover(&self, slot: u8) -> Option<String> {
        self.manager
            .recover(SlotId::from_number(slot))
            .map(|document| document.to_string())
    }

    /// Forward a game lifecycle notification; true if it produced a save
    #[wasm_bindgen(js_name = notifyLifecycle)]
    pub fn notify_lifecycle(
        &mut self,
        event: &str,
        slot: u8,
        document_json: &str,
        play_seconds: f64,
        screen_id: Option<String>,
    ) -> bool {
        let Some(event) = LifecycleEvent::from_name(event) else {
            log::warn!("Unknown lifecycle event '{}'", event);
            return false;
        };
        let Some((slot, document, context)) =
            self.request(slot, document_json, play_seconds, screen_id)
        else {
            return false;
        };
        self.autosaver
            .on_lifecycle(event, &mut self.manager, slot, &document, &context)
            == AutoSaveOutcome::Saved
    }

    /// Periodic auto-save; call once a second or so
    pub fn tick(
        &mut self,
        slot: u8,
        document_json: &str,
        play_seconds: f64,
        screen_id: Option<String>,
    ) -> bool {
        let Some((slot, document, context)) =
            self.request(slot, document_json, play_seconds, screen_id)
        else {
            return false;
        };
        self.autosaver
            .tick(&mut self.manager, slot, &document, &context)
            == AutoSaveOutcome::Saved
    }
}

impl CafeSaves {
    /// Slot numbers are range-checked by the manager, so 0 fails like any
    /// other out-of-range slot. Bad JSON reports `SaveFailed` here.
    fn request(
        &mut self,
        slot: u8,
        document_json: &str,
        play_seconds: f64,
        screen_id: Option<String>,
    ) -> Option<(SlotId, Value, SaveContext)> {
        let slot = SlotId::from_number(slot);
        let document = self.manager.document_from_json(slot, document_json)?;
        let mut context = SaveContext::new(play_seconds.max(0.0) as u64);
        context.last_active_screen_id = screen_id;
        Some((slot, document, context))
    }
}
