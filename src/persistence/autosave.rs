//! Auto-save on game lifecycle events and on a fixed period
//!
//! Event-triggered saves are debounced, not queued: a trigger that arrives
//! within the debounce window after the last successful save is dropped.

use serde::Serialize;

use super::envelope::{SaveContext, SlotId};
use super::events::PersistenceEvent;
use super::manager::PersistenceManager;
use crate::platform::{Clock, StorageBackend};

/// Game notifications that should trigger a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    ShiftCompleted,
    GachaPullResolved,
    MemoryPublished,
    PageUnloading,
}

impl LifecycleEvent {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleEvent::ShiftCompleted => "shift-completed",
            LifecycleEvent::GachaPullResolved => "gacha-pull-resolved",
            LifecycleEvent::MemoryPublished => "memory-published",
            LifecycleEvent::PageUnloading => "page-unloading",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "shift-completed" => Some(LifecycleEvent::ShiftCompleted),
            "gacha-pull-resolved" => Some(LifecycleEvent::GachaPullResolved),
            "memory-published" => Some(LifecycleEvent::MemoryPublished),
            "page-unloading" => Some(LifecycleEvent::PageUnloading),
            _ => None,
        }
    }
}

/// What an auto-save attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSaveOutcome {
    Saved,
    Failed,
    /// Dropped: a save succeeded too recently
    Debounced,
    /// Periodic save not due yet
    NotDue,
}

#[derive(Debug, Clone)]
pub struct AutoSaver {
    debounce_ms: u64,
    interval_ms: u64,
    last_periodic_at: u64,
}

impl AutoSaver {
    /// `now_millis` starts the periodic timer
    pub fn new(debounce_ms: u64, interval_ms: u64, now_millis: u64) -> Self {
        Self {
            debounce_ms,
            interval_ms,
            last_periodic_at: now_millis,
        }
    }

    /// Timings from the manager's settings, timer starting now
    pub fn for_manager<S: StorageBackend, C: Clock>(manager: &PersistenceManager<S, C>) -> Self {
        let settings = manager.settings();
        Self::new(
            settings.autosave_debounce_ms,
            settings.autosave_interval_ms,
            manager.now_millis(),
        )
    }

    /// React to a lifecycle notification
    pub fn on_lifecycle<S, C, D>(
        &mut self,
        event: LifecycleEvent,
        manager: &mut PersistenceManager<S, C>,
        slot: SlotId,
        document: &D,
        context: &SaveContext,
    ) -> AutoSaveOutcome
    where
        S: StorageBackend,
        C: Clock,
        D: Serialize + ?Sized,
    {
        manager.emit(PersistenceEvent::AutoSaveRequested);

        let now = manager.now_millis();
        if let Some(last) = manager.last_saved_at() {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.debounce_ms {
                log::debug!(
                    "Auto-save on {} dropped ({}ms since last save)",
                    event.name(),
                    elapsed
                );
                return AutoSaveOutcome::Debounced;
            }
        }

        log::debug!("Auto-save on {}", event.name());
        Self::save(manager, slot, document, context)
    }

    /// Periodic save; call from the game loop
    pub fn tick<S, C, D>(
        &mut self,
        manager: &mut PersistenceManager<S, C>,
        slot: SlotId,
        document: &D,
        context: &SaveContext,
    ) -> AutoSaveOutcome
    where
        S: StorageBackend,
        C: Clock,
        D: Serialize + ?Sized,
    {
        let now = manager.now_millis();
        if now.saturating_sub(self.last_periodic_at) < self.interval_ms {
            return AutoSaveOutcome::NotDue;
        }
        self.last_periodic_at = now;

        manager.emit(PersistenceEvent::AutoSaveRequested);
        log::debug!("Periodic auto-save");
        Self::save(manager, slot, document, context)
    }

    fn save<S, C, D>(
        manager: &mut PersistenceManager<S, C>,
        slot: SlotId,
        document: &D,
        context: &SaveContext,
    ) -> AutoSaveOutcome
    where
        S: StorageBackend,
        C: Clock,
        D: Serialize + ?Sized,
    {
        if manager.save(document, slot, context) {
            AutoSaveOutcome::Saved
        } else {
            AutoSaveOutcome::Failed
        }
    }
}
