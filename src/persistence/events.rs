//! Notifications announced to the rest of the application
//!
//! Subscribers run synchronously, in subscription order, on the thread
//! that performed the operation.

use super::envelope::{SaveMetadata, SlotId};
use super::error::PersistenceError;

/// Every notification the persistence layer emits
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceEvent {
    SaveSucceeded { slot: SlotId, timestamp: u64 },
    SaveFailed { slot: SlotId, cause: PersistenceError },
    LoadSucceeded { slot: SlotId, metadata: SaveMetadata },
    LoadFailed { slot: SlotId, cause: PersistenceError },
    SlotDeleted { slot: SlotId },
    AutoSaveRequested,
}

impl PersistenceEvent {
    /// Stable event name for logs and the JS bridge
    pub fn name(&self) -> &'static str {
        match self {
            PersistenceEvent::SaveSucceeded { .. } => "save-succeeded",
            PersistenceEvent::SaveFailed { .. } => "save-failed",
            PersistenceEvent::LoadSucceeded { .. } => "load-succeeded",
            PersistenceEvent::LoadFailed { .. } => "load-failed",
            PersistenceEvent::SlotDeleted { .. } => "slot-deleted",
            PersistenceEvent::AutoSaveRequested => "auto-save-requested",
        }
    }

    /// Slot the event concerns, if any
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            PersistenceEvent::SaveSucceeded { slot, .. }
            | PersistenceEvent::SaveFailed { slot, .. }
            | PersistenceEvent::LoadSucceeded { slot, .. }
            | PersistenceEvent::LoadFailed { slot, .. }
            | PersistenceEvent::SlotDeleted { slot } => Some(*slot),
            PersistenceEvent::AutoSaveRequested => None,
        }
    }
}

/// Handle returned by `EventBus::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&PersistenceEvent)>;

/// Publish/subscribe hub for `PersistenceEvent`s
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&PersistenceEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, event: &PersistenceEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.listeners.len())
            .finish()
    }
}
