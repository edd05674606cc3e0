//! Stored record shapes: envelope, metadata, slots and the slot index

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::PersistenceError;
use super::migration::parse_schema_version;

/// The opaque aggregate game state persisted per save
pub type GameStateDocument = Value;

/// One of the fixed, 1-based save slots (`slot_1`, `slot_2`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotId(u8);

impl SlotId {
    const PREFIX: &'static str = "slot_";

    /// Slot number `n` (1-based); `None` for 0
    pub fn new(n: u8) -> Option<Self> {
        (n >= 1).then_some(Self(n))
    }

    /// Any raw slot number, 0 included. Operations on the manager reject
    /// numbers outside `1..=slot_count` with `InvalidSlot`.
    pub(crate) fn from_number(n: u8) -> Self {
        Self(n)
    }

    /// 1-based slot number
    pub fn number(self) -> u8 {
        self.0
    }

    /// The first `count` canonical slots in fixed order
    pub fn canonical(count: u8) -> impl Iterator<Item = SlotId> {
        (1..=count).map(SlotId)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for SlotId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::PREFIX)
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(SlotId::new)
            .ok_or_else(|| format!("not a slot id: '{s}'"))
    }
}

impl TryFrom<String> for SlotId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SlotId> for String {
    fn from(slot: SlotId) -> Self {
        slot.to_string()
    }
}

/// Metadata written alongside every save. Built fresh on each save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    /// Dot-separated schema version the document was written with
    pub schema_version: String,
    pub saved_at_epoch_millis: u64,
    pub cumulative_play_seconds: u64,
    #[serde(default)]
    pub last_active_screen_id: Option<String>,
    #[serde(default)]
    pub integrity_digest: Option<String>,
}

impl SaveMetadata {
    /// Zero-valued metadata used for empty slot placeholders
    pub fn empty() -> Self {
        Self {
            schema_version: String::new(),
            saved_at_epoch_millis: 0,
            cumulative_play_seconds: 0,
            last_active_screen_id: None,
            integrity_digest: None,
        }
    }

    /// Parsed schema version
    pub fn version(&self) -> Result<Version, PersistenceError> {
        parse_schema_version(&self.schema_version)
    }
}

/// The unit written to and read from a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveEnvelope {
    pub metadata: SaveMetadata,
    pub document: GameStateDocument,
}

impl SaveEnvelope {
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string(self).map_err(|e| PersistenceError::SerializationFailure(e.to_string()))
    }
}

/// Slot listing entry, built from the slot index without reading documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSlotDescriptor {
    pub slot_id: SlotId,
    pub display_name: String,
    pub metadata: SaveMetadata,
    /// Opaque encoded image (usually a data URL)
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl SaveSlotDescriptor {
    /// Placeholder for a slot with no stored record
    pub fn empty(slot: SlotId) -> Self {
        Self {
            slot_id: slot,
            display_name: default_display_name(slot),
            metadata: SaveMetadata::empty(),
            thumbnail: None,
        }
    }

    /// Check if this is an empty-slot placeholder
    pub fn is_empty(&self) -> bool {
        self.metadata.saved_at_epoch_millis == 0
    }
}

/// Display name used when the caller does not provide one
pub fn default_display_name(slot: SlotId) -> String {
    format!("Slot {}", slot.number())
}

/// One entry of the slot index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotIndexEntry {
    pub display_name: String,
    pub metadata: SaveMetadata,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Small record mapping slot id to its latest successfully written metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotIndex {
    entries: BTreeMap<SlotId, SlotIndexEntry>,
}

impl SlotIndex {
    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string(self).map_err(|e| PersistenceError::SerializationFailure(e.to_string()))
    }

    pub fn get(&self, slot: SlotId) -> Option<&SlotIndexEntry> {
        self.entries.get(&slot)
    }

    pub fn insert(&mut self, slot: SlotId, entry: SlotIndexEntry) {
        self.entries.insert(slot, entry);
    }

    pub fn remove(&mut self, slot: SlotId) -> Option<SlotIndexEntry> {
        self.entries.remove(&slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored descriptor for `slot`, or an empty placeholder
    pub fn descriptor(&self, slot: SlotId) -> SaveSlotDescriptor {
        match self.entries.get(&slot) {
            Some(entry) => SaveSlotDescriptor {
                slot_id: slot,
                display_name: entry.display_name.clone(),
                metadata: entry.metadata.clone(),
                thumbnail: entry.thumbnail.clone(),
            },
            None => SaveSlotDescriptor::empty(slot),
        }
    }
}

/// Caller-supplied inputs for a save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveContext {
    pub display_name: Option<String>,
    pub thumbnail: Option<String>,
    /// Total play time so far, tracked by the game loop
    pub cumulative_play_seconds: u64,
    /// Screen the player was on (e.g. "blog_feed")
    pub last_active_screen_id: Option<String>,
}

impl SaveContext {
    pub fn new(cumulative_play_seconds: u64) -> Self {
        Self {
            cumulative_play_seconds,
            ..Self::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_screen(mut self, screen_id: impl Into<String>) -> Self {
        self.last_active_screen_id = Some(screen_id.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }
}

/// Storage key layout under a shared prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    prefix: String,
}

impl StorageKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn primary(&self, slot: SlotId) -> String {
        format!("{}_save_{}", self.prefix, slot)
    }

    pub fn backup(&self, slot: SlotId) -> String {
        format!("{}_save_{}_backup", self.prefix, slot)
    }

    pub fn index(&self) -> String {
        format!("{}_save_index", self.prefix)
    }
}
