//! Cafe game state
//!
//! The typed shape of the document the game persists. The persistence layer
//! itself only sees JSON; this model is what the game builds new saves from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consts::STARTING_COINS;

/// Lifetime counters shown on the profile screen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatistics {
    pub shifts_completed: u64,
    pub memories_published: u64,
    pub gacha_pulls: u64,
    pub total_coins_earned: u64,
    pub pets_collected: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub name: String,
    pub cafe_name: String,
    pub level: u32,
    pub experience: u64,
    /// Followers on the in-game social feed
    pub subscribers: u64,
    #[serde(default)]
    pub statistics: PlayerStatistics,
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            cafe_name: String::new(),
            level: 1,
            experience: 0,
            subscribers: 0,
            statistics: PlayerStatistics::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currencies {
    pub coins: u64,
    pub gems: u64,
    pub hearts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    #[default]
    Common,
    Rare,
    Epic,
    Legendary,
}

/// A collectible pet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pet {
    pub id: String,
    pub name: String,
    pub species: String,
    pub rarity: Rarity,
    pub level: u32,
    /// Cafe section the pet is staffing, if any
    #[serde(default)]
    pub assigned_section: Option<String>,
}

/// Relationship with one NPC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcBond {
    pub affection: u32,
    pub messages_exchanged: u32,
    /// Memory ids shared with this NPC
    #[serde(default)]
    pub shared_memories: Vec<String>,
}

/// A narrative memory produced by a shift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub pet_id: Option<String>,
    pub created_at: u64,
    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memories {
    pub unpublished: Vec<Memory>,
    pub published: Vec<Memory>,
}

/// A running timed shift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: String,
    pub section_id: String,
    pub pet_ids: Vec<String>,
    pub started_at: u64,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub current_screen: Option<String>,
    #[serde(default)]
    pub tutorial_complete: bool,
}

/// Everything a save slot holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CafeState {
    pub player: PlayerProfile,
    pub currencies: Currencies,
    pub pets: Vec<Pet>,
    pub npc_bonds: BTreeMap<String, NpcBond>,
    pub memories: Memories,
    pub active_shifts: Vec<Shift>,
    pub session: Session,
}

impl CafeState {
    /// Fresh state for a new player
    pub fn new_game(player_name: &str) -> Self {
        Self {
            player: PlayerProfile {
                name: player_name.to_string(),
                cafe_name: format!("{}'s Cafe", player_name),
                ..PlayerProfile::default()
            },
            currencies: Currencies {
                coins: STARTING_COINS,
                ..Currencies::default()
            },
            ..Self::default()
        }
    }

    /// Render as a current-schema JSON document
    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Read back from a (normalized, current-schema) document
    pub fn from_document(document: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(document)
    }

    /// Apply the result of a completed shift
    pub fn record_shift(&mut self, shift_id: &str, coins_earned: u64, memory: Option<Memory>) {
        self.active_shifts.retain(|s| s.id != shift_id);
        self.currencies.coins += coins_earned;
        self.player.statistics.shifts_completed += 1;
        self.player.statistics.total_coins_earned += coins_earned;
        if let Some(memory) = memory {
            self.memories.unpublished.push(memory);
        }
    }

    /// Move a memory to the published feed; false if it is not unpublished
    pub fn publish_memory(&mut self, memory_id: &str) -> bool {
        let Some(pos) = self
            .memories
            .unpublished
            .iter()
            .position(|m| m.id == memory_id)
        else {
            return false;
        };
        let mut memory = self.memories.unpublished.remove(pos);
        memory.published = true;
        self.memories.published.push(memory);
        self.player.statistics.memories_published += 1;
        true
    }

    /// Add a pet to the roster (from a gacha pull)
    pub fn add_pet(&mut self, pet: Pet) {
        self.pets.push(pet);
        self.player.statistics.gacha_pulls += 1;
        self.player.statistics.pets_collected = self.pets.len() as u64;
    }
}
