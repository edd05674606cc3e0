//! Schema migration chain
//!
//! Each step declares the schema version it upgrades *from*. Loading a save
//! written at version `V` applies every registered step with
//! `V <= from < current`, ascending. Versions with no registered step are
//! skipped, so every step must be safe to run on a document that already
//! has its change (check for absence before adding).

use std::fmt;

use semver::Version;
use serde_json::{Map, Value, json};

use super::error::PersistenceError;
use crate::state::PlayerStatistics;

/// Schema versions this build has shipped, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KnownSchema {
    /// Launch format
    V1_0_0,
    /// Adds `player.statistics`
    V1_1_0,
    /// Splits `memories` into unpublished/published; NPC bonds gain `sharedMemories`
    V1_2_0,
}

impl KnownSchema {
    pub const ALL: [KnownSchema; 3] = [KnownSchema::V1_0_0, KnownSchema::V1_1_0, KnownSchema::V1_2_0];
    pub const LATEST: KnownSchema = KnownSchema::V1_2_0;

    pub fn as_str(self) -> &'static str {
        match self {
            KnownSchema::V1_0_0 => "1.0.0",
            KnownSchema::V1_1_0 => "1.1.0",
            KnownSchema::V1_2_0 => "1.2.0",
        }
    }

    pub fn version(self) -> Version {
        match self {
            KnownSchema::V1_0_0 => Version::new(1, 0, 0),
            KnownSchema::V1_1_0 => Version::new(1, 1, 0),
            KnownSchema::V1_2_0 => Version::new(1, 2, 0),
        }
    }

    pub fn from_version(version: &Version) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.version() == *version)
    }
}

/// Parse a stored schema version.
///
/// Accepts full semver plus the short `"1"` / `"1.1"` forms older builds wrote.
pub fn parse_schema_version(s: &str) -> Result<Version, PersistenceError> {
    let trimmed = s.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    let parts: Vec<&str> = trimmed.split('.').collect();
    let numeric = parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if numeric && parts.len() < 3 {
        let mut padded = parts.join(".");
        for _ in parts.len()..3 {
            padded.push_str(".0");
        }
        if let Ok(version) = Version::parse(&padded) {
            return Ok(version);
        }
    }

    Err(PersistenceError::ValidationFailure(format!(
        "invalid schema version '{s}'"
    )))
}

/// A single upgrade from `from` to the next schema version
#[derive(Clone)]
pub struct MigrationStep {
    pub from: Version,
    pub description: &'static str,
    pub apply: fn(&mut Value),
}

impl MigrationStep {
    pub fn new(from: Version, description: &'static str, apply: fn(&mut Value)) -> Self {
        Self {
            from,
            description,
            apply,
        }
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from.to_string())
            .field("description", &self.description)
            .finish()
    }
}

/// Result of running the chain on one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version the document was stored at
    pub original_version: Version,
    /// Version the document is now at
    pub final_version: Version,
    pub steps_applied: usize,
    /// Descriptions of each applied step, in order
    pub step_descriptions: Vec<&'static str>,
}

impl MigrationReport {
    pub fn migrated(&self) -> bool {
        self.original_version != self.final_version
    }
}

/// Immutable set of migration steps targeting one running version
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    steps: Vec<MigrationStep>,
    current: Version,
}

/// Collects steps at startup; `build` freezes them
#[derive(Debug)]
pub struct MigrationRegistryBuilder {
    steps: Vec<MigrationStep>,
    current: Version,
}

impl MigrationRegistryBuilder {
    pub fn register(mut self, step: MigrationStep) -> Self {
        if self.steps.iter().any(|s| s.from == step.from) {
            log::warn!(
                "Multiple migration steps registered from {}; they run in registration order",
                step.from
            );
        }
        self.steps.push(step);
        self
    }

    pub fn build(mut self) -> MigrationRegistry {
        // Stable: equal `from` versions keep registration order
        self.steps.sort_by(|a, b| a.from.cmp(&b.from));
        MigrationRegistry {
            steps: self.steps,
            current: self.current,
        }
    }
}

impl MigrationRegistry {
    /// Registry with no steps
    pub fn new(current: Version) -> Self {
        Self {
            steps: Vec::new(),
            current,
        }
    }

    pub fn builder(current: Version) -> MigrationRegistryBuilder {
        MigrationRegistryBuilder {
            steps: Vec::new(),
            current,
        }
    }

    /// The running schema version
    pub fn current_version(&self) -> &Version {
        &self.current
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that apply to a document stored at `stored`, in order
    pub fn plan(&self, stored: &Version) -> Vec<&MigrationStep> {
        self.steps
            .iter()
            .filter(|s| &s.from >= stored && s.from < self.current)
            .collect()
    }

    /// Bring `document` from `stored` up to the running version
    pub fn migrate(&self, document: &mut Value, stored: &Version) -> MigrationReport {
        if stored >= &self.current {
            return MigrationReport {
                original_version: stored.clone(),
                final_version: stored.clone(),
                steps_applied: 0,
                step_descriptions: Vec::new(),
            };
        }

        let plan = self.plan(stored);
        if plan.is_empty() {
            log::debug!(
                "No migration steps registered between {} and {}",
                stored,
                self.current
            );
        }

        let mut step_descriptions = Vec::with_capacity(plan.len());
        for (i, step) in plan.iter().enumerate() {
            log::info!(
                "Migration step {}/{}: from {} ({})",
                i + 1,
                plan.len(),
                step.from,
                step.description
            );
            (step.apply)(document);
            step_descriptions.push(step.description);
        }

        MigrationReport {
            original_version: stored.clone(),
            final_version: self.current.clone(),
            steps_applied: step_descriptions.len(),
            step_descriptions,
        }
    }
}

/// Registry with every shipped step, targeting `KnownSchema::LATEST`
pub fn default_registry() -> MigrationRegistry {
    MigrationRegistry::builder(KnownSchema::LATEST.version())
        .register(MigrationStep::new(
            KnownSchema::V1_0_0.version(),
            "add player statistics block",
            add_player_statistics,
        ))
        .register(MigrationStep::new(
            KnownSchema::V1_1_0.version(),
            "split memories by published state; add NPC shared memories",
            split_memories_and_bond_history,
        ))
        .build()
}

// =============================================================================
// Shipped steps
// =============================================================================

/// 1.0.0 -> 1.1.0
pub fn add_player_statistics(document: &mut Value) {
    let Some(root) = document.as_object_mut() else {
        return;
    };
    let player = root
        .entry("player")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(player) = player.as_object_mut() {
        if !player.contains_key("statistics") {
            player.insert(
                "statistics".to_string(),
                serde_json::to_value(PlayerStatistics::default()).unwrap_or_else(|_| json!({})),
            );
        }
    }
}

/// 1.1.0 -> 1.2.0
pub fn split_memories_and_bond_history(document: &mut Value) {
    let Some(root) = document.as_object_mut() else {
        return;
    };

    if let Some(Value::Array(flat)) = root.get_mut("memories") {
        let (published, unpublished): (Vec<Value>, Vec<Value>) = std::mem::take(flat)
            .into_iter()
            .partition(|m| m.get("published").and_then(Value::as_bool).unwrap_or(false));
        root.insert(
            "memories".to_string(),
            json!({ "unpublished": unpublished, "published": published }),
        );
    }

    if let Some(Value::Object(bonds)) = root.get_mut("npcBonds") {
        for bond in bonds.values_mut() {
            if let Some(bond) = bond.as_object_mut() {
                bond.entry("sharedMemories")
                    .or_insert_with(|| Value::Array(Vec::new()));
            }
        }
    }
}
