//! Activity catalog traits and implementations
//!
//! The catalog is loaded once at startup and only read afterwards.

use crate::catalog::definition::{ActivityCategory, ActivityDefinition, Position};
use crate::error::{MatchmakingError, Result};
use crate::types::ActivityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

/// Trait for looking up activity definitions
pub trait ActivityCatalog: Send + Sync {
    /// Definition of an activity
    fn get(&self, id: ActivityId) -> Option<&ActivityDefinition>;

    /// Concrete activities a random activity stands for. Empty for unknown
    /// or non-random ids.
    fn expand_random(&self, random_id: ActivityId) -> BTreeSet<ActivityId>;

    /// All known activity ids
    fn activity_ids(&self) -> Vec<ActivityId>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "activity")]
    activities: Vec<ActivityDefinition>,
}

/// Catalog backed by a fixed set of definitions
#[derive(Debug, Clone)]
pub struct StaticActivityCatalog {
    activities: BTreeMap<ActivityId, ActivityDefinition>,
    by_group: BTreeMap<u32, BTreeSet<ActivityId>>,
}

impl StaticActivityCatalog {
    /// Build a catalog, rejecting duplicate ids and ids that do not fit the
    /// composite key
    pub fn from_definitions(definitions: Vec<ActivityDefinition>) -> Result<Self> {
        let mut activities = BTreeMap::new();
        let mut by_group: BTreeMap<u32, BTreeSet<ActivityId>> = BTreeMap::new();

        for definition in definitions {
            if definition.id == 0 || definition.id > 0x00FF_FFFF {
                return Err(MatchmakingError::CatalogLoadFailed {
                    message: format!("Activity id out of range: {}", definition.id),
                }
                .into());
            }
            if definition.is_random() && definition.group_category == 0 {
                return Err(MatchmakingError::CatalogLoadFailed {
                    message: format!(
                        "Random activity {} has no group category",
                        definition.id
                    ),
                }
                .into());
            }
            if !definition.is_random() && definition.group_category != 0 {
                by_group
                    .entry(definition.group_category)
                    .or_default()
                    .insert(definition.id);
            }
            let id = definition.id;
            if activities.insert(id, definition).is_some() {
                return Err(MatchmakingError::CatalogLoadFailed {
                    message: format!("Duplicate activity id: {}", id),
                }
                .into());
            }
        }

        debug!(
            "Activity catalog built: {} activities in {} groups",
            activities.len(),
            by_group.len()
        );

        Ok(Self {
            activities,
            by_group,
        })
    }

    /// Parse a catalog from TOML made of `[[activity]]` tables
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(contents).map_err(|e| MatchmakingError::CatalogLoadFailed {
                message: e.to_string(),
            })?;
        Self::from_definitions(file.activities)
    }

    /// Load a catalog from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| MatchmakingError::CatalogLoadFailed {
                message: format!("{}: {}", path.display(), e),
            })?;
        let catalog = Self::from_toml_str(&contents)?;
        info!(
            "Loaded {} activities from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Built-in activity set used when no catalog file is configured
    pub fn with_defaults() -> Self {
        let entrance = |map_id, x, y, z| Position {
            map_id,
            x,
            y,
            z,
            orientation: 0.0,
        };

        let definitions = vec![
            ActivityDefinition::new(4, "Ragefire Chasm", ActivityCategory::Normal, 1)
                .with_entrance(entrance(389, 3.81, -14.82, -17.84)),
            ActivityDefinition::new(1, "Wailing Caverns", ActivityCategory::Normal, 1)
                .with_entrance(entrance(43, -163.49, 132.9, -73.66)),
            ActivityDefinition::new(6, "The Deadmines", ActivityCategory::Normal, 1)
                .with_entrance(entrance(36, -16.4, -383.07, 61.78)),
            ActivityDefinition::new(258, "Random Classic Dungeon", ActivityCategory::Random, 1),
            ActivityDefinition::new(202, "Utgarde Keep", ActivityCategory::Normal, 2)
                .heroic()
                .with_expansion(2)
                .with_entrance(entrance(574, 153.79, -86.55, 12.55)),
            ActivityDefinition::new(211, "The Nexus", ActivityCategory::Normal, 2)
                .heroic()
                .with_expansion(2)
                .with_entrance(entrance(576, 161.59, 13.44, -16.1)),
            ActivityDefinition::new(262, "Random Heroic", ActivityCategory::Random, 2)
                .heroic()
                .with_expansion(2),
            ActivityDefinition::new(285, "The Headless Horseman", ActivityCategory::Random, 3)
                .seasonal(),
            ActivityDefinition::new(163, "Scarlet Monastery Graveyard", ActivityCategory::Normal, 3)
                .with_entrance(entrance(189, 1688.99, 1053.48, 18.68)),
            ActivityDefinition::new(48, "Molten Core", ActivityCategory::Elite, 4)
                .with_entrance(entrance(409, 1096.0, -467.0, -104.6)),
            ActivityDefinition::new(1001, "Wintergrasp", ActivityCategory::Zone, 0),
        ];

        // The default set is consistent by construction.
        Self::from_definitions(definitions).unwrap_or_else(|_| Self {
            activities: BTreeMap::new(),
            by_group: BTreeMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

impl Default for StaticActivityCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ActivityCatalog for StaticActivityCatalog {
    fn get(&self, id: ActivityId) -> Option<&ActivityDefinition> {
        self.activities.get(&id)
    }

    fn expand_random(&self, random_id: ActivityId) -> BTreeSet<ActivityId> {
        match self.activities.get(&random_id) {
            Some(definition) if definition.is_random() => self
                .by_group
                .get(&definition.group_category)
                .cloned()
                .unwrap_or_default(),
            _ => BTreeSet::new(),
        }
    }

    fn activity_ids(&self) -> Vec<ActivityId> {
        self.activities.keys().copied().collect()
    }
}
