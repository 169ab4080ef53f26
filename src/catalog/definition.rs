//! Activity definitions

use crate::types::{ActivityId, ActivityKey};
use serde::{Deserialize, Serialize};

/// Kind of activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    /// Regular five-person dungeon
    Normal,
    /// Elite content; never mixed with normal dungeons in one request
    Elite,
    /// Zone content, not queueable through the finder
    Zone,
    /// Placeholder expanded to every activity sharing its group category
    Random,
}

impl ActivityCategory {
    /// Byte stored in the high bits of the composite activity key
    pub fn code(&self) -> u8 {
        match self {
            ActivityCategory::Normal => 1,
            ActivityCategory::Elite => 2,
            ActivityCategory::Zone => 4,
            ActivityCategory::Random => 6,
        }
    }

    /// Activities of different families cannot be requested together
    pub fn family(&self) -> ActivityFamily {
        match self {
            ActivityCategory::Normal | ActivityCategory::Random => ActivityFamily::Dungeon,
            ActivityCategory::Elite => ActivityFamily::Elite,
            ActivityCategory::Zone => ActivityFamily::Zone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActivityFamily {
    Dungeon,
    Elite,
    Zone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    #[default]
    Normal,
    Heroic,
}

/// Entry point of an activity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub map_id: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub orientation: f32,
}

/// Static description of a queueable activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDefinition {
    pub id: ActivityId,
    pub name: String,
    pub category: ActivityCategory,
    /// Activities with the same group category are what a random activity
    /// expands to
    pub group_category: u32,
    #[serde(default)]
    pub required_expansion: u8,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub seasonal: bool,
    #[serde(default)]
    pub entrance: Position,
    #[serde(default)]
    pub min_gear_score: u32,
}

impl ActivityDefinition {
    pub fn new(
        id: ActivityId,
        name: impl Into<String>,
        category: ActivityCategory,
        group_category: u32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            group_category,
            required_expansion: 0,
            difficulty: Difficulty::Normal,
            seasonal: false,
            entrance: Position::default(),
            min_gear_score: 0,
        }
    }

    pub fn heroic(mut self) -> Self {
        self.difficulty = Difficulty::Heroic;
        self
    }

    pub fn seasonal(mut self) -> Self {
        self.seasonal = true;
        self
    }

    pub fn with_entrance(mut self, entrance: Position) -> Self {
        self.entrance = entrance;
        self
    }

    pub fn with_expansion(mut self, expansion: u8) -> Self {
        self.required_expansion = expansion;
        self
    }

    pub fn key(&self) -> ActivityKey {
        ActivityKey::new(self.id, self.category.code())
    }

    pub fn is_random(&self) -> bool {
        self.category == ActivityCategory::Random
    }

    /// Completing this activity through the finder grants the random reward
    pub fn grants_random_reward(&self) -> bool {
        self.is_random() || self.seasonal
    }
}
