//! Activity catalog for the dungeon finder
//!
//! This module holds the static definitions of queueable activities and the
//! lookup used to expand random activities into concrete ones.

pub mod definition;
pub mod provider;

// Re-export commonly used types
pub use definition::{ActivityCategory, ActivityDefinition, ActivityFamily, Difficulty, Position};
pub use provider::{ActivityCatalog, StaticActivityCatalog};
