//! Queueing and group formation
//!
//! This module holds the per-partition queues, the memoized compatibility
//! checks over candidate sets and the sweep that turns compatible sets into
//! matched groups.

pub mod compatibility;
pub mod entry;
pub mod formation;
pub mod lfg_queue;

// Re-export commonly used types
pub use compatibility::{
    CandidateSet, Compatibility, CompatibilityCache, CompatibilityRecord, CompatibilityResolver,
    MatchContext, MatchedGroup,
};
pub use entry::QueueEntry;
pub use formation::GroupFormationEngine;
pub use lfg_queue::{LfgQueue, QueueStatusReport};
