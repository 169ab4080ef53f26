//! Role assignment for party formation
//!
//! This module resolves the tank/healer/damage layout of a candidate group.

pub mod assigner;

// Re-export commonly used types
pub use assigner::{Assignment, BacktrackingAssigner, RoleAssigner, RoleQuotas};
