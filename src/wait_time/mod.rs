//! Wait time statistics for queue status estimates
//!
//! This module keeps rolling averages of how long participants waited before
//! their group was formed, split by activity and role.

pub mod statistics;

// Re-export commonly used types
pub use statistics::{WaitTimeBucket, WaitTimeSample, WaitTimeSnapshot, WaitTimeTracker};
