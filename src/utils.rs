//! Utility functions for the dungeon finder

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Generate a new opaque queue ticket
pub fn generate_ticket() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new correlation id for outbound messages
pub fn generate_correlation_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a std duration into a chrono delta, saturating on overflow
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Time elapsed between `since` and `now`, zero if `since` lies in the future
pub fn elapsed_between(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
