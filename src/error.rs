//! Error types for the dungeon finder service
//!
//! Expected matchmaking outcomes (rejected joins, failed proposals, failed
//! votes) are ordinary values and never show up here. These errors cover
//! infrastructure failures around the core: transport, configuration,
//! catalog loading and persistence.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific service failures
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Unknown activity: {activity_id}")]
    UnknownActivity { activity_id: u32 },

    #[error("Activity catalog could not be loaded: {message}")]
    CatalogLoadFailed { message: String },

    #[error("Persistence failure for party {party_id}: {message}")]
    PersistenceFailed { party_id: u64, message: String },

    #[error("Matchmaking service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}
