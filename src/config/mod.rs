//! Configuration management for the dungeon finder
//!
//! Loading from TOML files and environment variables, validation and
//! defaults.

pub mod app;
pub mod matchmaking;

pub use app::{validate_config, AmqpSettings, AppConfig, ServiceSettings};
pub use matchmaking::MatchmakingConfig;
