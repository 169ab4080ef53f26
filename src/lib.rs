//! Dungeon finder - party formation for group activities
//!
//! Participants and pre-formed parties queue for one or more activities with
//! a set of roles. The finder groups compatible candidates into parties of
//! one tank, one healer and three damage dealers, runs the role checks,
//! proposals and vote-kicks around them, and reports every decision through
//! notifications. Commands arrive over AMQP and notifications leave the
//! same way.

pub mod amqp;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod providers;
pub mod queue;
pub mod roles;
pub mod service;
pub mod state;
pub mod types;
pub mod utils;
pub mod wait_time;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use catalog::{ActivityCatalog, StaticActivityCatalog};
pub use notify::{Notification, NotificationSink};
pub use service::{MatchmakingService, MatchmakingStats, PartyLifecycleObserver, ServiceHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
