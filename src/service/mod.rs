//! Service layer of the dungeon finder
//!
//! `MatchmakingService` holds the matchmaking core. `actor` runs it on a
//! single task, `app` wires it to AMQP and the health server.

pub mod actor;
pub mod app;
mod boot_votes;
pub mod health;
mod join;
pub mod matchmaking;
pub mod observer;
mod proposals;
mod role_checks;
pub mod tick;

pub use actor::{spawn_service, Command, ServiceHandle};
pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthProbe, HealthStatus};
pub use matchmaking::{MatchmakingService, MatchmakingStats};
pub use observer::{MemberRemoval, PartyLifecycleObserver};
pub use tick::TeleportOutcome;
