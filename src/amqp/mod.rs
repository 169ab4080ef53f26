//! AMQP integration for the dungeon finder
//!
//! Inbound commands are consumed from a queue and forwarded to the
//! matchmaking task; notifications are published to a topic exchange keyed
//! by notification type.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{CommandConsumer, CommandHandler, ServiceCommandHandler};
pub use messages::*;
pub use publisher::{spawn_forwarder, AmqpEventPublisher, EventPublisher, PublisherConfig};
