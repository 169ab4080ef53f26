//! AMQP message definitions and serialization
//!
//! Inbound commands arrive as JSON on the command queue, either bare or
//! wrapped in a `MessageEnvelope`. Notifications leave through the events
//! exchange, wrapped in an envelope carrying their routing key.

use crate::error::{MatchmakingError, Result};
use crate::notify::Notification;
use crate::service::MemberRemoval;
use crate::types::{ActivityId, ActorId, PartyId, ProposalId, RoleFlags, Team};
use crate::utils::generate_correlation_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Queue consumed for inbound commands
pub const COMMAND_QUEUE: &str = "lfg.commands";
/// Exchange notifications are published to
pub const EVENTS_EXCHANGE: &str = "lfg.events";

/// Longest accepted vote-kick reason
pub const MAX_REASON_LEN: usize = 256;

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: generate_correlation_id().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key: routing_key.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidCommand {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Commands and game-server events accepted on the command queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum InboundCommand {
    JoinQueue {
        actor: ActorId,
        roles: RoleFlags,
        activities: BTreeSet<ActivityId>,
    },
    LeaveQueue {
        actor: ActorId,
        #[serde(default)]
        disconnected: bool,
    },
    RoleVote {
        party: PartyId,
        actor: ActorId,
        roles: RoleFlags,
    },
    ProposalAnswer {
        proposal: ProposalId,
        actor: ActorId,
        accept: bool,
    },
    InitiateBootVote {
        party: PartyId,
        kicker: ActorId,
        victim: ActorId,
        #[serde(default)]
        reason: String,
    },
    BootVoteAnswer {
        party: PartyId,
        actor: ActorId,
        agree: bool,
    },
    MemberAdded {
        party: PartyId,
        actor: ActorId,
    },
    MemberRemoved {
        party: PartyId,
        actor: ActorId,
        removal: MemberRemoval,
    },
    LeaderChanged {
        party: PartyId,
        leader: ActorId,
    },
    PartyDisbanded {
        party: PartyId,
    },
    FinishActivity {
        party: PartyId,
        activity: ActivityId,
    },
    RestoreParty {
        party: PartyId,
    },
    Login {
        actor: ActorId,
        team: Team,
    },
    Logout {
        actor: ActorId,
    },
    Teleport {
        actor: ActorId,
        #[serde(default)]
        out: bool,
    },
}

impl InboundCommand {
    pub fn name(&self) -> &'static str {
        match self {
            InboundCommand::JoinQueue { .. } => "join_queue",
            InboundCommand::LeaveQueue { .. } => "leave_queue",
            InboundCommand::RoleVote { .. } => "role_vote",
            InboundCommand::ProposalAnswer { .. } => "proposal_answer",
            InboundCommand::InitiateBootVote { .. } => "initiate_boot_vote",
            InboundCommand::BootVoteAnswer { .. } => "boot_vote_answer",
            InboundCommand::MemberAdded { .. } => "member_added",
            InboundCommand::MemberRemoved { .. } => "member_removed",
            InboundCommand::LeaderChanged { .. } => "leader_changed",
            InboundCommand::PartyDisbanded { .. } => "party_disbanded",
            InboundCommand::FinishActivity { .. } => "finish_activity",
            InboundCommand::RestoreParty { .. } => "restore_party",
            InboundCommand::Login { .. } => "login",
            InboundCommand::Logout { .. } => "logout",
            InboundCommand::Teleport { .. } => "teleport",
        }
    }

    /// Actors named by the command
    fn actors(&self) -> Vec<ActorId> {
        match self {
            InboundCommand::JoinQueue { actor, .. }
            | InboundCommand::LeaveQueue { actor, .. }
            | InboundCommand::RoleVote { actor, .. }
            | InboundCommand::ProposalAnswer { actor, .. }
            | InboundCommand::BootVoteAnswer { actor, .. }
            | InboundCommand::MemberAdded { actor, .. }
            | InboundCommand::MemberRemoved { actor, .. }
            | InboundCommand::Login { actor, .. }
            | InboundCommand::Logout { actor }
            | InboundCommand::Teleport { actor, .. } => vec![*actor],
            InboundCommand::InitiateBootVote { kicker, victim, .. } => vec![*kicker, *victim],
            InboundCommand::LeaderChanged { leader, .. } => vec![*leader],
            InboundCommand::PartyDisbanded { .. }
            | InboundCommand::FinishActivity { .. }
            | InboundCommand::RestoreParty { .. } => Vec::new(),
        }
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Decode a command, enveloped or bare, and validate it
    pub fn deserialize_command(bytes: &[u8]) -> Result<InboundCommand> {
        let command = match MessageEnvelope::<InboundCommand>::from_bytes(bytes) {
            Ok(envelope) => envelope.payload,
            Err(_) => serde_json::from_slice(bytes).map_err(|e| {
                MatchmakingError::InvalidCommand {
                    reason: format!("Failed to deserialize command: {}", e),
                }
            })?,
        };
        Self::validate_command(&command)?;
        Ok(command)
    }

    pub fn serialize_command(command: &InboundCommand) -> Result<Vec<u8>> {
        Self::validate_command(command)?;
        MessageEnvelope::new(command.clone(), COMMAND_QUEUE).to_bytes()
    }

    /// Shape checks only; whether the command makes sense is up to the
    /// service
    pub fn validate_command(command: &InboundCommand) -> Result<()> {
        if command.actors().contains(&0) {
            return Err(MatchmakingError::InvalidCommand {
                reason: format!("{}: actor id 0 is reserved", command.name()),
            }
            .into());
        }

        match command {
            InboundCommand::JoinQueue { activities, .. } if activities.contains(&0) => {
                Err(MatchmakingError::InvalidCommand {
                    reason: "join_queue: activity id 0 is reserved".to_string(),
                }
                .into())
            }
            InboundCommand::InitiateBootVote { reason, .. } if reason.len() > MAX_REASON_LEN => {
                Err(MatchmakingError::InvalidCommand {
                    reason: format!(
                        "initiate_boot_vote: reason longer than {} bytes",
                        MAX_REASON_LEN
                    ),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    /// Envelope a notification under its routing key
    pub fn serialize_notification(notification: &Notification) -> Result<Vec<u8>> {
        MessageEnvelope::new(notification.clone(), notification.routing_key()).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JoinResultCode, LockMap};

    fn create_test_join() -> InboundCommand {
        InboundCommand::JoinQueue {
            actor: 7,
            roles: RoleFlags::TANK | RoleFlags::LEADER,
            activities: [258].into_iter().collect(),
        }
    }

    #[test]
    fn test_message_envelope_creation() {
        let envelope = MessageEnvelope::new(create_test_join(), "lfg.commands");
        assert_eq!(envelope.routing_key, "lfg.commands");
        assert!(!envelope.correlation_id.is_empty());
    }

    #[test]
    fn test_bare_and_enveloped_commands() {
        let bare = br#"{"command":"join_queue","actor":7,"roles":3,"activities":[258]}"#;
        assert_eq!(
            MessageUtils::deserialize_command(bare).unwrap(),
            create_test_join()
        );

        let enveloped = MessageUtils::serialize_command(&create_test_join()).unwrap();
        assert_eq!(
            MessageUtils::deserialize_command(&enveloped).unwrap(),
            create_test_join()
        );
    }

    #[test]
    fn test_defaults_for_optional_fields() {
        let command =
            MessageUtils::deserialize_command(br#"{"command":"leave_queue","actor":3}"#).unwrap();
        assert_eq!(
            command,
            InboundCommand::LeaveQueue {
                actor: 3,
                disconnected: false
            }
        );

        let command = MessageUtils::deserialize_command(
            br#"{"command":"member_removed","party":9,"actor":3,"removal":"kicked"}"#,
        )
        .unwrap();
        assert_eq!(command.name(), "member_removed");
    }

    #[test]
    fn test_validation() {
        let zero_actor = InboundCommand::Logout { actor: 0 };
        assert!(MessageUtils::validate_command(&zero_actor).is_err());

        let long_reason = InboundCommand::InitiateBootVote {
            party: 1,
            kicker: 2,
            victim: 3,
            reason: "x".repeat(MAX_REASON_LEN + 1),
        };
        assert!(MessageUtils::validate_command(&long_reason).is_err());

        assert!(MessageUtils::deserialize_command(b"not json").is_err());
        assert!(MessageUtils::deserialize_command(br#"{"command":"dance"}"#).is_err());
    }

    #[test]
    fn test_notification_envelope() {
        let notification = Notification::JoinResult {
            actor: 7,
            result: JoinResultCode::Ok,
            role_check_state: None,
            locks: LockMap::new(),
        };
        let bytes = MessageUtils::serialize_notification(&notification).unwrap();
        let envelope = MessageEnvelope::<Notification>::from_bytes(&bytes).unwrap();

        assert_eq!(envelope.routing_key, notification.routing_key());
        assert_eq!(envelope.payload, notification);
    }
}
