//! Outbound notifications
//!
//! The matchmaking core reports every decision through a synchronous
//! [`NotificationSink`]. The runtime bridges the sink to the asynchronous
//! AMQP publisher through a channel.

use crate::lifecycle::{BootVote, Proposal, RoleCheck, RoleCheckState};
use crate::providers::RewardGrant;
use crate::queue::QueueStatusReport;
use crate::roles::RoleQuotas;
use crate::types::{
    ActivityId, ActivityKey, ActorId, CandidateId, JoinResultCode, LockMap, PartyId, UpdateKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::warn;

/// Queue status as sent to a participant, durations in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatusUpdate {
    pub activity: ActivityId,
    pub queued_secs: u64,
    pub estimate_secs: Option<u64>,
    pub average_secs: Option<u64>,
    pub tank_secs: Option<u64>,
    pub healer_secs: Option<u64>,
    pub damage_secs: Option<u64>,
    pub tanks_needed: u8,
    pub healers_needed: u8,
    pub damage_needed: u8,
}

impl From<&QueueStatusReport> for QueueStatusUpdate {
    fn from(report: &QueueStatusReport) -> Self {
        let secs = |duration: Option<std::time::Duration>| duration.map(|d| d.as_secs());
        let RoleQuotas {
            tanks,
            healers,
            damage,
        } = report.needed;
        Self {
            activity: report.activity,
            queued_secs: report.queued_for.as_secs(),
            estimate_secs: secs(report.estimate),
            average_secs: secs(report.wait_times.average),
            tank_secs: secs(report.wait_times.tank),
            healer_secs: secs(report.wait_times.healer),
            damage_secs: secs(report.wait_times.damage),
            tanks_needed: tanks,
            healers_needed: healers,
            damage_needed: damage,
        }
    }
}

/// A message for one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    UpdateStatus {
        actor: ActorId,
        kind: UpdateKind,
        activities: BTreeSet<ActivityId>,
        party: Option<PartyId>,
    },
    JoinResult {
        actor: ActorId,
        result: JoinResultCode,
        role_check_state: Option<RoleCheckState>,
        locks: LockMap,
    },
    RoleCheckUpdate {
        actor: ActorId,
        role_check: RoleCheck,
    },
    ProposalUpdate {
        actor: ActorId,
        proposal: Proposal,
    },
    BootVoteUpdate {
        actor: ActorId,
        boot: BootVote,
    },
    QueueStatus {
        actor: ActorId,
        candidate: CandidateId,
        status: QueueStatusUpdate,
    },
    ActivityReward {
        actor: ActorId,
        random_activity: ActivityKey,
        current_activity: ActivityKey,
        reward: RewardGrant,
    },
    OfferContinue {
        actor: ActorId,
        activity: ActivityId,
    },
}

impl Notification {
    pub fn actor(&self) -> ActorId {
        match self {
            Notification::UpdateStatus { actor, .. }
            | Notification::JoinResult { actor, .. }
            | Notification::RoleCheckUpdate { actor, .. }
            | Notification::ProposalUpdate { actor, .. }
            | Notification::BootVoteUpdate { actor, .. }
            | Notification::QueueStatus { actor, .. }
            | Notification::ActivityReward { actor, .. }
            | Notification::OfferContinue { actor, .. } => *actor,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            Notification::UpdateStatus { .. } => "lfg.update_status",
            Notification::JoinResult { .. } => "lfg.join_result",
            Notification::RoleCheckUpdate { .. } => "lfg.role_check",
            Notification::ProposalUpdate { .. } => "lfg.proposal",
            Notification::BootVoteUpdate { .. } => "lfg.boot_vote",
            Notification::QueueStatus { .. } => "lfg.queue_status",
            Notification::ActivityReward { .. } => "lfg.reward",
            Notification::OfferContinue { .. } => "lfg.offer_continue",
        }
    }
}

/// Receives notifications from the matchmaking core
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Notifications addressed to `actor`
    pub fn for_actor(&self, actor: ActorId) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|notification| notification.actor() == actor)
            .collect()
    }

    /// Remove and return everything recorded so far
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(
            &mut *self
                .notifications
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn len(&self) -> usize {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

/// Forwards notifications into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<Notification>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        if let Err(e) = self.sender.send(notification) {
            warn!(
                "Dropping {} notification for actor {}: receiver closed",
                e.0.routing_key(),
                e.0.actor()
            );
        }
    }
}
