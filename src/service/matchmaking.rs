//! The matchmaking service facade
//!
//! `MatchmakingService` owns every queue, lifecycle book and the state store.
//! It is a plain value mutated through `&mut self`; the runtime gives it to a
//! single task (see `service::actor`) so there is exactly one writer.
//!
//! The operations are split by concern across the sibling modules `join`,
//! `role_checks`, `proposals`, `boot_votes`, `observer` and `tick`.

use crate::config::MatchmakingConfig;
use crate::lifecycle::{BootVoteBook, ProposalBook, RoleCheckBook};
use crate::metrics::MetricsCollector;
use crate::notify::{Notification, NotificationSink};
use crate::providers::Collaborators;
use crate::queue::LfgQueue;
use crate::roles::{BacktrackingAssigner, RoleAssigner};
use crate::state::StateStore;
use crate::types::{ActivityId, ActorId, CandidateId, PartitionId, PartyId, UpdateKind};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Snapshot of the service for health checks and metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchmakingStats {
    pub queued_per_partition: BTreeMap<PartitionId, usize>,
    pub compatibility_records: usize,
    pub active_proposals: usize,
    pub active_role_checks: usize,
    pub active_boot_votes: usize,
    pub participants: usize,
    pub parties: usize,
    pub joins_accepted: u64,
    pub joins_rejected: u64,
    pub groups_formed: u64,
    pub proposals_failed: u64,
    pub members_kicked: u64,
}

impl MatchmakingStats {
    pub fn total_queued(&self) -> usize {
        self.queued_per_partition.values().sum()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(super) struct Counters {
    pub joins_accepted: u64,
    pub joins_rejected: u64,
    pub groups_formed: u64,
    pub proposals_failed: u64,
    pub members_kicked: u64,
}

/// Matchmaking and party-formation service
pub struct MatchmakingService {
    pub(super) config: MatchmakingConfig,
    pub(super) store: StateStore,
    pub(super) queues: BTreeMap<PartitionId, LfgQueue>,
    pub(super) proposals: ProposalBook,
    pub(super) role_checks: RoleCheckBook,
    pub(super) boot_votes: BootVoteBook,
    pub(super) collaborators: Collaborators,
    pub(super) assigner: Arc<dyn RoleAssigner>,
    pub(super) sink: Arc<dyn NotificationSink>,
    pub(super) metrics: Option<Arc<MetricsCollector>>,
    pub(super) rng: StdRng,
    /// Logical clock, advanced by `tick`
    pub(super) now: DateTime<Utc>,
    pub(super) since_queue_status: Duration,
    pub(super) counters: Counters,
}

impl MatchmakingService {
    pub fn new(
        config: MatchmakingConfig,
        collaborators: Collaborators,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        info!(
            "Creating matchmaking service: party size {}, cross-faction {}",
            config.party_size(),
            config.cross_faction
        );
        Self {
            store: StateStore::new(config.max_kicks),
            config,
            queues: BTreeMap::new(),
            proposals: ProposalBook::new(),
            role_checks: RoleCheckBook::new(),
            boot_votes: BootVoteBook::new(),
            collaborators,
            assigner: Arc::new(BacktrackingAssigner),
            sink,
            metrics: None,
            rng: StdRng::from_entropy(),
            now: current_timestamp(),
            since_queue_status: Duration::ZERO,
            counters: Counters::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_assigner(mut self, assigner: Arc<dyn RoleAssigner>) -> Self {
        self.assigner = assigner;
        self
    }

    /// Seed the generator used to pick proposal activities and leaders
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Start the logical clock at `now`
    pub fn starting_at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn config(&self) -> &MatchmakingConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn queue(&self, partition: PartitionId) -> Option<&LfgQueue> {
        self.queues.get(&partition)
    }

    pub fn proposals(&self) -> &ProposalBook {
        &self.proposals
    }

    pub fn role_checks(&self) -> &RoleCheckBook {
        &self.role_checks
    }

    pub fn boot_votes(&self) -> &BootVoteBook {
        &self.boot_votes
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn stats(&self) -> MatchmakingStats {
        MatchmakingStats {
            queued_per_partition: self
                .queues
                .iter()
                .map(|(partition, queue)| (*partition, queue.len()))
                .collect(),
            compatibility_records: self
                .queues
                .values()
                .map(|queue| queue.compatibility().len())
                .sum(),
            active_proposals: self.proposals.len(),
            active_role_checks: self.role_checks.len(),
            active_boot_votes: self.boot_votes.len(),
            participants: self.store.participant_count(),
            parties: self.store.party_count(),
            joins_accepted: self.counters.joins_accepted,
            joins_rejected: self.counters.joins_rejected,
            groups_formed: self.counters.groups_formed,
            proposals_failed: self.counters.proposals_failed,
            members_kicked: self.counters.members_kicked,
        }
    }

    /// Queue partition of a candidate
    pub fn partition_of(&self, candidate: CandidateId) -> PartitionId {
        if self.config.cross_faction {
            0
        } else {
            self.store.candidate_team(candidate).partition()
        }
    }

    pub(super) fn queue_mut(&mut self, partition: PartitionId) -> &mut LfgQueue {
        let quotas = self.config.quotas;
        self.queues
            .entry(partition)
            .or_insert_with(|| LfgQueue::new(partition, quotas))
    }

    /// Partition holding queue data of `candidate`
    pub(super) fn find_queue(&self, candidate: &CandidateId) -> Option<PartitionId> {
        self.queues
            .iter()
            .find(|(_, queue)| queue.contains(candidate))
            .map(|(partition, _)| *partition)
    }

    /// Drop a candidate's queue data wherever it is
    pub(super) fn remove_from_queues(&mut self, candidate: CandidateId) {
        if let Some(partition) = self.find_queue(&candidate) {
            self.queue_mut(partition).remove_from_queue(candidate);
        }
    }

    /// Actors behind a candidate
    pub(super) fn candidate_members(&self, candidate: CandidateId) -> Vec<ActorId> {
        match candidate {
            CandidateId::Actor(actor) => vec![actor],
            CandidateId::Party(party) => self.store.members(party),
        }
    }

    pub(super) fn notify(&self, notification: Notification) {
        self.sink.notify(notification);
    }

    pub(super) fn notify_status(
        &self,
        actor: ActorId,
        kind: UpdateKind,
        activities: BTreeSet<ActivityId>,
        party: Option<PartyId>,
    ) {
        self.notify(Notification::UpdateStatus {
            actor,
            kind,
            activities,
            party,
        });
    }

    pub(super) fn with_metrics_do(&self, record: impl FnOnce(&MetricsCollector)) {
        if let Some(metrics) = &self.metrics {
            record(metrics);
        }
    }
}

impl std::fmt::Debug for MatchmakingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchmakingService")
            .field("now", &self.now)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
