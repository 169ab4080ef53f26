//! A single queue partition
//!
//! Candidates enter the `new` bucket and move to the `current` bucket once a
//! sweep has tried them. Entries outlive bucket membership while a proposal
//! is pending, so a failed proposal can put accepters back with their
//! original join time.

use crate::queue::compatibility::{CandidateSet, CompatibilityCache};
use crate::queue::entry::QueueEntry;
use crate::roles::{Assignment, RoleQuotas};
use crate::state::StateStore;
use crate::types::{ActivityId, ActorId, CandidateId, PartitionId, RoleMap};
use crate::utils::elapsed_between;
use crate::wait_time::{WaitTimeSnapshot, WaitTimeTracker};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, error};

/// Queue status of one entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatusReport {
    pub candidate: CandidateId,
    pub members: Vec<ActorId>,
    pub activity: ActivityId,
    pub queued_for: Duration,
    /// Estimate for the entry's role combination
    pub estimate: Option<Duration>,
    pub wait_times: WaitTimeSnapshot,
    /// Seats the best known partial group still needs
    pub needed: RoleQuotas,
}

/// One queue partition
#[derive(Debug, Clone)]
pub struct LfgQueue {
    partition: PartitionId,
    quotas: RoleQuotas,
    entries: HashMap<CandidateId, QueueEntry>,
    newly_queued: VecDeque<CandidateId>,
    current: VecDeque<CandidateId>,
    compatibility: CompatibilityCache,
    wait_times: WaitTimeTracker,
}

impl LfgQueue {
    pub fn new(partition: PartitionId, quotas: RoleQuotas) -> Self {
        Self {
            partition,
            quotas,
            entries: HashMap::new(),
            newly_queued: VecDeque::new(),
            current: VecDeque::new(),
            compatibility: CompatibilityCache::new(),
            wait_times: WaitTimeTracker::new(),
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn quotas(&self) -> RoleQuotas {
        self.quotas
    }

    /// Store a candidate's queue data and put it in the `new` bucket. A
    /// candidate already queued is replaced.
    pub fn add_queue_data(
        &mut self,
        candidate: CandidateId,
        joined_at: DateTime<Utc>,
        activities: BTreeSet<ActivityId>,
        roles: RoleMap,
    ) {
        if self.entries.contains_key(&candidate) {
            debug!("Replacing queue entry of {}", candidate);
            self.remove_from_queue(candidate);
        }

        self.entries.insert(
            candidate,
            QueueEntry::new(candidate, joined_at, activities, roles, self.quotas),
        );
        self.add_to_queue(candidate, false);
    }

    /// Put a candidate with existing queue data into a bucket. Re-admitted
    /// candidates go to the front of `current`.
    pub fn add_to_queue(&mut self, candidate: CandidateId, readmit: bool) {
        if !self.entries.contains_key(&candidate) {
            error!(
                "Queue {}: cannot add {} without queue data",
                self.partition, candidate
            );
            return;
        }

        self.remove_from_buckets(&candidate);
        if readmit {
            self.current.push_front(candidate);
        } else {
            self.newly_queued.push_back(candidate);
        }
        debug!(
            "Queue {}: {} {}",
            self.partition,
            candidate,
            if readmit { "re-admitted" } else { "queued" }
        );
    }

    /// Take a candidate out of both buckets, keeping its queue data
    pub fn remove_from_buckets(&mut self, candidate: &CandidateId) {
        self.newly_queued.retain(|queued| queued != candidate);
        self.current.retain(|queued| queued != candidate);
    }

    /// Remove a candidate entirely: buckets, queue data and every
    /// compatibility record mentioning it
    pub fn remove_from_queue(&mut self, candidate: CandidateId) -> Option<QueueEntry> {
        self.remove_from_buckets(&candidate);
        let evicted = self.compatibility.evict_containing(&candidate);
        debug!(
            "Queue {}: removing {} ({} compatibility records evicted)",
            self.partition, candidate, evicted
        );

        let affected: Vec<CandidateId> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .best_compatible
                    .as_ref()
                    .is_some_and(|key| key.contains(&candidate))
            })
            .map(|(id, _)| *id)
            .collect();

        let quotas = self.quotas;
        for id in affected {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.reset_best_compatible(quotas);
            }
            self.find_best_compatible(&id);
        }

        self.entries.remove(&candidate)
    }

    /// Rebuild the best partial group of a candidate from memoized records
    pub fn find_best_compatible(&mut self, candidate: &CandidateId) {
        let partials = self.compatibility.partials_containing(candidate);
        for (key, assignment) in partials {
            self.update_best_compatible(candidate, &key, &assignment);
        }
    }

    pub fn update_best_compatible(
        &mut self,
        candidate: &CandidateId,
        key: &CandidateSet,
        assignment: &Assignment,
    ) {
        let quotas = self.quotas;
        if let Some(entry) = self.entries.get_mut(candidate) {
            entry.update_best_compatible(key, assignment, quotas);
        }
    }

    pub fn entry(&self, candidate: &CandidateId) -> Option<&QueueEntry> {
        self.entries.get(candidate)
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.values()
    }

    /// The candidate has queue data
    pub fn contains(&self, candidate: &CandidateId) -> bool {
        self.entries.contains_key(candidate)
    }

    /// The candidate sits in one of the buckets
    pub fn is_waiting(&self, candidate: &CandidateId) -> bool {
        self.newly_queued.contains(candidate) || self.current.contains(candidate)
    }

    pub fn join_time(&self, candidate: &CandidateId) -> Option<DateTime<Utc>> {
        self.entries.get(candidate).map(|entry| entry.joined_at)
    }

    pub fn pop_new(&mut self) -> Option<CandidateId> {
        self.newly_queued.pop_front()
    }

    pub fn push_current(&mut self, candidate: CandidateId) {
        if !self.current.contains(&candidate) {
            self.current.push_back(candidate);
        }
    }

    pub fn current_snapshot(&self) -> VecDeque<CandidateId> {
        self.current.clone()
    }

    pub fn current_candidates(&self) -> impl Iterator<Item = &CandidateId> {
        self.current.iter()
    }

    pub fn new_len(&self) -> usize {
        self.newly_queued.len()
    }

    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    /// Number of candidates with queue data
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn compatibility(&self) -> &CompatibilityCache {
        &self.compatibility
    }

    pub fn compatibility_mut(&mut self) -> &mut CompatibilityCache {
        &mut self.compatibility
    }

    pub fn wait_times(&self) -> &WaitTimeTracker {
        &self.wait_times
    }

    pub fn wait_times_mut(&mut self) -> &mut WaitTimeTracker {
        &mut self.wait_times
    }

    /// Status of every waiting entry. The reported activity is the first
    /// selected activity of the entry's first member, so a random request
    /// reports the random activity it was made for.
    pub fn queue_status(&self, now: DateTime<Utc>, store: &StateStore) -> Vec<QueueStatusReport> {
        self.entries
            .values()
            .filter(|entry| self.is_waiting(&entry.candidate))
            .filter_map(|entry| {
                let members: Vec<ActorId> = entry.members().collect();
                let activity = members
                    .first()
                    .and_then(|actor| store.selected_activities(*actor).first().copied())
                    .or_else(|| entry.activities.first().copied())?;

                Some(QueueStatusReport {
                    candidate: entry.candidate,
                    members,
                    activity,
                    queued_for: elapsed_between(entry.joined_at, now),
                    estimate: self.wait_times.estimate(activity, entry.combined_roles()),
                    wait_times: self.wait_times.snapshot(activity),
                    needed: entry.needed,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::compatibility::CompatibilityRecord;
    use crate::types::{Role, RoleFlags};

    fn create_test_queue() -> LfgQueue {
        LfgQueue::new(0, RoleQuotas::standard())
    }

    fn add_solo(queue: &mut LfgQueue, actor: ActorId, joined_at: DateTime<Utc>) {
        queue.add_queue_data(
            CandidateId::Actor(actor),
            joined_at,
            [1, 4, 6].into_iter().collect(),
            [(actor, RoleFlags::DAMAGE)].into_iter().collect(),
        );
    }

    #[test]
    fn test_buckets() {
        let mut queue = create_test_queue();
        let now = Utc::now();
        add_solo(&mut queue, 1, now);
        add_solo(&mut queue, 2, now);
        assert_eq!(queue.new_len(), 2);

        let first = queue.pop_new().unwrap();
        assert_eq!(first, CandidateId::Actor(1));
        queue.push_current(first);
        assert_eq!(queue.current_len(), 1);

        queue.add_to_queue(CandidateId::Actor(2), true);
        assert_eq!(queue.new_len(), 0);
        assert_eq!(
            queue.current_candidates().next(),
            Some(&CandidateId::Actor(2))
        );
    }

    #[test]
    fn test_add_without_data_is_ignored() {
        let mut queue = create_test_queue();
        queue.add_to_queue(CandidateId::Actor(9), false);
        assert_eq!(queue.new_len(), 0);
    }

    #[test]
    fn test_remove_evicts_every_record_containing_candidate() {
        let mut queue = create_test_queue();
        let now = Utc::now();
        for actor in 1..=3 {
            add_solo(&mut queue, actor, now);
        }

        let a = CandidateId::Actor(1);
        let b = CandidateId::Actor(2);
        let c = CandidateId::Actor(3);
        let pair_ab = CandidateSet::new(&[a, b]);
        let pair_bc = CandidateSet::new(&[b, c]);
        let assignment: Assignment = [(1, Role::Damage), (2, Role::Damage)].into_iter().collect();
        queue
            .compatibility_mut()
            .insert(pair_ab.clone(), CompatibilityRecord::partial(assignment.clone()));
        queue
            .compatibility_mut()
            .insert(pair_bc.clone(), CompatibilityRecord::partial(assignment.clone()));
        queue.update_best_compatible(&a, &pair_ab, &assignment);

        queue.remove_from_queue(b);

        assert!(queue.compatibility().get(&pair_ab).is_none());
        assert!(queue.compatibility().get(&pair_bc).is_none());
        assert!(queue.compatibility().is_empty());
        assert!(queue.entry(&a).unwrap().best_compatible.is_none());
        assert!(!queue.contains(&b));
    }

    #[test]
    fn test_replacing_entry_keeps_single_bucket_slot() {
        let mut queue = create_test_queue();
        let now = Utc::now();
        add_solo(&mut queue, 1, now);
        add_solo(&mut queue, 1, now);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.new_len(), 1);
    }

    #[test]
    fn test_queue_status() {
        let mut queue = create_test_queue();
        let mut store = StateStore::new(3);
        let joined = Utc::now();
        store.set_selected_activities(1, [258].into_iter().collect());
        add_solo(&mut queue, 1, joined);
        queue
            .wait_times_mut()
            .record(258, Role::Damage, Duration::from_secs(120));

        let reports = queue.queue_status(joined + chrono::Duration::seconds(30), &store);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].activity, 258);
        assert_eq!(reports[0].queued_for, Duration::from_secs(30));
        assert_eq!(reports[0].estimate, Some(Duration::from_secs(120)));
        assert_eq!(reports[0].needed, RoleQuotas::standard());
    }
}
