//! Compatibility of candidate sets
//!
//! A candidate set is compatible when its members can form one legal party:
//! at most one running activity party, no more members than seats, nobody
//! ignoring anybody from another candidate, a shared activity and a role
//! layout that fits the quotas. Every verdict is memoized under the ordered
//! set of candidate ids until one of those candidates leaves the queue.

use crate::providers::EligibilityProvider;
use crate::queue::lfg_queue::LfgQueue;
use crate::roles::{Assignment, RoleAssigner, RoleQuotas};
use crate::state::StateStore;
use crate::types::{ActivityId, ActorId, CandidateId, LifecycleState, PartyId, RoleMap};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, error};

/// Verdict for a candidate set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Compatibility {
    /// Not decided yet
    Pending,
    TooManyPlayers,
    MultipleExistingParties,
    HasMutualIgnore,
    NoCommonActivity,
    NoValidRoles,
    /// Full party, but not every candidate is in the queued state
    BadState,
    /// Legal so far, waiting for more members
    TooFewPlayers,
    /// Full legal party; a proposal was formed
    Match,
}

impl Compatibility {
    /// Only partial sets are worth extending
    pub fn is_extendable(&self) -> bool {
        matches!(self, Compatibility::TooFewPlayers)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compatibility::Pending => "pending",
            Compatibility::TooManyPlayers => "too_many_players",
            Compatibility::MultipleExistingParties => "multiple_existing_parties",
            Compatibility::HasMutualIgnore => "has_mutual_ignore",
            Compatibility::NoCommonActivity => "no_common_activity",
            Compatibility::NoValidRoles => "no_valid_roles",
            Compatibility::BadState => "bad_state",
            Compatibility::TooFewPlayers => "too_few_players",
            Compatibility::Match => "match",
        }
    }
}

impl fmt::Display for Compatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order-independent identity of a candidate set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CandidateSet(Vec<CandidateId>);

impl CandidateSet {
    pub fn new(candidates: &[CandidateId]) -> Self {
        let mut ids = candidates.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    pub fn contains(&self, candidate: &CandidateId) -> bool {
        self.0.binary_search(candidate).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateId> {
        self.0.iter()
    }
}

impl fmt::Display for CandidateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "]")
    }
}

/// Memoized verdict, with the role layout of a partial set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityRecord {
    pub verdict: Compatibility,
    pub assignment: Option<Assignment>,
}

impl CompatibilityRecord {
    pub fn verdict(verdict: Compatibility) -> Self {
        Self {
            verdict,
            assignment: None,
        }
    }

    pub fn partial(assignment: Assignment) -> Self {
        Self {
            verdict: Compatibility::TooFewPlayers,
            assignment: Some(assignment),
        }
    }
}

/// Memoized verdicts of one queue
#[derive(Debug, Clone, Default)]
pub struct CompatibilityCache {
    records: HashMap<CandidateSet, CompatibilityRecord>,
}

impl CompatibilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CandidateSet) -> Option<&CompatibilityRecord> {
        self.records.get(key)
    }

    pub fn insert(&mut self, key: CandidateSet, record: CompatibilityRecord) {
        self.records.insert(key, record);
    }

    /// Drop every record whose set contains `candidate`; returns how many
    pub fn evict_containing(&mut self, candidate: &CandidateId) -> usize {
        let before = self.records.len();
        self.records.retain(|key, _| !key.contains(candidate));
        before - self.records.len()
    }

    /// Partial sets containing `candidate`, with their role layouts
    pub fn partials_containing(&self, candidate: &CandidateId) -> Vec<(CandidateSet, Assignment)> {
        self.records
            .iter()
            .filter(|(key, _)| key.contains(candidate))
            .filter_map(|(key, record)| match (&record.verdict, &record.assignment) {
                (Compatibility::TooFewPlayers, Some(assignment)) => {
                    Some((key.clone(), assignment.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A full legal party found in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedGroup {
    /// Candidates in the order they were combined
    pub candidates: Vec<CandidateId>,
    /// Activities every candidate accepts
    pub activities: BTreeSet<ActivityId>,
    /// Requested role flags per member
    pub roles: RoleMap,
    pub assignment: Assignment,
    /// Party each member was queued with
    pub origins: BTreeMap<ActorId, Option<PartyId>>,
    /// Party the formed group keeps, if any
    pub existing_party: Option<PartyId>,
    /// The kept party already runs an activity and only looks for
    /// replacements
    pub existing_party_in_activity: bool,
}

/// Read-only inputs of a compatibility check
pub struct MatchContext<'a> {
    pub store: &'a StateStore,
    pub eligibility: &'a dyn EligibilityProvider,
    pub assigner: &'a dyn RoleAssigner,
    pub quotas: RoleQuotas,
}

impl MatchContext<'_> {
    pub fn all_queued(&self, candidates: &[CandidateId]) -> bool {
        candidates
            .iter()
            .all(|candidate| self.store.state(*candidate) == LifecycleState::Queued)
    }
}

/// Decides and memoizes compatibility verdicts
pub struct CompatibilityResolver<'a> {
    ctx: &'a MatchContext<'a>,
}

impl<'a> CompatibilityResolver<'a> {
    pub fn new(ctx: &'a MatchContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &MatchContext<'a> {
        self.ctx
    }

    /// Memoized verdict, computing it when unknown. A remembered bad-state
    /// verdict is recomputed once every candidate is queued again, since
    /// it depends on lifecycle state rather than on the set itself. A match
    /// record never outlives its proposal: resolving the proposal removes
    /// at least one of its candidates, which evicts the record.
    pub fn resolve(
        &self,
        queue: &mut LfgQueue,
        check: &[CandidateId],
        formed: &mut Vec<MatchedGroup>,
    ) -> Compatibility {
        let key = CandidateSet::new(check);
        match queue.compatibility().get(&key).map(|record| record.verdict) {
            Some(Compatibility::BadState) if self.ctx.all_queued(check) => {
                self.check(queue, check, formed)
            }
            Some(Compatibility::Pending) | None => self.check(queue, check, formed),
            Some(verdict) => verdict,
        }
    }

    /// Compute the verdict of `check`, whose last element is the most
    /// recently added candidate. A full legal set is removed from the
    /// queue buckets and pushed onto `formed`.
    pub fn check(
        &self,
        queue: &mut LfgQueue,
        check: &[CandidateId],
        formed: &mut Vec<MatchedGroup>,
    ) -> Compatibility {
        let key = CandidateSet::new(check);
        let party_size = self.ctx.quotas.party_size();
        debug!("Checking compatibility of {}", key);

        if check.is_empty() {
            return Compatibility::Pending;
        }
        if check.len() > party_size {
            return memoize(queue, key, Compatibility::TooManyPlayers);
        }
        if key.len() != check.len() {
            error!("Candidate set {} lists a candidate twice", key);
            return memoize(queue, key, Compatibility::BadState);
        }

        if check.len() > 2 {
            let child = self.resolve(queue, &check[..check.len() - 1], formed);
            if !child.is_extendable() {
                if child != Compatibility::Pending {
                    queue
                        .compatibility_mut()
                        .insert(key, CompatibilityRecord::verdict(child));
                }
                return child;
            }
        }

        if let Some(missing) = check.iter().find(|candidate| !queue.contains(candidate)) {
            error!(
                "Candidate {} is referenced by the queue but has no entry, removing it",
                missing
            );
            queue.remove_from_queue(*missing);
            return Compatibility::Pending;
        }

        let mut member_count = 0;
        let mut activity_parties = Vec::new();
        let mut formed_parties = Vec::new();
        let mut roles = RoleMap::new();
        let mut owners: Vec<(ActorId, CandidateId)> = Vec::new();
        let mut origins = BTreeMap::new();
        let mut activities: Option<BTreeSet<ActivityId>> = None;

        for candidate in check {
            let Some(entry) = queue.entry(candidate) else {
                return Compatibility::Pending;
            };
            member_count += entry.member_count();
            if let CandidateId::Party(party) = candidate {
                if self.ctx.store.is_activity_party(*party) {
                    activity_parties.push(*party);
                } else {
                    formed_parties.push(*party);
                }
            }
            for (actor, flags) in &entry.roles {
                if roles.insert(*actor, *flags).is_some() {
                    error!("Actor {} is queued in more than one candidate", actor);
                }
                owners.push((*actor, *candidate));
                origins.insert(*actor, candidate.party());
            }
            activities = Some(match activities {
                None => entry.activities.clone(),
                Some(shared) => shared.intersection(&entry.activities).copied().collect(),
            });
        }
        let activities = activities.unwrap_or_default();

        if check.len() == 1 && member_count != party_size {
            let verdict = match self.ctx.assigner.assign(&roles, self.ctx.quotas) {
                Some(assignment) => {
                    queue.update_best_compatible(&check[0], &key, &assignment);
                    queue
                        .compatibility_mut()
                        .insert(key, CompatibilityRecord::partial(assignment));
                    return Compatibility::TooFewPlayers;
                }
                None => Compatibility::NoValidRoles,
            };
            return memoize(queue, key, verdict);
        }

        if activity_parties.len() > 1 {
            return memoize(queue, key, Compatibility::MultipleExistingParties);
        }
        if member_count > party_size {
            return memoize(queue, key, Compatibility::TooManyPlayers);
        }
        if roles.len() != member_count {
            return memoize(queue, key, Compatibility::BadState);
        }

        if check.len() > 1 {
            if self.has_mutual_ignore(&owners) {
                return memoize(queue, key, Compatibility::HasMutualIgnore);
            }
            if activities.is_empty() {
                return memoize(queue, key, Compatibility::NoCommonActivity);
            }
        }

        let Some(assignment) = self.ctx.assigner.assign(&roles, self.ctx.quotas) else {
            return memoize(queue, key, Compatibility::NoValidRoles);
        };

        if member_count < party_size {
            for candidate in check {
                queue.update_best_compatible(candidate, &key, &assignment);
            }
            queue
                .compatibility_mut()
                .insert(key, CompatibilityRecord::partial(assignment));
            return Compatibility::TooFewPlayers;
        }

        if !self.ctx.all_queued(check) {
            return memoize(queue, key, Compatibility::BadState);
        }

        let (existing_party, existing_party_in_activity) = match activity_parties.first() {
            Some(party) => (Some(*party), true),
            None if formed_parties.len() == 1 => (Some(formed_parties[0]), false),
            None => (None, false),
        };

        for candidate in check {
            queue.remove_from_buckets(candidate);
        }

        debug!("Candidate set {} forms a full party", key);
        formed.push(MatchedGroup {
            candidates: check.to_vec(),
            activities,
            roles,
            assignment,
            origins,
            existing_party,
            existing_party_in_activity,
        });
        memoize(queue, key, Compatibility::Match)
    }

    fn has_mutual_ignore(&self, owners: &[(ActorId, CandidateId)]) -> bool {
        owners.iter().enumerate().any(|(i, (actor, owner))| {
            owners[i + 1..].iter().any(|(other, other_owner)| {
                owner != other_owner
                    && (self.ctx.eligibility.is_ignoring(*actor, *other)
                        || self.ctx.eligibility.is_ignoring(*other, *actor))
            })
        })
    }
}

fn memoize(queue: &mut LfgQueue, key: CandidateSet, verdict: Compatibility) -> Compatibility {
    debug!("Candidate set {} is {}", key, verdict);
    queue
        .compatibility_mut()
        .insert(key, CompatibilityRecord::verdict(verdict));
    verdict
}
