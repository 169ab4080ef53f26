//! Queue admission and leaving
//!
//! A join request is validated completely before anything is written, so a
//! rejection never changes participant or party state.

use super::MatchmakingService;
use crate::catalog::{ActivityCategory, ActivityFamily};
use crate::lifecycle::{RoleCheck, RoleCheckState};
use crate::notify::Notification;
use crate::providers::filter_roles;
use crate::types::{
    ActivityId, ActorId, CandidateId, JoinResultCode, LifecycleState, LockMap, PartyId,
    RoleFlags, UpdateKind,
};
use crate::utils::{generate_ticket, to_chrono};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Validated join request, ready to apply
struct Admission {
    candidate: CandidateId,
    party: Option<PartyId>,
    members: Vec<ActorId>,
    roles: RoleFlags,
    /// As requested, random activities collapsed to their id
    selected: BTreeSet<ActivityId>,
    /// What the candidate is matched on
    expanded: BTreeSet<ActivityId>,
    requeue: bool,
}

/// A rejection and the locks that explain it
struct Rejection {
    code: JoinResultCode,
    locks: LockMap,
}

impl From<JoinResultCode> for Rejection {
    fn from(code: JoinResultCode) -> Self {
        Self {
            code,
            locks: LockMap::new(),
        }
    }
}

impl MatchmakingService {
    /// Queue an actor, or the party it leads, for a set of activities
    pub fn join_queue(
        &mut self,
        actor: ActorId,
        roles: RoleFlags,
        activities: BTreeSet<ActivityId>,
    ) -> JoinResultCode {
        match self.validate_join(actor, roles, activities) {
            Ok(admission) => {
                self.admit(actor, admission);
                self.counters.joins_accepted += 1;
                self.with_metrics_do(|m| m.record_join(JoinResultCode::Ok));
                JoinResultCode::Ok
            }
            Err(rejection) => {
                info!(
                    "Join of actor {} rejected: {}",
                    actor,
                    rejection.code.as_str()
                );
                self.notify(Notification::JoinResult {
                    actor,
                    result: rejection.code,
                    role_check_state: None,
                    locks: rejection.locks,
                });
                self.counters.joins_rejected += 1;
                self.with_metrics_do(|m| m.record_join(rejection.code));
                rejection.code
            }
        }
    }

    fn validate_join(
        &self,
        actor: ActorId,
        roles: RoleFlags,
        mut activities: BTreeSet<ActivityId>,
    ) -> Result<Admission, Rejection> {
        let roles = filter_roles(
            self.collaborators.role_capabilities.as_ref(),
            actor,
            roles & RoleFlags::all(),
        );
        if !roles.has_assignable_role() {
            return Err(JoinResultCode::NoRoleSelected.into());
        }

        let party = self.store.party_of(actor);
        let candidate = party.map_or(CandidateId::Actor(actor), CandidateId::Party);
        let members = match party {
            Some(party) => {
                if self.store.leader(party) != Some(actor) {
                    return Err(JoinResultCode::NotPartyLeader.into());
                }
                self.store.members(party)
            }
            None => vec![actor],
        };
        if members.len() > self.config.party_size() {
            return Err(JoinResultCode::TooManyMembers.into());
        }

        let state = self.store.state(candidate);
        if matches!(state, LifecycleState::RoleCheck | LifecycleState::Proposal) {
            return Err(JoinResultCode::AlreadyInProgress.into());
        }

        // A party that has not finished its activity can only look for
        // replacements for that activity
        let continuing = party.and_then(|party| {
            let record = self.store.party(party)?;
            (record.is_activity_party() && record.state != LifecycleState::ActivityFinished)
                .then_some(record.activity)
                .flatten()
        });
        if let Some(activity) = continuing {
            activities = BTreeSet::from([activity]);
        }
        if activities.is_empty() {
            return Err(JoinResultCode::InvalidActivity.into());
        }

        let catalog = self.collaborators.catalog.as_ref();
        let mut definitions = Vec::with_capacity(activities.len());
        for id in &activities {
            match catalog.get(*id) {
                Some(definition) => definitions.push(definition),
                None => {
                    debug!("Actor {} asked for unknown activity {}", actor, id);
                    return Err(JoinResultCode::InvalidActivity.into());
                }
            }
        }

        let random = definitions.iter().any(|definition| definition.is_random());
        if random && definitions.len() > 1 {
            return Err(JoinResultCode::InvalidActivity.into());
        }
        if definitions
            .iter()
            .any(|definition| definition.category == ActivityCategory::Zone)
        {
            return Err(JoinResultCode::InvalidActivity.into());
        }
        let families: BTreeSet<ActivityFamily> = definitions
            .iter()
            .map(|definition| definition.category.family())
            .collect();
        if families.len() > 1 {
            return Err(JoinResultCode::MixedActivityCategories.into());
        }

        let eligibility = self.collaborators.eligibility.as_ref();
        for member in &members {
            if let Some(restriction) = eligibility.join_restriction(*member) {
                if restriction.is_random_cooldown() && (!random || continuing.is_some()) {
                    continue;
                }
                return Err(if party.is_some() {
                    restriction.party_code()
                } else {
                    restriction.solo_code()
                }
                .into());
            }
        }

        let mut expanded = if random {
            activities
                .iter()
                .flat_map(|id| catalog.expand_random(*id))
                .collect()
        } else {
            activities.clone()
        };

        let mut locks = LockMap::new();
        for member in &members {
            let member_locks = eligibility.check_locks(*member);
            let relevant: BTreeMap<_, _> = member_locks
                .into_iter()
                .filter(|(key, _)| expanded.contains(&key.activity_id()))
                .filter(|(key, _)| {
                    catalog
                        .get(key.activity_id())
                        .is_some_and(|definition| definition.key() == *key)
                })
                .collect();
            if !relevant.is_empty() {
                locks.insert(*member, relevant);
            }
        }
        for member_locks in locks.values() {
            for key in member_locks.keys() {
                expanded.remove(&key.activity_id());
            }
        }
        if expanded.is_empty() {
            let code = if party.is_some() {
                JoinResultCode::PartyNotMeetRequirements
            } else {
                JoinResultCode::NotMeetRequirements
            };
            return Err(Rejection { code, locks });
        }

        Ok(Admission {
            candidate,
            party,
            members,
            roles,
            selected: activities,
            expanded,
            requeue: state == LifecycleState::Queued,
        })
    }

    fn admit(&mut self, actor: ActorId, admission: Admission) {
        let Admission {
            candidate,
            party,
            members,
            roles,
            selected,
            expanded,
            requeue,
        } = admission;

        if requeue {
            debug!("{} re-queues with a new request", candidate);
            self.remove_from_queues(candidate);
        }
        let ticket = generate_ticket();
        self.store.set_ticket(candidate, ticket);

        match party {
            None => {
                let partition = self.partition_of(candidate);
                let now = self.now;
                self.queue_mut(partition).add_queue_data(
                    candidate,
                    now,
                    expanded,
                    BTreeMap::from([(actor, roles)]),
                );
                self.store
                    .set_selected_activities(actor, selected.clone());
                self.store.set_roles(actor, roles);
                self.store.set_state(candidate, LifecycleState::Queued);
                self.store.participant_mut(actor).party_size_at_join = 1;

                info!(
                    "Actor {} queued for {:?} in partition {}",
                    actor, selected, partition
                );
                self.notify(Notification::JoinResult {
                    actor,
                    result: JoinResultCode::Ok,
                    role_check_state: None,
                    locks: LockMap::new(),
                });
                self.notify_status(actor, UpdateKind::JoinQueue, selected, None);
            }
            Some(party) => {
                let cancel_at = self.now + to_chrono(self.config.role_check_timeout());
                let check = RoleCheck::new(
                    party,
                    actor,
                    members.iter().copied(),
                    expanded,
                    selected.clone(),
                    cancel_at,
                );

                self.store.set_state(candidate, LifecycleState::RoleCheck);
                let size = u8::try_from(members.len()).unwrap_or(u8::MAX);
                for member in &members {
                    let member_candidate = CandidateId::Actor(*member);
                    self.store.set_state(member_candidate, LifecycleState::RoleCheck);
                    self.store.set_selected_activities(*member, selected.clone());
                    self.store.participant_mut(*member).party_size_at_join = size;
                }
                self.role_checks.insert(check);

                info!(
                    "Party {} ({} members) starts a role check for {:?}",
                    party,
                    members.len(),
                    selected
                );
                for member in &members {
                    self.notify(Notification::JoinResult {
                        actor: *member,
                        result: JoinResultCode::Ok,
                        role_check_state: Some(RoleCheckState::Initiating),
                        locks: LockMap::new(),
                    });
                    self.notify_status(
                        *member,
                        UpdateKind::JoinQueue,
                        selected.clone(),
                        Some(party),
                    );
                }

                // The leader's roles count as its vote
                self.submit_role_vote(party, actor, roles);
            }
        }
    }

    /// Leave whatever the actor is doing in the finder. A disconnected
    /// actor always takes its whole queued party out.
    pub fn leave_queue(&mut self, actor: ActorId, disconnected: bool) {
        let party = self.store.party_of(actor);
        let candidate = party.map_or(CandidateId::Actor(actor), CandidateId::Party);

        match self.store.state(candidate) {
            LifecycleState::Queued => {
                if let Some(party) = party {
                    if self.store.leader(party) != Some(actor) && !disconnected {
                        debug!(
                            "Ignoring leave of non-leader {} for queued party {}",
                            actor, party
                        );
                        return;
                    }
                }
                self.leave_queued(candidate, UpdateKind::RemovedFromQueue);
                return;
            }
            LifecycleState::RoleCheck => {
                if let Some(party) = party {
                    self.abort_role_check(party);
                    return;
                }
            }
            _ => {}
        }

        match self.store.state(CandidateId::Actor(actor)) {
            LifecycleState::Proposal => match self.proposals.find_by_member(actor) {
                Some(proposal) => self.respond_proposal(proposal, actor, false),
                None => {
                    warn!("Actor {} in proposal state without a proposal", actor);
                    self.store
                        .restore_state(CandidateId::Actor(actor), "proposal missing");
                }
            },
            LifecycleState::InActivity | LifecycleState::ActivityFinished
                if party.is_none() && !disconnected =>
            {
                debug!("Actor {} leaves its finished activity", actor);
                self.store
                    .set_state(CandidateId::Actor(actor), LifecycleState::Idle);
            }
            LifecycleState::Queued => {
                // Solo queue entry of a party member
                self.leave_queued(CandidateId::Actor(actor), UpdateKind::RemovedFromQueue);
            }
            _ => debug!("Actor {} has nothing to leave", actor),
        }
    }

    /// Take a queued candidate out of the queue and back to its resume
    /// point
    pub(super) fn leave_queued(&mut self, candidate: CandidateId, kind: UpdateKind) {
        self.remove_from_queues(candidate);
        let members = self.candidate_members(candidate);
        let party = candidate.party();

        self.store.restore_state(candidate, "left queue");
        for member in &members {
            if party.is_some() {
                self.store
                    .restore_state(CandidateId::Actor(*member), "party left queue");
            }
            self.notify_status(*member, kind, BTreeSet::new(), party);
        }
        info!("{} left the queue", candidate);
    }
}
