//! Party role checks
//!
//! Before a party is queued every member confirms the roles they are
//! willing to play. The check finishes once all votes are in and the
//! combined roles can fill a party.

use crate::roles::{RoleAssigner, RoleQuotas};
use crate::types::{ActivityId, ActorId, PartyId, RoleFlags, RoleMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleCheckState {
    Initiating,
    Finished,
    WrongRoles,
    NoRole,
    MissingRole,
    Aborted,
}

impl RoleCheckState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RoleCheckState::Initiating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleCheckState::Initiating => "initiating",
            RoleCheckState::Finished => "finished",
            RoleCheckState::WrongRoles => "wrong_roles",
            RoleCheckState::NoRole => "no_role",
            RoleCheckState::MissingRole => "missing_role",
            RoleCheckState::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCheck {
    pub party: PartyId,
    pub leader: ActorId,
    /// Expanded activities the party will queue for
    pub activities: BTreeSet<ActivityId>,
    /// Activities as requested, random activities collapsed
    pub selected: BTreeSet<ActivityId>,
    pub cancel_at: DateTime<Utc>,
    pub state: RoleCheckState,
    /// Empty flags mean the member has not voted yet
    pub votes: RoleMap,
}

impl RoleCheck {
    pub fn new(
        party: PartyId,
        leader: ActorId,
        members: impl IntoIterator<Item = ActorId>,
        activities: BTreeSet<ActivityId>,
        selected: BTreeSet<ActivityId>,
        cancel_at: DateTime<Utc>,
    ) -> Self {
        Self {
            party,
            leader,
            activities,
            selected,
            cancel_at,
            state: RoleCheckState::Initiating,
            votes: members
                .into_iter()
                .map(|member| (member, RoleFlags::empty()))
                .collect(),
        }
    }

    pub fn has_voted(&self, actor: ActorId) -> bool {
        self.votes.get(&actor).is_some_and(|flags| !flags.is_empty())
    }

    pub fn all_voted(&self) -> bool {
        self.votes.values().all(|flags| !flags.is_empty())
    }

    /// Record a member's roles. Only the first vote of each member counts;
    /// a vote without any assignable role fails the check.
    pub fn record_vote(
        &mut self,
        actor: ActorId,
        roles: RoleFlags,
        assigner: &dyn RoleAssigner,
        quotas: RoleQuotas,
    ) -> RoleCheckState {
        if self.state.is_terminal() || !self.votes.contains_key(&actor) || self.has_voted(actor) {
            debug!(
                "Role check of party {}: ignoring vote of actor {}",
                self.party, actor
            );
            return self.state;
        }

        if !roles.has_assignable_role() {
            self.state = RoleCheckState::NoRole;
            return self.state;
        }

        self.votes.insert(actor, roles);
        if self.all_voted() {
            self.state = match assigner.assign(&self.votes, quotas) {
                Some(_) => RoleCheckState::Finished,
                None => RoleCheckState::WrongRoles,
            };
        }
        self.state
    }

    pub fn abort(&mut self) -> RoleCheckState {
        if !self.state.is_terminal() {
            self.state = RoleCheckState::Aborted;
        }
        self.state
    }

    pub fn expire(&mut self) -> RoleCheckState {
        if !self.state.is_terminal() {
            self.state = RoleCheckState::MissingRole;
        }
        self.state
    }
}

/// Running role checks, one per party
#[derive(Debug, Default)]
pub struct RoleCheckBook {
    checks: HashMap<PartyId, RoleCheck>,
}

impl RoleCheckBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, check: RoleCheck) {
        self.checks.insert(check.party, check);
    }

    pub fn get(&self, party: PartyId) -> Option<&RoleCheck> {
        self.checks.get(&party)
    }

    pub fn get_mut(&mut self, party: PartyId) -> Option<&mut RoleCheck> {
        self.checks.get_mut(&party)
    }

    pub fn remove(&mut self, party: PartyId) -> Option<RoleCheck> {
        self.checks.remove(&party)
    }

    pub fn contains(&self, party: PartyId) -> bool {
        self.checks.contains_key(&party)
    }

    pub fn expired(&self, now: DateTime<Utc>) -> Vec<PartyId> {
        let mut parties: Vec<PartyId> = self
            .checks
            .values()
            .filter(|check| !check.state.is_terminal() && check.cancel_at < now)
            .map(|check| check.party)
            .collect();
        parties.sort_unstable();
        parties
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
