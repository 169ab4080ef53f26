//! Participant and party runtime state
//!
//! Every actor and party the finder has seen has a lifecycle state and a
//! resume state. Transient states (role check, queued, proposal) leave the
//! resume state alone, so any failure path can put the actor back where it
//! was with `restore_state`.

use crate::types::{
    ActivityId, ActorId, CandidateId, LifecycleState, PartyId, RoleFlags, Team,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};
use uuid::Uuid;

/// Runtime state of a single participant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantState {
    pub state: LifecycleState,
    pub resume_state: LifecycleState,
    pub team: Team,
    pub roles: RoleFlags,
    /// Activities as requested; a random activity stays collapsed to its id
    pub selected_activities: BTreeSet<ActivityId>,
    pub party: Option<PartyId>,
    pub ticket: Option<Uuid>,
    pub party_size_at_join: u8,
}

impl ParticipantState {
    fn set_state(&mut self, state: LifecycleState) {
        match state {
            LifecycleState::Idle | LifecycleState::ActivityFinished => {
                self.roles = RoleFlags::empty();
                self.selected_activities.clear();
                self.ticket = None;
                self.resume_state = state;
            }
            LifecycleState::InActivity => self.resume_state = state,
            LifecycleState::RoleCheck | LifecycleState::Queued | LifecycleState::Proposal => {}
        }
        self.state = state;
    }

    fn restore(&mut self) {
        if self.resume_state == LifecycleState::Idle {
            self.roles = RoleFlags::empty();
            self.selected_activities.clear();
            self.ticket = None;
        }
        self.state = self.resume_state;
    }
}

/// Runtime state of a party known to the finder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyState {
    pub state: LifecycleState,
    pub resume_state: LifecycleState,
    pub activity: Option<ActivityId>,
    pub members: BTreeSet<ActorId>,
    pub leader: Option<ActorId>,
    pub kicks_left: u8,
    pub vote_kick_active: bool,
    pub ticket: Option<Uuid>,
}

impl PartyState {
    fn new(max_kicks: u8) -> Self {
        Self {
            state: LifecycleState::Idle,
            resume_state: LifecycleState::Idle,
            activity: None,
            members: BTreeSet::new(),
            leader: None,
            kicks_left: max_kicks,
            vote_kick_active: false,
            ticket: None,
        }
    }

    /// A party that already runs (or ran) an activity through the finder
    pub fn is_activity_party(&self) -> bool {
        self.resume_state != LifecycleState::Idle
    }
}

/// Store of participant and party state
#[derive(Debug, Default)]
pub struct StateStore {
    participants: HashMap<ActorId, ParticipantState>,
    parties: HashMap<PartyId, PartyState>,
    max_kicks: u8,
}

impl StateStore {
    pub fn new(max_kicks: u8) -> Self {
        Self {
            participants: HashMap::new(),
            parties: HashMap::new(),
            max_kicks,
        }
    }

    /// Participant state, created on first use
    pub fn participant_mut(&mut self, actor: ActorId) -> &mut ParticipantState {
        self.participants.entry(actor).or_insert_with(|| {
            trace!("Creating participant state for actor {}", actor);
            ParticipantState::default()
        })
    }

    pub fn participant(&self, actor: ActorId) -> Option<&ParticipantState> {
        self.participants.get(&actor)
    }

    /// Party state, created on first use
    pub fn party_mut(&mut self, party: PartyId) -> &mut PartyState {
        let max_kicks = self.max_kicks;
        self.parties.entry(party).or_insert_with(|| {
            trace!("Creating party state for party {}", party);
            PartyState::new(max_kicks)
        })
    }

    pub fn party(&self, party: PartyId) -> Option<&PartyState> {
        self.parties.get(&party)
    }

    pub fn state(&self, candidate: CandidateId) -> LifecycleState {
        match candidate {
            CandidateId::Actor(actor) => self
                .participants
                .get(&actor)
                .map(|p| p.state)
                .unwrap_or_default(),
            CandidateId::Party(party) => self
                .parties
                .get(&party)
                .map(|p| p.state)
                .unwrap_or_default(),
        }
    }

    pub fn resume_state(&self, candidate: CandidateId) -> LifecycleState {
        match candidate {
            CandidateId::Actor(actor) => self
                .participants
                .get(&actor)
                .map(|p| p.resume_state)
                .unwrap_or_default(),
            CandidateId::Party(party) => self
                .parties
                .get(&party)
                .map(|p| p.resume_state)
                .unwrap_or_default(),
        }
    }

    pub fn set_state(&mut self, candidate: CandidateId, state: LifecycleState) {
        match candidate {
            CandidateId::Actor(actor) => {
                let participant = self.participant_mut(actor);
                debug!(
                    "Actor {} state: {} -> {}",
                    actor, participant.state, state
                );
                participant.set_state(state);
            }
            CandidateId::Party(party) => {
                let max_kicks = self.max_kicks;
                let record = self.party_mut(party);
                debug!("Party {} state: {} -> {}", party, record.state, state);
                match state {
                    LifecycleState::Idle => {
                        record.activity = None;
                        record.kicks_left = max_kicks;
                        record.ticket = None;
                        record.resume_state = state;
                    }
                    LifecycleState::InActivity | LifecycleState::ActivityFinished => {
                        record.resume_state = state;
                    }
                    LifecycleState::RoleCheck
                    | LifecycleState::Queued
                    | LifecycleState::Proposal => {}
                }
                record.state = state;
            }
        }
    }

    /// Return a candidate to its resume state
    pub fn restore_state(&mut self, candidate: CandidateId, reason: &str) {
        match candidate {
            CandidateId::Actor(actor) => {
                let participant = self.participant_mut(actor);
                debug!(
                    "Restoring actor {} from {} to {} ({})",
                    actor, participant.state, participant.resume_state, reason
                );
                participant.restore();
            }
            CandidateId::Party(party) => {
                let record = self.party_mut(party);
                debug!(
                    "Restoring party {} from {} to {} ({})",
                    party, record.state, record.resume_state, reason
                );
                record.state = record.resume_state;
            }
        }
    }

    pub fn roles(&self, actor: ActorId) -> RoleFlags {
        self.participants
            .get(&actor)
            .map(|p| p.roles)
            .unwrap_or_default()
    }

    pub fn set_roles(&mut self, actor: ActorId, roles: RoleFlags) {
        self.participant_mut(actor).roles = roles;
    }

    pub fn selected_activities(&self, actor: ActorId) -> BTreeSet<ActivityId> {
        self.participants
            .get(&actor)
            .map(|p| p.selected_activities.clone())
            .unwrap_or_default()
    }

    pub fn set_selected_activities(&mut self, actor: ActorId, activities: BTreeSet<ActivityId>) {
        self.participant_mut(actor).selected_activities = activities;
    }

    pub fn set_ticket(&mut self, candidate: CandidateId, ticket: Uuid) {
        match candidate {
            CandidateId::Actor(actor) => self.participant_mut(actor).ticket = Some(ticket),
            CandidateId::Party(party) => self.party_mut(party).ticket = Some(ticket),
        }
    }

    pub fn team(&self, actor: ActorId) -> Team {
        self.participants
            .get(&actor)
            .map(|p| p.team)
            .unwrap_or_default()
    }

    pub fn set_team(&mut self, actor: ActorId, team: Team) {
        self.participant_mut(actor).team = team;
    }

    /// Team of a candidate; a party takes its leader's team
    pub fn candidate_team(&self, candidate: CandidateId) -> Team {
        match candidate {
            CandidateId::Actor(actor) => self.team(actor),
            CandidateId::Party(party) => self
                .leader(party)
                .map(|leader| self.team(leader))
                .unwrap_or_default(),
        }
    }

    pub fn party_of(&self, actor: ActorId) -> Option<PartyId> {
        self.participants.get(&actor).and_then(|p| p.party)
    }

    pub fn set_party(&mut self, actor: ActorId, party: Option<PartyId>) {
        self.participant_mut(actor).party = party;
    }

    pub fn members(&self, party: PartyId) -> Vec<ActorId> {
        self.parties
            .get(&party)
            .map(|p| p.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Add a member; returns the new member count
    pub fn add_member(&mut self, party: PartyId, actor: ActorId) -> usize {
        let record = self.party_mut(party);
        record.members.insert(actor);
        record.members.len()
    }

    /// Remove a member; returns the remaining member count
    pub fn remove_member(&mut self, party: PartyId, actor: ActorId) -> usize {
        match self.parties.get_mut(&party) {
            Some(record) => {
                record.members.remove(&actor);
                record.members.len()
            }
            None => 0,
        }
    }

    pub fn leader(&self, party: PartyId) -> Option<ActorId> {
        self.parties.get(&party).and_then(|p| p.leader)
    }

    pub fn set_leader(&mut self, party: PartyId, leader: ActorId) {
        self.party_mut(party).leader = Some(leader);
    }

    pub fn activity(&self, party: PartyId) -> Option<ActivityId> {
        self.parties.get(&party).and_then(|p| p.activity)
    }

    pub fn set_activity(&mut self, party: PartyId, activity: Option<ActivityId>) {
        self.party_mut(party).activity = activity;
    }

    pub fn kicks_left(&self, party: PartyId) -> u8 {
        self.parties
            .get(&party)
            .map(|p| p.kicks_left)
            .unwrap_or(self.max_kicks)
    }

    pub fn decrease_kicks_left(&mut self, party: PartyId) {
        let record = self.party_mut(party);
        record.kicks_left = record.kicks_left.saturating_sub(1);
    }

    pub fn is_vote_kick_active(&self, party: PartyId) -> bool {
        self.parties
            .get(&party)
            .map(|p| p.vote_kick_active)
            .unwrap_or(false)
    }

    pub fn set_vote_kick_active(&mut self, party: PartyId, active: bool) {
        self.party_mut(party).vote_kick_active = active;
    }

    pub fn is_activity_party(&self, party: PartyId) -> bool {
        self.parties
            .get(&party)
            .map(PartyState::is_activity_party)
            .unwrap_or(false)
    }

    /// Forget a party entirely
    pub fn remove_party(&mut self, party: PartyId) -> Option<PartyState> {
        self.parties.remove(&party)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn party_count(&self) -> usize {
        self.parties.len()
    }
}
