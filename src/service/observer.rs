//! Party membership events from the game server
//!
//! The finder never owns parties; it mirrors them. Every callback is
//! idempotent so replays from the message bus do no harm.

use super::MatchmakingService;
use crate::types::{ActorId, CandidateId, LifecycleState, PartyId, UpdateKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Why a member left its party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRemoval {
    Left,
    Kicked,
    Disconnected,
}

/// Callbacks for party changes made outside the finder
pub trait PartyLifecycleObserver {
    fn on_member_added(&mut self, party: PartyId, actor: ActorId);
    fn on_member_removed(&mut self, party: PartyId, actor: ActorId, removal: MemberRemoval);
    fn on_leader_changed(&mut self, party: PartyId, leader: ActorId);
    fn on_disbanded(&mut self, party: PartyId);
}

impl MatchmakingService {
    /// Pull a party out of any queueing step it is in
    fn interrupt_party(&mut self, party: PartyId) {
        match self.store.state(CandidateId::Party(party)) {
            LifecycleState::Queued => {
                self.leave_queued(CandidateId::Party(party), UpdateKind::RemovedFromQueue)
            }
            LifecycleState::RoleCheck => self.abort_role_check(party),
            _ => {}
        }
    }
}

impl PartyLifecycleObserver for MatchmakingService {
    fn on_member_added(&mut self, party: PartyId, actor: ActorId) {
        if self.store.party_of(actor) == Some(party)
            && self.store.members(party).contains(&actor)
        {
            debug!("Actor {} already a member of party {}", actor, party);
            return;
        }

        if self.store.state(CandidateId::Actor(actor)) == LifecycleState::Queued
            && self.store.party_of(actor).is_none()
        {
            self.leave_queued(CandidateId::Actor(actor), UpdateKind::RemovedFromQueue);
        }
        self.interrupt_party(party);

        self.store.set_party(actor, Some(party));
        let count = self.store.add_member(party, actor);
        if self.store.leader(party).is_none() {
            self.store.set_leader(party, actor);
        }
        debug!("Actor {} joined party {} ({} members)", actor, party, count);
    }

    fn on_member_removed(&mut self, party: PartyId, actor: ActorId, removal: MemberRemoval) {
        if !self.store.members(party).contains(&actor) {
            debug!("Actor {} is not a member of party {}", actor, party);
            return;
        }

        self.interrupt_party(party);
        if self.store.state(CandidateId::Actor(actor)) == LifecycleState::Proposal {
            if let Some(proposal) = self.proposals.find_by_member(actor) {
                self.respond_proposal(proposal, actor, false);
            }
        }
        self.drop_boot_voter(party, actor);

        let was_in_activity = self.in_activity(actor);
        let remaining = self.store.remove_member(party, actor);
        self.store.set_party(actor, None);
        info!(
            "Actor {} left party {} ({:?}), {} members remain",
            actor, party, removal, remaining
        );

        if was_in_activity {
            let finished = self.store.state(CandidateId::Party(party))
                == LifecycleState::ActivityFinished;
            if removal == MemberRemoval::Left
                && !finished
                && remaining + 1 >= usize::from(self.config.kick_votes_needed)
            {
                self.collaborators
                    .eligibility
                    .apply_deserter_penalty(actor);
            }
            self.collaborators.party_assembler.teleport_actor(actor, None);
            self.store
                .set_state(CandidateId::Actor(actor), LifecycleState::Idle);
            self.notify_status(actor, UpdateKind::LeftParty, BTreeSet::new(), Some(party));

            if !finished && remaining > 0 {
                if let (Some(leader), Some(activity)) =
                    (self.store.leader(party), self.store.activity(party))
                {
                    self.notify(crate::notify::Notification::OfferContinue {
                        actor: leader,
                        activity,
                    });
                }
            }
        }

        if remaining == 0 {
            self.on_disbanded(party);
        }
    }

    fn on_leader_changed(&mut self, party: PartyId, leader: ActorId) {
        if !self.store.members(party).contains(&leader) {
            warn!("Leader {} of party {} is not a known member", leader, party);
        }
        self.store.set_leader(party, leader);
    }

    fn on_disbanded(&mut self, party: PartyId) {
        if self.store.party(party).is_none() {
            return;
        }
        self.interrupt_party(party);
        if self.boot_votes.remove(party).is_some() {
            debug!("Dropping vote-kick of disbanded party {}", party);
        }

        for member in self.store.members(party) {
            self.store.set_party(member, None);
            if self.in_activity(member) {
                self.store
                    .set_state(CandidateId::Actor(member), LifecycleState::Idle);
            }
        }
        self.store.remove_party(party);
        if let Err(e) = self.collaborators.persistence.delete(party) {
            warn!("Failed to delete persisted party {}: {}", party, e);
        }
        info!("Party {} disbanded", party);
    }
}
