//! Vote-kicks inside parties running an activity

use super::MatchmakingService;
use crate::lifecycle::{BootOutcome, BootVote, BootVoteStart};
use crate::notify::Notification;
use crate::types::{ActorId, CandidateId, LifecycleState, PartyId};
use crate::utils::to_chrono;
use tracing::{debug, info};

impl MatchmakingService {
    /// Start a vote to remove `victim` from `party`
    pub fn initiate_boot_vote(
        &mut self,
        party: PartyId,
        kicker: ActorId,
        victim: ActorId,
        reason: impl Into<String>,
    ) -> BootVoteStart {
        let verdict = self.check_boot_vote(party, kicker, victim);
        if verdict != BootVoteStart::Started {
            debug!(
                "Vote-kick of {} by {} in party {} refused: {:?}",
                victim, kicker, party, verdict
            );
            return verdict;
        }

        let cancel_at = self.now + to_chrono(self.config.boot_vote_timeout());
        let vote = BootVote::new(
            party,
            kicker,
            victim,
            reason,
            self.store.members(party),
            cancel_at,
        );
        info!(
            "Vote-kick started in party {}: {} wants {} removed ({})",
            party, kicker, victim, vote.reason
        );

        self.store.set_vote_kick_active(party, true);
        self.broadcast_boot_vote(&vote);
        let outcome = vote.evaluate(self.config.kick_votes_needed, false);
        self.boot_votes.insert(vote);
        if outcome != BootOutcome::Pending {
            self.resolve_boot_vote(party, outcome);
        }
        BootVoteStart::Started
    }

    fn check_boot_vote(&self, party: PartyId, kicker: ActorId, victim: ActorId) -> BootVoteStart {
        let Some(record) = self.store.party(party) else {
            return BootVoteStart::UnknownParty;
        };
        if !record.is_activity_party() || record.state != LifecycleState::InActivity {
            return BootVoteStart::NotInActivity;
        }
        if kicker == victim {
            return BootVoteStart::CannotKickSelf;
        }
        if !record.members.contains(&kicker) || !record.members.contains(&victim) {
            return BootVoteStart::NotAMember;
        }
        if record.vote_kick_active || self.boot_votes.contains(party) {
            return BootVoteStart::AlreadyInProgress;
        }
        if record.kicks_left == 0 {
            return BootVoteStart::NoKicksLeft;
        }
        BootVoteStart::Started
    }

    /// Record a member's vote; repeat votes are ignored
    pub fn respond_boot_vote(&mut self, party: PartyId, actor: ActorId, agree: bool) {
        let threshold = self.config.kick_votes_needed;
        let Some(vote) = self.boot_votes.get_mut(party) else {
            debug!("Boot vote answer from {} for party {} without a vote", actor, party);
            return;
        };
        if !vote.record(actor, agree) {
            debug!("Ignoring boot vote answer of {} in party {}", actor, party);
            return;
        }

        let outcome = vote.evaluate(threshold, false);
        if outcome != BootOutcome::Pending {
            self.resolve_boot_vote(party, outcome);
        }
    }

    pub(super) fn expire_boot_vote(&mut self, party: PartyId) {
        let threshold = self.config.kick_votes_needed;
        if let Some(outcome) = self
            .boot_votes
            .get(party)
            .map(|vote| vote.evaluate(threshold, true))
        {
            self.resolve_boot_vote(party, outcome);
        }
    }

    fn broadcast_boot_vote(&self, vote: &BootVote) {
        for actor in vote.votes.keys() {
            self.notify(Notification::BootVoteUpdate {
                actor: *actor,
                boot: vote.clone(),
            });
        }
    }

    /// Close a vote and tell every member, the victim included
    pub(super) fn resolve_boot_vote(&mut self, party: PartyId, outcome: BootOutcome) {
        let Some(mut vote) = self.boot_votes.remove(party) else {
            return;
        };
        vote.in_progress = false;
        self.store.set_vote_kick_active(party, false);
        self.broadcast_boot_vote(&vote);

        info!(
            "Vote-kick of {} in party {} resolved: {:?}",
            vote.victim, party, outcome
        );
        let label = match outcome {
            BootOutcome::Kicked => {
                self.store.decrease_kicks_left(party);
                self.counters.members_kicked += 1;
                self.collaborators
                    .party_assembler
                    .kick_member(party, vote.victim);
                "kicked"
            }
            BootOutcome::Rejected => "rejected",
            BootOutcome::Pending => "cancelled",
        };
        self.with_metrics_do(|m| m.record_boot_vote(label));
    }

    /// A member left mid-vote: drop its vote, or the whole vote if it was
    /// the victim
    pub(super) fn drop_boot_voter(&mut self, party: PartyId, actor: ActorId) {
        let threshold = self.config.kick_votes_needed;
        let Some(vote) = self.boot_votes.get_mut(party) else {
            return;
        };
        if vote.victim == actor {
            self.resolve_boot_vote(party, BootOutcome::Pending);
            return;
        }
        vote.remove_voter(actor);
        let outcome = vote.evaluate(threshold, false);
        if outcome != BootOutcome::Pending {
            self.resolve_boot_vote(party, outcome);
        }
    }

    /// Whether an actor's candidate is currently inside an activity
    pub(super) fn in_activity(&self, actor: ActorId) -> bool {
        matches!(
            self.store.state(CandidateId::Actor(actor)),
            LifecycleState::InActivity | LifecycleState::ActivityFinished
        )
    }
}
