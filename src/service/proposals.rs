//! Group proposals: creation from matched groups, answers, success and
//! failure

use super::MatchmakingService;
use crate::lifecycle::{Answer, Proposal, ProposalOutcome, ProposalState};
use crate::notify::Notification;
use crate::providers::PartyAssembly;
use crate::queue::MatchedGroup;
use crate::types::{
    ActorId, CandidateId, LifecycleState, PartitionId, ProposalId, UpdateKind,
};
use crate::utils::{elapsed_between, to_chrono};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

impl MatchmakingService {
    /// Turn matched groups into proposals
    pub(super) fn create_proposals(&mut self, partition: PartitionId, groups: Vec<MatchedGroup>) {
        for group in groups {
            let id = self.proposals.next_id();
            let cancel_at = self.now + to_chrono(self.config.proposal_timeout());
            let candidates = group.candidates.clone();

            let Some(proposal) = Proposal::from_group(id, partition, group, cancel_at, &mut self.rng)
            else {
                error!(
                    "Matched group {:?} has no shared activity or members, requeueing",
                    candidates
                );
                for candidate in candidates {
                    self.queue_mut(partition).add_to_queue(candidate, true);
                }
                continue;
            };

            for candidate in &proposal.candidates {
                self.store.set_state(*candidate, LifecycleState::Proposal);
            }
            for actor in proposal.members.keys() {
                self.store
                    .set_state(CandidateId::Actor(*actor), LifecycleState::Proposal);
            }

            info!(
                "Proposal {} created for activity {} with {} members",
                id,
                proposal.activity,
                proposal.members.len()
            );
            self.with_metrics_do(|m| m.record_proposal_created());

            let all_agreed = proposal.all_agreed();
            self.broadcast_proposal(&proposal);
            self.proposals.insert(proposal);
            if all_agreed {
                self.complete_proposal(id);
            }
        }
    }

    fn broadcast_proposal(&self, proposal: &Proposal) {
        for actor in proposal.members.keys() {
            self.notify(Notification::ProposalUpdate {
                actor: *actor,
                proposal: proposal.clone(),
            });
        }
    }

    /// Record a member's answer to a proposal
    pub fn respond_proposal(&mut self, proposal_id: ProposalId, actor: ActorId, accept: bool) {
        let Some(proposal) = self.proposals.get_mut(proposal_id) else {
            debug!(
                "Answer of actor {} to unknown proposal {}",
                actor, proposal_id
            );
            return;
        };

        let outcome = proposal.record_answer(actor, accept);
        if outcome == ProposalOutcome::Ignored {
            return;
        }
        let snapshot = proposal.clone();
        self.broadcast_proposal(&snapshot);

        match outcome {
            ProposalOutcome::Declined => {
                self.fail_proposal(proposal_id, UpdateKind::ProposalDeclined)
            }
            ProposalOutcome::Accepted => self.complete_proposal(proposal_id),
            ProposalOutcome::Pending | ProposalOutcome::Ignored => {}
        }
    }

    /// Fail a proposal. Members that declined leave the queue together with
    /// their origin party; everybody else is queued again with the original
    /// join time. On timeout a missing answer counts as a decline.
    pub(super) fn fail_proposal(&mut self, proposal_id: ProposalId, kind: UpdateKind) {
        let Some(mut proposal) = self.proposals.remove(proposal_id) else {
            return;
        };
        if kind == UpdateKind::ProposalFailed {
            proposal.deny_pending();
        }
        proposal.state = ProposalState::Failed;
        let to_remove = proposal.candidates_to_remove();
        let partition = proposal.partition;

        info!(
            "Proposal {} failed ({:?}), {} candidates leave the queue",
            proposal_id,
            kind,
            to_remove.len()
        );
        self.broadcast_proposal(&proposal);

        for (actor, member) in &proposal.members {
            let candidate = proposal.candidate_of(*actor);
            if to_remove.contains(&candidate) {
                let update = if member.answer == Answer::Deny {
                    kind
                } else {
                    UpdateKind::RemovedFromQueue
                };
                self.store
                    .restore_state(CandidateId::Actor(*actor), "proposal failed");
                self.notify_status(*actor, update, BTreeSet::new(), member.origin_party);
            } else {
                self.store
                    .set_state(CandidateId::Actor(*actor), LifecycleState::Queued);
                self.notify_status(
                    *actor,
                    UpdateKind::AddedToQueue,
                    self.store.selected_activities(*actor),
                    member.origin_party,
                );
            }
        }

        for candidate in &proposal.candidates {
            if to_remove.contains(candidate) {
                self.queue_mut(partition).remove_from_queue(*candidate);
                if candidate.is_party() {
                    self.store.restore_state(*candidate, "proposal failed");
                }
            } else {
                self.store.set_state(*candidate, LifecycleState::Queued);
                self.queue_mut(partition).add_to_queue(*candidate, true);
            }
        }

        self.counters.proposals_failed += 1;
        let outcome = if kind == UpdateKind::ProposalDeclined {
            "declined"
        } else {
            "timeout"
        };
        self.with_metrics_do(|m| m.record_proposal_resolved(outcome));
    }

    /// Everybody agreed: record wait times, assemble the party and send the
    /// members in
    fn complete_proposal(&mut self, proposal_id: ProposalId) {
        let Some(mut proposal) = self.proposals.remove(proposal_id) else {
            return;
        };
        proposal.state = ProposalState::Success;
        let partition = proposal.partition;
        let now = self.now;

        for (actor, member) in &proposal.members {
            let candidate = proposal.candidate_of(*actor);
            let Some(joined_at) = self
                .queues
                .get(&partition)
                .and_then(|queue| queue.join_time(&candidate))
            else {
                continue;
            };
            let wait = elapsed_between(joined_at, now);
            let activity = self
                .store
                .selected_activities(*actor)
                .first()
                .copied()
                .unwrap_or(proposal.activity);
            self.queue_mut(partition)
                .wait_times_mut()
                .record(activity, member.role, wait);
            self.with_metrics_do(|m| m.record_wait_time(member.role, wait));
        }

        for candidate in &proposal.candidates {
            self.queue_mut(partition).remove_from_queue(*candidate);
        }

        let assembly = PartyAssembly {
            existing_party: proposal.existing_party,
            leader: proposal.leader,
            members: proposal.assembly_order(),
            activity: proposal.activity,
        };
        let party = self
            .collaborators
            .party_assembler
            .create_or_update(&assembly);

        for actor in proposal.members.keys() {
            let previous = self.store.party_of(*actor);
            if previous != Some(party) {
                if let Some(previous) = previous {
                    if self.store.remove_member(previous, *actor) == 0 {
                        debug!("Party {} emptied by proposal {}", previous, proposal_id);
                        self.store.remove_party(previous);
                    }
                }
                self.store.set_party(*actor, Some(party));
                self.store.add_member(party, *actor);
            }
            self.store
                .set_state(CandidateId::Actor(*actor), LifecycleState::InActivity);
        }
        self.store.set_leader(party, proposal.leader);
        self.store.set_activity(party, Some(proposal.activity));
        self.store
            .set_state(CandidateId::Party(party), LifecycleState::InActivity);

        if let Err(e) = self.collaborators.persistence.save(
            party,
            proposal.activity,
            LifecycleState::InActivity,
        ) {
            warn!("Failed to persist party {}: {}", party, e);
        }

        let entrance = self
            .collaborators
            .catalog
            .get(proposal.activity)
            .map(|definition| definition.entrance);
        for actor in proposal.members_to_teleport() {
            self.collaborators
                .party_assembler
                .teleport_actor(actor, entrance);
        }

        self.broadcast_proposal(&proposal);
        let activities = BTreeSet::from([proposal.activity]);
        for actor in proposal.members.keys() {
            self.notify_status(
                *actor,
                UpdateKind::GroupFound,
                activities.clone(),
                Some(party),
            );
            self.notify_status(
                *actor,
                UpdateKind::RemovedFromQueue,
                BTreeSet::new(),
                Some(party),
            );
        }

        info!(
            "Proposal {} succeeded: party {} enters activity {}",
            proposal_id, party, proposal.activity
        );
        self.counters.groups_formed += 1;
        self.with_metrics_do(|m| m.record_proposal_resolved("success"));
    }
}
