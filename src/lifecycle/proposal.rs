//! Group proposals
//!
//! A proposal offers a matched group to its members. It succeeds once every
//! member agrees and fails on the first decline or when its deadline passes.

use crate::queue::MatchedGroup;
use crate::types::{
    ActivityId, ActorId, CandidateId, PartitionId, PartyId, ProposalId, Role, RoleFlags,
};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    Initiating,
    Success,
    Failed,
}

/// A member's answer to a proposal or a vote-kick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Answer {
    Pending,
    Agree,
    Deny,
}

/// Result of recording an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// Answer recorded, others still pending
    Pending,
    /// Everybody agreed
    Accepted,
    /// Somebody declined
    Declined,
    /// Not a member, or the proposal is no longer open
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalMember {
    pub role: Role,
    /// Flags the member queued with
    pub requested_roles: RoleFlags,
    pub answer: Answer,
    /// Party the member was queued with
    pub origin_party: Option<PartyId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub partition: PartitionId,
    pub activity: ActivityId,
    pub state: ProposalState,
    /// Party kept for the formed group
    pub existing_party: Option<PartyId>,
    /// False when the kept party already runs the activity and only takes
    /// replacements
    pub is_new: bool,
    pub leader: ActorId,
    pub cancel_at: DateTime<Utc>,
    /// Queue candidates consumed by this proposal
    pub candidates: Vec<CandidateId>,
    pub members: BTreeMap<ActorId, ProposalMember>,
}

impl Proposal {
    /// Build a proposal for a matched group. The activity is drawn from the
    /// shared activities and the leader from the members that asked to
    /// lead, falling back to any member. Members of a party already running
    /// the activity agree up front.
    pub fn from_group<R: Rng + ?Sized>(
        id: ProposalId,
        partition: PartitionId,
        group: MatchedGroup,
        cancel_at: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<Self> {
        let activities: Vec<ActivityId> = group.activities.iter().copied().collect();
        let activity = *activities.choose(rng)?;

        let volunteers: Vec<ActorId> = group
            .roles
            .iter()
            .filter(|(_, flags)| flags.is_leader())
            .map(|(actor, _)| *actor)
            .collect();
        let everyone: Vec<ActorId> = group.assignment.keys().copied().collect();
        let leader = *volunteers.choose(rng).or_else(|| everyone.choose(rng))?;

        let members = group
            .assignment
            .iter()
            .map(|(actor, role)| {
                let origin_party = group.origins.get(actor).copied().flatten();
                let auto_accept = group.existing_party_in_activity
                    && origin_party.is_some()
                    && origin_party == group.existing_party;
                (
                    *actor,
                    ProposalMember {
                        role: *role,
                        requested_roles: group.roles.get(actor).copied().unwrap_or_default(),
                        answer: if auto_accept {
                            Answer::Agree
                        } else {
                            Answer::Pending
                        },
                        origin_party,
                    },
                )
            })
            .collect();

        Some(Self {
            id,
            partition,
            activity,
            state: ProposalState::Initiating,
            existing_party: group.existing_party,
            is_new: !group.existing_party_in_activity,
            leader,
            cancel_at,
            candidates: group.candidates,
            members,
        })
    }

    pub fn is_open(&self) -> bool {
        self.state == ProposalState::Initiating
    }

    pub fn all_agreed(&self) -> bool {
        self.members
            .values()
            .all(|member| member.answer == Answer::Agree)
    }

    /// Record a member's answer. The first answer sticks.
    pub fn record_answer(&mut self, actor: ActorId, accept: bool) -> ProposalOutcome {
        if !self.is_open() {
            return ProposalOutcome::Ignored;
        }
        let Some(member) = self.members.get_mut(&actor) else {
            return ProposalOutcome::Ignored;
        };
        if member.answer != Answer::Pending {
            debug!(
                "Proposal {}: actor {} already answered {:?}",
                self.id, actor, member.answer
            );
            return ProposalOutcome::Ignored;
        }

        member.answer = if accept { Answer::Agree } else { Answer::Deny };
        debug!(
            "Proposal {}: actor {} answered {:?}",
            self.id, actor, member.answer
        );

        if !accept {
            ProposalOutcome::Declined
        } else if self.all_agreed() {
            ProposalOutcome::Accepted
        } else {
            ProposalOutcome::Pending
        }
    }

    /// Treat every missing answer as a decline
    pub fn deny_pending(&mut self) {
        for member in self.members.values_mut() {
            if member.answer == Answer::Pending {
                member.answer = Answer::Deny;
            }
        }
    }

    /// Queue candidate a member came from
    pub fn candidate_of(&self, actor: ActorId) -> CandidateId {
        self.members
            .get(&actor)
            .and_then(|member| member.origin_party)
            .map(CandidateId::Party)
            .unwrap_or(CandidateId::Actor(actor))
    }

    /// Candidates that leave the queue when this proposal fails: the
    /// candidate of every member that declined
    pub fn candidates_to_remove(&self) -> BTreeSet<CandidateId> {
        self.members
            .iter()
            .filter(|(_, member)| member.answer == Answer::Deny)
            .map(|(actor, _)| self.candidate_of(*actor))
            .collect()
    }

    /// Members in party order: leader, then tanks, healers and damage
    pub fn assembly_order(&self) -> Vec<(ActorId, Role)> {
        let mut ordered = Vec::with_capacity(self.members.len());
        if let Some(leader) = self.members.get(&self.leader) {
            ordered.push((self.leader, leader.role));
        }
        for role in Role::ALL {
            ordered.extend(
                self.members
                    .iter()
                    .filter(|(actor, member)| **actor != self.leader && member.role == role)
                    .map(|(actor, member)| (*actor, member.role)),
            );
        }
        ordered
    }

    /// Members that must travel to the activity: all of them for a new
    /// group, otherwise those joining from elsewhere
    pub fn members_to_teleport(&self) -> Vec<ActorId> {
        self.members
            .iter()
            .filter(|(_, member)| self.is_new || member.origin_party != self.existing_party)
            .map(|(actor, _)| *actor)
            .collect()
    }
}

/// Open proposals
#[derive(Debug, Default)]
pub struct ProposalBook {
    proposals: BTreeMap<ProposalId, Proposal>,
    next_id: ProposalId,
}

impl ProposalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> ProposalId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    pub fn insert(&mut self, proposal: Proposal) {
        self.proposals.insert(proposal.id, proposal);
    }

    pub fn get(&self, id: ProposalId) -> Option<&Proposal> {
        self.proposals.get(&id)
    }

    pub fn get_mut(&mut self, id: ProposalId) -> Option<&mut Proposal> {
        self.proposals.get_mut(&id)
    }

    pub fn remove(&mut self, id: ProposalId) -> Option<Proposal> {
        self.proposals.remove(&id)
    }

    /// Open proposal containing `actor`
    pub fn find_by_member(&self, actor: ActorId) -> Option<ProposalId> {
        self.proposals
            .values()
            .find(|proposal| proposal.is_open() && proposal.members.contains_key(&actor))
            .map(|proposal| proposal.id)
    }

    /// Open proposals past their deadline
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<ProposalId> {
        self.proposals
            .values()
            .filter(|proposal| proposal.is_open() && proposal.cancel_at < now)
            .map(|proposal| proposal.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn create_test_group(existing_party: Option<PartyId>, in_activity: bool) -> MatchedGroup {
        let assignment = [
            (1, Role::Damage),
            (2, Role::Healer),
            (3, Role::Damage),
            (4, Role::Tank),
            (5, Role::Damage),
        ]
        .into_iter()
        .collect();
        let roles = [
            (1, RoleFlags::DAMAGE),
            (2, RoleFlags::HEALER),
            (3, RoleFlags::DAMAGE | RoleFlags::LEADER),
            (4, RoleFlags::TANK),
            (5, RoleFlags::DAMAGE),
        ]
        .into_iter()
        .collect();
        let origins = (1..=5)
            .map(|actor| (actor, if actor <= 2 { existing_party } else { None }))
            .collect();

        let mut candidates: Vec<CandidateId> = (3..=5).map(CandidateId::Actor).collect();
        match existing_party {
            Some(party) => candidates.insert(0, CandidateId::Party(party)),
            None => {
                candidates.insert(0, CandidateId::Actor(2));
                candidates.insert(0, CandidateId::Actor(1));
            }
        }

        MatchedGroup {
            candidates,
            activities: [4].into_iter().collect(),
            roles,
            assignment,
            origins,
            existing_party,
            existing_party_in_activity: in_activity,
        }
    }

    fn create_test_proposal(existing_party: Option<PartyId>, in_activity: bool) -> Proposal {
        let mut rng = StdRng::seed_from_u64(7);
        Proposal::from_group(
            1,
            0,
            create_test_group(existing_party, in_activity),
            Utc::now(),
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn test_leader_volunteer_wins() {
        let proposal = create_test_proposal(None, false);
        assert_eq!(proposal.leader, 3);
        assert_eq!(proposal.activity, 4);
        assert!(proposal.is_new);
    }

    #[test]
    fn test_assembly_order() {
        let proposal = create_test_proposal(None, false);
        let order: Vec<ActorId> = proposal
            .assembly_order()
            .into_iter()
            .map(|(actor, _)| actor)
            .collect();
        assert_eq!(order, vec![3, 4, 2, 1, 5]);
    }

    #[test]
    fn test_answers() {
        let mut proposal = create_test_proposal(None, false);
        for actor in 1..=4 {
            assert_eq!(proposal.record_answer(actor, true), ProposalOutcome::Pending);
        }
        assert_eq!(proposal.record_answer(99, true), ProposalOutcome::Ignored);
        assert_eq!(proposal.record_answer(5, true), ProposalOutcome::Accepted);
    }

    #[test]
    fn test_decline_and_removal_set() {
        let mut proposal = create_test_proposal(Some(40), false);
        proposal.record_answer(3, true);
        assert_eq!(proposal.record_answer(1, false), ProposalOutcome::Declined);

        let removed = proposal.candidates_to_remove();
        assert_eq!(removed, BTreeSet::from([CandidateId::Party(40)]));

        proposal.deny_pending();
        let removed = proposal.candidates_to_remove();
        assert!(removed.contains(&CandidateId::Party(40)));
        assert!(removed.contains(&CandidateId::Actor(4)));
        assert!(!removed.contains(&CandidateId::Actor(3)));
    }

    #[test]
    fn test_repeat_answers_are_ignored() {
        let mut proposal = create_test_proposal(None, false);
        assert_eq!(proposal.record_answer(1, true), ProposalOutcome::Pending);
        assert_eq!(proposal.record_answer(1, false), ProposalOutcome::Ignored);
        assert_eq!(proposal.members[&1].answer, Answer::Agree);

        assert_eq!(proposal.record_answer(2, false), ProposalOutcome::Declined);
        assert_eq!(proposal.record_answer(2, true), ProposalOutcome::Ignored);
        assert_eq!(proposal.members[&2].answer, Answer::Deny);
    }

    #[test]
    fn test_activity_party_members_auto_accept() {
        let proposal = create_test_proposal(Some(40), true);
        assert!(!proposal.is_new);
        assert_eq!(proposal.members[&1].answer, Answer::Agree);
        assert_eq!(proposal.members[&2].answer, Answer::Agree);
        assert_eq!(proposal.members[&3].answer, Answer::Pending);
        assert_eq!(proposal.members_to_teleport(), vec![3, 4, 5]);
    }

    #[test]
    fn test_book_expiry() {
        let mut book = ProposalBook::new();
        let mut proposal = create_test_proposal(None, false);
        proposal.id = book.next_id();
        let deadline = proposal.cancel_at;
        book.insert(proposal);

        assert_eq!(book.find_by_member(2), Some(1));
        assert!(book.expired(deadline).is_empty());
        assert_eq!(book.expired(deadline + chrono::Duration::seconds(1)), vec![1]);
    }
}
