//! Vote-kicks inside activity parties

use crate::lifecycle::proposal::Answer;
use crate::types::{ActorId, PartyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Result of asking to start a vote-kick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootVoteStart {
    Started,
    UnknownParty,
    NotInActivity,
    NoKicksLeft,
    AlreadyInProgress,
    NotAMember,
    CannotKickSelf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootOutcome {
    Pending,
    Kicked,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootVote {
    pub party: PartyId,
    pub victim: ActorId,
    pub kicker: ActorId,
    pub reason: String,
    pub cancel_at: DateTime<Utc>,
    pub in_progress: bool,
    pub votes: BTreeMap<ActorId, Answer>,
}

impl BootVote {
    /// The kicker agrees and the victim disagrees from the start
    pub fn new(
        party: PartyId,
        kicker: ActorId,
        victim: ActorId,
        reason: impl Into<String>,
        members: impl IntoIterator<Item = ActorId>,
        cancel_at: DateTime<Utc>,
    ) -> Self {
        let votes = members
            .into_iter()
            .map(|member| {
                let answer = if member == kicker {
                    Answer::Agree
                } else if member == victim {
                    Answer::Deny
                } else {
                    Answer::Pending
                };
                (member, answer)
            })
            .collect();

        Self {
            party,
            victim,
            kicker,
            reason: reason.into(),
            cancel_at,
            in_progress: true,
            votes,
        }
    }

    /// Record a vote. Returns false when the vote does not count.
    pub fn record(&mut self, actor: ActorId, agree: bool) -> bool {
        if !self.in_progress {
            return false;
        }
        match self.votes.get_mut(&actor) {
            Some(answer) if *answer == Answer::Pending => {
                *answer = if agree { Answer::Agree } else { Answer::Deny };
                true
            }
            _ => false,
        }
    }

    /// A member left the party mid-vote
    pub fn remove_voter(&mut self, actor: ActorId) {
        self.votes.remove(&actor);
    }

    /// Agree and pending vote counts
    pub fn tally(&self) -> (u8, u8) {
        self.votes.values().fold((0u8, 0u8), |(agree, pending), answer| match answer {
            Answer::Agree => (agree.saturating_add(1), pending),
            Answer::Pending => (agree, pending.saturating_add(1)),
            Answer::Deny => (agree, pending),
        })
    }

    /// Kicked once enough members agree, rejected once that can no longer
    /// happen or the vote timed out
    pub fn evaluate(&self, votes_needed: u8, timed_out: bool) -> BootOutcome {
        let (agree, pending) = self.tally();
        if agree >= votes_needed {
            BootOutcome::Kicked
        } else if timed_out || agree.saturating_add(pending) < votes_needed {
            BootOutcome::Rejected
        } else {
            BootOutcome::Pending
        }
    }
}

/// Running vote-kicks, one per party
#[derive(Debug, Default)]
pub struct BootVoteBook {
    votes: HashMap<PartyId, BootVote>,
}

impl BootVoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vote: BootVote) {
        self.votes.insert(vote.party, vote);
    }

    pub fn get(&self, party: PartyId) -> Option<&BootVote> {
        self.votes.get(&party)
    }

    pub fn get_mut(&mut self, party: PartyId) -> Option<&mut BootVote> {
        self.votes.get_mut(&party)
    }

    pub fn remove(&mut self, party: PartyId) -> Option<BootVote> {
        self.votes.remove(&party)
    }

    pub fn contains(&self, party: PartyId) -> bool {
        self.votes.contains_key(&party)
    }

    pub fn expired(&self, now: DateTime<Utc>) -> Vec<PartyId> {
        let mut parties: Vec<PartyId> = self
            .votes
            .values()
            .filter(|vote| vote.in_progress && vote.cancel_at < now)
            .map(|vote| vote.party)
            .collect();
        parties.sort_unstable();
        parties
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_vote() -> BootVote {
        BootVote::new(7, 1, 5, "afk", 1..=5, Utc::now())
    }

    #[test]
    fn test_initial_votes() {
        let vote = create_test_vote();
        assert_eq!(vote.votes[&1], Answer::Agree);
        assert_eq!(vote.votes[&5], Answer::Deny);
        assert_eq!(vote.tally(), (1, 3));
        assert_eq!(vote.evaluate(3, false), BootOutcome::Pending);
    }

    #[test]
    fn test_kick_when_threshold_reached() {
        let mut vote = create_test_vote();
        assert!(vote.record(2, true));
        assert_eq!(vote.evaluate(3, false), BootOutcome::Pending);
        assert!(vote.record(3, true));
        assert_eq!(vote.evaluate(3, false), BootOutcome::Kicked);
    }

    #[test]
    fn test_rejected_once_threshold_unreachable() {
        let mut vote = create_test_vote();
        vote.record(2, false);
        assert_eq!(vote.evaluate(3, false), BootOutcome::Pending);
        vote.record(3, false);
        assert_eq!(vote.evaluate(3, false), BootOutcome::Rejected);
    }

    #[test]
    fn test_votes_count_once() {
        let mut vote = create_test_vote();
        assert!(!vote.record(1, false));
        assert!(!vote.record(5, true));
        assert!(!vote.record(42, true));
        assert!(vote.record(2, true));
        assert!(!vote.record(2, false));
    }

    #[test]
    fn test_timeout_rejects() {
        let vote = create_test_vote();
        assert_eq!(vote.evaluate(3, true), BootOutcome::Rejected);
    }

    #[test]
    fn test_book_expiry() {
        let mut book = BootVoteBook::new();
        let vote = create_test_vote();
        let deadline = vote.cancel_at;
        book.insert(vote);
        assert!(book.contains(7));
        assert_eq!(book.expired(deadline + chrono::Duration::seconds(1)), vec![7]);
    }
}
