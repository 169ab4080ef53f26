//! Group formation sweep
//!
//! Each newly queued candidate is extended one pool candidate at a time
//! against the current bucket until either a full party forms or the pool
//! runs dry. The pool is shared by every depth of one extension, so a pool
//! candidate is tried at most once per new candidate.

use crate::queue::compatibility::{Compatibility, CompatibilityResolver, MatchedGroup};
use crate::queue::lfg_queue::LfgQueue;
use crate::types::CandidateId;
use std::collections::VecDeque;
use tracing::debug;

/// Drives the sweep of one queue
pub struct GroupFormationEngine<'a> {
    resolver: CompatibilityResolver<'a>,
}

impl<'a> GroupFormationEngine<'a> {
    pub fn new(resolver: CompatibilityResolver<'a>) -> Self {
        Self { resolver }
    }

    /// Try every newly queued candidate; returns the parties formed
    pub fn sweep(&self, queue: &mut LfgQueue) -> Vec<MatchedGroup> {
        let mut formed = Vec::new();

        while let Some(candidate) = queue.pop_new() {
            let mut pool = queue.current_snapshot();
            let mut check = vec![candidate];
            let verdict = self.extend(queue, &mut check, &mut pool, &mut formed);

            if verdict != Compatibility::Match && queue.contains(&candidate) {
                queue.push_current(candidate);
            }
        }

        if !formed.is_empty() {
            debug!(
                "Queue {}: sweep formed {} parties, {} candidates waiting",
                queue.partition(),
                formed.len(),
                queue.current_len()
            );
        }
        formed
    }

    fn extend(
        &self,
        queue: &mut LfgQueue,
        check: &mut Vec<CandidateId>,
        pool: &mut VecDeque<CandidateId>,
        formed: &mut Vec<MatchedGroup>,
    ) -> Compatibility {
        let verdict = self.resolver.resolve(queue, check, formed);
        if !verdict.is_extendable() {
            return verdict;
        }

        while let Some(next) = pool.pop_front() {
            check.push(next);
            if self.extend(queue, check, pool, formed) == Compatibility::Match {
                return Compatibility::Match;
            }
            check.pop();
        }

        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InMemoryEligibilityProvider;
    use crate::queue::compatibility::MatchContext;
    use crate::roles::{BacktrackingAssigner, RoleQuotas};
    use crate::state::StateStore;
    use crate::types::{ActorId, LifecycleState, RoleFlags};
    use chrono::Utc;

    fn enqueue(queue: &mut LfgQueue, store: &mut StateStore, actor: ActorId, roles: RoleFlags) {
        let candidate = CandidateId::Actor(actor);
        queue.add_queue_data(
            candidate,
            Utc::now(),
            [1, 4, 6].into_iter().collect(),
            [(actor, roles)].into_iter().collect(),
        );
        store.set_state(candidate, LifecycleState::Queued);
    }

    fn sweep(queue: &mut LfgQueue, store: &StateStore) -> Vec<MatchedGroup> {
        let eligibility = InMemoryEligibilityProvider::new();
        let ctx = MatchContext {
            store,
            eligibility: &eligibility,
            assigner: &BacktrackingAssigner,
            quotas: RoleQuotas::standard(),
        };
        GroupFormationEngine::new(CompatibilityResolver::new(&ctx)).sweep(queue)
    }

    #[test]
    fn test_five_compatible_solos_form_one_party() {
        let mut queue = LfgQueue::new(0, RoleQuotas::standard());
        let mut store = StateStore::new(3);
        let roles = [
            RoleFlags::TANK,
            RoleFlags::HEALER,
            RoleFlags::DAMAGE,
            RoleFlags::DAMAGE,
            RoleFlags::DAMAGE,
        ];
        for (i, flags) in roles.iter().enumerate() {
            enqueue(&mut queue, &mut store, i as ActorId + 1, *flags);
        }

        let formed = sweep(&mut queue, &store);

        assert_eq!(formed.len(), 1);
        assert_eq!(formed[0].candidates.len(), 5);
        assert_eq!(queue.new_len(), 0);
        assert_eq!(queue.current_len(), 0);
    }

    #[test]
    fn test_incompatible_candidates_wait_in_current() {
        let mut queue = LfgQueue::new(0, RoleQuotas::standard());
        let mut store = StateStore::new(3);
        enqueue(&mut queue, &mut store, 1, RoleFlags::TANK);
        enqueue(&mut queue, &mut store, 2, RoleFlags::TANK);
        enqueue(&mut queue, &mut store, 3, RoleFlags::HEALER);

        let formed = sweep(&mut queue, &store);

        assert!(formed.is_empty());
        assert_eq!(queue.new_len(), 0);
        assert_eq!(queue.current_len(), 3);
    }

    #[test]
    fn test_sixth_candidate_stays_queued() {
        let mut queue = LfgQueue::new(0, RoleQuotas::standard());
        let mut store = StateStore::new(3);
        let roles = [
            RoleFlags::TANK,
            RoleFlags::TANK,
            RoleFlags::HEALER,
            RoleFlags::DAMAGE,
            RoleFlags::DAMAGE,
            RoleFlags::DAMAGE,
        ];
        for (i, flags) in roles.iter().enumerate() {
            enqueue(&mut queue, &mut store, i as ActorId + 1, *flags);
        }

        let formed = sweep(&mut queue, &store);

        assert_eq!(formed.len(), 1);
        assert_eq!(queue.current_len(), 1);
        assert!(queue.is_waiting(&CandidateId::Actor(2)));
    }
}
