//! Role checks of queueing parties

use super::MatchmakingService;
use crate::lifecycle::{RoleCheck, RoleCheckState};
use crate::notify::Notification;
use crate::providers::filter_roles;
use crate::types::{
    ActorId, CandidateId, JoinResultCode, LifecycleState, LockMap, PartyId, RoleFlags,
    UpdateKind,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

impl MatchmakingService {
    /// Record a member's role vote. Empty roles abort the check.
    pub fn submit_role_vote(&mut self, party: PartyId, actor: ActorId, roles: RoleFlags) {
        let filtered = filter_roles(
            self.collaborators.role_capabilities.as_ref(),
            actor,
            roles & RoleFlags::all(),
        );
        let quotas = self.config.quotas;
        let assigner = self.assigner.clone();

        let Some(check) = self.role_checks.get_mut(party) else {
            debug!("No role check for party {} (vote of actor {})", party, actor);
            return;
        };
        let state = if roles.is_empty() {
            check.abort()
        } else {
            check.record_vote(actor, filtered, assigner.as_ref(), quotas)
        };
        let snapshot = check.clone();

        self.broadcast_role_check(&snapshot);
        if state.is_terminal() {
            self.finish_role_check(party);
        }
    }

    pub(super) fn abort_role_check(&mut self, party: PartyId) {
        let Some(check) = self.role_checks.get_mut(party) else {
            return;
        };
        check.abort();
        let snapshot = check.clone();
        self.broadcast_role_check(&snapshot);
        self.finish_role_check(party);
    }

    pub(super) fn expire_role_check(&mut self, party: PartyId) {
        let Some(check) = self.role_checks.get_mut(party) else {
            return;
        };
        check.expire();
        let snapshot = check.clone();
        self.broadcast_role_check(&snapshot);
        self.finish_role_check(party);
    }

    fn broadcast_role_check(&self, check: &RoleCheck) {
        for member in check.votes.keys() {
            self.notify(Notification::RoleCheckUpdate {
                actor: *member,
                role_check: check.clone(),
            });
        }
    }

    /// Apply a terminal role check: queue the party or put everybody back
    fn finish_role_check(&mut self, party: PartyId) {
        let Some(check) = self.role_checks.remove(party) else {
            return;
        };
        let candidate = CandidateId::Party(party);
        self.with_metrics_do(|m| m.record_role_check(check.state.as_str()));

        if check.state == RoleCheckState::Finished {
            let partition = self.partition_of(candidate);
            let now = self.now;
            self.queue_mut(partition).add_queue_data(
                candidate,
                now,
                check.activities.clone(),
                check.votes.clone(),
            );
            self.store.set_state(candidate, LifecycleState::Queued);
            for (member, roles) in &check.votes {
                self.store.set_roles(*member, *roles);
                self.store
                    .set_state(CandidateId::Actor(*member), LifecycleState::Queued);
                self.notify_status(
                    *member,
                    UpdateKind::AddedToQueue,
                    check.selected.clone(),
                    Some(party),
                );
            }
            info!(
                "Party {} passed its role check and is queued in partition {}",
                party, partition
            );
            return;
        }

        info!("Role check of party {} failed: {:?}", party, check.state);
        let kind = if check.state == RoleCheckState::Aborted {
            UpdateKind::RoleCheckAborted
        } else {
            UpdateKind::RoleCheckFailed
        };

        self.store.restore_state(candidate, "role check failed");
        for member in check.votes.keys() {
            self.store
                .restore_state(CandidateId::Actor(*member), "role check failed");
            self.notify_status(*member, kind, BTreeSet::new(), Some(party));
            self.notify(Notification::JoinResult {
                actor: *member,
                result: JoinResultCode::RoleCheckFailed,
                role_check_state: Some(check.state),
                locks: LockMap::new(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::service::tests::{create_test_service, form_party, TestRig};
    use crate::types::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn activities() -> BTreeSet<ActivityId> {
        [4].into_iter().collect()
    }

    #[test]
    fn test_all_votes_queue_party() {
        let TestRig { mut service, .. } = create_test_service();
        form_party(&mut service, 60, &[1, 2, 3]);

        service.join_queue(1, RoleFlags::TANK | RoleFlags::LEADER, activities());
        service.submit_role_vote(60, 2, RoleFlags::HEALER);
        assert!(service.role_checks().contains(60));
        service.submit_role_vote(60, 3, RoleFlags::DAMAGE);

        assert!(!service.role_checks().contains(60));
        assert_eq!(
            service.store().state(CandidateId::Party(60)),
            LifecycleState::Queued
        );
        for actor in 1..=3 {
            assert_eq!(
                service.store().state(CandidateId::Actor(actor)),
                LifecycleState::Queued
            );
        }
        assert_eq!(service.store().roles(2), RoleFlags::HEALER);
        let entry = service
            .queue(0)
            .unwrap()
            .entry(&CandidateId::Party(60))
            .unwrap();
        assert_eq!(entry.member_count(), 3);
    }

    #[test]
    fn test_wrong_roles_restore_members() {
        let TestRig { mut service, .. } = create_test_service();
        form_party(&mut service, 60, &[1, 2]);

        service.join_queue(1, RoleFlags::TANK, activities());
        service.submit_role_vote(60, 2, RoleFlags::TANK);

        assert!(!service.role_checks().contains(60));
        assert_eq!(
            service.store().state(CandidateId::Party(60)),
            LifecycleState::Idle
        );
        assert_eq!(
            service.store().state(CandidateId::Actor(2)),
            LifecycleState::Idle
        );
        assert_eq!(service.stats().total_queued(), 0);
    }

    #[test]
    fn test_empty_vote_aborts() {
        let TestRig { mut service, sink, .. } = create_test_service();
        form_party(&mut service, 60, &[1, 2]);
        service.join_queue(1, RoleFlags::TANK, activities());

        service.submit_role_vote(60, 2, RoleFlags::empty());

        assert!(!service.role_checks().contains(60));
        assert!(sink.for_actor(2).iter().any(|n| matches!(
            n,
            crate::notify::Notification::UpdateStatus {
                kind: UpdateKind::RoleCheckAborted,
                ..
            }
        )));
    }

    #[test]
    fn test_missing_vote_restores_at_expiry() {
        let TestRig { mut service, .. } = create_test_service();
        form_party(&mut service, 60, &[1, 2, 3, 4]);
        service.join_queue(1, RoleFlags::TANK, activities());
        service.submit_role_vote(60, 2, RoleFlags::HEALER);
        service.submit_role_vote(60, 3, RoleFlags::DAMAGE);

        service.tick(Duration::from_secs(30));
        assert!(service.role_checks().contains(60));

        service.tick(Duration::from_secs(30));
        assert!(!service.role_checks().contains(60));
        for actor in 1..=4 {
            assert_eq!(
                service.store().state(CandidateId::Actor(actor)),
                LifecycleState::Idle
            );
            assert!(service.store().selected_activities(actor).is_empty());
        }
        assert!(service
            .queue(0)
            .map_or(true, |queue| !queue.contains(&CandidateId::Party(60))));
    }
}
