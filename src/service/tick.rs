//! Clock-driven work and activity bookkeeping
//!
//! `tick` is the only place the logical clock moves. Deadlines are checked
//! before the sweep so a candidate whose proposal just timed out can be
//! matched again in the same tick.

use super::MatchmakingService;
use crate::metrics::MetricsTimer;
use crate::notify::{Notification, QueueStatusUpdate};
use crate::queue::{CompatibilityResolver, GroupFormationEngine, MatchContext};
use crate::types::{ActivityId, ActorId, CandidateId, LifecycleState, PartyId, Team, UpdateKind};
use crate::utils::to_chrono;
use crate::{MatchmakingError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Result of a dungeon teleport request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeleportOutcome {
    Teleported,
    NotInActivityParty,
    UnknownActivity,
}

impl MatchmakingService {
    /// Advance the clock, expire deadlines, form groups and report queue
    /// status
    pub fn tick(&mut self, elapsed: Duration) {
        let timer = MetricsTimer::start();
        self.now += to_chrono(elapsed);
        let now = self.now;
        trace!("Tick: +{:?} -> {}", elapsed, now);

        for party in self.role_checks.expired(now) {
            self.expire_role_check(party);
        }
        for proposal in self.proposals.expired(now) {
            self.fail_proposal(proposal, UpdateKind::ProposalFailed);
        }
        for party in self.boot_votes.expired(now) {
            self.expire_boot_vote(party);
        }

        let partitions: Vec<_> = self.queues.keys().copied().collect();
        for partition in partitions {
            let sweep_timer = MetricsTimer::start();
            let groups = {
                let ctx = MatchContext {
                    store: &self.store,
                    eligibility: self.collaborators.eligibility.as_ref(),
                    assigner: self.assigner.as_ref(),
                    quotas: self.config.quotas,
                };
                let Some(queue) = self.queues.get_mut(&partition) else {
                    continue;
                };
                GroupFormationEngine::new(CompatibilityResolver::new(&ctx)).sweep(queue)
            };
            let elapsed = sweep_timer.stop();
            self.with_metrics_do(|m| m.record_sweep(elapsed));
            if !groups.is_empty() {
                debug!(
                    "Sweep of partition {} formed {} groups",
                    partition,
                    groups.len()
                );
                self.create_proposals(partition, groups);
            }
        }

        self.since_queue_status += elapsed;
        if self.since_queue_status >= self.config.queue_status_interval() {
            self.since_queue_status = Duration::ZERO;
            self.broadcast_queue_status();
        }

        let stats = self.stats();
        let took = timer.stop();
        self.with_metrics_do(|m| {
            m.update_from_stats(&stats);
            m.record_tick(took);
        });
    }

    fn broadcast_queue_status(&self) {
        for queue in self.queues.values() {
            for report in queue.queue_status(self.now, &self.store) {
                let status = QueueStatusUpdate::from(&report);
                for actor in &report.members {
                    self.notify(Notification::QueueStatus {
                        actor: *actor,
                        candidate: report.candidate,
                        status: status.clone(),
                    });
                }
            }
        }
    }

    /// The game server reports the party's activity as completed
    pub fn finish_activity(&mut self, party: PartyId, activity: ActivityId) {
        let Some(record) = self.store.party(party) else {
            debug!("Finish of activity {} for unknown party {}", activity, party);
            return;
        };
        if record.state != LifecycleState::InActivity || record.activity != Some(activity) {
            debug!(
                "Party {} is not running activity {} (state {})",
                party, activity, record.state
            );
            return;
        }

        self.store
            .set_state(CandidateId::Party(party), LifecycleState::ActivityFinished);
        if let Err(e) =
            self.collaborators
                .persistence
                .save(party, activity, LifecycleState::ActivityFinished)
        {
            warn!("Failed to persist party {}: {}", party, e);
        }

        let current = self
            .collaborators
            .catalog
            .get(activity)
            .map(|definition| definition.key());
        for member in self.store.members(party) {
            let selected = self.store.selected_activities(member);
            self.store
                .set_state(CandidateId::Actor(member), LifecycleState::ActivityFinished);

            let Some(random) = selected
                .iter()
                .filter_map(|id| self.collaborators.catalog.get(*id))
                .find(|definition| definition.grants_random_reward())
            else {
                continue;
            };
            let (Some(current), Some(reward)) = (
                current,
                self.collaborators.rewards.grant(member, random.id),
            ) else {
                continue;
            };
            self.notify(Notification::ActivityReward {
                actor: member,
                random_activity: random.key(),
                current_activity: current,
                reward,
            });
        }
        info!("Party {} finished activity {}", party, activity);
    }

    /// Bring back a party that was inside an activity before a restart.
    /// Returns whether anything was restored.
    pub fn restore_party(&mut self, party: PartyId) -> Result<bool> {
        let Some(row) = self.collaborators.persistence.load(party)? else {
            return Ok(false);
        };
        if !matches!(
            row.state,
            LifecycleState::InActivity | LifecycleState::ActivityFinished
        ) {
            debug!("Persisted party {} has nothing to restore ({})", party, row.state);
            return Ok(false);
        }
        if self.collaborators.catalog.get(row.activity).is_none() {
            return Err(MatchmakingError::UnknownActivity {
                activity_id: row.activity,
            }
            .into());
        }

        self.store.set_activity(party, Some(row.activity));
        self.store.set_state(CandidateId::Party(party), row.state);
        info!(
            "Restored party {} in activity {} ({})",
            party, row.activity, row.state
        );
        Ok(true)
    }

    pub fn on_actor_login(&mut self, actor: ActorId, team: Team) {
        self.store.set_team(actor, team);
    }

    /// A logout counts as a disconnect for anything queued
    pub fn on_actor_logout(&mut self, actor: ActorId) {
        self.leave_queue(actor, true);
    }

    /// Teleport into the party's activity, or out of it
    pub fn request_teleport(&mut self, actor: ActorId, out: bool) -> TeleportOutcome {
        if out {
            self.collaborators.party_assembler.teleport_actor(actor, None);
            return TeleportOutcome::Teleported;
        }

        let activity = self.store.party_of(actor).and_then(|party| {
            let record = self.store.party(party)?;
            (record.state == LifecycleState::InActivity)
                .then_some(record.activity)
                .flatten()
        });
        let Some(activity) = activity else {
            return TeleportOutcome::NotInActivityParty;
        };
        let Some(entrance) = self
            .collaborators
            .catalog
            .get(activity)
            .map(|definition| definition.entrance)
        else {
            return TeleportOutcome::UnknownActivity;
        };
        self.collaborators
            .party_assembler
            .teleport_actor(actor, Some(entrance));
        TeleportOutcome::Teleported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::PersistenceStore;
    use crate::service::tests::{activity_party, create_test_service, TestRig};

    #[test]
    fn test_tick_advances_clock() {
        let TestRig { mut service, .. } = create_test_service();
        let start = service.now();
        service.tick(Duration::from_secs(5));
        assert_eq!(service.now() - start, chrono::Duration::seconds(5));
    }

    #[test]
    fn test_queue_status_on_interval() {
        let TestRig {
            mut service, sink, ..
        } = create_test_service();
        service.join_queue(1, crate::types::RoleFlags::TANK, [4].into_iter().collect());
        sink.drain();

        service.tick(Duration::from_secs(10));
        assert!(!sink
            .for_actor(1)
            .iter()
            .any(|n| matches!(n, Notification::QueueStatus { .. })));

        service.tick(Duration::from_secs(5));
        let statuses: Vec<_> = sink
            .for_actor(1)
            .into_iter()
            .filter(|n| matches!(n, Notification::QueueStatus { .. }))
            .collect();
        assert_eq!(statuses.len(), 1);
        if let Notification::QueueStatus { status, .. } = &statuses[0] {
            assert_eq!(status.activity, 4);
            assert_eq!(status.queued_secs, 15);
        }
    }

    #[test]
    fn test_finish_activity_grants_random_reward() {
        let TestRig {
            mut service, sink, ..
        } = create_test_service();
        activity_party(&mut service, 70, &[1, 2], 4);
        service.store.set_selected_activities(1, [258].into_iter().collect());
        service.store.set_selected_activities(2, [4].into_iter().collect());

        service.finish_activity(70, 4);

        assert_eq!(
            service.store().state(CandidateId::Party(70)),
            LifecycleState::ActivityFinished
        );
        assert_eq!(
            service.store().state(CandidateId::Actor(1)),
            LifecycleState::ActivityFinished
        );
        assert!(sink
            .for_actor(1)
            .iter()
            .any(|n| matches!(n, Notification::ActivityReward { .. })));
        assert!(!sink
            .for_actor(2)
            .iter()
            .any(|n| matches!(n, Notification::ActivityReward { .. })));
    }

    #[test]
    fn test_finish_of_other_activity_ignored() {
        let TestRig { mut service, .. } = create_test_service();
        activity_party(&mut service, 70, &[1, 2], 4);
        service.finish_activity(70, 6);
        assert_eq!(
            service.store().state(CandidateId::Party(70)),
            LifecycleState::InActivity
        );
    }

    #[test]
    fn test_restore_party_from_persistence() {
        let TestRig {
            mut service,
            persistence,
            ..
        } = create_test_service();
        persistence.save(80, 6, LifecycleState::InActivity).unwrap();

        assert!(service.restore_party(80).unwrap());
        assert_eq!(service.store().activity(80), Some(6));
        assert!(service.store().is_activity_party(80));
        assert!(!service.restore_party(81).unwrap());
    }

    #[test]
    fn test_restore_rejects_unknown_activity() {
        let TestRig {
            mut service,
            persistence,
            ..
        } = create_test_service();
        persistence.save(80, 9999, LifecycleState::InActivity).unwrap();

        let err = service.restore_party(80).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::UnknownActivity { activity_id: 9999 })
        ));
        assert_eq!(service.store().activity(80), None);
    }

    #[test]
    fn test_teleport_requests() {
        let TestRig {
            mut service,
            assembler,
            ..
        } = create_test_service();
        assert_eq!(
            service.request_teleport(1, false),
            TeleportOutcome::NotInActivityParty
        );

        activity_party(&mut service, 70, &[1, 2], 4);
        assert_eq!(service.request_teleport(1, false), TeleportOutcome::Teleported);
        assert_eq!(service.request_teleport(2, true), TeleportOutcome::Teleported);

        let teleports = assembler.teleports();
        assert!(teleports[0].1.is_some());
        assert_eq!(teleports[1], (2, None));
    }

    #[test]
    fn test_logout_leaves_queue() {
        let TestRig { mut service, .. } = create_test_service();
        service.on_actor_login(1, Team::Horde);
        service.join_queue(1, crate::types::RoleFlags::HEALER, [4].into_iter().collect());
        assert!(service.queue(1).unwrap().contains(&CandidateId::Actor(1)));

        service.on_actor_logout(1);

        assert!(!service.queue(1).unwrap().contains(&CandidateId::Actor(1)));
        assert_eq!(
            service.store().state(CandidateId::Actor(1)),
            LifecycleState::Idle
        );
    }

    fn service_with_persistence(
        persistence: crate::providers::persistence::MockPersistenceStore,
    ) -> MatchmakingService {
        let mut collaborators = crate::providers::Collaborators::default();
        collaborators.persistence = std::sync::Arc::new(persistence);
        MatchmakingService::new(
            crate::config::MatchmakingConfig::default(),
            collaborators,
            std::sync::Arc::new(crate::notify::RecordingSink::new()),
        )
        .with_seed(3)
    }

    #[test]
    fn test_finish_activity_persists_once() {
        let mut persistence = crate::providers::persistence::MockPersistenceStore::new();
        persistence
            .expect_save()
            .withf(|party, activity, state| {
                *party == 70 && *activity == 4 && *state == LifecycleState::ActivityFinished
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut service = service_with_persistence(persistence);
        activity_party(&mut service, 70, &[1, 2], 4);

        service.finish_activity(70, 4);
        // Already finished, nothing more to persist
        service.finish_activity(70, 4);
    }

    #[test]
    fn test_restore_propagates_load_failure() {
        let mut persistence = crate::providers::persistence::MockPersistenceStore::new();
        persistence.expect_load().returning(|_| {
            Err(crate::error::MatchmakingError::PersistenceFailed {
                party_id: 80,
                message: "disk gone".to_string(),
            }
            .into())
        });
        let mut service = service_with_persistence(persistence);

        assert!(service.restore_party(80).is_err());
        assert!(service.store().party(80).is_none());
    }
}
