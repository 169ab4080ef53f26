//! Integration tests for the dungeon finder
//!
//! These drive the finder through its public surface only: the
//! matchmaking core directly, and the single-writer task behind the AMQP
//! command handler with notifications flowing out through the forwarder.

mod fixtures;

use dungeon_finder::amqp::publisher::MockEventPublisher;
use dungeon_finder::amqp::{spawn_forwarder, CommandHandler, InboundCommand, ServiceCommandHandler};
use dungeon_finder::config::MatchmakingConfig;
use dungeon_finder::lifecycle::BootVoteStart;
use dungeon_finder::notify::{ChannelSink, Notification};
use dungeon_finder::providers::{
    InMemoryEligibilityProvider, InMemoryPartyAssembler, InMemoryPersistenceStore,
    JoinRestriction, PersistenceStore,
};
use dungeon_finder::service::{spawn_service, MemberRemoval};
use dungeon_finder::types::{
    ActorId, CandidateId, JoinResultCode, LifecycleState, RoleFlags, UpdateKind,
};
use dungeon_finder::{MatchmakingService, PartyLifecycleObserver};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use fixtures::{collaborators, Harness, RANDOM_DUNGEON, SEATS};

fn state_of(harness: &Harness, actor: ActorId) -> LifecycleState {
    harness.service.store().state(CandidateId::Actor(actor))
}

#[test]
fn test_five_solos_become_an_activity_party() {
    let mut harness = Harness::new();
    let party = harness.run_dungeon(1);

    let store = harness.service.store();
    let activity = store.activity(party).expect("party should be inside an activity");
    assert!([1, 4, 6].contains(&activity));
    assert_eq!(store.members(party).len(), 5);
    for actor in 1..=5 {
        assert_eq!(state_of(&harness, actor), LifecycleState::InActivity);
        assert_eq!(store.party_of(actor), Some(party));
    }
    assert_eq!(harness.service.stats().total_queued(), 0);
    assert!(harness.service.proposals().is_empty());
    assert_eq!(harness.assembler.teleports().len(), 5);
    assert!(harness.persistence.load(party).unwrap().is_some());

    for actor in 1..=5 {
        assert!(harness.notifications_for(actor).iter().any(|n| matches!(
            n,
            Notification::UpdateStatus {
                kind: UpdateKind::GroupFound,
                ..
            }
        )));
    }
}

#[test]
fn test_rejected_party_join_leaves_members_untouched() {
    let mut harness = Harness::new();
    let members: Vec<ActorId> = (1..=5).collect();
    harness.form_party(10, &members);
    let before: Vec<_> = members
        .iter()
        .map(|actor| {
            let store = harness.service.store();
            (store.roles(*actor), store.selected_activities(*actor))
        })
        .collect();

    harness.eligibility.restrict(4, JoinRestriction::Deserter);
    let result = harness.service.join_queue(
        1,
        RoleFlags::TANK | RoleFlags::LEADER,
        BTreeSet::from([RANDOM_DUNGEON]),
    );

    assert_eq!(result, JoinResultCode::PartyDeserter);
    for (actor, expected) in members.iter().zip(before) {
        let store = harness.service.store();
        assert_eq!(state_of(&harness, *actor), LifecycleState::Idle);
        assert_eq!(
            (store.roles(*actor), store.selected_activities(*actor)),
            expected
        );
    }
    assert_eq!(
        harness.service.store().state(CandidateId::Party(10)),
        LifecycleState::Idle
    );
    assert!(!harness.service.role_checks().contains(10));
    assert_eq!(harness.service.stats().total_queued(), 0);
    assert!(harness.notifications_for(1).iter().any(|n| matches!(
        n,
        Notification::JoinResult {
            result: JoinResultCode::PartyDeserter,
            ..
        }
    )));

    harness.eligibility.clear_restriction(4);
    let result = harness.service.join_queue(
        1,
        RoleFlags::TANK | RoleFlags::LEADER,
        BTreeSet::from([RANDOM_DUNGEON]),
    );
    assert_eq!(result, JoinResultCode::Ok);
    assert!(harness.service.role_checks().contains(10));
}

#[test]
fn test_decline_requeues_pending_and_accepting_members() {
    let mut harness = Harness::new();
    harness.queue_five(1);
    harness.service.tick(Duration::from_secs(1));
    let proposal = harness.service.proposals().find_by_member(1).unwrap();

    harness.service.respond_proposal(proposal, 2, true);
    harness.service.respond_proposal(proposal, 3, false);

    assert!(harness.service.proposals().is_empty());
    assert_eq!(state_of(&harness, 3), LifecycleState::Idle);
    for actor in [1, 2, 4, 5] {
        assert_eq!(state_of(&harness, actor), LifecycleState::Queued);
    }
    assert_eq!(harness.service.stats().total_queued(), 4);
    assert!(harness.notifications_for(3).iter().any(|n| matches!(
        n,
        Notification::UpdateStatus {
            kind: UpdateKind::ProposalDeclined,
            ..
        }
    )));

    // A new damage dealer completes the group again
    let result = harness
        .service
        .join_queue(6, RoleFlags::DAMAGE, BTreeSet::from([RANDOM_DUNGEON]));
    assert_eq!(result, JoinResultCode::Ok);
    harness.service.tick(Duration::from_secs(1));

    let retry = harness.service.proposals().find_by_member(6).unwrap();
    let members: BTreeSet<ActorId> = harness
        .service
        .proposals()
        .get(retry)
        .unwrap()
        .members
        .keys()
        .copied()
        .collect();
    assert_eq!(members, BTreeSet::from([1, 2, 4, 5, 6]));
}

#[test]
fn test_unanswered_proposal_times_out() {
    let mut harness = Harness::new();
    harness.queue_five(1);
    harness.service.tick(Duration::from_secs(1));
    let proposal = harness.service.proposals().find_by_member(1).unwrap();

    harness.service.respond_proposal(proposal, 1, true);
    harness.service.respond_proposal(proposal, 2, true);
    harness.service.tick(Duration::from_secs(30));
    assert!(harness.service.proposals().get(proposal).is_some());

    harness.service.tick(Duration::from_secs(16));

    assert!(harness.service.proposals().get(proposal).is_none());
    for actor in [1, 2] {
        assert_eq!(state_of(&harness, actor), LifecycleState::Queued);
    }
    for actor in [3, 4, 5] {
        assert_eq!(state_of(&harness, actor), LifecycleState::Idle);
    }
    assert_eq!(harness.service.stats().total_queued(), 2);
    assert_eq!(harness.assembler.party_count(), 0);
}

#[test]
fn test_missing_role_vote_restores_party_at_expiry() {
    let mut harness = Harness::new();
    harness.form_party(20, &[1, 2, 3, 4]);

    let result = harness
        .service
        .join_queue(1, RoleFlags::TANK, BTreeSet::from([RANDOM_DUNGEON]));
    assert_eq!(result, JoinResultCode::Ok);
    harness.service.submit_role_vote(20, 2, RoleFlags::HEALER);
    harness.service.submit_role_vote(20, 3, RoleFlags::DAMAGE);

    harness.service.tick(Duration::from_secs(61));

    assert!(!harness.service.role_checks().contains(20));
    for actor in 1..=4 {
        assert_eq!(state_of(&harness, actor), LifecycleState::Idle);
        assert!(harness.service.store().selected_activities(actor).is_empty());
    }
    assert_eq!(harness.service.stats().total_queued(), 0);
    assert!(harness.notifications_for(4).iter().any(|n| matches!(
        n,
        Notification::UpdateStatus {
            kind: UpdateKind::RoleCheckFailed,
            ..
        }
    )));
}

#[test]
fn test_vote_kick_removes_member_and_offers_replacement() {
    let mut harness = Harness::new();
    let party = harness.run_dungeon(1);
    let leader = harness.service.store().leader(party).unwrap();
    let others: Vec<ActorId> = (1..=5).filter(|actor| *actor != leader).collect();
    let victim = others[0];

    assert_eq!(
        harness.service.initiate_boot_vote(party, leader, victim, "afk"),
        BootVoteStart::Started
    );
    harness.service.respond_boot_vote(party, others[1], true);
    assert!(harness.assembler.kicks().is_empty());
    harness.service.respond_boot_vote(party, others[2], true);

    assert_eq!(harness.assembler.kicks(), vec![(party, victim)]);
    assert!(!harness.service.boot_votes().contains(party));
    assert_eq!(harness.service.stats().members_kicked, 1);

    // The game server performs the kick and reports it back
    harness.sink.drain();
    harness
        .service
        .on_member_removed(party, victim, MemberRemoval::Kicked);

    assert_eq!(state_of(&harness, victim), LifecycleState::Idle);
    assert_eq!(harness.service.store().members(party).len(), 4);
    assert!(harness.notifications_for(leader).iter().any(|n| matches!(
        n,
        Notification::OfferContinue { .. }
    )));

    // The remaining four may queue for a replacement
    let roles = harness.service.store().roles(leader);
    let result = harness
        .service
        .join_queue(leader, roles, BTreeSet::from([RANDOM_DUNGEON]));
    assert_eq!(result, JoinResultCode::Ok);
}

#[test]
fn test_ignored_actors_are_not_grouped() {
    let mut harness = Harness::new();
    harness.eligibility.ignore(1, 5);
    harness.queue_five(1);

    harness.service.tick(Duration::from_secs(1));

    assert!(harness.service.proposals().is_empty());
    assert_eq!(harness.service.stats().total_queued(), 5);
}

fn spawned_service(sink: ChannelSink) -> MatchmakingService {
    let collaborators = collaborators(
        Arc::new(InMemoryEligibilityProvider::new()),
        Arc::new(InMemoryPartyAssembler::new()),
        Arc::new(InMemoryPersistenceStore::new()),
    );
    MatchmakingService::new(MatchmakingConfig::default(), collaborators, Arc::new(sink))
        .with_seed(11)
}

#[tokio::test]
async fn test_commands_form_a_group_through_the_service_task() {
    let (sink, mut notifications) = ChannelSink::channel();
    let (handle, task) = spawn_service(spawned_service(sink), Duration::from_millis(10));
    let handler = ServiceCommandHandler::new(handle.clone());

    let actors: Vec<ActorId> = (101..106).collect();
    for (actor, roles) in actors.iter().zip(SEATS) {
        handler
            .handle_command(InboundCommand::JoinQueue {
                actor: *actor,
                roles,
                activities: BTreeSet::from([RANDOM_DUNGEON]),
            })
            .await
            .unwrap();
    }

    let mut answered = HashSet::new();
    let mut found = HashSet::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while found.len() < actors.len() {
        let notification = tokio::time::timeout_at(deadline, notifications.recv())
            .await
            .expect("group should form before the deadline")
            .expect("notification channel closed");

        match notification {
            Notification::ProposalUpdate { actor, proposal } if answered.insert(actor) => {
                handler
                    .handle_command(InboundCommand::ProposalAnswer {
                        proposal: proposal.id,
                        actor,
                        accept: true,
                    })
                    .await
                    .unwrap();
            }
            Notification::UpdateStatus {
                actor,
                kind: UpdateKind::GroupFound,
                ..
            } => {
                found.insert(actor);
            }
            _ => {}
        }
    }

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.groups_formed, 1);
    assert_eq!(stats.total_queued(), 0);
    assert_eq!(stats.active_proposals, 0);

    drop(handler);
    drop(handle);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("service task should stop once every handle is dropped")
        .unwrap();
}

#[tokio::test]
async fn test_notifications_reach_the_publisher() {
    let (sink, notifications) = ChannelSink::channel();
    let publisher = Arc::new(MockEventPublisher::new());
    let forwarder = spawn_forwarder(notifications, publisher.clone());
    let (handle, task) = spawn_service(spawned_service(sink), Duration::from_millis(10));

    let result = handle
        .join_queue(7, RoleFlags::DAMAGE, BTreeSet::from([RANDOM_DUNGEON]))
        .await
        .unwrap();
    assert_eq!(result, JoinResultCode::Ok);
    handle.leave_queue(7, false).unwrap();
    handle.stats().await.unwrap();

    // Closing the service drops the sink, which ends the forwarder
    drop(handle);
    task.await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), forwarder)
        .await
        .expect("forwarder should drain and stop")
        .unwrap();

    let published = publisher.published();
    assert!(!published.is_empty());
    assert!(published.iter().all(|n| n.actor() == 7));
    assert!(publisher.routing_keys().contains(&"lfg.update_status"));
}

#[tokio::test]
async fn test_concurrent_joins_through_the_service_task() {
    let (sink, _notifications) = ChannelSink::channel();
    let (handle, task) = spawn_service(spawned_service(sink), Duration::from_millis(10));

    let joins: Vec<_> = (1..=40)
        .map(|actor: ActorId| {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .join_queue(actor, RoleFlags::DAMAGE, BTreeSet::from([RANDOM_DUNGEON]))
                    .await
            })
        })
        .collect();
    let results = futures::future::join_all(joins).await;

    for result in results {
        assert_eq!(result.unwrap().unwrap(), JoinResultCode::Ok);
    }
    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.total_queued(), 40);
    assert_eq!(stats.active_proposals, 0);

    drop(handle);
    task.await.unwrap();
}
