//! Performance benchmarks for role assignment and the matchmaking sweep

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dungeon_finder::config::MatchmakingConfig;
use dungeon_finder::notify::{Notification, NotificationSink};
use dungeon_finder::providers::Collaborators;
use dungeon_finder::roles::{BacktrackingAssigner, RoleAssigner, RoleQuotas};
use dungeon_finder::service::MatchmakingService;
use dungeon_finder::types::{RoleFlags, RoleMap};
use std::sync::Arc;
use std::time::Duration;

struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, notification: Notification) {
        black_box(notification);
    }
}

fn create_bench_service() -> MatchmakingService {
    MatchmakingService::new(
        MatchmakingConfig::default(),
        Collaborators::default(),
        Arc::new(NullSink),
    )
    .with_seed(1)
}

/// Roles cycling through single-role and multi-role selections
fn roles_for(actor: u64) -> RoleFlags {
    match actor % 6 {
        0 => RoleFlags::TANK,
        1 => RoleFlags::HEALER,
        2 => RoleFlags::TANK | RoleFlags::DAMAGE,
        3 => RoleFlags::HEALER | RoleFlags::DAMAGE,
        4 => RoleFlags::TANK | RoleFlags::HEALER | RoleFlags::DAMAGE,
        _ => RoleFlags::DAMAGE,
    }
}

fn bench_role_assignment(c: &mut Criterion) {
    let assigner = BacktrackingAssigner::new();
    let quotas = RoleQuotas::standard();

    let all_flex: RoleMap = (1..=5)
        .map(|actor| (actor, RoleFlags::TANK | RoleFlags::HEALER | RoleFlags::DAMAGE))
        .collect();
    let mixed: RoleMap = (1..=5).map(|actor| (actor, roles_for(actor))).collect();
    let impossible: RoleMap = (1..=5).map(|actor| (actor, RoleFlags::TANK)).collect();

    let mut group = c.benchmark_group("role_assignment");
    group.bench_function("all_flex", |b| {
        b.iter(|| assigner.assign(black_box(&all_flex), quotas))
    });
    group.bench_function("mixed", |b| {
        b.iter(|| assigner.assign(black_box(&mixed), quotas))
    });
    group.bench_function("impossible", |b| {
        b.iter(|| assigner.assign(black_box(&impossible), quotas))
    });
    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    group.sample_size(20);

    for queued in [10u64, 50, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(queued), &queued, |b, &queued| {
            b.iter_with_setup(
                || {
                    let mut service = create_bench_service();
                    for actor in 1..=queued {
                        let activity = if actor % 2 == 0 { 4 } else { 6 };
                        service.join_queue(
                            actor,
                            roles_for(actor),
                            [activity].into_iter().collect(),
                        );
                    }
                    service
                },
                |mut service| {
                    service.tick(Duration::from_secs(1));
                    black_box(service.stats())
                },
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_role_assignment, bench_sweep);
criterion_main!(benches);
