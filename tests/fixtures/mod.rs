//! Shared setup for the integration tests

use dungeon_finder::catalog::StaticActivityCatalog;
use dungeon_finder::config::MatchmakingConfig;
use dungeon_finder::notify::{Notification, RecordingSink};
use dungeon_finder::providers::{
    ClassRoleProvider, Collaborators, InMemoryEligibilityProvider, InMemoryPartyAssembler,
    InMemoryPersistenceStore, RewardTable, StaticRewardProvider,
};
use dungeon_finder::types::{ActivityId, ActorId, JoinResultCode, PartyId, RoleFlags};
use dungeon_finder::{MatchmakingService, PartyLifecycleObserver};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// The random dungeon of the default catalog
pub const RANDOM_DUNGEON: ActivityId = 258;

/// One seat per actor: tank, healer and three damage dealers
pub const SEATS: [RoleFlags; 5] = [
    RoleFlags::TANK,
    RoleFlags::HEALER,
    RoleFlags::DAMAGE,
    RoleFlags::DAMAGE,
    RoleFlags::DAMAGE,
];

/// A service with handles on every in-memory collaborator
pub struct Harness {
    pub service: MatchmakingService,
    pub sink: Arc<RecordingSink>,
    pub eligibility: Arc<InMemoryEligibilityProvider>,
    pub assembler: Arc<InMemoryPartyAssembler>,
    pub persistence: Arc<InMemoryPersistenceStore>,
}

impl Harness {
    pub fn new() -> Self {
        let sink = Arc::new(RecordingSink::new());
        let eligibility = Arc::new(InMemoryEligibilityProvider::new());
        let assembler = Arc::new(InMemoryPartyAssembler::new());
        let persistence = Arc::new(InMemoryPersistenceStore::new());
        let collaborators = collaborators(
            eligibility.clone(),
            assembler.clone(),
            persistence.clone(),
        );

        let service =
            MatchmakingService::new(MatchmakingConfig::default(), collaborators, sink.clone())
                .with_seed(7);

        Self {
            service,
            sink,
            eligibility,
            assembler,
            persistence,
        }
    }

    /// Queue actors `first..first + 5` for the random dungeon, one per seat
    pub fn queue_five(&mut self, first: ActorId) {
        for (offset, roles) in SEATS.iter().enumerate() {
            let actor = first + offset as ActorId;
            let result = self
                .service
                .join_queue(actor, *roles, BTreeSet::from([RANDOM_DUNGEON]));
            assert_eq!(result, JoinResultCode::Ok, "actor {} failed to queue", actor);
        }
    }

    /// Queue five actors, sweep once and accept the resulting proposal
    pub fn run_dungeon(&mut self, first: ActorId) -> PartyId {
        self.queue_five(first);
        self.service.tick(Duration::from_secs(1));

        let proposal = self
            .service
            .proposals()
            .find_by_member(first)
            .expect("sweep should have proposed a group");
        for actor in first..first + 5 {
            self.service.respond_proposal(proposal, actor, true);
        }

        self.service
            .store()
            .party_of(first)
            .expect("accepted proposal should form a party")
    }

    /// Form `party` from `actors`; the first actor leads
    pub fn form_party(&mut self, party: PartyId, actors: &[ActorId]) {
        for actor in actors {
            self.service.on_member_added(party, *actor);
        }
        if let Some(leader) = actors.first() {
            self.service.on_leader_changed(party, *leader);
        }
    }

    pub fn notifications_for(&self, actor: ActorId) -> Vec<Notification> {
        self.sink.for_actor(actor)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory collaborators over the default catalog, with a reward table for
/// the random dungeon
pub fn collaborators(
    eligibility: Arc<InMemoryEligibilityProvider>,
    assembler: Arc<InMemoryPartyAssembler>,
    persistence: Arc<InMemoryPersistenceStore>,
) -> Collaborators {
    let rewards = StaticRewardProvider::new(HashMap::from([(
        RANDOM_DUNGEON,
        RewardTable {
            first_reward: 1,
            repeat_reward: 2,
        },
    )]));

    Collaborators {
        catalog: Arc::new(StaticActivityCatalog::with_defaults()),
        eligibility,
        role_capabilities: Arc::new(ClassRoleProvider::new()),
        party_assembler: assembler,
        persistence,
        rewards: Arc::new(rewards),
    }
}
