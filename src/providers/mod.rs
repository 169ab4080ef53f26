//! Collaborators owned by the game server
//!
//! The finder never decides eligibility, builds parties, teleports actors,
//! stores rows or hands out rewards itself. Each concern is a trait here,
//! with an in-memory implementation for development and tests.

pub mod eligibility;
pub mod party;
pub mod persistence;
pub mod reward;
pub mod roles;

// Re-export commonly used types
pub use eligibility::{EligibilityProvider, InMemoryEligibilityProvider, JoinRestriction};
pub use party::{InMemoryPartyAssembler, PartyAssembler, PartyAssembly};
pub use persistence::{
    InMemoryPersistenceStore, JsonFilePersistenceStore, PersistedParty, PersistenceStore,
};
pub use reward::{RewardGrant, RewardProvider, RewardTable, StaticRewardProvider};
pub use roles::{filter_roles, CharacterClass, ClassRoleProvider, RoleCapabilityProvider};

use crate::catalog::{ActivityCatalog, StaticActivityCatalog};
use std::sync::Arc;

/// Every collaborator the matchmaking service talks to
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn ActivityCatalog>,
    pub eligibility: Arc<dyn EligibilityProvider>,
    pub role_capabilities: Arc<dyn RoleCapabilityProvider>,
    pub party_assembler: Arc<dyn PartyAssembler>,
    pub persistence: Arc<dyn PersistenceStore>,
    pub rewards: Arc<dyn RewardProvider>,
}

impl Collaborators {
    /// In-memory collaborators over the given catalog
    pub fn in_memory(catalog: Arc<dyn ActivityCatalog>) -> Self {
        Self {
            catalog,
            eligibility: Arc::new(InMemoryEligibilityProvider::new()),
            role_capabilities: Arc::new(ClassRoleProvider::new()),
            party_assembler: Arc::new(InMemoryPartyAssembler::new()),
            persistence: Arc::new(InMemoryPersistenceStore::new()),
            rewards: Arc::new(StaticRewardProvider::default()),
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::in_memory(Arc::new(StaticActivityCatalog::with_defaults()))
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
