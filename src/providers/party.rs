//! Party assembly and teleportation owned by the game server

use crate::catalog::Position;
use crate::types::{ActivityId, ActorId, PartyId, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Layout of a party formed from an accepted proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyAssembly {
    /// Party to reuse instead of creating a new one
    pub existing_party: Option<PartyId>,
    pub leader: ActorId,
    /// Leader first, then tanks, healers and damage
    pub members: Vec<(ActorId, Role)>,
    pub activity: ActivityId,
}

/// Trait for the party subsystem
///
/// Membership changes made here are reported back through the
/// `PartyLifecycleObserver` by the party subsystem itself.
pub trait PartyAssembler: Send + Sync {
    /// Create a party or update an existing one; returns its id
    fn create_or_update(&self, assembly: &PartyAssembly) -> PartyId;

    /// Move an actor to an activity entrance, or out of the activity when no
    /// destination is given
    fn teleport_actor(&self, actor: ActorId, destination: Option<Position>);

    /// Remove a member following a successful vote-kick
    fn kick_member(&self, party: PartyId, actor: ActorId);
}

/// In-memory assembler that records every call
#[derive(Debug)]
pub struct InMemoryPartyAssembler {
    next_party_id: AtomicU64,
    parties: RwLock<HashMap<PartyId, PartyAssembly>>,
    teleports: RwLock<Vec<(ActorId, Option<Position>)>>,
    kicks: RwLock<Vec<(PartyId, ActorId)>>,
}

impl InMemoryPartyAssembler {
    pub fn new() -> Self {
        Self::starting_at(1_000_000)
    }

    /// Allocate new party ids from `first_id` upwards
    pub fn starting_at(first_id: PartyId) -> Self {
        Self {
            next_party_id: AtomicU64::new(first_id),
            parties: RwLock::new(HashMap::new()),
            teleports: RwLock::new(Vec::new()),
            kicks: RwLock::new(Vec::new()),
        }
    }

    pub fn party(&self, party: PartyId) -> Option<PartyAssembly> {
        self.parties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&party)
            .cloned()
    }

    pub fn party_count(&self) -> usize {
        self.parties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn teleports(&self) -> Vec<(ActorId, Option<Position>)> {
        self.teleports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kicks(&self) -> Vec<(PartyId, ActorId)> {
        self.kicks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for InMemoryPartyAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PartyAssembler for InMemoryPartyAssembler {
    fn create_or_update(&self, assembly: &PartyAssembly) -> PartyId {
        let party_id = assembly
            .existing_party
            .unwrap_or_else(|| self.next_party_id.fetch_add(1, Ordering::Relaxed));

        debug!(
            "Assembling party {} with {} members for activity {}",
            party_id,
            assembly.members.len(),
            assembly.activity
        );

        self.parties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(party_id, assembly.clone());
        party_id
    }

    fn teleport_actor(&self, actor: ActorId, destination: Option<Position>) {
        self.teleports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((actor, destination));
    }

    fn kick_member(&self, party: PartyId, actor: ActorId) {
        if let Some(assembly) = self
            .parties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&party)
        {
            assembly.members.retain(|(member, _)| *member != actor);
        }
        self.kicks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((party, actor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembly(existing_party: Option<PartyId>) -> PartyAssembly {
        PartyAssembly {
            existing_party,
            leader: 1,
            members: vec![(1, Role::Tank), (2, Role::Healer), (3, Role::Damage)],
            activity: 4,
        }
    }

    #[test]
    fn test_new_parties_get_fresh_ids() {
        let assembler = InMemoryPartyAssembler::starting_at(10);
        assert_eq!(assembler.create_or_update(&assembly(None)), 10);
        assert_eq!(assembler.create_or_update(&assembly(None)), 11);
        assert_eq!(assembler.party_count(), 2);
    }

    #[test]
    fn test_existing_party_is_reused() {
        let assembler = InMemoryPartyAssembler::new();
        assert_eq!(assembler.create_or_update(&assembly(Some(77))), 77);
        assert!(assembler.party(77).is_some());
    }

    #[test]
    fn test_kick_member_is_recorded() {
        let assembler = InMemoryPartyAssembler::new();
        assembler.create_or_update(&assembly(Some(5)));
        assembler.kick_member(5, 2);

        assert_eq!(assembler.kicks(), vec![(5, 2)]);
        assert_eq!(assembler.party(5).unwrap().members.len(), 2);
    }
}
