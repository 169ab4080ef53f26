//! Eligibility rules supplied by the game server
//!
//! Whether somebody may queue, which activities are locked for them and who
//! ignores whom are owned by other systems; the finder only asks.

use crate::types::{ActivityKey, ActorId, JoinResultCode, LockReason};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Reason an actor may not queue at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinRestriction {
    NoPermission,
    InBattleground,
    Deserter,
    RandomCooldown,
    Offline,
}

impl JoinRestriction {
    /// Result code when the restricted actor queues alone
    pub fn solo_code(&self) -> JoinResultCode {
        match self {
            JoinRestriction::NoPermission => JoinResultCode::NoPermission,
            JoinRestriction::InBattleground => JoinResultCode::UsingBattlegroundSystem,
            JoinRestriction::Deserter => JoinResultCode::Deserter,
            JoinRestriction::RandomCooldown => JoinResultCode::RandomCooldown,
            JoinRestriction::Offline => JoinResultCode::MembersDisconnected,
        }
    }

    /// Result code when a member of a queueing party is restricted
    pub fn party_code(&self) -> JoinResultCode {
        match self {
            JoinRestriction::Deserter => JoinResultCode::PartyDeserter,
            JoinRestriction::RandomCooldown => JoinResultCode::PartyRandomCooldown,
            other => other.solo_code(),
        }
    }

    /// Cooldowns only apply to random activities, and not when a party is
    /// continuing an activity it already runs
    pub fn is_random_cooldown(&self) -> bool {
        matches!(self, JoinRestriction::RandomCooldown)
    }
}

/// Trait for eligibility checks owned by the game server
pub trait EligibilityProvider: Send + Sync {
    /// Restriction preventing the actor from queueing, if any
    fn join_restriction(&self, actor: ActorId) -> Option<JoinRestriction>;

    /// Activities locked for the actor
    fn check_locks(&self, actor: ActorId) -> BTreeMap<ActivityKey, LockReason>;

    /// Whether `actor` ignores `other`
    fn is_ignoring(&self, actor: ActorId, other: ActorId) -> bool;

    /// Penalise an actor that abandoned a running activity
    fn apply_deserter_penalty(&self, actor: ActorId);
}

/// Mutable in-memory eligibility rules for development and tests
#[derive(Debug, Default)]
pub struct InMemoryEligibilityProvider {
    restrictions: RwLock<HashMap<ActorId, JoinRestriction>>,
    locks: RwLock<HashMap<ActorId, BTreeMap<ActivityKey, LockReason>>>,
    ignores: RwLock<HashSet<(ActorId, ActorId)>>,
}

impl InMemoryEligibilityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restrict(&self, actor: ActorId, restriction: JoinRestriction) {
        self.restrictions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(actor, restriction);
    }

    pub fn clear_restriction(&self, actor: ActorId) {
        self.restrictions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&actor);
    }

    pub fn lock(&self, actor: ActorId, key: ActivityKey, reason: LockReason) {
        self.locks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(actor)
            .or_default()
            .insert(key, reason);
    }

    pub fn clear_locks(&self, actor: ActorId) {
        self.locks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&actor);
    }

    /// Record that `actor` ignores `other`
    pub fn ignore(&self, actor: ActorId, other: ActorId) {
        self.ignores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((actor, other));
    }
}

impl EligibilityProvider for InMemoryEligibilityProvider {
    fn join_restriction(&self, actor: ActorId) -> Option<JoinRestriction> {
        self.restrictions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&actor)
            .copied()
    }

    fn check_locks(&self, actor: ActorId) -> BTreeMap<ActivityKey, LockReason> {
        self.locks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&actor)
            .cloned()
            .unwrap_or_default()
    }

    fn is_ignoring(&self, actor: ActorId, other: ActorId) -> bool {
        self.ignores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(actor, other))
    }

    fn apply_deserter_penalty(&self, actor: ActorId) {
        debug!("Applying deserter penalty to actor {}", actor);
        self.restrict(actor, JoinRestriction::Deserter);
    }
}
