//! Role capabilities per character class

use crate::types::{ActorId, RoleFlags};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Trait for the roles an actor is able to fill
pub trait RoleCapabilityProvider: Send + Sync {
    fn allowed_roles(&self, actor: ActorId) -> RoleFlags;
}

/// Reduce requested roles to the ones the actor can fill. The leader marker
/// is always kept.
pub fn filter_roles(
    provider: &dyn RoleCapabilityProvider,
    actor: ActorId,
    requested: RoleFlags,
) -> RoleFlags {
    requested & (provider.allowed_roles(actor) | RoleFlags::LEADER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacterClass {
    Warrior,
    Paladin,
    Hunter,
    Rogue,
    Priest,
    DeathKnight,
    Shaman,
    Mage,
    Warlock,
    Druid,
}

impl CharacterClass {
    pub fn roles(&self) -> RoleFlags {
        match self {
            CharacterClass::Warrior | CharacterClass::DeathKnight => {
                RoleFlags::TANK | RoleFlags::DAMAGE
            }
            CharacterClass::Paladin | CharacterClass::Druid => RoleFlags::ASSIGNABLE,
            CharacterClass::Priest | CharacterClass::Shaman => {
                RoleFlags::HEALER | RoleFlags::DAMAGE
            }
            CharacterClass::Hunter
            | CharacterClass::Rogue
            | CharacterClass::Mage
            | CharacterClass::Warlock => RoleFlags::DAMAGE,
        }
    }
}

/// Class-based capabilities; actors without a known class may fill any role
#[derive(Debug, Default)]
pub struct ClassRoleProvider {
    classes: RwLock<HashMap<ActorId, CharacterClass>>,
}

impl ClassRoleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_class(&self, actor: ActorId, class: CharacterClass) {
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(actor, class);
    }
}

impl RoleCapabilityProvider for ClassRoleProvider {
    fn allowed_roles(&self, actor: ActorId) -> RoleFlags {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&actor)
            .map(CharacterClass::roles)
            .unwrap_or(RoleFlags::ASSIGNABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_keeps_leader_and_allowed_roles() {
        let provider = ClassRoleProvider::new();
        provider.set_class(1, CharacterClass::Mage);

        let filtered = filter_roles(&provider, 1, RoleFlags::all());
        assert_eq!(filtered, RoleFlags::LEADER | RoleFlags::DAMAGE);
    }

    #[test]
    fn test_unknown_class_allows_everything() {
        let provider = ClassRoleProvider::new();
        let requested = RoleFlags::TANK | RoleFlags::HEALER;
        assert_eq!(filter_roles(&provider, 99, requested), requested);
    }
}
