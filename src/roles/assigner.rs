//! Role assignment for candidate groups
//!
//! Decides whether a set of members, each with one or more selectable roles,
//! can be laid out over the tank/healer/damage quotas of a party.

use crate::types::{ActorId, Role, RoleFlags, RoleMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-role seat counts of a party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleQuotas {
    pub tanks: u8,
    pub healers: u8,
    pub damage: u8,
}

impl RoleQuotas {
    pub const fn new(tanks: u8, healers: u8, damage: u8) -> Self {
        Self {
            tanks,
            healers,
            damage,
        }
    }

    /// One tank, one healer, three damage dealers
    pub const fn standard() -> Self {
        Self::new(1, 1, 3)
    }

    /// Total number of seats
    pub fn party_size(&self) -> usize {
        self.tanks as usize + self.healers as usize + self.damage as usize
    }

    pub fn seats(&self, role: Role) -> u8 {
        match role {
            Role::Tank => self.tanks,
            Role::Healer => self.healers,
            Role::Damage => self.damage,
        }
    }

    /// Quotas with one seat of `role` taken, or `None` when none are left
    pub fn take(self, role: Role) -> Option<Self> {
        let mut next = self;
        let seats = match role {
            Role::Tank => &mut next.tanks,
            Role::Healer => &mut next.healers,
            Role::Damage => &mut next.damage,
        };
        *seats = seats.checked_sub(1)?;
        Some(next)
    }

    /// Seats still open after the given assignment
    pub fn remaining_after(self, assignment: &Assignment) -> Self {
        assignment.values().fold(self, |quotas, role| {
            quotas.take(*role).unwrap_or(quotas)
        })
    }
}

impl Default for RoleQuotas {
    fn default() -> Self {
        Self::standard()
    }
}

/// Resolved role per member
pub type Assignment = BTreeMap<ActorId, Role>;

/// Resolves role capabilities onto party quotas.
///
/// Implementations must not retain or mutate anything between calls: the
/// same input always produces the same answer.
pub trait RoleAssigner: Send + Sync {
    /// Assign a role to every member without exceeding any quota. With as
    /// many members as seats this fills every quota exactly.
    fn assign(&self, roles: &RoleMap, quotas: RoleQuotas) -> Option<Assignment>;
}

/// Depth-first search over members in id order, trying tank, healer and
/// damage for each multi-role member.
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktrackingAssigner;

impl BacktrackingAssigner {
    pub fn new() -> Self {
        Self
    }

    /// Roles for `members`, in reverse member order, or `None` when no
    /// layout fits. Nothing is built until a complete layout is found, so an
    /// abandoned branch leaves nothing behind.
    fn solve(members: &[(ActorId, RoleFlags)], quotas: RoleQuotas) -> Option<Vec<Role>> {
        let Some(((_, flags), rest)) = members.split_first() else {
            return Some(Vec::with_capacity(members.len()));
        };

        Role::ALL
            .iter()
            .filter(|role| flags.contains(role.flag()))
            .find_map(|role| {
                let remaining = quotas.take(*role)?;
                let mut layout = Self::solve(rest, remaining)?;
                layout.push(*role);
                Some(layout)
            })
    }
}

impl RoleAssigner for BacktrackingAssigner {
    fn assign(&self, roles: &RoleMap, quotas: RoleQuotas) -> Option<Assignment> {
        if roles.is_empty() || roles.len() > quotas.party_size() {
            return None;
        }

        let members: Vec<(ActorId, RoleFlags)> = roles
            .iter()
            .map(|(actor, flags)| (*actor, *flags & RoleFlags::ASSIGNABLE))
            .collect();

        let layout = Self::solve(&members, quotas)?;
        Some(
            members
                .iter()
                .map(|(actor, _)| *actor)
                .zip(layout.into_iter().rev())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roles_of(entries: &[(ActorId, RoleFlags)]) -> RoleMap {
        entries.iter().copied().collect()
    }

    fn count(assignment: &Assignment, role: Role) -> usize {
        assignment.values().filter(|r| **r == role).count()
    }

    #[test]
    fn test_standard_party_assignment() {
        let roles = roles_of(&[
            (1, RoleFlags::TANK | RoleFlags::LEADER),
            (2, RoleFlags::HEALER),
            (3, RoleFlags::DAMAGE),
            (4, RoleFlags::DAMAGE),
            (5, RoleFlags::DAMAGE),
        ]);

        let assignment = BacktrackingAssigner
            .assign(&roles, RoleQuotas::standard())
            .unwrap();
        assert_eq!(assignment[&1], Role::Tank);
        assert_eq!(assignment[&2], Role::Healer);
        assert_eq!(count(&assignment, Role::Damage), 3);
    }

    #[test]
    fn test_backtracks_over_flexible_members() {
        // Member 1 would grab the tank seat first; only member 2 can tank.
        let roles = roles_of(&[
            (1, RoleFlags::TANK | RoleFlags::HEALER),
            (2, RoleFlags::TANK),
            (3, RoleFlags::DAMAGE),
        ]);

        let assignment = BacktrackingAssigner
            .assign(&roles, RoleQuotas::standard())
            .unwrap();
        assert_eq!(assignment[&1], Role::Healer);
        assert_eq!(assignment[&2], Role::Tank);
        assert_eq!(assignment[&3], Role::Damage);
    }

    #[test]
    fn test_rejects_two_single_role_tanks() {
        let roles = roles_of(&[(1, RoleFlags::TANK), (2, RoleFlags::TANK)]);
        assert!(BacktrackingAssigner
            .assign(&roles, RoleQuotas::standard())
            .is_none());
    }

    #[test]
    fn test_rejects_member_without_roles() {
        let roles = roles_of(&[(1, RoleFlags::LEADER), (2, RoleFlags::DAMAGE)]);
        assert!(BacktrackingAssigner
            .assign(&roles, RoleQuotas::standard())
            .is_none());
    }

    #[test]
    fn test_rejects_more_members_than_seats() {
        let roles: RoleMap = (1..=6).map(|id| (id, RoleFlags::ASSIGNABLE)).collect();
        assert!(BacktrackingAssigner
            .assign(&roles, RoleQuotas::standard())
            .is_none());
    }

    #[test]
    fn test_remaining_quotas() {
        let assignment: Assignment = [(1, Role::Tank), (2, Role::Damage)].into_iter().collect();
        let remaining = RoleQuotas::standard().remaining_after(&assignment);
        assert_eq!(remaining, RoleQuotas::new(0, 1, 2));
    }

    /// Exhaustive reference: try every role for every member.
    fn brute_force(members: &[RoleFlags], quotas: RoleQuotas) -> bool {
        match members.split_first() {
            None => true,
            Some((flags, rest)) => Role::ALL.iter().any(|role| {
                flags.contains(role.flag())
                    && quotas
                        .take(*role)
                        .map(|left| brute_force(rest, left))
                        .unwrap_or(false)
            }),
        }
    }

    proptest! {
        #[test]
        fn prop_assigner_matches_exhaustive_search(bits in proptest::collection::vec(0u8..16, 5)) {
            let roles: RoleMap = bits
                .iter()
                .enumerate()
                .map(|(i, b)| (i as ActorId + 1, RoleFlags::from_bits_truncate(*b)))
                .collect();
            let snapshot = roles.clone();
            let flags: Vec<RoleFlags> = roles.values().copied().collect();

            let result = BacktrackingAssigner.assign(&roles, RoleQuotas::standard());

            prop_assert_eq!(result.is_some(), brute_force(&flags, RoleQuotas::standard()));
            prop_assert_eq!(&roles, &snapshot);

            if let Some(assignment) = result {
                prop_assert_eq!(count(&assignment, Role::Tank), 1);
                prop_assert_eq!(count(&assignment, Role::Healer), 1);
                prop_assert_eq!(count(&assignment, Role::Damage), 3);
                for (actor, role) in &assignment {
                    prop_assert!(roles[actor].contains(role.flag()));
                }
            }
        }
    }
}
