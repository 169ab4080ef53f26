//! Queue entries

use crate::queue::compatibility::CandidateSet;
use crate::roles::{Assignment, RoleQuotas};
use crate::types::{ActivityId, ActorId, CandidateId, RoleFlags, RoleMap};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// A queued solo participant or party
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub candidate: CandidateId,
    /// Original join time, kept across re-admissions
    pub joined_at: DateTime<Utc>,
    /// Concrete activities the candidate accepts
    pub activities: BTreeSet<ActivityId>,
    pub roles: RoleMap,
    /// Largest known candidate set this entry could still grow into
    pub best_compatible: Option<CandidateSet>,
    /// Seats that set still has to fill
    pub needed: RoleQuotas,
}

impl QueueEntry {
    pub fn new(
        candidate: CandidateId,
        joined_at: DateTime<Utc>,
        activities: BTreeSet<ActivityId>,
        roles: RoleMap,
        quotas: RoleQuotas,
    ) -> Self {
        Self {
            candidate,
            joined_at,
            activities,
            roles,
            best_compatible: None,
            needed: quotas,
        }
    }

    pub fn member_count(&self) -> usize {
        self.roles.len()
    }

    pub fn members(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.roles.keys().copied()
    }

    /// Union of the members' assignable roles
    pub fn combined_roles(&self) -> RoleFlags {
        self.roles
            .values()
            .fold(RoleFlags::empty(), |acc, flags| acc | *flags)
            & RoleFlags::ASSIGNABLE
    }

    /// Remember `key` as the best partial group if it is larger than the
    /// current one, and derive the seats it still needs
    pub fn update_best_compatible(
        &mut self,
        key: &CandidateSet,
        assignment: &Assignment,
        quotas: RoleQuotas,
    ) {
        let current = self.best_compatible.as_ref().map(CandidateSet::len).unwrap_or(0);
        if key.len() <= current {
            return;
        }
        self.best_compatible = Some(key.clone());
        self.needed = quotas.remaining_after(assignment);
    }

    /// Forget the best partial group
    pub fn reset_best_compatible(&mut self, quotas: RoleQuotas) {
        self.best_compatible = None;
        self.needed = quotas;
    }
}
