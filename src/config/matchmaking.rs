//! Matchmaking configuration

use crate::roles::RoleQuotas;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the matchmaking core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Seats per role in a formed party
    pub quotas: RoleQuotas,
    /// Time members have to answer a role check
    pub role_check_timeout_seconds: u64,
    /// Time members have to accept a proposal
    pub proposal_timeout_seconds: u64,
    /// Duration of a vote-kick
    pub boot_vote_timeout_seconds: u64,
    /// Agree votes needed to remove a member
    pub kick_votes_needed: u8,
    /// Vote-kicks a party may start while in an activity
    pub max_kicks: u8,
    /// Interval between queue status broadcasts
    pub queue_status_interval_seconds: u64,
    /// Interval between service ticks
    pub tick_interval_ms: u64,
    /// Queue every team in one shared partition
    pub cross_faction: bool,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            quotas: RoleQuotas::standard(),
            role_check_timeout_seconds: 45,
            proposal_timeout_seconds: 45,
            boot_vote_timeout_seconds: 120,
            kick_votes_needed: 3,
            max_kicks: 3,
            queue_status_interval_seconds: 15,
            tick_interval_ms: 1000,
            cross_faction: false,
        }
    }
}

impl MatchmakingConfig {
    pub fn party_size(&self) -> usize {
        self.quotas.party_size()
    }

    pub fn role_check_timeout(&self) -> Duration {
        Duration::from_secs(self.role_check_timeout_seconds)
    }

    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_secs(self.proposal_timeout_seconds)
    }

    pub fn boot_vote_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_vote_timeout_seconds)
    }

    pub fn queue_status_interval(&self) -> Duration {
        Duration::from_secs(self.queue_status_interval_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
