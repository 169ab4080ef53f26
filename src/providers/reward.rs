//! Rewards for completing random activities

use crate::types::{ActivityId, ActorId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

/// Reward handed out for a completed random activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardGrant {
    /// Opaque reward content reference
    pub reward_id: u32,
    /// The actor already completed this random activity today
    pub already_rewarded_today: bool,
}

/// Trait for the reward lookup
pub trait RewardProvider: Send + Sync {
    /// Grant the reward for a random activity; `None` when it has none
    fn grant(&self, actor: ActorId, random_activity: ActivityId) -> Option<RewardGrant>;
}

/// First and repeat reward per random activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTable {
    pub first_reward: u32,
    pub repeat_reward: u32,
}

/// Static reward table with daily completion tracking
#[derive(Debug, Default)]
pub struct StaticRewardProvider {
    rewards: HashMap<ActivityId, RewardTable>,
    rewarded_today: RwLock<HashSet<(ActorId, ActivityId)>>,
}

impl StaticRewardProvider {
    pub fn new(rewards: HashMap<ActivityId, RewardTable>) -> Self {
        Self {
            rewards,
            rewarded_today: RwLock::new(HashSet::new()),
        }
    }

    /// Forget daily completions
    pub fn reset_daily(&self) {
        self.rewarded_today
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RewardProvider for StaticRewardProvider {
    fn grant(&self, actor: ActorId, random_activity: ActivityId) -> Option<RewardGrant> {
        let table = self.rewards.get(&random_activity)?;
        let first_today = self
            .rewarded_today
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((actor, random_activity));

        Some(RewardGrant {
            reward_id: if first_today {
                table.first_reward
            } else {
                table.repeat_reward
            },
            already_rewarded_today: !first_today,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_completion_gets_repeat_reward() {
        let provider = StaticRewardProvider::new(
            [(
                258,
                RewardTable {
                    first_reward: 1,
                    repeat_reward: 2,
                },
            )]
            .into_iter()
            .collect(),
        );

        let first = provider.grant(5, 258).unwrap();
        assert_eq!(first.reward_id, 1);
        assert!(!first.already_rewarded_today);

        let second = provider.grant(5, 258).unwrap();
        assert_eq!(second.reward_id, 2);
        assert!(second.already_rewarded_today);

        provider.reset_daily();
        assert!(!provider.grant(5, 258).unwrap().already_rewarded_today);
    }

    #[test]
    fn test_unknown_activity_has_no_reward() {
        let provider = StaticRewardProvider::default();
        assert!(provider.grant(1, 999).is_none());
    }
}
