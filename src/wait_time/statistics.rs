//! Statistical tracking for wait times
//!
//! Every resolved proposal feeds one sample per member into a running mean
//! kept per activity and role. Queue status broadcasts read these means back
//! as estimates.

use crate::types::{ActivityId, Role, RoleFlags};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Which mean a sample feeds
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitTimeBucket {
    Average,
    Tank,
    Healer,
    Damage,
}

impl From<Role> for WaitTimeBucket {
    fn from(role: Role) -> Self {
        match role {
            Role::Tank => WaitTimeBucket::Tank,
            Role::Healer => WaitTimeBucket::Healer,
            Role::Damage => WaitTimeBucket::Damage,
        }
    }
}

/// Running mean of one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitTimeSample {
    pub sample_count: u32,
    pub average: Duration,
}

impl WaitTimeSample {
    /// Fold a sample into the mean: `avg = (avg * n + sample) / (n + 1)`
    pub fn add_sample(&mut self, wait_time: Duration) {
        let count = self.sample_count as u128;
        let total = self.average.as_millis() * count + wait_time.as_millis();
        let average_ms = total / (count + 1);

        self.average = Duration::from_millis(u64::try_from(average_ms).unwrap_or(u64::MAX));
        self.sample_count = self.sample_count.saturating_add(1);
    }
}

/// Means of every bucket of one activity; `None` where nothing was sampled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitTimeSnapshot {
    pub average: Option<Duration>,
    pub tank: Option<Duration>,
    pub healer: Option<Duration>,
    pub damage: Option<Duration>,
}

/// Per-queue wait time statistics
#[derive(Debug, Clone, Default)]
pub struct WaitTimeTracker {
    samples: HashMap<(ActivityId, WaitTimeBucket), WaitTimeSample>,
}

impl WaitTimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the wait of a member who ended up in `role`. The overall mean
    /// receives every sample as well.
    pub fn record(&mut self, activity: ActivityId, role: Role, wait_time: Duration) {
        self.samples
            .entry((activity, WaitTimeBucket::from(role)))
            .or_default()
            .add_sample(wait_time);
        self.samples
            .entry((activity, WaitTimeBucket::Average))
            .or_default()
            .add_sample(wait_time);
    }

    pub fn sample(&self, activity: ActivityId, bucket: WaitTimeBucket) -> Option<WaitTimeSample> {
        self.samples.get(&(activity, bucket)).copied()
    }

    fn average(&self, activity: ActivityId, bucket: WaitTimeBucket) -> Option<Duration> {
        self.sample(activity, bucket)
            .filter(|sample| sample.sample_count > 0)
            .map(|sample| sample.average)
    }

    /// Estimate for someone queueing with `roles`: the role's own mean when
    /// exactly one role is selected, the overall mean otherwise
    pub fn estimate(&self, activity: ActivityId, roles: RoleFlags) -> Option<Duration> {
        let bucket = roles
            .single_role()
            .map(WaitTimeBucket::from)
            .unwrap_or(WaitTimeBucket::Average);
        self.average(activity, bucket)
    }

    pub fn snapshot(&self, activity: ActivityId) -> WaitTimeSnapshot {
        WaitTimeSnapshot {
            average: self.average(activity, WaitTimeBucket::Average),
            tank: self.average(activity, WaitTimeBucket::Tank),
            healer: self.average(activity, WaitTimeBucket::Healer),
            damage: self.average(activity, WaitTimeBucket::Damage),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_mean() {
        let mut sample = WaitTimeSample::default();
        sample.add_sample(Duration::from_secs(10));
        sample.add_sample(Duration::from_secs(20));
        sample.add_sample(Duration::from_secs(30));

        assert_eq!(sample.sample_count, 3);
        assert_eq!(sample.average, Duration::from_secs(20));
    }

    #[test]
    fn test_record_feeds_role_and_average() {
        let mut tracker = WaitTimeTracker::new();
        tracker.record(258, Role::Tank, Duration::from_secs(60));
        tracker.record(258, Role::Damage, Duration::from_secs(300));

        let snapshot = tracker.snapshot(258);
        assert_eq!(snapshot.tank, Some(Duration::from_secs(60)));
        assert_eq!(snapshot.damage, Some(Duration::from_secs(300)));
        assert_eq!(snapshot.average, Some(Duration::from_secs(180)));
        assert_eq!(snapshot.healer, None);
    }

    #[test]
    fn test_estimate_by_role_combination() {
        let mut tracker = WaitTimeTracker::new();
        tracker.record(258, Role::Tank, Duration::from_secs(60));
        tracker.record(258, Role::Damage, Duration::from_secs(300));

        assert_eq!(
            tracker.estimate(258, RoleFlags::TANK | RoleFlags::LEADER),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            tracker.estimate(258, RoleFlags::TANK | RoleFlags::DAMAGE),
            Some(Duration::from_secs(180))
        );
        assert_eq!(tracker.estimate(258, RoleFlags::HEALER), None);
        assert_eq!(tracker.estimate(999, RoleFlags::DAMAGE), None);
    }
}
