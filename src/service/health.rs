//! Health check endpoints and monitoring
//!
//! Readiness and liveness of the dungeon finder come from two sources: the
//! running flag owned by `AppState` and whether the matchmaking task still
//! answers on its mailbox.

use crate::service::actor::ServiceHandle;
use crate::service::matchmaking::MatchmakingStats;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// How long the matchmaking task may take to answer a stats request
const STATS_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value of this status (0=unhealthy, 1=degraded, 2=healthy)
    pub fn gauge_value(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.gauge_value() <= other.gauge_value() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// What the health endpoints need to look at
#[derive(Debug, Clone)]
pub struct HealthProbe {
    pub service_name: String,
    pub service: ServiceHandle,
    pub is_running: Arc<RwLock<bool>>,
}

impl HealthProbe {
    pub fn new(service_name: impl Into<String>, service: ServiceHandle) -> Self {
        Self {
            service_name: service_name.into(),
            service,
            is_running: Arc::new(RwLock::new(true)),
        }
    }

    pub fn with_running_flag(mut self, is_running: Arc<RwLock<bool>>) -> Self {
        self.is_running = is_running;
        self
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Matchmaking statistics, when the service task answered
    pub stats: Option<MatchmakingStats>,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

impl HealthCheck {
    /// Perform a full health check of the service
    pub async fn check(probe: &HealthProbe) -> Result<Self> {
        let mut checks = Vec::new();

        let running = Self::check_service_running(probe).await;
        let mut overall = running.status;
        checks.push(running);

        let (matchmaking, stats) = Self::check_matchmaking(probe).await;
        overall = overall.worst(matchmaking.status);
        checks.push(matchmaking);

        Ok(HealthCheck {
            status: overall,
            service: probe.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Liveness only needs the service to be marked running
    pub async fn liveness_check(probe: &HealthProbe) -> Result<HealthStatus> {
        if *probe.is_running.read().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness also requires the matchmaking task to answer
    pub async fn readiness_check(probe: &HealthProbe) -> Result<HealthStatus> {
        if !*probe.is_running.read().await {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(Self::check_matchmaking(probe).await.0.status)
    }

    async fn check_service_running(probe: &HealthProbe) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if *probe.is_running.read().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_matchmaking(probe: &HealthProbe) -> (ComponentCheck, Option<MatchmakingStats>) {
        let start = std::time::Instant::now();

        let (status, message, stats) =
            match tokio::time::timeout(STATS_TIMEOUT, probe.service.stats()).await {
                Ok(Ok(stats)) => {
                    debug!("Matchmaking task answered: {} queued", stats.total_queued());
                    (HealthStatus::Healthy, None, Some(stats))
                }
                Ok(Err(e)) => {
                    error!("Matchmaking task is gone: {}", e);
                    (HealthStatus::Unhealthy, Some(e.to_string()), None)
                }
                Err(_) => (
                    HealthStatus::Degraded,
                    Some(format!("No answer within {:?}", STATS_TIMEOUT)),
                    None,
                ),
            };

        (
            ComponentCheck {
                name: "matchmaking".to_string(),
                status,
                message,
                duration_ms: start.elapsed().as_millis() as u64,
            },
            stats,
        )
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchmakingConfig;
    use crate::notify::RecordingSink;
    use crate::providers::Collaborators;
    use crate::service::actor::spawn_service;
    use crate::service::MatchmakingService;

    fn create_test_probe() -> (HealthProbe, tokio::task::JoinHandle<()>) {
        let service = MatchmakingService::new(
            MatchmakingConfig::default(),
            Collaborators::default(),
            Arc::new(RecordingSink::new()),
        );
        let (handle, task) = spawn_service(service, Duration::from_millis(50));
        (HealthProbe::new("dungeon-finder", handle), task)
    }

    #[tokio::test]
    async fn test_healthy_service() {
        let (probe, _task) = create_test_probe();
        let health = HealthCheck::check(&probe).await.unwrap();

        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.checks.len(), 2);
        assert_eq!(health.stats.as_ref().unwrap().total_queued(), 0);
        assert!(health.to_json().unwrap().contains("matchmaking"));
    }

    #[tokio::test]
    async fn test_stopped_task_is_unhealthy() {
        let (probe, task) = create_test_probe();
        task.abort();
        let _ = task.await;

        assert_eq!(
            HealthCheck::readiness_check(&probe).await.unwrap(),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::liveness_check(&probe).await.unwrap(),
            HealthStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_not_running() {
        let (probe, _task) = create_test_probe();
        *probe.is_running.write().await = false;

        assert_eq!(
            HealthCheck::liveness_check(&probe).await.unwrap(),
            HealthStatus::Unhealthy
        );
        let health = HealthCheck::check(&probe).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_worst_status() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(HealthStatus::Degraded),
            HealthStatus::Unhealthy
        );
    }
}
