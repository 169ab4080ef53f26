//! Metrics collection using Prometheus
//!
//! Every counter and gauge of the dungeon finder lives in one registry that
//! the health server exposes on `/metrics`.

use crate::service::MatchmakingStats;
use crate::types::{JoinResultCode, PartitionId, Role};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the dungeon finder
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    queue_metrics: QueueMetrics,
    lifecycle_metrics: LifecycleMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue admission and waiting
#[derive(Clone)]
pub struct QueueMetrics {
    /// Join requests by result code
    pub joins_total: IntCounterVec,

    /// Candidates holding queue data, per partition
    pub queued_candidates: IntGaugeVec,

    /// Memoized compatibility records across partitions
    pub compatibility_cache_entries: IntGauge,

    /// Time spent in queue before a group was found
    pub wait_time_seconds: HistogramVec,
}

/// Proposals, role checks and vote-kicks
#[derive(Clone)]
pub struct LifecycleMetrics {
    pub proposals_created_total: IntCounter,

    /// Resolved proposals by outcome
    pub proposals_resolved_total: IntCounterVec,

    /// Finished role checks by final state
    pub role_checks_total: IntCounterVec,

    /// Resolved vote-kicks by outcome
    pub boot_votes_total: IntCounterVec,

    pub active_proposals: IntGauge,
    pub active_role_checks: IntGauge,
    pub active_boot_votes: IntGauge,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Duration of one group formation sweep
    pub sweep_duration: Histogram,

    /// Duration of a whole tick
    pub tick_duration: Histogram,

    /// Command processing time by command
    pub command_duration: HistogramVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let lifecycle_metrics = LifecycleMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            lifecycle_metrics,
            performance_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn lifecycle(&self) -> &LifecycleMetrics {
        &self.lifecycle_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh gauges from a statistics snapshot
    pub fn update_from_stats(&self, stats: &MatchmakingStats) {
        for (partition, queued) in &stats.queued_per_partition {
            self.record_queue_size(*partition, *queued);
        }
        self.queue_metrics
            .compatibility_cache_entries
            .set(stats.compatibility_records as i64);
        self.lifecycle_metrics
            .active_proposals
            .set(stats.active_proposals as i64);
        self.lifecycle_metrics
            .active_role_checks
            .set(stats.active_role_checks as i64);
        self.lifecycle_metrics
            .active_boot_votes
            .set(stats.active_boot_votes as i64);
    }

    pub fn record_join(&self, result: JoinResultCode) {
        self.queue_metrics
            .joins_total
            .with_label_values(&[result.as_str()])
            .inc();
    }

    pub fn record_wait_time(&self, role: Role, wait: Duration) {
        self.queue_metrics
            .wait_time_seconds
            .with_label_values(&[&role.to_string()])
            .observe(wait.as_secs_f64());
    }

    pub fn record_queue_size(&self, partition: PartitionId, queued: usize) {
        self.queue_metrics
            .queued_candidates
            .with_label_values(&[&partition.to_string()])
            .set(queued as i64);
    }

    pub fn record_proposal_created(&self) {
        self.lifecycle_metrics.proposals_created_total.inc();
    }

    pub fn record_proposal_resolved(&self, outcome: &str) {
        self.lifecycle_metrics
            .proposals_resolved_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_role_check(&self, outcome: &str) {
        self.lifecycle_metrics
            .role_checks_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_boot_vote(&self, outcome: &str) {
        self.lifecycle_metrics
            .boot_votes_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_sweep(&self, duration: Duration) {
        self.performance_metrics
            .sweep_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_tick(&self, duration: Duration) {
        self.performance_metrics
            .tick_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_command(&self, command: &str, duration: Duration) {
        self.performance_metrics
            .command_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::start()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("dungeon_finder_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "dungeon_finder_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("dungeon_finder_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "dungeon_finder_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("dungeon_finder_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let joins_total = IntCounterVec::new(
            Opts::new("dungeon_finder_joins_total", "Join requests by result"),
            &["result"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let queued_candidates = IntGaugeVec::new(
            Opts::new(
                "dungeon_finder_queued_candidates",
                "Candidates waiting in queue",
            ),
            &["partition"],
        )?;
        registry.register(Box::new(queued_candidates.clone()))?;

        let compatibility_cache_entries = IntGauge::new(
            "dungeon_finder_compatibility_cache_entries",
            "Memoized compatibility records",
        )?;
        registry.register(Box::new(compatibility_cache_entries.clone()))?;

        let wait_time_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dungeon_finder_wait_time_seconds",
                "Queue wait time before a group was found",
            )
            .buckets(vec![
                15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1800.0, 3600.0,
            ]),
            &["role"],
        )?;
        registry.register(Box::new(wait_time_seconds.clone()))?;

        Ok(Self {
            joins_total,
            queued_candidates,
            compatibility_cache_entries,
            wait_time_seconds,
        })
    }
}

impl LifecycleMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let proposals_created_total = IntCounter::new(
            "dungeon_finder_proposals_created_total",
            "Group proposals created",
        )?;
        registry.register(Box::new(proposals_created_total.clone()))?;

        let proposals_resolved_total = IntCounterVec::new(
            Opts::new(
                "dungeon_finder_proposals_resolved_total",
                "Group proposals resolved",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(proposals_resolved_total.clone()))?;

        let role_checks_total = IntCounterVec::new(
            Opts::new("dungeon_finder_role_checks_total", "Role checks finished"),
            &["outcome"],
        )?;
        registry.register(Box::new(role_checks_total.clone()))?;

        let boot_votes_total = IntCounterVec::new(
            Opts::new("dungeon_finder_boot_votes_total", "Vote-kicks resolved"),
            &["outcome"],
        )?;
        registry.register(Box::new(boot_votes_total.clone()))?;

        let active_proposals =
            IntGauge::new("dungeon_finder_active_proposals", "Open group proposals")?;
        registry.register(Box::new(active_proposals.clone()))?;

        let active_role_checks =
            IntGauge::new("dungeon_finder_active_role_checks", "Running role checks")?;
        registry.register(Box::new(active_role_checks.clone()))?;

        let active_boot_votes =
            IntGauge::new("dungeon_finder_active_boot_votes", "Running vote-kicks")?;
        registry.register(Box::new(active_boot_votes.clone()))?;

        Ok(Self {
            proposals_created_total,
            proposals_resolved_total,
            role_checks_total,
            boot_votes_total,
            active_proposals,
            active_role_checks,
            active_boot_votes,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new(
                "dungeon_finder_sweep_duration_seconds",
                "Group formation sweep time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(sweep_duration.clone()))?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new("dungeon_finder_tick_duration_seconds", "Tick time")
                .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new(
                "dungeon_finder_command_duration_seconds",
                "Command processing time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "dungeon_finder_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            sweep_duration,
            tick_duration,
            command_duration,
            amqp_operation_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    fn create_test_collector() -> MetricsCollector {
        MetricsCollector::new().expect("Failed to create metrics collector")
    }

    fn render(collector: &MetricsCollector) -> String {
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&collector.registry().gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_metrics_collector_creation() {
        let collector = create_test_collector();
        let _service = collector.service();
        let _queue = collector.queue();
        let _lifecycle = collector.lifecycle();
        let _performance = collector.performance();
    }

    #[test]
    fn test_join_and_wait_recording() {
        let collector = create_test_collector();
        collector.record_join(JoinResultCode::Ok);
        collector.record_join(JoinResultCode::Deserter);
        collector.record_wait_time(Role::Tank, Duration::from_secs(42));

        let text = render(&collector);
        assert!(text.contains("dungeon_finder_joins_total{result=\"ok\"} 1"));
        assert!(text.contains("dungeon_finder_wait_time_seconds_count{role=\"tank\"} 1"));
    }

    #[test]
    fn test_update_from_stats() {
        let collector = create_test_collector();
        let stats = MatchmakingStats {
            queued_per_partition: [(0, 4)].into_iter().collect(),
            compatibility_records: 12,
            active_proposals: 1,
            ..Default::default()
        };
        collector.update_from_stats(&stats);

        assert_eq!(collector.lifecycle().active_proposals.get(), 1);
        assert_eq!(collector.queue().compatibility_cache_entries.get(), 12);
        assert_eq!(
            collector
                .queue()
                .queued_candidates
                .with_label_values(&["0"])
                .get(),
            4
        );
    }

    #[test]
    fn test_health_status_updates() {
        let collector = create_test_collector();
        collector.update_health_status(2);
        collector.update_component_health("matchmaking", true);
        collector.update_component_health("amqp", false);
        assert_eq!(collector.service().health_status.get(), 2);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = create_test_collector();
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
