//! Main application state and service coordination
//!
//! `AppState` wires the matchmaking task to AMQP, the notification
//! publisher, the health server and the background maintenance tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{CommandConsumer, ServiceCommandHandler};
use crate::amqp::publisher::{spawn_forwarder, AmqpEventPublisher, PublisherConfig};
use crate::catalog::{ActivityCatalog, StaticActivityCatalog};
use crate::config::AppConfig;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::notify::ChannelSink;
use crate::providers::{Collaborators, JsonFilePersistenceStore};
use crate::service::actor::{spawn_service, ServiceHandle};
use crate::service::health::{HealthCheck, HealthProbe};
use crate::service::matchmaking::MatchmakingService;
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Build the collaborators named by the configuration: the catalog file if
/// one is set, the JSON persistence file if one is set, in-memory otherwise.
pub fn build_collaborators(config: &AppConfig) -> Result<Collaborators, ServiceError> {
    let catalog: Arc<dyn ActivityCatalog> = match &config.service.catalog_path {
        Some(path) => Arc::new(StaticActivityCatalog::from_file(path).map_err(|e| {
            ServiceError::Configuration {
                message: format!("Failed to load activity catalog: {}", e),
            }
        })?),
        None => {
            info!("No catalog file configured, using the built-in activities");
            Arc::new(StaticActivityCatalog::with_defaults())
        }
    };

    let mut collaborators = Collaborators::in_memory(catalog);
    if let Some(path) = &config.service.persistence_path {
        let store =
            JsonFilePersistenceStore::open(path).map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open persistence file {}: {}", path.display(), e),
            })?;
        info!("Persisting parties to {}", path.display());
        collaborators.persistence = Arc::new(store);
    }
    Ok(collaborators)
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    /// Handle on the matchmaking task
    service: ServiceHandle,
    service_task: Option<JoinHandle<()>>,

    /// Publishes notifications until the matchmaking task is gone
    forwarder: Option<JoinHandle<()>>,

    amqp_connection: Arc<AmqpConnection>,
    metrics_service: Arc<MetricsService>,
    background_tasks: Vec<JoinHandle<()>>,
    command_consumer: Option<CommandConsumer>,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {}", config.service.name);
        info!(
            "Configuration: amqp_url={}, command_queue={}, exchange={}",
            config.amqp.url, config.amqp.command_queue, config.amqp.exchange_name
        );

        let collaborators = build_collaborators(&config)?;
        let amqp_connection = Self::initialize_amqp(&config).await?;
        let metrics_collector = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let (sink, forwarder) =
            Self::initialize_publisher(&config, &amqp_connection, metrics_collector.clone())
                .await?;

        let service = MatchmakingService::new(
            config.matchmaking.clone(),
            collaborators,
            Arc::new(sink),
        )
        .with_metrics(metrics_collector.clone());
        let (handle, service_task) = spawn_service(service, config.matchmaking.tick_interval());

        let is_running = Arc::new(RwLock::new(false));
        let probe = HealthProbe::new(config.service.name.clone(), handle.clone())
            .with_running_flag(is_running.clone());
        let metrics_service = Self::initialize_metrics(&config, metrics_collector, probe);

        Ok(Self {
            config,
            service: handle,
            service_task: Some(service_task),
            forwarder: Some(forwarder),
            amqp_connection,
            metrics_service,
            background_tasks: Vec::new(),
            command_consumer: None,
            is_running,
        })
    }

    /// Start the health server, command consumption and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {}", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("{} started", self.config.service.name);
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        if let Some(consumer) = &self.command_consumer {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("AMQP command consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        match self.service.stats().await {
            Ok(stats) => info!("Final matchmaking statistics: {:?}", stats),
            Err(e) => warn!("Failed to get final stats: {}", e),
        }

        // Stopping the matchmaking task drops its sink, which lets the
        // forwarder drain what is left and finish
        if let Some(task) = self.service_task.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(forwarder) = self.forwarder.take() {
            if tokio::time::timeout(self.config.shutdown_timeout(), forwarder)
                .await
                .is_err()
            {
                warn!(
                    "Notification forwarder did not finish within {:?}",
                    self.config.shutdown_timeout()
                );
            }
        }

        info!("{} shutdown completed", self.config.service.name);
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn service(&self) -> ServiceHandle {
        self.service.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        probe: HealthProbe,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server =
            Arc::new(HealthServer::new(health_config, metrics_collector.clone()).with_probe(probe));

        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("Health and metrics endpoints on port {}", port);
        Ok(())
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    /// Declare the events exchange and start forwarding notifications to it
    async fn initialize_publisher(
        config: &AppConfig,
        connection: &AmqpConnection,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<(ChannelSink, JoinHandle<()>), ServiceError> {
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to set up event publisher: {}", e),
            })?
            .with_metrics(metrics_collector);

        let (sink, receiver) = ChannelSink::channel();
        let forwarder = spawn_forwarder(receiver, Arc::new(publisher));
        Ok((sink, forwarder))
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let queue = self.config.amqp.command_queue.clone();

        let channel = self.amqp_connection.open_channel().await.map_err(|e| {
            ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            }
        })?;

        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(&queue)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue, e),
            })?;
        debug!("Queue '{}' declared", queue);

        let handler = Arc::new(ServiceCommandHandler::new(self.service.clone()));
        let consumer = CommandConsumer::new(handler, channel, self.config.amqp.max_retry_attempts)
            .with_metrics(self.metrics_service.collector());

        consumer
            .start_consuming(&queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming commands: {}", e),
            })?;
        self.command_consumer = Some(consumer);

        info!("Listening for commands on queue '{}'", queue);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let stats_task = {
            let service = self.service.clone();
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                debug!("Stats update task started");

                while *is_running.read().await {
                    interval.tick().await;

                    match service.stats().await {
                        Ok(stats) => {
                            debug!(
                                "Updating metrics - queued: {}, proposals: {}, parties: {}",
                                stats.total_queued(),
                                stats.active_proposals,
                                stats.parties
                            );
                            metrics_collector.update_from_stats(&stats);
                        }
                        Err(e) => warn!("Failed to get matchmaking stats: {}", e),
                    }
                }

                debug!("Stats update task stopped");
            })
        };

        let health_metrics_task = {
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();
            let amqp_connection = self.amqp_connection.clone();
            let probe = HealthProbe::new(self.config.service.name.clone(), self.service.clone())
                .with_running_flag(self.is_running.clone());

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let start_time = tokio::time::Instant::now();
                debug!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime_seconds = start_time.elapsed().as_secs() as i64;
                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(uptime_seconds);

                    let amqp_alive = amqp_connection.is_alive();
                    metrics_collector.update_component_health("amqp", amqp_alive);
                    match HealthCheck::check(&probe).await {
                        Ok(health) => {
                            metrics_collector.update_health_status(health.status.gauge_value());
                            for check in &health.checks {
                                metrics_collector.update_component_health(
                                    &check.name,
                                    check.status.gauge_value() > 0,
                                );
                            }
                        }
                        Err(e) => warn!("Health check failed: {}", e),
                    }
                    if !amqp_alive {
                        warn!("AMQP connection is closed");
                    }
                }

                debug!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(stats_task);
        self.background_tasks.push(health_metrics_task);
        info!("Background maintenance tasks started");
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        for task in self.background_tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        info!("{} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_collaborators() {
        let config = AppConfig::default();
        let collaborators = build_collaborators(&config).unwrap();
        assert!(collaborators.catalog.get(258).is_some());
    }

    #[test]
    fn test_missing_catalog_file_is_a_configuration_error() {
        let mut config = AppConfig::default();
        config.service.catalog_path = Some(PathBuf::from("/nonexistent/activities.toml"));

        let error = build_collaborators(&config).err().unwrap();
        assert!(matches!(error, ServiceError::Configuration { .. }));
    }

    #[test]
    fn test_service_error_display() {
        let error = ServiceError::AmqpConnection {
            message: "refused".to_string(),
        };
        assert_eq!(error.to_string(), "AMQP connection error: refused");
    }
}
