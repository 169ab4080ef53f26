//! AMQP publisher for outbound notifications

use crate::amqp::messages::{MessageEnvelope, EVENTS_EXCHANGE};
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::notify::Notification;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Publishes notifications to participants
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    /// Correlation ids remembered for deduplication
    pub deduplication_capacity: usize,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            deduplication_capacity: 10_000,
            publish_timeout_ms: 5000,
        }
    }
}

/// Correlation ids already published, oldest evicted first
#[derive(Debug, Default)]
struct PublishedIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl PublishedIds {
    fn insert(&mut self, id: String, capacity: usize) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published: Mutex<PublishedIds>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AmqpEventPublisher {
    /// Create the publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published: Mutex::new(PublishedIds::default()),
            metrics: None,
        };

        publisher.setup_exchange().await?;

        Ok(publisher)
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange, e
                ),
            }
        })?;

        info!("Declared events exchange {}", self.config.exchange);
        Ok(())
    }

    fn already_published(&self, correlation_id: &str) -> bool {
        self.config.enable_deduplication
            && self
                .published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .ids
                .contains(correlation_id)
    }

    /// Publish an envelope, retrying with backoff
    pub async fn publish_envelope(&self, envelope: &MessageEnvelope<Notification>) -> Result<()> {
        if self.already_published(&envelope.correlation_id) {
            debug!(
                "Message {} already published, skipping",
                envelope.correlation_id
            );
            return Ok(());
        }

        let started = Instant::now();
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(()) => {
                    if self.config.enable_deduplication {
                        self.published
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(
                                envelope.correlation_id.clone(),
                                self.config.deduplication_capacity,
                            );
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.record_amqp_operation("publish", true, started.elapsed());
                    }

                    debug!(
                        "Published {} ({})",
                        envelope.routing_key, envelope.correlation_id
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.record_amqp_operation("publish", false, started.elapsed());
                        }
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
            }
        }
    }

    async fn try_publish(&self, envelope: &MessageEnvelope<Notification>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp().max(0) as u64)
            .with_content_type("application/json");

        let timeout = Duration::from_millis(self.config.publish_timeout_ms);
        match tokio::time::timeout(
            timeout,
            self.channel.basic_publish(properties, payload, args),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            }
            .into()),
            Err(_) => Err(MatchmakingError::AmqpConnectionFailed {
                message: format!("Publish timed out after {:?}", timeout),
            }
            .into()),
        }
    }

    pub fn clear_deduplication_cache(&self) {
        let mut published = self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        published.ids.clear();
        published.order.clear();
    }

    pub fn cached_message_count(&self) -> usize {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .len()
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish(&self, notification: Notification) -> Result<()> {
        let routing_key = notification.routing_key();
        let envelope = MessageEnvelope::new(notification, routing_key);
        self.publish_envelope(&envelope).await
    }
}

/// Publisher keeping notifications in memory
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published: Mutex<Vec<Notification>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Notification> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Routing keys of everything published so far
    pub fn routing_keys(&self) -> Vec<&'static str> {
        self.published()
            .iter()
            .map(Notification::routing_key)
            .collect()
    }

    pub fn clear(&self) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, notification: Notification) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        Ok(())
    }
}

/// Drain a `ChannelSink` receiver into `publisher`, in order. Failed
/// publishes are logged and dropped. The task ends when every sender is gone.
pub fn spawn_forwarder(
    receiver: mpsc::UnboundedReceiver<Notification>,
    publisher: Arc<dyn EventPublisher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut notifications = UnboundedReceiverStream::new(receiver);
        let mut forwarded: u64 = 0;

        while let Some(notification) = notifications.next().await {
            let actor = notification.actor();
            let routing_key = notification.routing_key();
            match publisher.publish(notification).await {
                Ok(()) => forwarded += 1,
                Err(e) => error!(
                    "Dropping {} notification for actor {}: {}",
                    routing_key, actor, e
                ),
            }
        }

        info!("Notification forwarder stopped after {} messages", forwarded);
    })
}
