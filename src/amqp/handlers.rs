//! AMQP consumer for inbound commands
//!
//! Deliveries are decoded into `InboundCommand`s and forwarded to the
//! matchmaking task. Each delivery is acked, requeued or dead-lettered
//! depending on how handling went.

use crate::amqp::messages::{InboundCommand, MessageUtils};
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::service::ServiceHandle;
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        Channel,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Handles decoded commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_command(&self, command: InboundCommand) -> Result<()>;

    /// Called for every delivery that could not be handled
    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]);
}

/// Forwards commands to the matchmaking task
pub struct ServiceCommandHandler {
    service: ServiceHandle,
}

impl ServiceCommandHandler {
    pub fn new(service: ServiceHandle) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CommandHandler for ServiceCommandHandler {
    async fn handle_command(&self, command: InboundCommand) -> Result<()> {
        match command {
            InboundCommand::JoinQueue {
                actor,
                roles,
                activities,
            } => {
                let result = self.service.join_queue(actor, roles, activities).await?;
                debug!("Join of actor {} answered {}", actor, result.as_str());
            }
            InboundCommand::LeaveQueue {
                actor,
                disconnected,
            } => self.service.leave_queue(actor, disconnected)?,
            InboundCommand::RoleVote { party, actor, roles } => {
                self.service.submit_role_vote(party, actor, roles)?
            }
            InboundCommand::ProposalAnswer {
                proposal,
                actor,
                accept,
            } => self.service.respond_proposal(proposal, actor, accept)?,
            InboundCommand::InitiateBootVote {
                party,
                kicker,
                victim,
                reason,
            } => {
                let start = self
                    .service
                    .initiate_boot_vote(party, kicker, victim, reason)
                    .await?;
                debug!("Vote-kick in party {}: {:?}", party, start);
            }
            InboundCommand::BootVoteAnswer {
                party,
                actor,
                agree,
            } => self.service.respond_boot_vote(party, actor, agree)?,
            InboundCommand::MemberAdded { party, actor } => {
                self.service.member_added(party, actor)?
            }
            InboundCommand::MemberRemoved {
                party,
                actor,
                removal,
            } => self.service.member_removed(party, actor, removal)?,
            InboundCommand::LeaderChanged { party, leader } => {
                self.service.leader_changed(party, leader)?
            }
            InboundCommand::PartyDisbanded { party } => self.service.disbanded(party)?,
            InboundCommand::FinishActivity { party, activity } => {
                self.service.finish_activity(party, activity)?
            }
            InboundCommand::RestoreParty { party } => {
                if self.service.restore_party(party).await? {
                    info!("Party {} restored from persistence", party);
                }
            }
            InboundCommand::Login { actor, team } => self.service.login(actor, team)?,
            InboundCommand::Logout { actor } => self.service.logout(actor)?,
            InboundCommand::Teleport { actor, out } => {
                let outcome = self.service.request_teleport(actor, out).await?;
                debug!("Teleport of actor {}: {:?}", actor, outcome);
            }
        }
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]) {
        error!(
            "Command handling failed - error: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );
        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            debug!("Message preview: {:?}", preview);
        }
    }
}

/// What to do with a delivery once handling finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    DeadLetter,
}

/// Retry bookkeeping for failing deliveries. A message is requeued until it
/// has failed `max_retries` times, then dead-lettered.
#[derive(Debug)]
pub struct DeadLetterTracker {
    retry_attempts: HashMap<String, u32>,
    max_retries: u32,
    dead_lettered: u64,
}

impl DeadLetterTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            retry_attempts: HashMap::new(),
            max_retries,
            dead_lettered: 0,
        }
    }

    pub fn record_failure(&mut self, message_id: &str, error: &MatchmakingError) -> Disposition {
        // Undecodable messages never get better
        if matches!(error, MatchmakingError::InvalidCommand { .. }) {
            self.retry_attempts.remove(message_id);
            self.dead_lettered += 1;
            return Disposition::DeadLetter;
        }

        let retry_count = self
            .retry_attempts
            .entry(message_id.to_string())
            .or_insert(0);
        *retry_count += 1;

        if *retry_count <= self.max_retries {
            warn!(
                "Message {} failed (attempt {}), requeueing: {}",
                message_id, retry_count, error
            );
            return Disposition::Requeue;
        }

        error!(
            "Message {} exceeded max retries ({}), dead-lettering: {}",
            message_id, self.max_retries, error
        );
        self.retry_attempts.remove(message_id);
        self.dead_lettered += 1;
        Disposition::DeadLetter
    }

    pub fn record_success(&mut self, message_id: &str) -> Disposition {
        self.retry_attempts.remove(message_id);
        Disposition::Ack
    }

    /// Messages that failed at least once and may still succeed
    pub fn pending_retries(&self) -> usize {
        self.retry_attempts.len()
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered
    }
}

/// Stable id of a delivery: its message id, or a hash of its body
fn message_id(properties: &BasicProperties, content: &[u8]) -> String {
    match properties.message_id() {
        Some(id) => id.clone(),
        None => {
            let mut hasher = DefaultHasher::new();
            content.hash(&mut hasher);
            format!("body-{:016x}", hasher.finish())
        }
    }
}

/// Decode and handle one delivery body
pub async fn process_delivery(
    handler: &dyn CommandHandler,
    tracker: &Mutex<DeadLetterTracker>,
    message_id: &str,
    content: &[u8],
) -> Disposition {
    let outcome = match MessageUtils::deserialize_command(content) {
        Ok(command) => {
            debug!("Decoded {} command", command.name());
            handler.handle_command(command).await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_success(message_id),
        Err(e) => {
            let error = match e.downcast::<MatchmakingError>() {
                Ok(error) => error,
                Err(other) => MatchmakingError::InternalError {
                    message: other.to_string(),
                },
            };
            let disposition = tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record_failure(message_id, &error);
            handler.handle_error(error, content).await;
            disposition
        }
    }
}

/// Consumer of the command queue
pub struct CommandConsumer {
    handler: Arc<dyn CommandHandler>,
    channel: Channel,
    consumer_tag: String,
    tracker: Arc<Mutex<DeadLetterTracker>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl CommandConsumer {
    pub fn new(handler: Arc<dyn CommandHandler>, channel: Channel, max_retries: u32) -> Self {
        Self {
            handler,
            channel,
            consumer_tag: format!("lfg-consumer-{}", uuid::Uuid::new_v4()),
            tracker: Arc::new(Mutex::new(DeadLetterTracker::new(max_retries))),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        let consumer = DeliveryConsumer {
            handler: self.handler.clone(),
            tracker: self.tracker.clone(),
            metrics: self.metrics.clone(),
        };

        self.channel
            .basic_consume(consumer, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming commands from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming commands");
        Ok(())
    }

    pub fn dead_lettered(&self) -> u64 {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dead_lettered()
    }
}

struct DeliveryConsumer {
    handler: Arc<dyn CommandHandler>,
    tracker: Arc<Mutex<DeadLetterTracker>>,
    metrics: Option<Arc<MetricsCollector>>,
}

#[async_trait]
impl AsyncConsumer for DeliveryConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let id = message_id(&basic_properties, &content);
        debug!(
            "Command received - delivery_tag: {}, message: {}, size: {} bytes",
            delivery_tag,
            id,
            content.len()
        );

        let started = Instant::now();
        let disposition =
            process_delivery(self.handler.as_ref(), &self.tracker, &id, &content).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_amqp_operation(
                "consume",
                disposition == Disposition::Ack,
                started.elapsed(),
            );
        }

        let result = match disposition {
            Disposition::Ack => channel
                .basic_ack(BasicAckArguments::new(delivery_tag, false))
                .await,
            Disposition::Requeue => channel
                .basic_nack(BasicNackArguments::new(delivery_tag, false, true))
                .await,
            Disposition::DeadLetter => channel
                .basic_nack(BasicNackArguments::new(delivery_tag, false, false))
                .await,
        };
        if let Err(e) = result {
            error!(
                "Failed to settle delivery {} ({:?}): {}",
                delivery_tag, disposition, e
            );
        }
    }
}

/// Handler recording every command, for tests and the tester binary
#[derive(Debug, Default)]
pub struct MockCommandHandler {
    pub received: tokio::sync::Mutex<Vec<InboundCommand>>,
    pub errors: tokio::sync::Mutex<Vec<String>>,
}

impl MockCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandHandler for MockCommandHandler {
    async fn handle_command(&self, command: InboundCommand) -> Result<()> {
        self.received.lock().await.push(command);
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleFlags;

    fn join_bytes() -> Vec<u8> {
        br#"{"command":"join_queue","actor":7,"roles":2,"activities":[4]}"#.to_vec()
    }

    #[tokio::test]
    async fn test_valid_delivery_is_acked() {
        let handler = MockCommandHandler::new();
        let tracker = Mutex::new(DeadLetterTracker::new(3));

        let disposition = process_delivery(&handler, &tracker, "m1", &join_bytes()).await;

        assert_eq!(disposition, Disposition::Ack);
        let received = handler.received.lock().await;
        assert_eq!(
            received[0],
            InboundCommand::JoinQueue {
                actor: 7,
                roles: RoleFlags::TANK,
                activities: [4].into_iter().collect(),
            }
        );
    }

    #[tokio::test]
    async fn test_garbage_is_dead_lettered_at_once() {
        let handler = MockCommandHandler::new();
        let tracker = Mutex::new(DeadLetterTracker::new(3));

        let disposition = process_delivery(&handler, &tracker, "m2", b"{oops").await;

        assert_eq!(disposition, Disposition::DeadLetter);
        assert_eq!(handler.errors.lock().await.len(), 1);
        assert_eq!(tracker.lock().unwrap().dead_lettered(), 1);
    }

    #[test]
    fn test_retries_then_dead_letter() {
        let mut tracker = DeadLetterTracker::new(2);
        let error = MatchmakingError::ServiceUnavailable {
            message: "stopped".to_string(),
        };

        assert_eq!(tracker.record_failure("m", &error), Disposition::Requeue);
        assert_eq!(tracker.record_failure("m", &error), Disposition::Requeue);
        assert_eq!(tracker.pending_retries(), 1);
        assert_eq!(tracker.record_failure("m", &error), Disposition::DeadLetter);
        assert_eq!(tracker.pending_retries(), 0);
    }

    #[test]
    fn test_success_clears_retries() {
        let mut tracker = DeadLetterTracker::new(2);
        let error = MatchmakingError::ServiceUnavailable {
            message: "busy".to_string(),
        };
        tracker.record_failure("m", &error);
        assert_eq!(tracker.record_success("m"), Disposition::Ack);
        assert_eq!(tracker.pending_retries(), 0);
    }

    #[test]
    fn test_message_id_falls_back_to_body_hash() {
        let properties = BasicProperties::default();
        let first = message_id(&properties, b"abc");
        assert_eq!(first, message_id(&properties, b"abc"));
        assert_ne!(first, message_id(&properties, b"abd"));

        let mut properties = BasicProperties::default();
        properties.with_message_id("corr-1");
        assert_eq!(message_id(&properties, b"abc"), "corr-1");
    }
}
