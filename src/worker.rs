use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::clients::circuit_breaker::{BreakerRegistry, CircuitBreaker, GuardError};
use crate::clients::{
    Broker, ChannelTransport, Delivery, DeliveryLog, IdempotencyStore, RateLimiter, SendOutcome,
    TemplateResolver,
};
use crate::error::ErrorKind;
use crate::models::audit::DeliveryRecord;
use crate::models::circuit_breaker::CircuitBreakerConfig;
use crate::models::message::{Channel, DeadLetterEntry, QueuedMessage};
use crate::models::retry::{RetryDecision, RetryPolicy};
use crate::models::status::AttemptStatus;

/// Terminal result of processing one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Delivered {
        attempts: u32,
    },
    AwaitingRetry {
        retry_count: u32,
        delay: Duration,
    },
    DeadLettered {
        error: ErrorKind,
    },
}

/// Everything a worker needs besides its identity. Shared across the workers
/// of one process; all handles are cheap clones.
#[derive(Clone)]
pub struct WorkerContext {
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn IdempotencyStore>,
    pub resolver: Arc<dyn TemplateResolver>,
    pub transport: Arc<dyn ChannelTransport>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub delivery_log: Arc<dyn DeliveryLog>,
    pub retry_policy: RetryPolicy,
    pub breaker_config: CircuitBreakerConfig,
}

/// Consumes one channel's work queue and drives each message to a terminal
/// outcome: delivered, scheduled for a later retry, or dead-lettered.
pub struct ChannelWorker {
    instance: String,
    channel: Channel,
    broker: Arc<dyn Broker>,
    store: Arc<dyn IdempotencyStore>,
    resolver: Arc<dyn TemplateResolver>,
    transport: Arc<dyn ChannelTransport>,
    rate_limiter: Arc<dyn RateLimiter>,
    delivery_log: Arc<dyn DeliveryLog>,
    retry_policy: RetryPolicy,
    resolver_breaker: CircuitBreaker,
    transport_breaker: CircuitBreaker,
}

impl ChannelWorker {
    pub async fn new(
        instance: &str,
        channel: Channel,
        context: WorkerContext,
        registry: &BreakerRegistry,
    ) -> Self {
        let resolver_breaker = registry
            .breaker(instance, "template-resolver", context.breaker_config)
            .await;
        let transport_breaker = registry
            .breaker(
                instance,
                &format!("{channel}-transport"),
                context.breaker_config,
            )
            .await;

        Self {
            instance: instance.to_string(),
            channel,
            broker: context.broker,
            store: context.store,
            resolver: context.resolver,
            transport: context.transport,
            rate_limiter: context.rate_limiter,
            delivery_log: context.delivery_log,
            retry_policy: context.retry_policy,
            resolver_breaker,
            transport_breaker,
        }
    }

    /// Consumer loop. Runs until the broker stream ends.
    pub async fn run(&self) -> Result<()> {
        let mut deliveries = self
            .broker
            .consume(self.channel.queue(), &self.instance)
            .await?;

        info!(
            instance = %self.instance,
            channel = %self.channel,
            queue = self.channel.queue(),
            "Worker started"
        );

        while let Some(delivery) = deliveries.next().await {
            if let Err(e) = self.handle_delivery(delivery).await {
                error!(
                    instance = %self.instance,
                    error = %e,
                    "Delivery handling failed, message left unacked for redelivery"
                );
            }
        }

        warn!(instance = %self.instance, "Consumer stream ended");

        Ok(())
    }

    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<Option<ProcessOutcome>> {
        let message: QueuedMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    instance = %self.instance,
                    error = %e,
                    "Unparseable message, rejecting without requeue"
                );
                self.broker.nack(delivery.delivery_tag, false).await?;
                return Ok(None);
            }
        };

        let outcome = self.process(message, delivery.delivery_tag).await?;
        Ok(Some(outcome))
    }

    /// One pass of the attempt state machine for a single message.
    pub async fn process(&self, message: QueuedMessage, delivery_tag: u64) -> Result<ProcessOutcome> {
        debug!(
            instance = %self.instance,
            correlation_id = %message.correlation_id,
            retry_count = message.retry_count,
            "Processing message"
        );

        // A counter past the hard ceiling cannot come from normal retries;
        // the message metadata is corrupt and must not re-enter the machinery.
        if self.retry_policy.is_corrupt(message.retry_count) {
            let attempts = message.retry_count;
            let reason = format!(
                "Retry count {} exceeds hard ceiling {}",
                message.retry_count, self.retry_policy.hard_ceiling
            );
            return self
                .dead_letter(message, delivery_tag, ErrorKind::CorruptRetryState, reason, attempts)
                .await;
        }

        match self
            .rate_limiter
            .check_and_count(&message.request.recipient_ref, self.channel)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    correlation_id = %message.correlation_id,
                    "Recipient over rate limit, deferring"
                );
                return self
                    .transient_failure(
                        message,
                        delivery_tag,
                        ErrorKind::RateLimited,
                        "Recipient over hourly rate limit".to_string(),
                    )
                    .await;
            }
            Err(e) => {
                // A broken limiter store must not stall deliveries.
                warn!(error = %e, "Rate limiter unavailable, allowing send");
            }
        }

        let rendered = match self
            .resolver_breaker
            .call(|| async {
                self.resolver
                    .render(
                        &message.request.template_id,
                        &message.request.locale,
                        &message.request.variables,
                    )
                    .await
            })
            .await
        {
            Ok(rendered) => rendered,
            Err(GuardError::Open { dependency }) => {
                return self
                    .transient_failure(
                        message,
                        delivery_tag,
                        ErrorKind::CircuitOpen,
                        format!("Circuit open for {dependency}"),
                    )
                    .await;
            }
            Err(GuardError::Inner(e)) => {
                return self
                    .transient_failure(
                        message,
                        delivery_tag,
                        ErrorKind::TransientFailure,
                        format!("Template resolution failed: {e}"),
                    )
                    .await;
            }
        };

        let sent = self
            .transport_breaker
            .call(|| async {
                self.transport
                    .send(
                        &message.request.recipient_ref,
                        &rendered,
                        &message.correlation_id,
                    )
                    .await
            })
            .await;

        match sent {
            Ok(SendOutcome::Delivered) => self.delivered(message, delivery_tag).await,
            Ok(SendOutcome::Rejected { reason }) => {
                let attempts = message.retry_count + 1;
                self.dead_letter(
                    message,
                    delivery_tag,
                    ErrorKind::PermanentFailure,
                    reason,
                    attempts,
                )
                .await
            }
            Err(GuardError::Open { dependency }) => {
                self.transient_failure(
                    message,
                    delivery_tag,
                    ErrorKind::CircuitOpen,
                    format!("Circuit open for {dependency}"),
                )
                .await
            }
            Err(GuardError::Inner(e)) => {
                self.transient_failure(
                    message,
                    delivery_tag,
                    ErrorKind::TransientFailure,
                    format!("Transport send failed: {e}"),
                )
                .await
            }
        }
    }

    async fn delivered(&self, message: QueuedMessage, delivery_tag: u64) -> Result<ProcessOutcome> {
        let attempts = message.retry_count + 1;

        // The send already happened; a store hiccup here must not push a
        // delivered notification back through the pipeline.
        if let Err(e) = self
            .store
            .mark_completed(&message.request.idempotency_key)
            .await
        {
            error!(
                correlation_id = %message.correlation_id,
                error = %e,
                "Failed to mark idempotency record completed"
            );
        }

        self.audit(self.attempt_record(&message, AttemptStatus::Delivered, attempts))
            .await;

        self.broker.ack(delivery_tag).await?;

        info!(
            instance = %self.instance,
            correlation_id = %message.correlation_id,
            attempts,
            "Notification delivered"
        );

        Ok(ProcessOutcome::Delivered { attempts })
    }

    async fn transient_failure(
        &self,
        mut message: QueuedMessage,
        delivery_tag: u64,
        kind: ErrorKind,
        detail: String,
    ) -> Result<ProcessOutcome> {
        message.retry_count += 1;

        match self.retry_policy.decide(message.retry_count) {
            RetryDecision::Requeue { delay } => {
                // Requeue before ack: a crash in between redelivers the
                // message instead of losing it.
                self.broker.schedule_requeue(&message, delay).await?;

                let record = self
                    .attempt_record(&message, AttemptStatus::AwaitingRetry, message.retry_count)
                    .with_error(detail.clone())
                    .with_metadata(serde_json::json!({
                        "retry_delay_ms": delay.as_millis() as u64,
                    }));
                self.audit(record).await;

                self.broker.ack(delivery_tag).await?;

                warn!(
                    instance = %self.instance,
                    correlation_id = %message.correlation_id,
                    retry_count = message.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error_kind = kind.as_str(),
                    detail = %detail,
                    "Attempt failed, requeued with backoff"
                );

                Ok(ProcessOutcome::AwaitingRetry {
                    retry_count: message.retry_count,
                    delay,
                })
            }
            RetryDecision::DeadLetter => {
                let attempts = message.retry_count;
                self.dead_letter(message, delivery_tag, kind, detail, attempts)
                    .await
            }
        }
    }

    /// Terminal path: publish the entry, close the idempotency record, ack.
    /// The dedup window still expires normally via TTL.
    async fn dead_letter(
        &self,
        message: QueuedMessage,
        delivery_tag: u64,
        kind: ErrorKind,
        reason: String,
        attempts: u32,
    ) -> Result<ProcessOutcome> {
        let entry = DeadLetterEntry::new(message.clone(), kind, reason.clone());
        self.broker.publish_dead_letter(&entry).await?;

        if let Err(e) = self
            .store
            .mark_completed(&message.request.idempotency_key)
            .await
        {
            error!(
                correlation_id = %message.correlation_id,
                error = %e,
                "Failed to mark idempotency record completed"
            );
        }

        self.audit(
            self.attempt_record(&message, AttemptStatus::DeadLettered, attempts)
                .with_error(reason),
        )
        .await;

        self.broker.ack(delivery_tag).await?;

        error!(
            instance = %self.instance,
            correlation_id = %message.correlation_id,
            error_kind = kind.as_str(),
            attempts,
            "Notification dead-lettered"
        );

        Ok(ProcessOutcome::DeadLettered { error: kind })
    }

    fn attempt_record(
        &self,
        message: &QueuedMessage,
        status: AttemptStatus,
        attempts: u32,
    ) -> DeliveryRecord {
        DeliveryRecord::new(
            message.correlation_id.clone(),
            message.request.idempotency_key.clone(),
            message.channel(),
            message.request.recipient_ref.clone(),
            message.request.template_id.clone(),
            status,
            attempts,
        )
    }

    async fn audit(&self, record: DeliveryRecord) {
        let correlation_id = record.correlation_id.clone();

        if let Err(e) = self.delivery_log.record(record).await {
            warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Failed to write delivery log record"
            );
        }
    }
}
