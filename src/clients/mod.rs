use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::models::audit::DeliveryRecord;
use crate::models::message::{Channel, DeadLetterEntry, MessageHeaders, QueuedMessage};
use crate::models::status::IdempotencyRecord;
use crate::models::template::RenderedContent;

pub mod amqp;
pub mod circuit_breaker;
pub mod database;
pub mod email;
pub mod health;
pub mod memory;
pub mod push;
pub mod redis;
pub mod template;

/// One raw message handed to a worker. The tag is only meaningful back on
/// the broker connection that produced it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
}

pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Message broker seam used by the dispatcher and the channel workers.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &QueuedMessage,
        headers: MessageHeaders,
    ) -> Result<()>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Makes the message reappear on its work queue after `delay`. Must not
    /// block the caller for the duration of the delay.
    async fn schedule_requeue(&self, message: &QueuedMessage, delay: Duration) -> Result<()>;

    async fn publish_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()>;
}

/// Shared TTL-capable key-value store backing the deduplication gate. The
/// claim must be a single conditional write; callers layer no locking on top.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomic set-if-absent. Returns `true` when this caller won the claim.
    async fn claim(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Flips an existing record to completed without extending its TTL.
    async fn mark_completed(&self, key: &str) -> Result<()>;

    /// Rolls back a claim after a failed publish.
    async fn release(&self, key: &str) -> Result<()>;
}

/// External template service plus variable substitution.
#[async_trait]
pub trait TemplateResolver: Send + Sync {
    async fn render(
        &self,
        template_id: &str,
        locale: &str,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedContent>;
}

/// Outcome of a transport send that reached the downstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The service answered and refused; retrying cannot succeed.
    Rejected { reason: String },
}

/// Channel-specific delivery backend. `Err` means the attempt may be retried
/// (timeouts, 5xx, connection refused); a definitive refusal comes back as
/// `Ok(Rejected)`.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(
        &self,
        recipient_ref: &str,
        content: &RenderedContent,
        correlation_id: &str,
    ) -> Result<SendOutcome>;
}

/// Per-recipient send budget, counted per channel and hour bucket.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counts the attempt and returns `false` when the budget is exhausted.
    async fn check_and_count(&self, recipient_ref: &str, channel: Channel) -> Result<bool>;
}

/// Audit sink for attempt outcomes. Failures here are logged and swallowed;
/// auditing never changes message flow.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn record(&self, record: DeliveryRecord) -> Result<()>;
}
