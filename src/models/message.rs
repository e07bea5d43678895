use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Direct exchange all notification traffic is published through.
pub const NOTIFICATIONS_EXCHANGE: &str = "notifications.direct";

/// Terminal queue for messages that exhausted retries or failed permanently.
pub const FAILED_QUEUE: &str = "failed.queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    /// Routing key the dispatcher publishes under.
    pub fn routing_key(&self) -> &'static str {
        match self {
            Channel::Email => "email.send",
            Channel::Push => "push.send",
        }
    }

    /// Work queue the channel workers consume from.
    pub fn queue(&self) -> &'static str {
        match self {
            Channel::Email => "email.queue",
            Channel::Push => "push.queue",
        }
    }

    /// Holding queue for delayed requeues. Messages parked here carry a
    /// per-message TTL and dead-letter back into the work queue when it
    /// elapses.
    pub fn wait_queue(&self) -> &'static str {
        match self {
            Channel::Email => "email.wait",
            Channel::Push => "push.wait",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single logical notification as accepted at the gateway. Immutable once
/// created; requeues carry it along unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub idempotency_key: String,
    pub channel: Channel,
    /// Opaque recipient identifier, resolved by the downstream transport.
    pub recipient_ref: String,
    pub template_id: String,
    pub locale: String,
    pub variables: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Broker envelope around a [`NotificationRequest`]. The correlation id is
/// distinct from the idempotency key and survives every requeue; only
/// `retry_count` is ever mutated, by the owning worker, between attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub correlation_id: String,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub routing_key: String,
    pub request: NotificationRequest,
}

impl QueuedMessage {
    pub fn new(request: NotificationRequest, correlation_id: String) -> Self {
        Self {
            correlation_id,
            retry_count: 0,
            enqueued_at: Utc::now(),
            routing_key: request.channel.routing_key().to_string(),
            request,
        }
    }

    pub fn with_fresh_correlation_id(request: NotificationRequest) -> Self {
        Self::new(request, Uuid::new_v4().to_string())
    }

    pub fn channel(&self) -> Channel {
        self.request.channel
    }
}

/// Headers that travel with the message on every hop so the broker-visible
/// metadata matches the serialized body.
#[derive(Debug, Clone)]
pub struct MessageHeaders {
    pub correlation_id: String,
    pub idempotency_key: String,
    pub retry_count: u32,
}

impl From<&QueuedMessage> for MessageHeaders {
    fn from(message: &QueuedMessage) -> Self {
        Self {
            correlation_id: message.correlation_id.clone(),
            idempotency_key: message.request.idempotency_key.clone(),
            retry_count: message.retry_count,
        }
    }
}

/// Terminal record published to the failed queue. Write-once; consumed only
/// by operator tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub original_message: QueuedMessage,
    pub final_error: ErrorKind,
    pub failure_reason: String,
    pub exhausted_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(message: QueuedMessage, final_error: ErrorKind, failure_reason: String) -> Self {
        Self {
            original_message: message,
            final_error,
            failure_reason,
            exhausted_at: Utc::now(),
        }
    }
}
