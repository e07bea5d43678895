//! In-process implementations of the broker and store seams. Used by the
//! test suite and for local runs without RabbitMQ or Redis. Delivery and
//! claim semantics match the real backends: unacked tracking, TTL expiry,
//! delayed requeue. Each queue feeds at most one consumer at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::clients::{
    Broker, Delivery, DeliveryLog, DeliveryStream, IdempotencyStore, RateLimiter,
};
use crate::models::audit::DeliveryRecord;
use crate::models::message::{Channel, DeadLetterEntry, FAILED_QUEUE, MessageHeaders, QueuedMessage};
use crate::models::status::{IdempotencyRecord, IdempotencyStatus};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Vec<u8>>,
    consumer: Option<mpsc::UnboundedSender<Delivery>>,
}

#[derive(Default)]
struct BrokerInner {
    /// Direct-exchange bindings: routing key to queue name.
    bindings: HashMap<String, String>,
    queues: HashMap<String, QueueState>,
    /// Delivered but unacknowledged, keyed by delivery tag.
    unacked: HashMap<u64, (String, Vec<u8>)>,
    /// Every delay passed to `schedule_requeue`, in call order.
    scheduled: Vec<Duration>,
}

enum Placed {
    Sent(u64, Vec<u8>),
    Queued,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
    next_tag: Arc<AtomicU64>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker pre-wired with the production topology: one bound work queue
    /// per channel plus the terminal failed queue.
    pub fn with_standard_topology() -> Self {
        let mut inner = BrokerInner::default();
        for channel in Channel::ALL {
            inner
                .bindings
                .insert(channel.routing_key().to_string(), channel.queue().to_string());
            inner
                .queues
                .insert(channel.queue().to_string(), QueueState::default());
        }
        inner
            .queues
            .insert(FAILED_QUEUE.to_string(), QueueState::default());

        Self {
            inner: Arc::new(Mutex::new(inner)),
            next_tag: Arc::new(AtomicU64::new(0)),
        }
    }

    fn deliver_locked(inner: &mut BrokerInner, next_tag: &AtomicU64, queue: &str, payload: Vec<u8>) {
        let placed = {
            let state = inner.queues.entry(queue.to_string()).or_default();
            if let Some(sender) = &state.consumer {
                let tag = next_tag.fetch_add(1, Ordering::SeqCst) + 1;
                if sender
                    .send(Delivery {
                        delivery_tag: tag,
                        payload: payload.clone(),
                    })
                    .is_ok()
                {
                    Placed::Sent(tag, payload)
                } else {
                    state.consumer = None;
                    state.pending.push_back(payload);
                    Placed::Queued
                }
            } else {
                state.pending.push_back(payload);
                Placed::Queued
            }
        };

        if let Placed::Sent(tag, payload) = placed {
            inner.unacked.insert(tag, (queue.to_string(), payload));
        }
    }

    fn resolve_queue(inner: &BrokerInner, exchange: &str, routing_key: &str) -> Result<String> {
        if exchange.is_empty() {
            return Ok(routing_key.to_string());
        }
        inner
            .bindings
            .get(routing_key)
            .cloned()
            .ok_or_else(|| anyhow!("No binding for routing key {routing_key}"))
    }

    /// Delays recorded by `schedule_requeue`, in call order.
    pub async fn scheduled_delays(&self) -> Vec<Duration> {
        self.inner.lock().await.scheduled.clone()
    }

    /// Parsed entries currently sitting on the failed queue.
    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        let inner = self.inner.lock().await;
        inner
            .queues
            .get(FAILED_QUEUE)
            .map(|state| {
                state
                    .pending
                    .iter()
                    .filter_map(|payload| serde_json::from_slice(payload).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn queue_depth(&self, queue: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .queues
            .get(queue)
            .map(|state| state.pending.len())
            .unwrap_or(0)
    }

    pub async fn unacked_count(&self) -> usize {
        self.inner.lock().await.unacked.len()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &QueuedMessage,
        _headers: MessageHeaders,
    ) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        let mut inner = self.inner.lock().await;
        let queue = Self::resolve_queue(&inner, exchange, routing_key)?;
        Self::deliver_locked(&mut inner, &self.next_tag, &queue, payload);
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;

        let drained: Vec<Vec<u8>> = {
            let state = inner.queues.entry(queue.to_string()).or_default();
            state.consumer = Some(sender.clone());
            state.pending.drain(..).collect()
        };

        for payload in drained {
            let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
            if sender
                .send(Delivery {
                    delivery_tag: tag,
                    payload: payload.clone(),
                })
                .is_ok()
            {
                inner.unacked.insert(tag, (queue.to_string(), payload));
            }
        }

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| anyhow!("Unknown delivery tag {delivery_tag}"))?;
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let (queue, payload) = inner
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| anyhow!("Unknown delivery tag {delivery_tag}"))?;
        if requeue {
            Self::deliver_locked(&mut inner, &self.next_tag, &queue, payload);
        }
        Ok(())
    }

    async fn schedule_requeue(&self, message: &QueuedMessage, delay: Duration) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        let queue = {
            let mut inner = self.inner.lock().await;
            inner.scheduled.push(delay);
            inner
                .bindings
                .get(&message.routing_key)
                .cloned()
                .unwrap_or_else(|| message.channel().queue().to_string())
        };

        let inner = Arc::clone(&self.inner);
        let next_tag = Arc::clone(&self.next_tag);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = inner.lock().await;
            Self::deliver_locked(&mut inner, &next_tag, &queue, payload);
        });

        Ok(())
    }

    async fn publish_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()> {
        let payload = serde_json::to_vec(entry)?;
        let mut inner = self.inner.lock().await;
        Self::deliver_locked(&mut inner, &self.next_tag, FAILED_QUEUE, payload);
        Ok(())
    }
}

struct StoredEntry {
    record: IdempotencyRecord,
    expires_at: tokio::time::Instant,
}

/// Claim semantics identical to the Redis store: a single conditional write
/// under one lock acquisition, records vanish when their TTL elapses.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<Mutex<HashMap<String, StoredEntry>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(entries: &mut HashMap<String, StoredEntry>, key: &str) {
        let now = tokio::time::Instant::now();
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= now)
        {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        Self::purge_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            StoredEntry {
                record: record.clone(),
                expires_at: tokio::time::Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let mut entries = self.entries.lock().await;
        Self::purge_expired(&mut entries, key);
        Ok(entries.get(key).map(|entry| entry.record.clone()))
    }

    async fn mark_completed(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        Self::purge_expired(&mut entries, key);
        if let Some(entry) = entries.get_mut(key) {
            entry.record.status = IdempotencyStatus::Completed;
        }
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Hour-bucketed counter with the same keying scheme as the Redis limiter.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    limit_per_hour: u32,
    counts: Arc<Mutex<HashMap<String, u32>>>,
}

impl InMemoryRateLimiter {
    pub fn new(limit_per_hour: u32) -> Self {
        Self {
            limit_per_hour,
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_count(&self, recipient_ref: &str, channel: Channel) -> Result<bool> {
        let bucket = Utc::now().format("%Y%m%d%H");
        let key = format!("{recipient_ref}:{channel}:{bucket}");
        let mut counts = self.counts.lock().await;
        let count = counts.entry(key).or_insert(0);
        *count += 1;
        Ok(*count <= self.limit_per_hour)
    }
}

/// Audit sink that keeps records in memory for inspection.
#[derive(Clone, Default)]
pub struct InMemoryDeliveryLog {
    records: Arc<Mutex<Vec<DeliveryRecord>>>,
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<DeliveryRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl DeliveryLog for InMemoryDeliveryLog {
    async fn record(&self, record: DeliveryRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
