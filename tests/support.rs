use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use notification_relay::clients::circuit_breaker::BreakerRegistry;
use notification_relay::clients::memory::{
    InMemoryBroker, InMemoryDeliveryLog, InMemoryIdempotencyStore, InMemoryRateLimiter,
};
use notification_relay::clients::{
    Broker, ChannelTransport, DeliveryStream, IdempotencyStore, SendOutcome, TemplateResolver,
};
use notification_relay::models::circuit_breaker::CircuitBreakerConfig;
use notification_relay::models::message::{
    Channel, DeadLetterEntry, MessageHeaders, NotificationRequest, QueuedMessage,
};
use notification_relay::models::retry::RetryPolicy;
use notification_relay::models::status::IdempotencyRecord;
use notification_relay::models::template::RenderedContent;
use notification_relay::worker::WorkerContext;
use tokio::sync::Mutex;

/// Builds a valid email request with the given idempotency key.
pub fn sample_request(idempotency_key: &str) -> NotificationRequest {
    let mut variables = HashMap::new();
    variables.insert("name".to_string(), "Ada".to_string());

    NotificationRequest {
        idempotency_key: idempotency_key.to_string(),
        channel: Channel::Email,
        recipient_ref: "ada@example.com".to_string(),
        template_id: "welcome".to_string(),
        locale: "en".to_string(),
        variables,
        created_at: chrono::Utc::now(),
    }
}

/// One step of a scripted transport or resolver run.
#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Succeed,
    FailTransient,
    RejectPermanent,
}

/// Transport fake that plays back a fixed script of outcomes, then
/// succeeds for any further calls. Counts every attempt.
pub struct ScriptedTransport {
    channel: Channel,
    script: Mutex<VecDeque<Scripted>>,
    attempts: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(channel: Channel, script: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
        Arc::new(Self {
            channel,
            script: Mutex::new(script.into_iter().collect()),
            attempts: AtomicU32::new(0),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelTransport for ScriptedTransport {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        _recipient_ref: &str,
        _content: &RenderedContent,
        _correlation_id: &str,
    ) -> Result<SendOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(Scripted::Succeed);
        match step {
            Scripted::Succeed => Ok(SendOutcome::Delivered),
            Scripted::FailTransient => Err(anyhow!("simulated provider timeout")),
            Scripted::RejectPermanent => Ok(SendOutcome::Rejected {
                reason: "recipient address rejected".to_string(),
            }),
        }
    }
}

/// Resolver fake that renders a deterministic template after playing back
/// any scripted failures. `RejectPermanent` steps are treated as failures
/// as well since rendering has no permanent/transient split.
pub struct ScriptedResolver {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicU32,
}

impl ScriptedResolver {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn always_ok() -> Arc<Self> {
        Self::new([])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateResolver for ScriptedResolver {
    async fn render(
        &self,
        template_id: &str,
        _locale: &str,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(Scripted::Succeed);
        if !matches!(step, Scripted::Succeed) {
            return Err(anyhow!("template service unavailable"));
        }
        let name = variables.get("name").cloned().unwrap_or_default();
        Ok(RenderedContent {
            subject: Some(format!("Rendered {template_id}")),
            body_html: format!("<p>Hello {name}</p>"),
            body_text: format!("Hello {name}"),
        })
    }
}

/// Idempotency store fake whose every operation fails.
pub struct FailingStore;

#[async_trait]
impl IdempotencyStore for FailingStore {
    async fn claim(
        &self,
        _idempotency_key: &str,
        _record: &IdempotencyRecord,
        _ttl: Duration,
    ) -> Result<bool> {
        Err(anyhow!("idempotency store offline"))
    }

    async fn get(&self, _idempotency_key: &str) -> Result<Option<IdempotencyRecord>> {
        Err(anyhow!("idempotency store offline"))
    }

    async fn mark_completed(&self, _idempotency_key: &str) -> Result<()> {
        Err(anyhow!("idempotency store offline"))
    }

    async fn release(&self, _idempotency_key: &str) -> Result<()> {
        Err(anyhow!("idempotency store offline"))
    }
}

/// Broker fake whose publish always fails. Used to exercise the
/// claim-rollback path in the dispatcher.
pub struct BrokenBroker;

#[async_trait]
impl Broker for BrokenBroker {
    async fn publish(
        &self,
        _exchange: &str,
        _routing_key: &str,
        _message: &QueuedMessage,
        _headers: MessageHeaders,
    ) -> Result<()> {
        Err(anyhow!("broker connection refused"))
    }

    async fn consume(&self, _queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        Err(anyhow!("broker connection refused"))
    }

    async fn ack(&self, _delivery_tag: u64) -> Result<()> {
        Err(anyhow!("broker connection refused"))
    }

    async fn nack(&self, _delivery_tag: u64, _requeue: bool) -> Result<()> {
        Err(anyhow!("broker connection refused"))
    }

    async fn schedule_requeue(&self, _message: &QueuedMessage, _delay: Duration) -> Result<()> {
        Err(anyhow!("broker connection refused"))
    }

    async fn publish_dead_letter(&self, _entry: &DeadLetterEntry) -> Result<()> {
        Err(anyhow!("broker connection refused"))
    }
}

/// Retry policy with millisecond delays so exhaustion tests finish fast.
pub fn fast_retry_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(25),
        max_delay: Duration::from_secs(1),
        hard_ceiling: 100,
    }
}

/// In-memory stand-ins for every worker dependency, wired the same way
/// `main` wires the real clients.
pub struct MemoryStack {
    pub broker: Arc<InMemoryBroker>,
    pub store: Arc<InMemoryIdempotencyStore>,
    pub delivery_log: Arc<InMemoryDeliveryLog>,
    pub rate_limiter: Arc<InMemoryRateLimiter>,
    pub transport: Arc<ScriptedTransport>,
    pub resolver: Arc<ScriptedResolver>,
    pub registry: BreakerRegistry,
}

impl MemoryStack {
    pub fn new(transport: Arc<ScriptedTransport>, resolver: Arc<ScriptedResolver>) -> Self {
        Self {
            broker: Arc::new(InMemoryBroker::with_standard_topology()),
            store: Arc::new(InMemoryIdempotencyStore::new()),
            delivery_log: Arc::new(InMemoryDeliveryLog::new()),
            rate_limiter: Arc::new(InMemoryRateLimiter::new(1_000)),
            transport,
            resolver,
            registry: BreakerRegistry::new(),
        }
    }

    pub fn context(&self, retry_policy: RetryPolicy) -> WorkerContext {
        WorkerContext {
            broker: self.broker.clone(),
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            transport: self.transport.clone(),
            rate_limiter: self.rate_limiter.clone(),
            delivery_log: self.delivery_log.clone(),
            retry_policy,
            breaker_config: CircuitBreakerConfig::default(),
        }
    }
}

/// Polls `condition` until it holds or a five second deadline passes.
pub async fn wait_for<F, Fut>(description: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "Timed out waiting for {description}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
