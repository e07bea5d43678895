use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::{
    clients::{IdempotencyStore, RateLimiter},
    config::Config,
    models::message::Channel,
    models::status::IdempotencyRecord,
    utils::{RetrySettings, retry_with_backoff},
};

pub async fn connect(config: &Config) -> Result<MultiplexedConnection, Error> {
    info!("Connecting to Redis");

    let client = Client::open(config.redis_url.as_str())
        .map_err(|e| anyhow!("Failed to create redis client: {e}"))?;

    let connection = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| anyhow!("Failed to connect to redis: {e}"))?;

    info!("Redis connection established");

    Ok(connection)
}

/// Idempotency store backed by Redis. The claim is a single
/// `SET key value NX EX ttl` round trip, which is what makes two concurrent
/// submissions of the same key resolve to exactly one winner.
pub struct RedisIdempotencyStore {
    connection: MultiplexedConnection,
    retry: RetrySettings,
}

impl RedisIdempotencyStore {
    pub fn new(connection: MultiplexedConnection, retry: RetrySettings) -> Self {
        Self { connection, retry }
    }

    fn key(idempotency_key: &str) -> String {
        format!("idempotency:{idempotency_key}")
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn claim(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let payload = serde_json::to_string(record)?;

        // Some("OK") when the key was set, None when it already exists.
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::key(key))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to claim idempotency key: {e}"))?;

        Ok(result.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let mut conn = self.connection.clone();

        let value: Option<String> = conn
            .get(Self::key(key))
            .await
            .map_err(|e| anyhow!("Failed to read idempotency record: {e}"))?;

        match value {
            None => Ok(None),
            Some(value) => match serde_json::from_str(&value) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(key, error = %e, "Unparseable idempotency record, treating as absent");
                    Ok(None)
                }
            },
        }
    }

    async fn mark_completed(&self, key: &str) -> Result<()> {
        let redis_key = Self::key(key);

        // The send has already happened by this point, so the write is
        // retried in process rather than through the broker requeue path.
        retry_with_backoff(&self.retry, || {
            let redis_key = redis_key.clone();
            let mut conn = self.connection.clone();

            async move {
                let value: Option<String> = conn
                    .get(&redis_key)
                    .await
                    .map_err(|e| format!("Failed to read idempotency record: {e}"))?;

                // The record may have expired mid-flight; the dedup window is
                // simply over in that case and there is nothing to flip.
                let Some(value) = value else {
                    debug!(key = %redis_key, "Idempotency record expired before completion");
                    return Ok(());
                };

                let record = match serde_json::from_str::<IdempotencyRecord>(&value) {
                    Ok(record) => record.completed(),
                    Err(e) => {
                        warn!(
                            key = %redis_key,
                            error = %e,
                            "Unparseable idempotency record, skipping completion"
                        );
                        return Ok(());
                    }
                };

                let payload = serde_json::to_string(&record)
                    .map_err(|e| format!("Failed to serialize idempotency record: {e}"))?;

                // XX + KEEPTTL: update in place and keep the original dedup
                // window. If the TTL ran out since the read above, the write
                // no-ops instead of recreating the key with no expiry.
                let written: Option<String> = redis::cmd("SET")
                    .arg(&redis_key)
                    .arg(payload)
                    .arg("XX")
                    .arg("KEEPTTL")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| format!("Failed to mark idempotency record completed: {e}"))?;

                if written.is_none() {
                    debug!(key = %redis_key, "Idempotency record expired during completion write");
                }

                Ok(())
            }
        })
        .await
        .map_err(|e: String| anyhow!(e))?;

        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();

        conn.del::<_, ()>(Self::key(key))
            .await
            .map_err(|e| anyhow!("Failed to release idempotency key: {e}"))?;

        Ok(())
    }
}

/// Per-recipient hourly budget. Buckets roll over naturally because the key
/// embeds the hour and carries a one-hour TTL.
pub struct RedisRateLimiter {
    connection: MultiplexedConnection,
    limit_per_hour: u32,
}

impl RedisRateLimiter {
    pub fn new(connection: MultiplexedConnection, limit_per_hour: u32) -> Self {
        Self {
            connection,
            limit_per_hour,
        }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check_and_count(&self, recipient_ref: &str, channel: Channel) -> Result<bool> {
        let mut conn = self.connection.clone();
        let bucket = Utc::now().format("%Y%m%d%H");
        let key = format!("rate_limit:{recipient_ref}:{channel}:{bucket}");

        let count: u32 = conn
            .incr(&key, 1)
            .await
            .map_err(|e| anyhow!("Failed to count rate limit: {e}"))?;

        if count == 1 {
            conn.expire::<_, ()>(&key, 3600)
                .await
                .map_err(|e| anyhow!("Failed to expire rate limit bucket: {e}"))?;
        }

        Ok(count <= self.limit_per_hour)
    }
}
