use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{
    circuit_breaker::CircuitBreakerConfig,
    retry::{HARD_RETRY_CEILING, RetryPolicy},
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub redis_url: String,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,
    /// Accept submissions without deduplication when the store is down.
    #[serde(default)]
    pub idempotency_fail_open: bool,

    pub database_url: String,

    pub template_service_url: String,
    pub mail_gateway_url: String,
    pub fcm_project_id: String,

    #[serde(default = "default_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_failure_rate")]
    pub circuit_breaker_failure_rate: f64,
    #[serde(default = "default_breaker_window_size")]
    pub circuit_breaker_window_size: usize,
    #[serde(default = "default_breaker_min_samples")]
    pub circuit_breaker_min_samples: usize,
    #[serde(default = "default_breaker_cooldown_seconds")]
    pub circuit_breaker_cooldown_seconds: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_connect_max_attempts")]
    pub connect_max_attempts: u32,
    #[serde(default = "default_connect_initial_delay_ms")]
    pub connect_initial_delay_ms: u64,
    #[serde(default = "default_connect_max_delay_ms")]
    pub connect_max_delay_ms: u64,

    #[serde(default = "default_rate_limit_per_hour")]
    pub rate_limit_per_hour: u32,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_failure_rate() -> f64 {
    0.5
}

fn default_breaker_window_size() -> usize {
    20
}

fn default_breaker_min_samples() -> usize {
    10
}

fn default_breaker_cooldown_seconds() -> u64 {
    30
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_connect_max_attempts() -> u32 {
    5
}

fn default_connect_initial_delay_ms() -> u64 {
    500
}

fn default_connect_max_delay_ms() -> u64 {
    5_000
}

fn default_rate_limit_per_hour() -> u32 {
    100
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_server_port() -> u16 {
    8080
}

fn default_instance_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("relay-{}", &suffix[..8])
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environment variable: {e}"))?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retry_attempts,
            base_delay: Duration::from_millis(self.base_retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            hard_ceiling: HARD_RETRY_CEILING,
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            failure_rate: self.circuit_breaker_failure_rate,
            window_size: self.circuit_breaker_window_size,
            min_samples: self.circuit_breaker_min_samples,
            cooldown: Duration::from_secs(self.circuit_breaker_cooldown_seconds),
        }
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }
}
