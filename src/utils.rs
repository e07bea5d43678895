use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Settings for short in-process retries around connection establishment
/// and best-effort bookkeeping writes. Delivery retries are not handled
/// here; those go through the broker requeue path so a failing dependency
/// never blocks the consumer loop.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl RetrySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.connect_max_attempts,
            initial_delay_ms: config.connect_initial_delay_ms,
            max_delay_ms: config.connect_max_delay_ms,
            backoff_multiplier: 2,
        }
    }
}

pub async fn retry_with_backoff<F, Fut, T, E>(settings: &RetrySettings, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay_ms = settings.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = settings.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= settings.max_attempts {
                    warn!(
                        max_attempts = settings.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = settings.max_attempts,
                    delay_ms,
                    "Retry attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);
                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = std::cmp::min(
                    delay_ms * settings.backoff_multiplier,
                    settings.max_delay_ms,
                );
            }
        }
    }
}
