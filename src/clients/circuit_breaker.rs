use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{Admission, BreakerCore, CircuitBreakerConfig, CircuitState};

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("circuit breaker open for {dependency}")]
    Open { dependency: String },
    #[error(transparent)]
    Inner(#[from] anyhow::Error),
}

/// Breaker guarding one downstream dependency for one worker instance.
/// State lives in this process only; a sibling instance guarding the same
/// dependency trips and recovers on its own.
#[derive(Clone)]
pub struct CircuitBreaker {
    instance: String,
    dependency: String,
    core: Arc<Mutex<BreakerCore>>,
}

impl CircuitBreaker {
    pub fn new(instance: &str, dependency: &str, config: CircuitBreakerConfig) -> Self {
        info!(instance, dependency, "Circuit breaker initialized");

        Self {
            instance: instance.to_string(),
            dependency: dependency.to_string(),
            core: Arc::new(Mutex::new(BreakerCore::new(config))),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.instance, self.dependency)
    }

    pub async fn state(&self) -> CircuitState {
        self.core.lock().await.state()
    }

    /// Runs `operation` if the breaker admits it and feeds the outcome back.
    /// The admission decision holds the lock; the operation itself runs
    /// without it, so slow dependencies never serialize behind each other.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let admission = self.core.lock().await.admit(Instant::now());

        let was_probe = match admission {
            Admission::ShortCircuit => {
                debug!(
                    instance = %self.instance,
                    dependency = %self.dependency,
                    "Circuit breaker open, rejecting call"
                );
                return Err(GuardError::Open {
                    dependency: self.dependency.clone(),
                });
            }
            Admission::Probe => {
                info!(
                    instance = %self.instance,
                    dependency = %self.dependency,
                    "Circuit breaker half-open, sending probe"
                );
                true
            }
            Admission::Allow => false,
        };

        match operation().await {
            Ok(value) => {
                let mut core = self.core.lock().await;
                core.on_success(was_probe);
                if was_probe {
                    info!(
                        instance = %self.instance,
                        dependency = %self.dependency,
                        "Circuit breaker closed after successful probe"
                    );
                }
                Ok(value)
            }
            Err(error) => {
                let mut core = self.core.lock().await;
                let before = core.state();
                core.on_failure(Instant::now(), was_probe);
                let after = core.state();
                if before != after && after == CircuitState::Open {
                    warn!(
                        instance = %self.instance,
                        dependency = %self.dependency,
                        "Circuit breaker opened"
                    );
                }
                Err(GuardError::Inner(error))
            }
        }
    }
}

/// Process-wide directory of breakers, read by the health endpoint.
#[derive(Clone, Default)]
pub struct BreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates, registers, and returns a breaker for the given pair.
    pub async fn breaker(
        &self,
        instance: &str,
        dependency: &str,
        config: CircuitBreakerConfig,
    ) -> CircuitBreaker {
        let breaker = CircuitBreaker::new(instance, dependency, config);
        self.breakers
            .write()
            .await
            .insert(breaker.key(), breaker.clone());
        breaker
    }

    pub async fn states(&self) -> HashMap<String, CircuitState> {
        let breakers = self.breakers.read().await;
        let mut states = HashMap::with_capacity(breakers.len());
        for (key, breaker) in breakers.iter() {
            states.insert(key.clone(), breaker.state().await);
        }
        states
    }
}
