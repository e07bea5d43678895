use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::circuit_breaker::CircuitState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub instance: String,
    pub timestamp: DateTime<Utc>,
    pub checks: HashMap<String, DependencyHealth>,
    /// Breaker states keyed by `{instance}:{dependency}`. Local to this
    /// process; a sibling instance may report differently.
    pub breakers: HashMap<String, CircuitState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            error: Some(error),
        }
    }
}

/// Overall status is the worst of the dependency checks; an open breaker
/// downgrades a healthy report to degraded.
pub fn summarize(
    checks: &HashMap<String, DependencyHealth>,
    breakers: &HashMap<String, CircuitState>,
) -> HealthStatus {
    if checks
        .values()
        .any(|check| check.status == HealthStatus::Unhealthy)
    {
        return HealthStatus::Unhealthy;
    }
    if breakers
        .values()
        .any(|state| *state != CircuitState::Closed)
    {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}
