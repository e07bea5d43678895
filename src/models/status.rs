use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an idempotency claim. `Pending` is written atomically at
/// accept time; `Completed` replaces it once the message reaches a terminal
/// outcome (delivered or dead-lettered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
}

impl Display for IdempotencyStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            IdempotencyStatus::Pending => write!(f, "pending"),
            IdempotencyStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Value stored under an idempotency key for the duration of its TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub status: IdempotencyStatus,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn pending(correlation_id: String) -> Self {
        Self {
            status: IdempotencyStatus::Pending,
            correlation_id,
            created_at: Utc::now(),
        }
    }

    pub fn completed(mut self) -> Self {
        self.status = IdempotencyStatus::Completed;
        self
    }
}

/// Terminal and in-flight states of one attempt as seen by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Attempting,
    Delivered,
    AwaitingRetry,
    DeadLettered,
}

impl Display for AttemptStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            AttemptStatus::Attempting => write!(f, "attempting"),
            AttemptStatus::Delivered => write!(f, "delivered"),
            AttemptStatus::AwaitingRetry => write!(f, "awaiting_retry"),
            AttemptStatus::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}
