use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of every failure the pipeline can produce. The variant
/// decides the control flow: transient errors are retried with backoff,
/// permanent ones go straight to the failed queue, and `CorruptRetryState`
/// bypasses the retry machinery entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[error("request failed validation")]
    ValidationError,
    #[error("idempotency key already claimed")]
    DuplicateRequest,
    #[error("broker or idempotency store unreachable")]
    BrokerUnavailable,
    #[error("transient downstream failure")]
    TransientFailure,
    #[error("permanent downstream rejection")]
    PermanentFailure,
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("retry count exceeds hard ceiling")]
    CorruptRetryState,
    #[error("recipient over rate limit")]
    RateLimited,
}

impl ErrorKind {
    /// Whether a failure of this kind should be handed back to the retry
    /// machinery. Rate-limited sends recover once the window rolls over, so
    /// they retry like any transient fault.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientFailure
                | ErrorKind::BrokerUnavailable
                | ErrorKind::CircuitOpen
                | ErrorKind::RateLimited
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::DuplicateRequest => "DUPLICATE_REQUEST",
            ErrorKind::BrokerUnavailable => "BROKER_UNAVAILABLE",
            ErrorKind::TransientFailure => "TRANSIENT_FAILURE",
            ErrorKind::PermanentFailure => "PERMANENT_FAILURE",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::CorruptRetryState => "CORRUPT_RETRY_STATE",
            ErrorKind::RateLimited => "RATE_LIMITED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_cover_recoverable_failures() {
        assert!(ErrorKind::TransientFailure.is_retryable());
        assert!(ErrorKind::CircuitOpen.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::BrokerUnavailable.is_retryable());

        assert!(!ErrorKind::PermanentFailure.is_retryable());
        assert!(!ErrorKind::ValidationError.is_retryable());
        assert!(!ErrorKind::DuplicateRequest.is_retryable());
        assert!(!ErrorKind::CorruptRetryState.is_retryable());
    }

    #[test]
    fn kinds_serialize_to_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::CorruptRetryState).unwrap();
        assert_eq!(json, "\"CORRUPT_RETRY_STATE\"");

        let parsed: ErrorKind = serde_json::from_str("\"PERMANENT_FAILURE\"").unwrap();
        assert_eq!(parsed, ErrorKind::PermanentFailure);
        assert_eq!(parsed.as_str(), "PERMANENT_FAILURE");
    }
}
