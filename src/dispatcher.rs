use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::clients::{Broker, IdempotencyStore};
use crate::error::ErrorKind;
use crate::models::message::{
    MessageHeaders, NOTIFICATIONS_EXCHANGE, NotificationRequest, QueuedMessage,
};
use crate::models::status::IdempotencyRecord;
use crate::models::validation::validate_request;

/// Synchronous answer to a submission. Everything past `Accepted` is
/// fire-and-forget; later failures surface through the audit log and the
/// failed queue, never to the submitting caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResponse {
    Accepted { correlation_id: String },
    Duplicate { correlation_id: Option<String> },
    Rejected { error: ErrorKind, detail: String },
}

/// Accepts notification requests, deduplicates them through the idempotency
/// store, and publishes accepted work to the broker.
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    store: Arc<dyn IdempotencyStore>,
    idempotency_ttl: Duration,
    /// When the store is unreachable: `true` accepts without deduplication,
    /// `false` rejects so the caller can retry.
    fail_open: bool,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn IdempotencyStore>,
        idempotency_ttl: Duration,
        fail_open: bool,
    ) -> Self {
        Self {
            broker,
            store,
            idempotency_ttl,
            fail_open,
        }
    }

    pub async fn submit(&self, request: NotificationRequest) -> SubmitResponse {
        if let Err(e) = validate_request(&request) {
            return SubmitResponse::Rejected {
                error: ErrorKind::ValidationError,
                detail: e.to_string(),
            };
        }

        let message = QueuedMessage::with_fresh_correlation_id(request);
        let key = message.request.idempotency_key.clone();
        let record = IdempotencyRecord::pending(message.correlation_id.clone());

        // The claim is the sole deduplication gate. Under concurrent
        // submission of one key exactly one claim succeeds; the rest see an
        // existing record regardless of its pending/completed status.
        let claimed = match self.store.claim(&key, &record, self.idempotency_ttl).await {
            Ok(claimed) => claimed,
            Err(e) => {
                if self.fail_open {
                    warn!(
                        idempotency_key = %key,
                        error = %e,
                        "Idempotency store unreachable, accepting without dedup"
                    );
                    true
                } else {
                    error!(idempotency_key = %key, error = %e, "Idempotency store unreachable");
                    return SubmitResponse::Rejected {
                        error: ErrorKind::BrokerUnavailable,
                        detail: format!("Idempotency store unreachable: {e}"),
                    };
                }
            }
        };

        if !claimed {
            let existing = self.store.get(&key).await.ok().flatten();
            info!(idempotency_key = %key, "Duplicate submission suppressed");
            return SubmitResponse::Duplicate {
                correlation_id: existing.map(|record| record.correlation_id),
            };
        }

        let headers = MessageHeaders::from(&message);
        match self
            .broker
            .publish(NOTIFICATIONS_EXCHANGE, &message.routing_key, &message, headers)
            .await
        {
            Ok(()) => {
                info!(
                    correlation_id = %message.correlation_id,
                    channel = %message.channel(),
                    idempotency_key = %key,
                    "Notification accepted and published"
                );
                SubmitResponse::Accepted {
                    correlation_id: message.correlation_id,
                }
            }
            Err(e) => {
                // Roll the claim back so a caller retry is not misread as a
                // duplicate of a request that never reached the queue.
                if let Err(release_err) = self.store.release(&key).await {
                    error!(
                        idempotency_key = %key,
                        error = %release_err,
                        "Failed to roll back idempotency claim"
                    );
                }
                warn!(idempotency_key = %key, error = %e, "Publish failed, claim rolled back");
                SubmitResponse::Rejected {
                    error: ErrorKind::BrokerUnavailable,
                    detail: format!("Publish failed: {e}"),
                }
            }
        }
    }
}
