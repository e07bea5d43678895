use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::message::Channel;
use crate::models::status::AttemptStatus;

/// Row shape of the `delivery_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogRow {
    pub id: Uuid,
    pub correlation_id: String,
    pub idempotency_key: String,
    pub channel: Channel,
    pub recipient_ref: String,
    pub template_id: String,
    pub status: AttemptStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub metadata: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

/// One audit entry per attempt outcome, written after the broker decision is
/// already made. Audit writes never change message flow.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub correlation_id: String,
    pub idempotency_key: String,
    pub channel: Channel,
    pub recipient_ref: String,
    pub template_id: String,
    pub status: AttemptStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub metadata: JsonValue,
}

impl DeliveryRecord {
    pub fn new(
        correlation_id: String,
        idempotency_key: String,
        channel: Channel,
        recipient_ref: String,
        template_id: String,
        status: AttemptStatus,
        attempts: u32,
    ) -> Self {
        Self {
            correlation_id,
            idempotency_key,
            channel,
            recipient_ref,
            template_id,
            status,
            attempts,
            error_message: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error_message = Some(error);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}
