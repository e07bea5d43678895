use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::{
    clients::{ChannelTransport, SendOutcome},
    config::Config,
    models::fcm::{FcmMessage, FcmNotification, FcmRequest},
    models::message::Channel,
    models::template::RenderedContent,
};

const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

/// Push transport backed by FCM's v1 HTTP API.
pub struct FcmTransport {
    http_client: Client,
    project_id: String,
}

impl FcmTransport {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {e}"))?;

        info!(project_id = %config.fcm_project_id, "FCM transport initialized");

        Ok(Self {
            http_client,
            project_id: config.fcm_project_id.clone(),
        })
    }
}

#[async_trait]
impl ChannelTransport for FcmTransport {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(
        &self,
        recipient_ref: &str,
        content: &RenderedContent,
        correlation_id: &str,
    ) -> Result<SendOutcome> {
        debug!(correlation_id, "Sending FCM push notification");

        let mut data = HashMap::new();
        data.insert("correlation_id".to_string(), correlation_id.to_string());

        let request = FcmRequest {
            message: FcmMessage {
                token: recipient_ref.to_string(),
                notification: FcmNotification {
                    title: content.subject.clone().unwrap_or_default(),
                    body: content.body_text.clone(),
                },
                data: Some(data),
            },
        };

        let provider = gcp_auth::provider()
            .await
            .map_err(|e| anyhow!("Failed to obtain GCP auth provider: {e}"))?;
        let token = provider
            .token(FCM_SCOPES)
            .await
            .map_err(|e| anyhow!("Failed to obtain FCM token: {e}"))?;

        let url = format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            self.project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("FCM request failed: {e}"))?;

        let status = response.status();
        if status.is_success() {
            info!(correlation_id, "FCM push notification sent");
            return Ok(SendOutcome::Delivered);
        }

        let body = response.text().await.unwrap_or_default();

        // Unregistered or malformed tokens come back as 4xx and will never
        // deliver; quota pushback and server errors are worth retrying.
        if status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            warn!(correlation_id, status = %status, "FCM rejected send");
            return Ok(SendOutcome::Rejected {
                reason: format!("FCM rejected send ({status}): {body}"),
            });
        }

        Err(anyhow!("FCM returned status {status}: {body}"))
    }
}
