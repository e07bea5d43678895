use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    clients::{ChannelTransport, SendOutcome},
    config::Config,
    models::message::Channel,
    models::template::RenderedContent,
};

#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
    correlation_id: &'a str,
}

/// Email transport backed by the internal mail gateway.
pub struct MailGatewayTransport {
    http_client: Client,
    base_url: String,
}

impl MailGatewayTransport {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_base_url(config.mail_gateway_url.clone())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {e}"))?;

        let base_url = base_url.into();
        info!(base_url = %base_url, "Mail gateway transport initialized");

        Ok(Self {
            http_client,
            base_url,
        })
    }
}

#[async_trait]
impl ChannelTransport for MailGatewayTransport {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        recipient_ref: &str,
        content: &RenderedContent,
        correlation_id: &str,
    ) -> Result<SendOutcome> {
        debug!(recipient_ref, correlation_id, "Sending email via mail gateway");

        let request = MailSendRequest {
            to: recipient_ref,
            subject: content.subject.as_deref().unwrap_or(""),
            html: &content.body_html,
            text: &content.body_text,
            correlation_id,
        };

        // Network-level failures (refused connection, timeout) are retryable.
        let response = self
            .http_client
            .post(format!("{}/api/v1/messages", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Mail gateway request failed: {e}"))?;

        let status = response.status();
        if status.is_success() {
            info!(correlation_id, "Email accepted by mail gateway");
            return Ok(SendOutcome::Delivered);
        }

        let body = response.text().await.unwrap_or_default();

        // 408 and 429 recover on their own; other 4xx responses mean the
        // request itself can never succeed.
        if status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            warn!(correlation_id, status = %status, "Mail gateway rejected send");
            return Ok(SendOutcome::Rejected {
                reason: format!("Mail gateway rejected send ({status}): {body}"),
            });
        }

        Err(anyhow!("Mail gateway returned status {status}: {body}"))
    }
}
