use std::{collections::HashMap, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::{
    clients::TemplateResolver,
    config::Config,
    models::template::{RenderedContent, Template},
};

/// Resolver backed by the HTTP template service. Single-shot: failures come
/// back to the worker, which owns the breaker and the retry policy.
pub struct HttpTemplateResolver {
    http_client: Client,
    base_url: String,
}

impl HttpTemplateResolver {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_base_url(config.template_service_url.clone())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {e}"))?;

        let base_url = base_url.into();
        info!(base_url = %base_url, "Template resolver initialized");

        Ok(Self {
            http_client,
            base_url,
        })
    }

    async fn fetch(&self, template_id: &str, locale: &str) -> Result<Template, Error> {
        let url = format!(
            "{}/api/v1/templates/{}?locale={}",
            self.base_url, template_id, locale
        );

        debug!(template_id, locale, "Fetching template from service");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Template service request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Template service returned status {status}"));
        }

        response
            .json::<Template>()
            .await
            .map_err(|e| anyhow!("Failed to parse template JSON: {e}"))
    }

    fn substitute(template: &str, variables: &HashMap<String, String>) -> Result<String, Error> {
        let mut result = template.to_string();

        for (key, value) in variables {
            let placeholder = format!("{{{{{}}}}}", key);
            result = result.replace(&placeholder, value);
        }

        if let Some(start) = result.find("{{") {
            if let Some(end) = result[start..].find("}}") {
                let missing_var = &result[start..start + end + 2];

                warn!(
                    missing_variable = %missing_var,
                    "Template contains unreplaced variable"
                );

                return Err(anyhow!("Missing variable in template: {missing_var}"));
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl TemplateResolver for HttpTemplateResolver {
    async fn render(
        &self,
        template_id: &str,
        locale: &str,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedContent> {
        let template = self.fetch(template_id, locale).await?;

        let subject = template
            .subject
            .as_deref()
            .map(|subject| Self::substitute(subject, variables))
            .transpose()?;
        let body_html = Self::substitute(&template.body_html, variables)?;
        let body_text = Self::substitute(&template.body_text, variables)?;

        Ok(RenderedContent {
            subject,
            body_html,
            body_text,
        })
    }
}
