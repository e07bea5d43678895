use anyhow::{Result, anyhow};

use crate::models::message::{Channel, NotificationRequest};

const MAX_KEY_LENGTH: usize = 255;
const MAX_VARIABLES: usize = 64;

/// Gateway-side request validation. Anything rejected here never touches the
/// idempotency store or the broker.
pub fn validate_request(request: &NotificationRequest) -> Result<()> {
    if request.idempotency_key.trim().is_empty() {
        return Err(anyhow!("Idempotency key cannot be empty"));
    }
    if request.idempotency_key.len() > MAX_KEY_LENGTH {
        return Err(anyhow!(
            "Idempotency key too long (maximum {MAX_KEY_LENGTH} characters)"
        ));
    }
    if request.template_id.trim().is_empty() {
        return Err(anyhow!("Template id cannot be empty"));
    }
    if request.locale.trim().is_empty() {
        return Err(anyhow!("Locale cannot be empty"));
    }
    if request.variables.len() > MAX_VARIABLES {
        return Err(anyhow!(
            "Too many template variables (maximum {MAX_VARIABLES})"
        ));
    }

    match request.channel {
        Channel::Email => validate_email_address(&request.recipient_ref),
        Channel::Push => validate_device_token(&request.recipient_ref),
    }
}

pub fn validate_email_address(address: &str) -> Result<()> {
    if address.is_empty() {
        return Err(anyhow!("Email address cannot be empty"));
    }
    if address.len() > 320 {
        return Err(anyhow!("Email address too long (maximum 320 characters)"));
    }

    let (local, domain) = address
        .split_once('@')
        .ok_or_else(|| anyhow!("Email address missing '@'"))?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(anyhow!("Email address is malformed"));
    }

    Ok(())
}

pub fn validate_device_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(anyhow!("Device token cannot be empty"));
    }

    if token.len() < 20 {
        return Err(anyhow!("Device token too short (minimum 20 characters)"));
    }

    if token.len() > 200 {
        return Err(anyhow!("Device token too long (maximum 200 characters)"));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.');

    if !valid_chars {
        return Err(anyhow!("Device token contains invalid characters"));
    }

    Ok(())
}
