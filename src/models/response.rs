use serde::Serialize;

use crate::error::ErrorKind;

/// Envelope for every gateway response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,

    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message,
        }
    }

    pub fn error(error: ErrorKind, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.as_str()),
            message,
        }
    }
}

/// Body returned to a caller whose request was accepted or deduplicated.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub duplicate: bool,
}
