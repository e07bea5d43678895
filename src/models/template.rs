use serde::{Deserialize, Serialize};

/// Template definition as served by the template service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub locale: String,
    pub subject: Option<String>,
    pub body_html: String,
    pub body_text: String,
    /// Placeholder names the template expects to be substituted.
    pub variables: Vec<String>,
}

/// Fully substituted content ready for a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub body_html: String,
    pub body_text: String,
}
