use crate::error::Result;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    /// Raw JSON so array-shaped multimodal content passes through untouched.
    pub content: Value,
}

impl ChatMessage {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
        }
    }
}

/// Inbound chat body as the host hands it over.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub include_reasoning: Option<bool>,
    /// Everything else the host sent (temperature, max_tokens, ...).
    #[serde(flatten)]
    pub options: serde_json::Map<String, Value>,
}

/// Body sent to the upstream chat completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_reasoning: Option<bool>,
    #[serde(flatten)]
    pub options: serde_json::Map<String, Value>,
}

/// One selectable upstream model after catalog parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub is_free: bool,
    pub context_length: Option<u64>,
}

/// `{id, name}` pair for the host's model dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipeModel {
    pub id: String,
    pub name: String,
}

/// Relayed text chunks; an `Err` item is terminal.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// What a chat call hands back to the host.
pub enum PipeOutput {
    Complete(String),
    Stream(TextStream),
}
