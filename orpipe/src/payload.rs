use crate::config::PipeConfig;
use crate::error::{PipeError, Result};
use crate::types::{ChatRequest, UpstreamPayload};

/// Options copied through to upstream untouched. Upstream is authoritative on
/// their legality, so no validation here.
const PASSTHROUGH_OPTIONS: [&str; 5] = [
    "temperature",
    "top_p",
    "max_tokens",
    "presence_penalty",
    "frequency_penalty",
];

/// Build the upstream request body from an inbound chat request. Pure, no I/O.
pub fn build_payload(request: &ChatRequest, config: &PipeConfig) -> Result<UpstreamPayload> {
    let model = canonical_model_id(&request.model, &config.model_prefix)?;

    let include_reasoning = if config.include_reasoning && request.include_reasoning != Some(false)
    {
        Some(true)
    } else {
        None
    };

    let mut options = serde_json::Map::new();
    for key in PASSTHROUGH_OPTIONS {
        if let Some(value) = request.options.get(key) {
            options.insert(key.to_string(), value.clone());
        }
    }

    Ok(UpstreamPayload {
        model,
        messages: request.messages.clone(),
        stream: request.stream,
        include_reasoning,
        options,
    })
}

/// Recover the upstream-canonical id from a (possibly prefixed) display id.
pub fn canonical_model_id(model: &str, prefix: &str) -> Result<String> {
    let id = model.strip_prefix(prefix).unwrap_or(model);
    if id.trim().is_empty() {
        return Err(PipeError::InvalidModelId(model.to_string()));
    }
    Ok(id.to_string())
}
