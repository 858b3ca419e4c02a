use crate::error::{PipeError, Result};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL_PREFIX: &str = "OpenRouter/";
/// Models are cached for five minutes by default.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Attribution headers OpenRouter uses to identify calling apps.
pub(crate) const ATTRIBUTION_REFERER: &str = "https://openwebui.com/";
pub(crate) const ATTRIBUTION_TITLE: &str = "Open WebUI via OpenRouter Pipe";

/// Pipe settings as supplied by the host.
///
/// Immutable once a [`crate::Pipe`] is built from it; construct a new pipe to
/// apply new values. Field aliases accept the upstream valve names, so a host
/// that still speaks `OPENROUTER_API_KEY` / `FREE_ONLY` deserializes cleanly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Base URL for the OpenRouter API.
    #[serde(alias = "OPENROUTER_API_BASE_URL")]
    pub base_url: String,
    /// API key sent as the bearer token on every upstream call.
    #[serde(alias = "OPENROUTER_API_KEY")]
    pub api_key: String,
    /// Only expose models whose pricing fields are all zero.
    #[serde(alias = "FREE_ONLY")]
    pub free_only: bool,
    /// Prefix prepended to display names in the dropdown; empty disables.
    #[serde(alias = "MODEL_PREFIX")]
    pub model_prefix: String,
    /// Ask upstream for reasoning tokens where models support them.
    #[serde(alias = "INCLUDE_REASONING")]
    pub include_reasoning: bool,
    /// Seconds a fetched model list stays fresh before the next call refetches.
    pub cache_ttl_secs: u64,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            free_only: false,
            model_prefix: DEFAULT_MODEL_PREFIX.to_string(),
            include_reasoning: true,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl PipeConfig {
    /// Defaults with `OPENROUTER_API_KEY` / `FREE_ONLY` read from the
    /// environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OPENROUTER_API_KEY") {
            if !v.trim().is_empty() {
                self.api_key = v;
            }
        }
        if let Ok(v) = std::env::var("FREE_ONLY") {
            if !v.trim().is_empty() {
                self.free_only = parse_bool_flag(&v);
            }
        }
    }

    /// The key must be present before any upstream call is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(PipeError::Configuration(
                "OPENROUTER_API_KEY is not set".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool_flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}
