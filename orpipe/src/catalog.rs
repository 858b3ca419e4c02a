use crate::config::{ATTRIBUTION_REFERER, ATTRIBUTION_TITLE, PipeConfig};
use crate::error::{PipeError, Result};
use crate::types::ModelDescriptor;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches and caches the selectable model list from the upstream catalog.
///
/// The cache is replaced wholesale on refresh; readers see either the old or
/// the new snapshot, never a mix, and keep being served the old one while a
/// refresh is in flight.
pub struct ModelCatalog {
    http: reqwest::Client,
    config: Arc<PipeConfig>,
    ttl: Duration,
    cache: RwLock<Option<CatalogSnapshot>>,
    // Serializes refreshes without making readers wait on the network.
    refresh_lock: Mutex<()>,
}

#[derive(Debug, Clone)]
struct CatalogSnapshot {
    entries: Vec<ModelDescriptor>,
    fetched_at: Instant,
}

impl ModelCatalog {
    pub fn new(http: reqwest::Client, config: Arc<PipeConfig>) -> Self {
        Self {
            http,
            ttl: Duration::from_secs(config.cache_ttl_secs),
            config,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current model list, served from cache while fresh.
    ///
    /// A failed refresh falls back to the previous snapshot; the error only
    /// surfaces when no snapshot exists yet.
    pub async fn models(&self) -> Result<Vec<ModelDescriptor>> {
        {
            let cache = self.cache.read().await;
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.fetched_at.elapsed() <= self.ttl {
                    tracing::debug!(count = snapshot.entries.len(), "serving cached model list");
                    return Ok(snapshot.entries.clone());
                }
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<Vec<ModelDescriptor>> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the guard.
        {
            let cache = self.cache.read().await;
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.fetched_at.elapsed() <= self.ttl {
                    return Ok(snapshot.entries.clone());
                }
            }
        }

        match self.fetch().await {
            Ok(entries) => {
                let mut cache = self.cache.write().await;
                *cache = Some(CatalogSnapshot {
                    entries: entries.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(entries)
            }
            Err(error) => {
                let cache = self.cache.read().await;
                match cache.as_ref() {
                    Some(snapshot) => {
                        tracing::warn!(
                            %error,
                            stale_count = snapshot.entries.len(),
                            "model catalog refresh failed; serving stale cache"
                        );
                        Ok(snapshot.entries.clone())
                    }
                    None => Err(error),
                }
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn fetch(&self) -> Result<Vec<ModelDescriptor>> {
        let url = format!("{}/models", self.config.base_url);
        let response = self
            .authorized(self.http.get(url))
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| PipeError::CatalogFetch(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipeError::CatalogFetch(e.to_string()))?;
        if !status.is_success() {
            return Err(PipeError::CatalogFetch(format!(
                "status={status} body={body}"
            )));
        }

        let parsed: CatalogResponse = serde_json::from_str(&body)
            .map_err(|e| PipeError::CatalogFetch(format!("catalog parse error: {e}")))?;
        let entries = build_descriptors(parsed, &self.config);
        tracing::info!(
            count = entries.len(),
            free_only = self.config.free_only,
            "model catalog refreshed"
        );
        Ok(entries)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.api_key)
            .header("HTTP-Referer", ATTRIBUTION_REFERER)
            .header("X-Title", ATTRIBUTION_TITLE)
    }
}

fn build_descriptors(response: CatalogResponse, config: &PipeConfig) -> Vec<ModelDescriptor> {
    let mut entries = Vec::with_capacity(response.data.len());
    for model in response.data {
        let is_free =
            price_is_zero(&model.pricing.prompt) && price_is_zero(&model.pricing.completion);
        if config.free_only && !is_free {
            continue;
        }
        let name = model
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| model.id.clone());
        entries.push(ModelDescriptor {
            display_name: format!("{}{}", config.model_prefix, name),
            id: model.id,
            is_free,
            context_length: model.context_length,
        });
    }
    entries
}

/// Upstream reports prices as decimal strings; newer fields may be numbers.
/// Anything unparseable counts as not-free.
fn price_is_zero(price: &Value) -> bool {
    match price {
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.trim().parse::<f64>().map(|v| v == 0.0).unwrap_or(false),
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    data: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    pricing: CatalogPricing,
    #[serde(default)]
    context_length: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogPricing {
    #[serde(default)]
    prompt: Value,
    #[serde(default)]
    completion: Value,
}
