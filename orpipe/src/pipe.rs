use crate::catalog::ModelCatalog;
use crate::config::PipeConfig;
use crate::error::Result;
use crate::payload::build_payload;
use crate::relay::{CompletionRelay, RetryPolicy};
use crate::types::{ChatRequest, ModelDescriptor, PipeModel, PipeOutput};
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Host-facing entry point: lists selectable models and forwards chat
/// requests to the upstream, streaming or not as the request asks.
pub struct Pipe {
    config: Arc<PipeConfig>,
    catalog: ModelCatalog,
    relay: CompletionRelay,
    retry: RetryPolicy,
}

impl Pipe {
    /// Fails fast when the API key is missing; no network happens here.
    pub fn new(config: PipeConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            catalog: ModelCatalog::new(http.clone(), config.clone()),
            relay: CompletionRelay::new(http, config.clone()),
            config,
            retry: RetryPolicy::default(),
        })
    }

    /// Selectable models for the host dropdown. Catalog failures degrade to
    /// an empty list so the host shows "no models" instead of crashing.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn models(&self) -> Vec<PipeModel> {
        match self.catalog.models().await {
            Ok(entries) => entries
                .into_iter()
                .map(|m| PipeModel {
                    id: m.id,
                    name: m.display_name,
                })
                .collect(),
            Err(error) => {
                tracing::warn!(%error, "model list unavailable");
                Vec::new()
            }
        }
    }

    /// Full catalog entries with pricing and context data. Unlike
    /// [`Pipe::models`] a catalog failure surfaces as an error when no
    /// cached list exists.
    pub async fn model_descriptors(&self) -> Result<Vec<ModelDescriptor>> {
        self.catalog.models().await
    }

    /// Forwards one chat request, branching on the requested delivery mode.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(&self, request: ChatRequest) -> Result<PipeOutput> {
        let payload = build_payload(&request, &self.config)?;
        tracing::debug!(
            model = %payload.model,
            stream = payload.stream,
            "dispatching chat request"
        );

        if payload.stream {
            let stream = self.relay.completion_stream(&payload, &self.retry).await?;
            Ok(PipeOutput::Stream(stream))
        } else {
            let text = self.relay.completion(&payload, &self.retry).await?;
            Ok(PipeOutput::Complete(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Pipe;
    use crate::config::PipeConfig;
    use crate::error::PipeError;
    use crate::types::{ChatMessage, ChatRequest, PipeOutput};
    use futures_util::StreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_pipe(base_url: &str) -> Pipe {
        Pipe::new(PipeConfig {
            base_url: base_url.to_string(),
            api_key: "sk-or-test".to_string(),
            ..PipeConfig::default()
        })
        .expect("pipe")
    }

    fn chat_request(model: &str, stream: bool) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::text("user", "hi")],
            stream,
            include_reasoning: None,
            options: serde_json::Map::new(),
        }
    }

    #[test]
    fn construction_requires_api_key() {
        match Pipe::new(PipeConfig::default()) {
            Err(PipeError::Configuration(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("construction should fail without an api key"),
        }
    }

    #[tokio::test]
    async fn models_lists_prefixed_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "id": "openai/gpt-4o",
                    "name": "GPT-4o",
                    "pricing": {"prompt": "0.0001", "completion": "0.0002"}
                }]
            })))
            .mount(&server)
            .await;

        let pipe = test_pipe(&server.uri());
        let models = pipe.models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "openai/gpt-4o");
        assert_eq!(models[0].name, "OpenRouter/GPT-4o");
    }

    #[tokio::test]
    async fn models_degrades_to_empty_list_on_catalog_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let pipe = test_pipe(&server.uri());
        assert!(pipe.models().await.is_empty());
    }

    #[tokio::test]
    async fn model_descriptors_expose_pricing_and_context_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {
                        "id": "meta-llama/llama-3-8b:free",
                        "name": "Llama 3 8B (free)",
                        "pricing": {"prompt": "0", "completion": "0"},
                        "context_length": 8192
                    },
                    {
                        "id": "openai/gpt-4o",
                        "name": "GPT-4o",
                        "pricing": {"prompt": "0.0001", "completion": "0.0002"}
                    }
                ]
            })))
            .mount(&server)
            .await;

        let pipe = test_pipe(&server.uri());
        let descriptors = pipe.model_descriptors().await.expect("descriptors");
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors[0].is_free);
        assert_eq!(descriptors[0].context_length, Some(8192));
        assert!(!descriptors[1].is_free);
        assert_eq!(descriptors[1].context_length, None);
    }

    #[tokio::test]
    async fn model_descriptors_surface_catalog_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let pipe = test_pipe(&server.uri());
        let err = pipe.model_descriptors().await.unwrap_err();
        assert!(matches!(err, PipeError::CatalogFetch(_)));
    }

    #[tokio::test]
    async fn chat_strips_display_prefix_before_forwarding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "openai/gpt-4o",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hello"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pipe = test_pipe(&server.uri());
        let output = pipe
            .chat(chat_request("OpenRouter/openai/gpt-4o", false))
            .await
            .expect("chat");
        match output {
            PipeOutput::Complete(text) => assert_eq!(text, "hello"),
            PipeOutput::Stream(_) => panic!("expected complete output"),
        }
    }

    #[tokio::test]
    async fn chat_streams_when_requested() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let pipe = test_pipe(&server.uri());
        let output = pipe
            .chat(chat_request("openai/gpt-4o", true))
            .await
            .expect("chat");
        let mut stream = match output {
            PipeOutput::Stream(stream) => stream,
            PipeOutput::Complete(_) => panic!("expected streaming output"),
        };

        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            chunks.push(item.expect("chunk"));
        }
        assert_eq!(chunks, ["hi"]);
    }

    #[tokio::test]
    async fn chat_accepts_host_body_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "openai/gpt-4o",
                "temperature": 0.2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let request: ChatRequest = serde_json::from_value(serde_json::json!({
            "model": "OpenRouter/openai/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.2,
            "session_id": "ignored-by-upstream"
        }))
        .expect("request");

        let pipe = test_pipe(&server.uri());
        let output = pipe.chat(request).await.expect("chat");
        assert!(matches!(output, PipeOutput::Complete(text) if text == "ok"));
    }
}
