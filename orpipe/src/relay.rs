use crate::config::{ATTRIBUTION_REFERER, ATTRIBUTION_TITLE, PipeConfig};
use crate::error::{PipeError, Result};
use crate::types::{TextStream, UpstreamPayload};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
/// Per-attempt timeout for non-streaming calls. Streaming calls rely on the
/// client connect timeout plus cancellation-by-drop instead.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Bounded retry for transient upstream statuses (429 and 5xx).
/// `max_attempts` counts the first try, so 3 means at most two retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Executes chat completions against the upstream and relays the result,
/// framing any reasoning tokens in `<think>` tags ahead of the answer.
pub struct CompletionRelay {
    http: reqwest::Client,
    config: Arc<PipeConfig>,
}

impl CompletionRelay {
    pub fn new(http: reqwest::Client, config: Arc<PipeConfig>) -> Self {
        Self { http, config }
    }

    /// Single-shot completion. Transient statuses are retried under `policy`;
    /// anything else fails on the spot.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn completion(
        &self,
        payload: &UpstreamPayload,
        policy: &RetryPolicy,
    ) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = self
                .authorized(self.http.post(self.completions_url()))
                .timeout(REQUEST_TIMEOUT)
                .json(payload)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if status.is_success() {
                return compose_final_text(&body, payload.include_reasoning.unwrap_or(false));
            }

            if !is_transient_status(status) || attempt >= policy.max_attempts {
                return Err(PipeError::UpstreamUnavailable { status, body });
            }

            tracing::warn!(
                %status,
                attempt,
                backoff = ?policy.backoff,
                "completion transient failure; retrying"
            );
            tokio::time::sleep(policy.backoff).await;
        }
    }

    /// Streaming completion. Retry covers only connection establishment;
    /// once event bytes flow, a failure ends the stream with a terminal
    /// error and whatever was already delivered stands.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn completion_stream(
        &self,
        payload: &UpstreamPayload,
        policy: &RetryPolicy,
    ) -> Result<TextStream> {
        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            let response = self
                .authorized(self.http.post(self.completions_url()))
                .json(payload)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                break response;
            }

            let body = response.text().await.unwrap_or_default();
            if !is_transient_status(status) || attempt >= policy.max_attempts {
                return Err(PipeError::UpstreamUnavailable { status, body });
            }

            tracing::warn!(
                %status,
                attempt,
                backoff = ?policy.backoff,
                "stream connection transient failure; retrying"
            );
            tokio::time::sleep(policy.backoff).await;
        };

        let reasoning_enabled = payload.include_reasoning.unwrap_or(false);
        Ok(relay_stream(response.bytes_stream(), reasoning_enabled))
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.api_key)
            .header("HTTP-Referer", ATTRIBUTION_REFERER)
            .header("X-Title", ATTRIBUTION_TITLE)
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn compose_final_text(body: &str, reasoning_enabled: bool) -> Result<String> {
    let parsed: CompletionResponse = serde_json::from_str(body)?;
    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        PipeError::MalformedResponse("completion response missing choices".to_string())
    })?;

    let content = choice.message.content.unwrap_or_default();
    let reasoning = choice
        .message
        .reasoning
        .filter(|r| !r.is_empty() && reasoning_enabled);

    Ok(match reasoning {
        Some(reasoning) => format!("{THINK_OPEN}{reasoning}{THINK_CLOSE}{content}"),
        None => content,
    })
}

fn relay_stream<S>(bytes_stream: S, reasoning_enabled: bool) -> TextStream
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let sse = Box::pin(decode_sse(bytes_stream));
    let state = RelayState::new(reasoning_enabled);

    let stream = futures_util::stream::unfold((sse, state), |(mut sse, mut state)| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), (sse, state)));
            }
            if state.finished {
                return None;
            }

            match sse.as_mut().next().await {
                Some(Ok(SseEvent::Data(data))) => {
                    if data.trim() == "[DONE]" {
                        state.finish();
                        continue;
                    }

                    let chunk: StreamResponseChunk = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(error) => {
                            tracing::debug!(%error, "skipping malformed stream delta");
                            continue;
                        }
                    };

                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };
                    // Older upstreams put fragments under `message` instead
                    // of `delta`; each field falls back independently.
                    let delta = choice.delta.unwrap_or_default();
                    let message = choice.message.unwrap_or_default();
                    state.push_fragment(StreamFragment {
                        content: delta.content.or(message.content),
                        reasoning: delta.reasoning.or(message.reasoning),
                    });
                }
                Some(Ok(SseEvent::Other)) => continue,
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((Err(error), (sse, state)));
                }
                None => {
                    state.finish();
                    continue;
                }
            }
        }
    });

    Box::pin(stream)
}

/// `<think>` framing for one streaming call. Fragments queue in `pending`
/// so a tag chunk can precede the fragment that triggered it.
#[derive(Debug)]
struct RelayState {
    reasoning_enabled: bool,
    opened: bool,
    closed: bool,
    finished: bool,
    pending: VecDeque<String>,
}

impl RelayState {
    fn new(reasoning_enabled: bool) -> Self {
        Self {
            reasoning_enabled,
            opened: false,
            closed: false,
            finished: false,
            pending: VecDeque::new(),
        }
    }

    fn push_fragment(&mut self, fragment: StreamFragment) {
        if let Some(reasoning) = fragment.reasoning.filter(|r| !r.is_empty()) {
            if self.reasoning_enabled {
                if !self.opened {
                    self.opened = true;
                    self.pending.push_back(THINK_OPEN.to_string());
                }
                // Once content has closed the tag it stays closed; late
                // reasoning passes through untagged.
                self.pending.push_back(reasoning);
            }
        }
        if let Some(content) = fragment.content.filter(|c| !c.is_empty()) {
            if self.opened && !self.closed {
                self.closed = true;
                self.pending.push_back(THINK_CLOSE.to_string());
            }
            self.pending.push_back(content);
        }
    }

    fn finish(&mut self) {
        if self.opened && !self.closed {
            self.closed = true;
            self.pending.push_back(THINK_CLOSE.to_string());
        }
        self.finished = true;
    }
}

#[derive(Debug)]
enum SseEvent {
    Data(String),
    Other,
}

fn decode_sse<S>(bytes_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    futures_util::stream::unfold(
        (bytes_stream, Vec::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(idx) = buffer.windows(2).position(|w| w == b"\n\n") {
                    // Events decode as a unit; a codepoint split across
                    // network chunks reassembles in the byte buffer first.
                    let raw = String::from_utf8_lossy(&buffer[..idx]).into_owned();
                    buffer.drain(..idx + 2);

                    let mut data_lines = Vec::new();
                    for line in raw.lines() {
                        let line = line.trim_end();
                        if let Some(rest) = line.strip_prefix("data:") {
                            data_lines.push(rest.trim_start().to_string());
                        }
                    }
                    if data_lines.is_empty() {
                        return Some((Ok(SseEvent::Other), (stream, buffer)));
                    }
                    return Some((Ok(SseEvent::Data(data_lines.join("\n"))), (stream, buffer)));
                }

                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                        continue;
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(PipeError::StreamInterrupted(e.to_string())),
                            (stream, buffer),
                        ));
                    }
                    None => return None,
                }
            }
        },
    )
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponseChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamFragment>,
    #[serde(default)]
    message: Option<StreamFragment>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamFragment {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}
