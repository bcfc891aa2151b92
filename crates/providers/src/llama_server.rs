//! llama.cpp server runtime.
//!
//! Streams completions from a running `llama-server` over its native
//! `/completion` endpoint. Each SSE event carries the decoded `content` and,
//! with `return_tokens`, the token ids behind it, so throughput is measured
//! in real tokens.
//!
//! The server owns its slots, so sessions are independent HTTP streams and
//! need no local exclusivity.

use async_trait::async_trait;
use futures::StreamExt;
use ragline_core::{
    CompletionParams, FragmentStream, InferenceError, InferenceSession, ModelRuntime,
    TokenFragment,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A model runtime backed by a llama.cpp HTTP server.
pub struct LlamaServerRuntime {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlamaServerRuntime {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelRuntime for LlamaServerRuntime {
    fn name(&self) -> &str {
        "llama_server"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn create_session(&self) -> Result<Box<dyn InferenceSession>, InferenceError> {
        Ok(Box::new(LlamaServerSession {
            url: format!("{}/completion", self.base_url),
            client: self.client.clone(),
            reader: None,
        }))
    }

    async fn health_check(&self) -> Result<bool, InferenceError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

/// One request's view of the server: at most one streaming call.
struct LlamaServerSession {
    url: String,
    client: reqwest::Client,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl InferenceSession for LlamaServerSession {
    async fn stream_completion(
        &mut self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<FragmentStream, InferenceError> {
        if self.reader.is_some() {
            return Err(InferenceError::SessionUnavailable(
                "a completion is already streaming on this session".into(),
            ));
        }

        let body = CompletionRequest {
            prompt,
            stream: true,
            return_tokens: true,
            stop: &params.stop_sequences,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            seed: params.seed,
            cache_prompt: false,
        };

        debug!(url = %self.url, prompt_chars = prompt.len(), "Sending streaming completion");

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 503 {
            return Err(InferenceError::SessionUnavailable(
                "llama-server has no free slot or is still loading".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "llama-server returned error");
            return Err(InferenceError::Backend(format!("HTTP {status}: {error_body}")));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        self.reader = Some(tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(InferenceError::Stream(e.to_string()))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer.drain(..=line_end);

                    match parse_event_line(&line) {
                        Some(Ok(event)) => {
                            let stop = event.stop;
                            let fragment = event.into_fragment();
                            if !fragment.is_empty() && tx.send(Ok(fragment)).await.is_err() {
                                return; // receiver dropped
                            }
                            if stop {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            trace!(line = %line, error = %e, "Ignoring unparseable SSE event");
                        }
                        None => {}
                    }
                }
            }
        }));

        Ok(rx)
    }

    // The server decodes; a fragment holding only part of a UTF-8 sequence
    // arrives with ids but no content.
    fn decode(&mut self, fragment: &TokenFragment) -> Result<String, InferenceError> {
        Ok(fragment.piece.clone().unwrap_or_default())
    }

    fn free(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Parse one SSE line. `None` for blank lines, comments and non-data fields.
fn parse_event_line(line: &str) -> Option<Result<StreamEvent, serde_json::Error>> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim();
    Some(serde_json::from_str(data))
}

// --- llama.cpp API types (internal) ---

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    stream: bool,
    return_tokens: bool,
    stop: &'a [String],
    n_predict: u32,
    temperature: f32,
    seed: u64,
    cache_prompt: bool,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tokens: Vec<u32>,
    #[serde(default)]
    stop: bool,
}

impl StreamEvent {
    fn into_fragment(self) -> TokenFragment {
        TokenFragment {
            tokens: self.tokens,
            piece: (!self.content.is_empty()).then_some(self.content),
        }
    }
}
