//! Model runtime traits — the abstraction over local inference engines.
//!
//! A `ModelRuntime` owns loaded weights and hands out `InferenceSession`s.
//! A session is exclusive to one request: it streams token fragments for a
//! single completion call and must be freed when the request ends.
//!
//! Implementations: candle GGUF runtime, llama.cpp server, test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::InferenceError;

/// Parameters for one streaming completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionParams {
    /// Role delimiters that end the model's turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,

    /// Hard cap on generated tokens.
    pub max_tokens: u32,

    /// Sampling temperature (0.0 = greedy).
    pub temperature: f32,

    /// Sampling seed.
    pub seed: u64,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            stop_sequences: Vec::new(),
            max_tokens: 512,
            temperature: 0.6,
            seed: 3407,
        }
    }
}

/// One unit of streamed output.
///
/// Runtimes that work on token ids fill `tokens` and leave decoding to
/// [`InferenceSession::decode`]. Runtimes that receive text from elsewhere
/// set `piece`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFragment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piece: Option<String>,
}

impl TokenFragment {
    pub fn from_tokens(tokens: Vec<u32>) -> Self {
        Self { tokens, piece: None }
    }

    pub fn from_piece(piece: impl Into<String>) -> Self {
        Self {
            tokens: Vec::new(),
            piece: Some(piece.into()),
        }
    }

    /// Length counted towards throughput: token ids, or characters when the
    /// runtime reported none.
    pub fn len(&self) -> usize {
        if self.tokens.is_empty() {
            self.piece.as_deref().map_or(0, |p| p.chars().count())
        } else {
            self.tokens.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiver half of a completion stream. The stream ends when the sender is
/// dropped.
pub type FragmentStream = mpsc::Receiver<Result<TokenFragment, InferenceError>>;

/// An exclusive handle into a model runtime, tied to one request.
#[async_trait]
pub trait InferenceSession: Send {
    /// Start a streaming completion. Only one call may be in flight.
    async fn stream_completion(
        &mut self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<FragmentStream, InferenceError>;

    /// Turn a fragment into text. May keep incremental decoder state.
    fn decode(&mut self, fragment: &TokenFragment) -> Result<String, InferenceError>;

    /// Release everything the session holds. Called exactly once.
    fn free(&mut self);
}

/// The core ModelRuntime trait.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// A human-readable runtime name (e.g., "local", "llama_server").
    fn name(&self) -> &str;

    /// The model label reported back to callers.
    fn model(&self) -> &str;

    /// Acquire a session. May wait while another request holds the model.
    async fn create_session(&self) -> Result<Box<dyn InferenceSession>, InferenceError>;

    /// Whether the runtime is ready to serve.
    async fn health_check(&self) -> Result<bool, InferenceError> {
        Ok(true)
    }
}
