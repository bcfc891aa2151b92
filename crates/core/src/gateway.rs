//! Messaging gateway trait — the transport that delivers prompts to the
//! agent and carries responses back.
//!
//! The gateway's own protocol is out of scope; it only has to yield
//! `InboundPrompt`s and accept `ResponsePayload`s addressed by request id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::GatewayError;

/// Per-request options sent alongside the prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptOptions {
    /// System prompt substituted into `{system_prompt}`
    #[serde(rename = "sysPrompt", default)]
    pub system_prompt: String,

    /// Which model the caller asked for
    #[serde(rename = "model", default, skip_serializing_if = "Option::is_none")]
    pub model_selector: Option<String>,
}

/// A prompt as received from a gateway. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,

    #[serde(default)]
    pub options: PromptOptions,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options: PromptOptions {
                system_prompt: system_prompt.into(),
                model_selector: None,
            },
        }
    }

    /// Prompt length in characters, as reported in `promptLength`.
    pub fn prompt_length(&self) -> usize {
        self.prompt.chars().count()
    }
}

/// A prompt plus the id used to route responses back to its sender.
#[derive(Debug, Clone)]
pub struct InboundPrompt {
    pub request_id: String,
    pub request: PromptRequest,
}

impl InboundPrompt {
    pub fn new(request: PromptRequest) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            request,
        }
    }
}

/// The only artifact crossing back to the gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Final answer, or one decoded fragment on intermediate payloads
    pub token: String,

    /// Reasoning content preceding the reasoning marker
    pub reasoning: String,

    /// Terminal payload marker
    pub completed: bool,

    /// Model that served the request
    pub model: String,

    /// Seconds spent streaming, two decimals
    pub elapsed_time: f64,

    /// Tokens per second, two decimals; never NaN or infinite
    pub speed: f64,

    /// Prompt length in characters
    pub prompt_length: usize,

    /// Streamed token count
    pub response_length: usize,

    /// Set only on failure payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponsePayload {
    /// An intermediate payload carrying one decoded fragment.
    pub fn fragment(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            token: text.into(),
            model: model.into(),
            completed: false,
            ..Self::default()
        }
    }

    /// An intermediate payload carrying reasoning that precedes the answer.
    pub fn reasoning_fragment(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            reasoning: text.into(),
            model: model.into(),
            completed: false,
            ..Self::default()
        }
    }

    /// A terminal payload for a failed request, so the gateway never waits
    /// forever.
    pub fn failure(model: impl Into<String>, prompt_length: usize, error: impl Into<String>) -> Self {
        Self {
            completed: true,
            model: model.into(),
            prompt_length,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Round to two decimals, the precision payload metrics are reported at.
pub fn round2(value: f64) -> f64 {
    if value.is_finite() {
        (value * 100.0).round() / 100.0
    } else {
        0.0
    }
}

/// The core MessagingGateway trait.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Human-readable gateway name (e.g., "cli", "http").
    fn name(&self) -> &str;

    /// Start receiving prompts. The receiver closes when the gateway stops.
    async fn start(&self) -> Result<mpsc::Receiver<InboundPrompt>, GatewayError>;

    /// Deliver a payload for `request_id`.
    async fn send_response(
        &self,
        request_id: &str,
        payload: ResponsePayload,
    ) -> Result<(), GatewayError>;

    /// Stop the gateway gracefully.
    async fn stop(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}
