//! Inference session management.
//!
//! [`SessionManager::run`] acquires one session, streams a completion
//! through it and releases it on every exit path. Token counting and timing
//! live in a [`StreamAccumulator`] local to that call.

use std::sync::Arc;
use std::time::Duration;

use ragline_config::AppConfig;
use ragline_core::{CompletionParams, InferenceError, InferenceSession, ModelRuntime, TokenFragment};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Owns a session and frees it exactly once, explicitly or on drop.
pub struct SessionGuard {
    session: Option<Box<dyn InferenceSession>>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn InferenceSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn get(&mut self) -> Result<&mut (dyn InferenceSession + 'static), InferenceError> {
        self.session
            .as_deref_mut()
            .ok_or_else(|| InferenceError::SessionUnavailable("session already released".into()))
    }

    /// Free the session. Later calls do nothing.
    pub fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.free();
            trace!("Inference session released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.session.is_none()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Result of one streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub text: String,
    pub token_count: usize,
    pub elapsed_seconds: f64,
    pub tokens_per_second: f64,
}

/// Per-call token and timing state.
///
/// Text is cut at the first stop sequence as it arrives. [`push`] hands
/// back only text that can no longer turn into a stop sequence, so
/// forwarded fragments always agree with the final text.
///
/// [`push`]: StreamAccumulator::push
#[derive(Debug)]
pub struct StreamAccumulator {
    token_count: usize,
    response_text: String,
    started_at: Instant,
    stop_sequences: Vec<String>,
    forwarded: usize,
    stopped: bool,
}

impl StreamAccumulator {
    pub fn start(stop_sequences: &[String]) -> Self {
        Self {
            token_count: 0,
            response_text: String::new(),
            started_at: Instant::now(),
            stop_sequences: stop_sequences
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect(),
            forwarded: 0,
            stopped: false,
        }
    }

    /// Append one decoded fragment and return the text now safe to forward.
    ///
    /// Fragments arriving after a stop sequence are ignored, and a fragment
    /// lying wholly inside the stop sequence is not counted.
    pub fn push(&mut self, fragment: &TokenFragment, text: &str) -> Option<String> {
        if self.stopped {
            return None;
        }

        let before = self.response_text.len();
        self.response_text.push_str(text);

        let ready = match first_stop(&self.response_text, &self.stop_sequences) {
            Some(cut) => {
                self.stopped = true;
                self.response_text.truncate(cut);
                if cut > before {
                    self.token_count += fragment.len();
                }
                cut
            }
            None => {
                self.token_count += fragment.len();
                let held = partial_match_len(
                    &self.response_text,
                    self.stop_sequences.iter().map(String::as_str),
                );
                self.response_text.len() - held
            }
        };
        self.take_until(ready)
    }

    /// Whether a stop sequence has ended the text.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Release the tail held back while it could still start a stop sequence.
    pub fn flush(&mut self) -> Option<String> {
        self.take_until(self.response_text.len())
    }

    fn take_until(&mut self, end: usize) -> Option<String> {
        if end <= self.forwarded {
            return None;
        }
        let ready = self.response_text[self.forwarded..end].to_string();
        self.forwarded = end;
        Some(ready)
    }

    /// Close the stream and compute throughput.
    pub fn finish(self) -> InferenceOutput {
        let elapsed_ms = self.started_at.elapsed().as_millis() as f64;
        let elapsed_seconds = elapsed_ms / 1000.0;
        let tokens_per_second = if elapsed_seconds > 0.0 {
            self.token_count as f64 / elapsed_seconds
        } else {
            0.0
        };

        InferenceOutput {
            text: self.response_text,
            token_count: self.token_count,
            elapsed_seconds,
            tokens_per_second,
        }
    }
}

fn first_stop(text: &str, stop_sequences: &[String]) -> Option<usize> {
    stop_sequences
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

/// Length of the longest suffix of `text` that is a proper prefix of one of
/// `patterns`.
pub(crate) fn partial_match_len<'p>(
    text: &str,
    patterns: impl IntoIterator<Item = &'p str>,
) -> usize {
    patterns
        .into_iter()
        .filter(|p| !p.is_empty())
        .filter_map(|p| {
            let longest = (p.len() - 1).min(text.len());
            (1..=longest)
                .rev()
                .find(|&k| p.is_char_boundary(k) && text.ends_with(&p[..k]))
        })
        .max()
        .unwrap_or(0)
}

/// Runs completions against a [`ModelRuntime`].
#[derive(Clone)]
pub struct SessionManager {
    runtime: Arc<dyn ModelRuntime>,
    max_tokens: u32,
    temperature: f32,
    seed: u64,
    timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        let defaults = CompletionParams::default();
        Self {
            runtime,
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            seed: defaults.seed,
            timeout: None,
        }
    }

    pub fn from_config(runtime: Arc<dyn ModelRuntime>, config: &AppConfig) -> Self {
        Self {
            runtime,
            max_tokens: config.model.max_tokens,
            temperature: config.model.temperature,
            seed: config.model.seed,
            timeout: config.pipeline.request_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        self.runtime.model()
    }

    pub fn runtime(&self) -> &Arc<dyn ModelRuntime> {
        &self.runtime
    }

    /// Stream one completion for `prompt`, forwarding decoded text to `sink`.
    pub async fn run(
        &self,
        prompt: &str,
        stop_sequences: &[String],
        sink: Option<&mpsc::Sender<String>>,
        cancel: &CancellationToken,
    ) -> Result<InferenceOutput, InferenceError> {
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
            session = self.runtime.create_session() => session?,
        };
        let mut guard = SessionGuard::new(session);

        let streamed = self.stream(&mut guard, prompt, stop_sequences, sink, cancel);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, streamed)
                .await
                .unwrap_or(Err(InferenceError::Timeout(limit.as_secs()))),
            None => streamed.await,
        };

        guard.release();
        result
    }

    async fn stream(
        &self,
        guard: &mut SessionGuard,
        prompt: &str,
        stop_sequences: &[String],
        sink: Option<&mpsc::Sender<String>>,
        cancel: &CancellationToken,
    ) -> Result<InferenceOutput, InferenceError> {
        let params = CompletionParams {
            stop_sequences: stop_sequences.to_vec(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            seed: self.seed,
        };

        let session = guard.get()?;
        let mut acc = StreamAccumulator::start(stop_sequences);
        let mut rx = session.stream_completion(prompt, &params).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                next = rx.recv() => next,
            };
            let Some(fragment) = next else { break };
            let fragment = fragment?;

            let text = session.decode(&fragment)?;
            forward(sink, acc.push(&fragment, &text)).await;
            if acc.is_stopped() {
                trace!("Stop sequence reached");
                break;
            }
        }
        forward(sink, acc.flush()).await;

        let output = acc.finish();
        debug!(
            model = self.runtime.model(),
            tokens = output.token_count,
            elapsed_secs = output.elapsed_seconds,
            tokens_per_second = output.tokens_per_second,
            "Completion finished"
        );
        Ok(output)
    }
}

async fn forward(sink: Option<&mpsc::Sender<String>>, text: Option<String>) {
    if let (Some(sink), Some(text)) = (sink, text) {
        if sink.send(text).await.is_err() {
            trace!("Fragment sink closed");
        }
    }
}
