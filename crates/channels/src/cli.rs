//! CLI gateway — interactive terminal chat.
//!
//! Reads one prompt per line, writes answers back. Used by `ragline chat`.
//! `exit`, `quit` or EOF end the session.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use ragline_core::{GatewayError, InboundPrompt, MessagingGateway, PromptRequest, ResponsePayload};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

const PROMPT_MARKER: &str = "> ";

/// Terminal gateway over any line reader and writer.
pub struct CliGateway {
    reader: Mutex<Option<Reader>>,
    writer: AsyncMutex<Writer>,
    system_prompt: String,
    show_reasoning: bool,
    show_metrics: bool,
    /// Requests that already printed streamed fragments
    streamed: Mutex<HashSet<String>>,
}

impl CliGateway {
    /// Gateway over stdin and stdout.
    pub fn stdio() -> Self {
        Self::with_io(BufReader::new(io::stdin()), io::stdout())
    }

    pub fn with_io(
        reader: impl AsyncBufRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            writer: AsyncMutex::new(Box::new(writer)),
            system_prompt: String::new(),
            show_reasoning: false,
            show_metrics: false,
            streamed: Mutex::new(HashSet::new()),
        }
    }

    /// System prompt sent with every line.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_reasoning(mut self, show: bool) -> Self {
        self.show_reasoning = show;
        self
    }

    pub fn with_metrics(mut self, show: bool) -> Self {
        self.show_metrics = show;
        self
    }

    async fn write(&self, text: &str) -> Result<(), GatewayError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(text.as_bytes())
            .await
            .map_err(|e| GatewayError::Io(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| GatewayError::Io(e.to_string()))
    }

    fn render_terminal(&self, payload: &ResponsePayload, streamed: bool) -> String {
        let mut out = String::new();
        if let Some(error) = &payload.error {
            out.push_str(&format!("error: {error}\n"));
        } else {
            if streamed {
                out.push('\n');
            } else {
                if self.show_reasoning && !payload.reasoning.trim().is_empty() {
                    out.push_str(&format!("[reasoning]\n{}\n[answer]\n", payload.reasoning.trim()));
                }
                out.push_str(payload.token.trim());
                out.push('\n');
            }
            if self.show_metrics {
                out.push_str(&format!(
                    "[{} tokens in {:.2}s, {:.2} tok/s]\n",
                    payload.response_length, payload.elapsed_time, payload.speed
                ));
            }
        }
        out.push_str(PROMPT_MARKER);
        out
    }
}

fn is_exit(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q")
}

#[async_trait]
impl MessagingGateway for CliGateway {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<mpsc::Receiver<InboundPrompt>, GatewayError> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| GatewayError::Io("reader lock poisoned".into()))?
            .take()
            .ok_or_else(|| GatewayError::Io("CLI gateway already started".into()))?;
        self.write(PROMPT_MARKER).await?;

        let (tx, rx) = mpsc::channel(32);
        let system_prompt = self.system_prompt.clone();

        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if is_exit(line) {
                            break;
                        }
                        let prompt = InboundPrompt::new(PromptRequest::new(line, &system_prompt));
                        if tx.send(prompt).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "stdin closed");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send_response(
        &self,
        request_id: &str,
        payload: ResponsePayload,
    ) -> Result<(), GatewayError> {
        if !payload.completed {
            // Reasoning shows only in the terminal render.
            if payload.token.is_empty() {
                return Ok(());
            }
            if let Ok(mut streamed) = self.streamed.lock() {
                streamed.insert(request_id.to_string());
            }
            return self.write(&payload.token).await;
        }

        let streamed = self
            .streamed
            .lock()
            .map(|mut s| s.remove(request_id))
            .unwrap_or(false);
        self.write(&self.render_terminal(&payload, streamed)).await
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.write("\n").await
    }
}
