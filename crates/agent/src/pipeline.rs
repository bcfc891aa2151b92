//! The per-request pipeline.
//!
//! ```text
//! prompt ─▶ window ─▶ recall ─▶ summarize ─▶ assemble ─▶ stream ─▶ split ─▶ payload
//!                                                                    └─▶ persist (after delivery)
//! ```
//!
//! Every stage awaits the previous one, so recall finishes before
//! summarization, summarization before assembly, and the full stream is
//! accumulated before splitting or persisting.

use std::sync::Arc;

use ragline_config::{AppConfig, ChunkingStrategy};
use ragline_core::{
    round2, ConfigurationError, EntryKind, Error, ModelRuntime, PromptRequest, ResponsePayload,
    TokenCounter,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::assembler::Template;
use crate::chunker::Chunker;
use crate::knowledge::KnowledgeAdapter;
use crate::session::{InferenceOutput, SessionManager};
use crate::splitter::{ResponseSplitter, SplitResponse};
use crate::summarizer::Summarizer;

/// Everything that varies between pipeline deployments.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub context_window_tokens: usize,
    pub generation_reserve_tokens: usize,
    pub chunking: ChunkingStrategy,
    pub chars_per_token: usize,
    pub rag_enabled: bool,
    pub summarization_enabled: bool,
    pub recall_k: usize,
    pub stop_sequences: Vec<String>,
    pub reasoning_marker: String,
    pub artifact: String,
    pub stream_tokens: bool,
    pub request_timeout_secs: Option<u64>,
}

impl PipelineConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            context_window_tokens: config.model.context_size as usize,
            generation_reserve_tokens: p.generation_reserve_tokens as usize,
            chunking: p.chunking,
            chars_per_token: p.chars_per_token,
            rag_enabled: p.rag_enabled,
            summarization_enabled: p.summarization_enabled,
            recall_k: p.recall_k,
            stop_sequences: p.stop_sequences.clone(),
            reasoning_marker: p.reasoning_marker.clone(),
            artifact: p.artifact.clone(),
            stream_tokens: p.stream_tokens,
            request_timeout_secs: p.request_timeout_secs,
        }
    }

    /// Tokens the assembled prompt may use.
    pub fn prompt_budget(&self) -> usize {
        self.context_window_tokens
            .saturating_sub(self.generation_reserve_tokens)
    }
}

/// Result of [`Pipeline::handle`].
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Terminal payload for the gateway
    pub payload: ResponsePayload,
    pub split: SplitResponse,
    pub output: InferenceOutput,
    /// The prompt the model actually saw
    pub assembled_prompt: String,
}

impl PipelineOutcome {
    pub fn answer(&self) -> &str {
        &self.split.answer
    }
}

/// A user prompt after windowing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Windowed<'a> {
    carried: Vec<&'a str>,
    user_prompt: &'a str,
}

pub struct Pipeline {
    config: PipelineConfig,
    template: Template,
    sessions: SessionManager,
    knowledge: KnowledgeAdapter,
    summarizer: Summarizer,
    chunker: Option<Chunker>,
    splitter: ResponseSplitter,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        template: Template,
        sessions: SessionManager,
        knowledge: KnowledgeAdapter,
        exact_counter: Option<Arc<dyn TokenCounter>>,
    ) -> Self {
        let chunker = Chunker::for_strategy(config.chunking, exact_counter, config.chars_per_token);
        let summarizer = Summarizer::new(
            sessions.clone(),
            template.clone(),
            chunker.clone(),
            config.prompt_budget(),
            config.stop_sequences.clone(),
        );
        let splitter = ResponseSplitter::new(&config.reasoning_marker, &config.artifact);
        Self {
            config,
            template,
            sessions,
            knowledge,
            summarizer,
            chunker,
            splitter,
        }
    }

    /// Assemble a pipeline from application configuration. Fails on an
    /// invalid template.
    pub fn from_config(
        app: &AppConfig,
        runtime: Arc<dyn ModelRuntime>,
        knowledge: KnowledgeAdapter,
        exact_counter: Option<Arc<dyn TokenCounter>>,
    ) -> Result<Self, ConfigurationError> {
        let template = Template::parse(&app.model.template)?;
        let sessions = SessionManager::from_config(runtime, app);
        Ok(Self::new(
            PipelineConfig::from_config(app),
            template,
            sessions,
            knowledge,
            exact_counter,
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn splitter(&self) -> &ResponseSplitter {
        &self.splitter
    }

    pub fn model(&self) -> &str {
        self.sessions.model()
    }

    pub fn knowledge(&self) -> &KnowledgeAdapter {
        &self.knowledge
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run one request up to its terminal payload. Decoded fragments go to
    /// `sink` as they stream.
    pub async fn handle(
        &self,
        request: &PromptRequest,
        sink: Option<&mpsc::Sender<String>>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, Error> {
        let windowed = self.window(&request.prompt);
        if !windowed.carried.is_empty() {
            debug!(
                carried_chunks = windowed.carried.len(),
                "Prompt exceeds budget, carrying leading chunks as context"
            );
        }

        let recalled = if self.config.rag_enabled {
            self.knowledge
                .recall(&request.prompt, self.config.recall_k, cancel)
                .await?
        } else {
            String::new()
        };

        let context = join_nonempty(std::iter::once(recalled.as_str()).chain(windowed.carried));
        let context = if self.config.summarization_enabled {
            self.summarizer.summarize(&context, cancel).await?
        } else {
            context
        };

        let assembled = self.template.assemble(
            &context,
            windowed.user_prompt,
            &request.options.system_prompt,
        )?;
        debug!(prompt = %assembled, "Assembled prompt");

        let output = self
            .sessions
            .run(&assembled, &self.config.stop_sequences, sink, cancel)
            .await?;
        let split = self.splitter.split(&output.text);
        debug!(answer = %split.answer, "Model answered");

        let payload = ResponsePayload {
            token: split.answer.clone(),
            reasoning: split.reasoning.clone(),
            completed: true,
            model: self.model().to_string(),
            elapsed_time: round2(output.elapsed_seconds),
            speed: round2(output.tokens_per_second),
            prompt_length: request.prompt_length(),
            response_length: output.token_count,
            error: None,
        };

        Ok(PipelineOutcome {
            payload,
            split,
            output,
            assembled_prompt: assembled,
        })
    }

    /// Write the prompt and the answer to the knowledge store, concurrently.
    /// Blank texts are skipped. Nothing is written when RAG is disabled.
    pub async fn persist(
        &self,
        prompt: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if !self.config.rag_enabled {
            return Ok(());
        }

        let prompt_id = EntryKind::Prompt.fresh_id();
        let answer_id = EntryKind::Response.fresh_id();
        let (prompt_written, answer_written) = tokio::join!(
            self.remember_nonblank(prompt, &prompt_id, cancel),
            self.remember_nonblank(answer, &answer_id, cancel),
        );

        for (id, result) in [(&prompt_id, &prompt_written), (&answer_id, &answer_written)] {
            if let Err(e) = result {
                warn!(id = %id, error = %e, "Knowledge write failed");
            }
        }
        prompt_written.and(answer_written)
    }

    async fn remember_nonblank(
        &self,
        text: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if text.trim().is_empty() {
            return Ok(());
        }
        self.knowledge.remember(text, id, cancel).await
    }

    fn window<'a>(&self, prompt: &'a str) -> Windowed<'a> {
        let budget = self.config.prompt_budget();
        match &self.chunker {
            Some(chunker) if chunker.count(prompt) > budget => {
                let mut chunks: Vec<&str> = chunker.chunks(prompt, budget).collect();
                let user_prompt = chunks.pop().unwrap_or(prompt);
                Windowed {
                    carried: chunks,
                    user_prompt,
                }
            }
            _ => Windowed {
                carried: Vec::new(),
                user_prompt: prompt,
            },
        }
    }
}

fn join_nonempty<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
