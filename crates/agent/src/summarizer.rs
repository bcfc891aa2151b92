//! Condense recalled context before it enters the final prompt.

use ragline_core::InferenceError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::assembler::Template;
use crate::chunker::Chunker;
use crate::session::SessionManager;

const INSTRUCTION: &str = "Summarize this knowledge concisely:\n\n";

/// Runs a summarization pass per chunk of oversized input.
#[derive(Clone)]
pub struct Summarizer {
    sessions: SessionManager,
    template: Template,
    chunker: Option<Chunker>,
    input_budget: usize,
    stop_sequences: Vec<String>,
}

impl Summarizer {
    pub fn new(
        sessions: SessionManager,
        template: Template,
        chunker: Option<Chunker>,
        input_budget: usize,
        stop_sequences: Vec<String>,
    ) -> Self {
        Self {
            sessions,
            template,
            chunker,
            input_budget,
            stop_sequences,
        }
    }

    /// Summary of `text`, or `""` for blank input without touching the model.
    pub async fn summarize(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let chunks: Vec<&str> = match &self.chunker {
            Some(chunker) => {
                // The instruction shares the window with the text.
                let budget = self
                    .input_budget
                    .saturating_sub(chunker.count(INSTRUCTION));
                chunker.chunks(text, budget).collect()
            }
            None => vec![text],
        };
        if chunks.len() > 1 {
            debug!(chunks = chunks.len(), "Summarizing oversized context in passes");
        }

        let mut partials = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            partials.push(self.summarize_one(chunk, cancel).await?);
        }
        Ok(partials.join("\n"))
    }

    async fn summarize_one(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        let prompt = self
            .template
            .render(&format!("{INSTRUCTION}{text}"), "")
            .map_err(|e| InferenceError::Backend(e.to_string()))?;
        let output = self
            .sessions
            .run(&prompt, &self.stop_sequences, None, cancel)
            .await?;
        Ok(output.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockRuntime;
    use std::sync::Arc;

    fn summarizer(runtime: Arc<MockRuntime>, chunker: Option<Chunker>, budget: usize) -> Summarizer {
        Summarizer::new(
            SessionManager::new(runtime),
            Template::parse("{system_prompt}[{prompt}]").unwrap(),
            chunker,
            budget,
            vec!["User:".into()],
        )
    }

    #[tokio::test]
    async fn blank_input_skips_inference() {
        let runtime = Arc::new(MockRuntime::replying(&["unused"]));
        let out = summarizer(runtime.clone(), None, 100)
            .summarize("  \n", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "");
        assert_eq!(runtime.created(), 0);
    }

    #[tokio::test]
    async fn single_pass_trims_output_and_frees_session() {
        let runtime = Arc::new(MockRuntime::replying(&["  short summary \n"]));
        let out = summarizer(runtime.clone(), Some(Chunker::char_estimate(4)), 1000)
            .summarize("Rust has no garbage collector.", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out, "short summary");
        assert_eq!(runtime.created(), 1);
        assert_eq!(runtime.freed(), 1);
        assert_eq!(
            runtime.prompts(),
            ["[Summarize this knowledge concisely:\n\nRust has no garbage collector.]"]
        );
    }

    #[tokio::test]
    async fn oversized_input_is_summarized_per_chunk() {
        let runtime = Arc::new(MockRuntime::replying(&["one", "two", "three"]));
        // The instruction is 37 chars at 1 char/token, leaving 4 per chunk.
        let chunker = Chunker::char_estimate(1);
        let out = summarizer(runtime.clone(), Some(chunker), 41)
            .summarize("aaaabbbbcc", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out, "one\ntwo\nthree");
        assert_eq!(runtime.created(), 3);
        assert_eq!(runtime.freed(), 3);
        let prompts = runtime.prompts();
        assert!(prompts[0].ends_with("aaaa]"));
        assert!(prompts[1].ends_with("bbbb]"));
        assert!(prompts[2].ends_with("cc]"));
    }
}
