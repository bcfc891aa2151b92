//! The Ragline request pipeline.
//!
//! One prompt flows through:
//!
//! 1. **Window** an oversized prompt into carried-over context plus a tail
//! 2. **Recall** related texts from the knowledge store
//! 3. **Summarize** the context with the model
//! 4. **Assemble** the final prompt from the chat template
//! 5. **Stream** the completion through one inference session
//! 6. **Split** reasoning from the answer and build the terminal payload
//! 7. **Persist** the prompt and the answer for later recall
//!
//! [`Agent::serve`] drives this for every prompt a gateway delivers.

pub mod agent;
pub mod assembler;
pub mod chunker;
pub mod embedding;
pub mod knowledge;
pub mod pipeline;
pub mod session;
pub mod splitter;
pub mod summarizer;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use agent::Agent;
pub use assembler::{assemble, Template};
pub use chunker::{Chunker, Chunks};
pub use embedding::EmbedderAdapter;
pub use knowledge::{KnowledgeAdapter, RetryPolicy};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome};
pub use session::{InferenceOutput, SessionGuard, SessionManager, StreamAccumulator};
pub use splitter::{ResponseSplitter, SplitFragment, SplitResponse, StreamSplit};
pub use summarizer::Summarizer;
