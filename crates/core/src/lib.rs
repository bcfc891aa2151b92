//! # Ragline Core
//!
//! Domain types, capability traits, and error definitions for the Ragline
//! retrieval-augmented generation agent. No framework dependencies beyond
//! `tokio::sync`; it defines the seams every other crate implements against:
//!
//! - [`ModelRuntime`] / [`InferenceSession`] — streaming local inference
//! - [`Embedder`] — text to per-token vectors
//! - [`KnowledgeStore`] — `(vector, text)` nearest-neighbour index
//! - [`MessagingGateway`] — inbound prompts, outbound payloads
//! - [`TokenCounter`] — token budgeting for chunking

pub mod embedder;
pub mod error;
pub mod gateway;
pub mod knowledge;
pub mod runtime;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use embedder::{Embedder, TokenEmbeddings};
pub use error::{
    ConfigurationError, EmbeddingError, Error, GatewayError, InferenceError, Result, StoreError,
    TemplateError,
};
pub use gateway::{
    round2, InboundPrompt, MessagingGateway, PromptOptions, PromptRequest, ResponsePayload,
};
pub use knowledge::{EntryKind, KnowledgeEntry, KnowledgeStore};
pub use runtime::{CompletionParams, FragmentStream, InferenceSession, ModelRuntime, TokenFragment};
pub use token::{CharEstimate, TokenCounter};
