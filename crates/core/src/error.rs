//! Error types for the Ragline domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each pipeline stage has its own error type; `Error` is the union the
//! agent boundary catches.

use thiserror::Error;

/// The top-level error type for all Ragline operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Startup ---
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    // --- Per-request stages ---
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Knowledge store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Request cancelled")]
    Cancelled,

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error was caused by cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Cancelled
                | Error::Inference(InferenceError::Cancelled)
                | Error::Embedding(EmbeddingError::Cancelled)
                | Error::Store(StoreError::Cancelled)
        )
    }
}

/// Fatal startup failures. Reported once; the pipeline does not start.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    #[error("Model file not found: {0}")]
    ModelFileMissing(String),

    #[error("Knowledge store collection unavailable: {0}")]
    CollectionUnavailable(String),

    #[error("Invalid setting `{key}`: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Capability not available in this build: {0}")]
    Unsupported(String),

    #[error("Failed to load {what}: {reason}")]
    LoadFailed { what: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("Cannot embed empty text")]
    EmptyInput,

    #[error("Embedding backend failed: {0}")]
    Backend(String),

    #[error("Embedding produced a degenerate vector: {0}")]
    Degenerate(String),

    #[error("Embedding cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Prompt template is missing the `{0}` placeholder")]
    MissingPlaceholder(&'static str),
}

#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("Could not acquire an inference session: {0}")]
    SessionUnavailable(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Failed to decode token fragment: {0}")]
    Decode(String),

    #[error("Inference timed out after {0}s")]
    Timeout(u64),

    #[error("Inference cancelled")]
    Cancelled,

    #[error("Model runtime error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Persisting an entry failed. Raised after a response was already
    /// delivered, so it is logged rather than surfaced to the caller.
    #[error("Failed to write entry `{id}`: {reason}")]
    Write { id: String, reason: String },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Gateway closed")]
    Closed,

    #[error("Failed to deliver response for {request_id}: {reason}")]
    Delivery { request_id: String, reason: String },

    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Gateway I/O error: {0}")]
    Io(String),
}
