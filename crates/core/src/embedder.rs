//! Embedder trait — raw text-to-vector capability.
//!
//! An embedder returns one hidden-state vector per input token. Pooling and
//! normalization are applied by the pipeline's adapter so that vectors
//! written to and queried from the knowledge store always agree.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Per-token hidden states for one input text: `rows x dimensions`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEmbeddings {
    pub rows: Vec<Vec<f32>>,
}

impl TokenEmbeddings {
    pub fn new(rows: Vec<Vec<f32>>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Width of each row, if consistent.
    pub fn dimensions(&self) -> Option<usize> {
        let first = self.rows.first()?.len();
        self.rows.iter().all(|r| r.len() == first).then_some(first)
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Backend name (e.g., "bert", "hashing").
    fn name(&self) -> &str;

    /// Width of produced vectors.
    fn dimensions(&self) -> usize;

    /// Embed `text` into per-token hidden states.
    async fn token_embeddings(&self, text: &str) -> Result<TokenEmbeddings, EmbeddingError>;
}
