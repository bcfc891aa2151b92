//! Embedder adapter: pooling and normalization over a raw [`Embedder`].
//!
//! Stored vectors and query vectors both pass through here, so cosine
//! similarity between them is meaningful.

use std::sync::Arc;

use ragline_core::{Embedder, EmbeddingError, TokenEmbeddings};
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Clone)]
pub struct EmbedderAdapter {
    embedder: Arc<dyn Embedder>,
}

impl EmbedderAdapter {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    pub fn name(&self) -> &str {
        self.embedder.name()
    }

    /// Mean-pooled, L2-normalized embedding of `text`.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let hidden = self.embedder.token_embeddings(text).await?;
        trace!(
            embedder = self.embedder.name(),
            rows = hidden.len(),
            "Pooling token embeddings"
        );
        let mut pooled = mean_pool(&hidden)?;
        l2_normalize(&mut pooled)?;
        Ok(pooled)
    }

    /// [`embed`](Self::embed), abandoned when `cancel` fires.
    pub async fn embed_cancellable(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EmbeddingError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EmbeddingError::Cancelled),
            result = self.embed(text) => result,
        }
    }
}

/// Column-wise mean over token rows.
pub fn mean_pool(hidden: &TokenEmbeddings) -> Result<Vec<f32>, EmbeddingError> {
    let width = hidden
        .dimensions()
        .ok_or_else(|| EmbeddingError::Degenerate("empty or ragged token matrix".into()))?;
    if width == 0 {
        return Err(EmbeddingError::Degenerate("zero-width token matrix".into()));
    }

    let mut sums = vec![0.0f32; width];
    for row in &hidden.rows {
        for (sum, value) in sums.iter_mut().zip(row) {
            *sum += value;
        }
    }
    let n = hidden.len() as f32;
    sums.iter_mut().for_each(|v| *v /= n);
    Ok(sums)
}

/// Scale `vector` to unit length in place.
pub fn l2_normalize(vector: &mut [f32]) -> Result<(), EmbeddingError> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if !norm.is_finite() {
        return Err(EmbeddingError::Degenerate("non-finite vector norm".into()));
    }
    if norm == 0.0 {
        return Err(EmbeddingError::Degenerate("all-zero pooled vector".into()));
    }
    vector.iter_mut().for_each(|v| *v /= norm);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingEmbedder, FixedEmbedder};

    #[test]
    fn mean_pool_averages_columns() {
        let hidden = TokenEmbeddings::new(vec![vec![1.0, 2.0], vec![3.0, 6.0]]);
        assert_eq!(mean_pool(&hidden).unwrap(), vec![2.0, 4.0]);
    }

    #[test]
    fn mean_pool_rejects_empty_and_ragged() {
        let empty = TokenEmbeddings::new(vec![]);
        assert!(matches!(mean_pool(&empty), Err(EmbeddingError::Degenerate(_))));

        let ragged = TokenEmbeddings::new(vec![vec![1.0], vec![1.0, 2.0]]);
        assert!(matches!(mean_pool(&ragged), Err(EmbeddingError::Degenerate(_))));
    }

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_an_error() {
        let mut v = vec![0.0, 0.0, 0.0];
        assert!(matches!(l2_normalize(&mut v), Err(EmbeddingError::Degenerate(_))));
    }

    #[tokio::test]
    async fn embed_pools_then_normalizes() {
        let adapter = EmbedderAdapter::new(Arc::new(FixedEmbedder::new(vec![
            vec![2.0, 0.0],
            vec![4.0, 0.0],
        ])));
        assert_eq!(adapter.embed("anything").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn blank_text_is_rejected_before_the_backend() {
        let adapter = EmbedderAdapter::new(Arc::new(FailingEmbedder));
        assert!(matches!(
            adapter.embed("   \n").await,
            Err(EmbeddingError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let adapter = EmbedderAdapter::new(Arc::new(FailingEmbedder));
        assert!(matches!(
            adapter.embed("hello").await,
            Err(EmbeddingError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_embed_returns_cancelled() {
        let adapter = EmbedderAdapter::new(Arc::new(FixedEmbedder::new(vec![vec![1.0]])));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            adapter.embed_cancellable("hello", &cancel).await,
            Err(EmbeddingError::Cancelled)
        ));
    }
}
