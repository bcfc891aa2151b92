//! Knowledge adapter: remember texts, recall context.

use std::sync::Arc;
use std::time::Duration;

use ragline_config::StoreConfig;
use ragline_core::{Error, KnowledgeEntry, KnowledgeStore, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::embedding::EmbedderAdapter;

/// Bounded exponential backoff for store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            attempts: config.write_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
        }
    }

    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Embeds text on the way in and out of a [`KnowledgeStore`].
#[derive(Clone)]
pub struct KnowledgeAdapter {
    embedder: EmbedderAdapter,
    store: Arc<dyn KnowledgeStore>,
    retry: RetryPolicy,
}

impl KnowledgeAdapter {
    pub fn new(embedder: EmbedderAdapter, store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            embedder,
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    pub fn embedder(&self) -> &EmbedderAdapter {
        &self.embedder
    }

    /// Embed `text` and upsert it under `id`. An existing entry with the
    /// same id is overwritten.
    pub async fn remember(
        &self,
        text: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let vector = self.embedder.embed_cancellable(text, cancel).await?;
        let entry = KnowledgeEntry::new(id, text, vector);

        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Cancelled.into()),
                result = self.store.upsert(entry.clone()) => result,
            };

            match result {
                Ok(()) => {
                    debug!(id, store = self.store.name(), "Entry remembered");
                    return Ok(());
                }
                Err(e) if attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(id, attempt, error = %e, ?delay, "Store write failed, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(StoreError::Cancelled.into()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(into_write_error(id, e).into()),
            }
        }
    }

    /// Texts of the `k` nearest entries to `query`, joined with `"\n"` in
    /// store order. A blank query recalls nothing.
    pub async fn recall(
        &self,
        query: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        if query.trim().is_empty() {
            return Ok(String::new());
        }

        let vector = self.embedder.embed_cancellable(query, cancel).await?;
        let texts = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled.into()),
            texts = self.store.query(&vector, k) => texts?,
        };
        debug!(matches = texts.len(), k, "Recalled context");
        Ok(texts.join("\n"))
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store.count().await
    }
}

fn into_write_error(id: &str, error: StoreError) -> StoreError {
    match error {
        StoreError::Write { .. } | StoreError::Cancelled => error,
        other => StoreError::Write {
            id: id.to_string(),
            reason: other.to_string(),
        },
    }
}
