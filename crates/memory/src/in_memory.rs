//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use ragline_core::{KnowledgeEntry, KnowledgeStore, StoreError};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::vector::nearest_texts;

/// A knowledge store held in a `Vec`. Nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<Vec<KnowledgeEntry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored, in insertion order.
    pub async fn entries(&self) -> Vec<KnowledgeEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, entry: KnowledgeEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(nearest_texts(&entries, vector, k))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().await.len())
    }
}
