//! Knowledge store trait — persistent `(vector, text)` index.
//!
//! The pipeline writes every prompt and every answer into the store and
//! reads the nearest entries back as context for later prompts. Entries are
//! keyed by unique, request-local ids, so no cross-request locking is needed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// A single stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Unique, time-derived id
    pub id: String,

    /// The stored text
    pub text: String,

    /// Pooled, normalized embedding of `text`
    pub vector: Vec<f32>,

    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(id: impl Into<String>, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            vector,
            created_at: Utc::now(),
        }
    }
}

/// Kind of text being remembered; decides the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Prompt,
    Response,
    Note,
}

impl EntryKind {
    fn prefix(self) -> &'static str {
        match self {
            EntryKind::Prompt => "prompt",
            EntryKind::Response => "response",
            EntryKind::Note => "note",
        }
    }

    /// A fresh id such as `prompt-0190f0e2-…`. UUID v7 is time-ordered, so
    /// ids sort by creation and never collide within a millisecond.
    pub fn fresh_id(self) -> String {
        format!("{}-{}", self.prefix(), Uuid::now_v7())
    }
}

/// The core KnowledgeStore trait.
///
/// Implementations: in-memory, JSONL file, Chroma.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// The backend name (e.g., "memory", "file", "chroma").
    fn name(&self) -> &str;

    /// Insert or overwrite the entry with `entry.id`.
    async fn upsert(&self, entry: KnowledgeEntry) -> Result<(), StoreError>;

    /// Texts of the `k` nearest entries, nearest first (store-native order).
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<String>, StoreError>;

    /// Total entry count.
    async fn count(&self) -> Result<usize, StoreError>;
}
