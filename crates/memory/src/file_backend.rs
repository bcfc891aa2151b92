//! File-based knowledge store — persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded `KnowledgeEntry`, vector included.
//!
//! Storage location: `<dir>/<collection>.jsonl`, by default
//! `~/.ragline/knowledge/ragline.jsonl`.

use async_trait::async_trait;
use ragline_core::{KnowledgeEntry, KnowledgeStore, StoreError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::vector::nearest_texts;

/// A file-backed knowledge store using JSONL (one JSON object per line).
///
/// Entries are loaded into memory on creation. New ids are appended to the
/// file; overwriting an existing id rewrites it.
pub struct FileStore {
    path: PathBuf,
    entries: Arc<RwLock<Vec<KnowledgeEntry>>>,
}

impl FileStore {
    /// Open the store at `dir/<collection>.jsonl`.
    pub fn open(dir: &Path, collection: &str) -> Self {
        Self::with_path(dir.join(format!("{collection}.jsonl")))
    }

    /// Open the store at an explicit file path.
    ///
    /// If the file does not exist, starts empty (file created on first write).
    pub fn with_path(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "File knowledge store loaded");
        Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<KnowledgeEntry> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<KnowledgeEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted knowledge entry");
                    None
                }
            })
            .collect()
    }

    async fn ensure_parent(&self, id: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_error(id, format!("create directory: {e}")))?;
        }
        Ok(())
    }

    async fn append(&self, entry: &KnowledgeEntry) -> Result<(), StoreError> {
        self.ensure_parent(&entry.id).await?;

        let mut line = serde_json::to_string(entry).map_err(|e| write_error(&entry.id, e))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| write_error(&entry.id, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| write_error(&entry.id, e))?;
        file.flush().await.map_err(|e| write_error(&entry.id, e))
    }

    async fn rewrite(&self, entries: &[KnowledgeEntry], id: &str) -> Result<(), StoreError> {
        self.ensure_parent(id).await?;

        let mut content = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry).map_err(|e| write_error(id, e))?;
            content.push_str(&line);
            content.push('\n');
        }

        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| write_error(id, e))
    }
}

fn write_error(id: &str, reason: impl ToString) -> StoreError {
    StoreError::Write {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl KnowledgeStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn upsert(&self, entry: KnowledgeEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        match entries.iter().position(|e| e.id == entry.id) {
            Some(index) => {
                let id = entry.id.clone();
                entries[index] = entry;
                self.rewrite(&entries, &id).await
            }
            None => {
                self.append(&entry).await?;
                entries.push(entry);
                Ok(())
            }
        }
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(nearest_texts(&entries, vector, k))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().await.len())
    }
}
