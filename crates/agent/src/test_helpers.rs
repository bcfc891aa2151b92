//! Test doubles for the pipeline: scripted runtimes, embedders, an
//! in-memory store and a recording gateway.
//!
//! Shared by unit tests and by the `tests/` integration suite.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ragline_core::{
    CompletionParams, EmbeddingError, Embedder, FragmentStream, GatewayError, InboundPrompt,
    InferenceError, InferenceSession, KnowledgeEntry, KnowledgeStore, MessagingGateway,
    ModelRuntime, ResponsePayload, StoreError, TokenEmbeddings, TokenFragment,
};
use tokio::sync::mpsc;

// ── Runtime ─────────────────────────────────────────────────────────────

/// One step of a scripted completion stream.
#[derive(Debug, Clone)]
pub enum Step {
    Emit(TokenFragment),
    Wait(Duration),
    Fail(String),
}

impl Step {
    pub fn piece(text: &str) -> Self {
        Step::Emit(TokenFragment::from_piece(text))
    }
}

#[derive(Default)]
struct RuntimeStats {
    created: AtomicUsize,
    freed: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

/// Runtime whose sessions replay scripts in order; the last script repeats.
pub struct MockRuntime {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    last: Mutex<Vec<Step>>,
    stats: Arc<RuntimeStats>,
    fail_create: bool,
    model: String,
}

impl MockRuntime {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            last: Mutex::new(Vec::new()),
            stats: Arc::new(RuntimeStats::default()),
            fail_create: false,
            model: "mock-model".into(),
        }
    }

    /// Each session answers with the next reply as a single fragment.
    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| vec![Step::piece(r)]).collect())
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.into();
        self
    }

    pub fn created(&self) -> usize {
        self.stats.created.load(Ordering::SeqCst)
    }

    pub fn freed(&self) -> usize {
        self.stats.freed.load(Ordering::SeqCst)
    }

    /// Prompts passed to `stream_completion`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.stats.prompts.lock().unwrap().clone()
    }

    fn next_script(&self) -> Vec<Step> {
        let mut last = self.last.lock().unwrap();
        if let Some(script) = self.scripts.lock().unwrap().pop_front() {
            *last = script;
        }
        last.clone()
    }
}

#[async_trait]
impl ModelRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn create_session(&self) -> Result<Box<dyn InferenceSession>, InferenceError> {
        if self.fail_create {
            return Err(InferenceError::SessionUnavailable("mock refuses sessions".into()));
        }
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            script: self.next_script(),
            stats: self.stats.clone(),
        }))
    }
}

struct MockSession {
    script: Vec<Step>,
    stats: Arc<RuntimeStats>,
}

#[async_trait]
impl InferenceSession for MockSession {
    async fn stream_completion(
        &mut self,
        prompt: &str,
        _params: &CompletionParams,
    ) -> Result<FragmentStream, InferenceError> {
        self.stats.prompts.lock().unwrap().push(prompt.to_string());

        let (tx, rx) = mpsc::channel(16);
        let script = self.script.clone();
        tokio::spawn(async move {
            for step in script {
                match step {
                    Step::Wait(d) => tokio::time::sleep(d).await,
                    Step::Emit(fragment) => {
                        if tx.send(Ok(fragment)).await.is_err() {
                            return;
                        }
                    }
                    Step::Fail(reason) => {
                        let _ = tx.send(Err(InferenceError::Stream(reason))).await;
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    fn decode(&mut self, fragment: &TokenFragment) -> Result<String, InferenceError> {
        match &fragment.piece {
            Some(piece) => Ok(piece.clone()),
            None => fragment
                .tokens
                .iter()
                .map(|&t| {
                    char::from_u32(t)
                        .ok_or_else(|| InferenceError::Decode(format!("bad token {t}")))
                })
                .collect(),
        }
    }

    fn free(&mut self) {
        self.stats.freed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Embedders ───────────────────────────────────────────────────────────

/// Returns the same matrix for every input.
pub struct FixedEmbedder {
    rows: Vec<Vec<f32>>,
}

impl FixedEmbedder {
    pub fn new(rows: Vec<Vec<f32>>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn name(&self) -> &str {
        "fixed"
    }

    fn dimensions(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    async fn token_embeddings(&self, _text: &str) -> Result<TokenEmbeddings, EmbeddingError> {
        Ok(TokenEmbeddings::new(self.rows.clone()))
    }
}

/// One row per word: letter frequencies plus a bucket for other characters.
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn name(&self) -> &str {
        "letters"
    }

    fn dimensions(&self) -> usize {
        27
    }

    async fn token_embeddings(&self, text: &str) -> Result<TokenEmbeddings, EmbeddingError> {
        let rows = text
            .split_whitespace()
            .map(|word| {
                let mut row = vec![0.0f32; 27];
                for c in word.to_lowercase().chars() {
                    let slot = if c.is_ascii_lowercase() {
                        (c as u8 - b'a') as usize
                    } else {
                        26
                    };
                    row[slot] += 1.0;
                }
                row
            })
            .collect();
        Ok(TokenEmbeddings::new(rows))
    }
}

/// Always fails with a backend error.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimensions(&self) -> usize {
        4
    }

    async fn token_embeddings(&self, _text: &str) -> Result<TokenEmbeddings, EmbeddingError> {
        Err(EmbeddingError::Backend("embedder offline".into()))
    }
}

// ── Store ───────────────────────────────────────────────────────────────

/// Brute-force cosine store; can fail its first `n` writes.
#[derive(Default)]
pub struct MockStore {
    entries: Mutex<Vec<KnowledgeEntry>>,
    failures_left: AtomicUsize,
    write_calls: AtomicUsize,
}

impl MockStore {
    pub fn failing_writes(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.text.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl KnowledgeStore for MockStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upsert(&self, entry: KnowledgeEntry) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("mock write failure".into()));
        }

        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().unwrap();
        let mut scored: Vec<(f32, &KnowledgeEntry)> =
            entries.iter().map(|e| (cosine(vector, &e.vector), e)).collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, e)| e.text.clone())
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.lock().unwrap().len())
    }
}

// ── Gateway ─────────────────────────────────────────────────────────────

/// Yields a fixed list of prompts, then closes; records every payload.
pub struct RecordingGateway {
    inbound: Mutex<Vec<InboundPrompt>>,
    sent: Arc<Mutex<Vec<(String, ResponsePayload)>>>,
}

impl RecordingGateway {
    pub fn new(prompts: Vec<InboundPrompt>) -> Self {
        Self {
            inbound: Mutex::new(prompts),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sent(&self) -> Vec<(String, ResponsePayload)> {
        self.sent.lock().unwrap().clone()
    }

    /// Terminal payloads only.
    pub fn terminal(&self) -> Vec<(String, ResponsePayload)> {
        self.sent()
            .into_iter()
            .filter(|(_, p)| p.completed)
            .collect()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<mpsc::Receiver<InboundPrompt>, GatewayError> {
        let prompts = std::mem::take(&mut *self.inbound.lock().unwrap());
        let (tx, rx) = mpsc::channel(prompts.len().max(1));
        for prompt in prompts {
            tx.send(prompt).await.map_err(|_| GatewayError::Closed)?;
        }
        Ok(rx)
    }

    async fn send_response(
        &self,
        request_id: &str,
        payload: ResponsePayload,
    ) -> Result<(), GatewayError> {
        self.sent
            .lock()
            .unwrap()
            .push((request_id.to_string(), payload));
        Ok(())
    }
}
