//! Sentence-transformer embedder (BERT family) via Candle.
//!
//! Downloads `config.json`, `tokenizer.json` and `model.safetensors` from the
//! HuggingFace Hub (cached) and returns the last hidden state, one row per
//! token. Pooling happens in the pipeline.

use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::api::sync::Api;
use ragline_core::{ConfigurationError, Embedder, EmbeddingError, TokenEmbeddings};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

/// Longest input the BERT position table accepts.
const MAX_SEQUENCE: usize = 512;

struct BertState {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    hidden_size: usize,
}

/// Embedder backed by a BERT-style sentence-transformer.
pub struct BertEmbedder {
    state: Arc<BertState>,
    repo: String,
}

impl BertEmbedder {
    /// Load `repo` (e.g. `sentence-transformers/all-MiniLM-L6-v2`). Blocking.
    pub fn load(repo: &str) -> Result<Self, ConfigurationError> {
        let fail = |what: &str, e: &dyn std::fmt::Display| ConfigurationError::LoadFailed {
            what: format!("{what} from {repo}"),
            reason: e.to_string(),
        };

        info!(repo, "Loading embedding model");

        let api = Api::new().map_err(|e| fail("HuggingFace Hub API", &e))?;
        let hub = api.model(repo.to_string());
        let config_path = hub.get("config.json").map_err(|e| fail("config.json", &e))?;
        let tokenizer_path = hub.get("tokenizer.json").map_err(|e| fail("tokenizer.json", &e))?;
        let weights_path = hub
            .get("model.safetensors")
            .map_err(|e| fail("model.safetensors", &e))?;

        let config_json =
            std::fs::read_to_string(&config_path).map_err(|e| fail("config.json", &e))?;
        let config: Config =
            serde_json::from_str(&config_json).map_err(|e| fail("config.json", &e))?;
        let hidden_size = serde_json::from_str::<serde_json::Value>(&config_json)
            .ok()
            .and_then(|v| v["hidden_size"].as_u64())
            .unwrap_or(384) as usize;

        let mut tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| fail("tokenizer.json", &e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE,
                ..Default::default()
            }))
            .map_err(|e| fail("tokenizer truncation", &e))?;

        let device = Device::Cpu;
        // SAFETY: the safetensors file is owned by the hub cache and not
        // modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device) }
            .map_err(|e| fail("model.safetensors", &e))?;
        let model = BertModel::load(vb, &config).map_err(|e| fail("BERT weights", &e))?;

        Ok(Self {
            state: Arc::new(BertState {
                model,
                tokenizer,
                device,
                hidden_size,
            }),
            repo: repo.to_string(),
        })
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl BertState {
    fn hidden_states(&self, text: &str) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let backend = |e: &dyn std::fmt::Display| EmbeddingError::Backend(e.to_string());

        let encoding = self.tokenizer.encode(text, true).map_err(|e| backend(&e))?;
        let ids = Tensor::new(encoding.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| backend(&e))?;
        let type_ids = ids.zeros_like().map_err(|e| backend(&e))?;
        let mask = Tensor::new(encoding.get_attention_mask(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| backend(&e))?;

        self.model
            .forward(&ids, &type_ids, Some(&mask))
            .and_then(|out| out.squeeze(0))
            .and_then(|out| out.to_vec2::<f32>())
            .map_err(|e| backend(&e))
    }
}

#[async_trait]
impl Embedder for BertEmbedder {
    fn name(&self) -> &str {
        "bert"
    }

    fn dimensions(&self) -> usize {
        self.state.hidden_size
    }

    async fn token_embeddings(&self, text: &str) -> Result<TokenEmbeddings, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let state = self.state.clone();
        let text = text.to_string();
        let rows = tokio::task::spawn_blocking(move || state.hidden_states(&text))
            .await
            .map_err(|e| EmbeddingError::Backend(format!("Embedding task failed: {e}")))??;

        Ok(TokenEmbeddings::new(rows))
    }
}
