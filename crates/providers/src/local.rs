//! Local inference runtime — runs GGUF models directly on your hardware.
//!
//! Uses [Candle](https://github.com/huggingface/candle) (Rust-native ML) to
//! run quantized models in-process. Supported architectures (read from the
//! GGUF `general.architecture` key):
//! - **llama** (Llama 2/3, TinyLlama, Mistral, SmolLM)
//! - **qwen2** (Qwen2 and the DeepSeek-R1 Qwen distills)
//!
//! Weights are loaded once and shared. A single-permit semaphore makes every
//! session exclusive, since the KV cache lives inside the weights. Token
//! generation runs on a blocking thread and is streamed one token id per
//! fragment.

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use candle_transformers::models::quantized_qwen2 as qq2;
use ragline_config::ModelConfig;
use ragline_core::{
    CompletionParams, ConfigurationError, FragmentStream, InferenceError, InferenceSession,
    ModelRuntime, TokenFragment,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, info, warn};

/// End-of-generation markers across the supported model families.
const EOS_CANDIDATES: &[&str] = &[
    "<｜end▁of▁sentence｜>",
    "</s>",
    "<|endoftext|>",
    "<|im_end|>",
    "<|eot_id|>",
];

/// Quantized weights for one of the supported architectures.
enum Weights {
    Llama(qlm::ModelWeights),
    Qwen2(qq2::ModelWeights),
}

impl Weights {
    fn forward(&mut self, input: &Tensor, index_pos: usize) -> candle_core::Result<Tensor> {
        match self {
            Weights::Llama(m) => m.forward(input, index_pos),
            Weights::Qwen2(m) => m.forward(input, index_pos),
        }
    }
}

/// The loaded model state (weights + tokenizer + device).
struct LocalModelState {
    weights: Weights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_ids: Vec<u32>,
    context_size: usize,
}

impl LocalModelState {
    fn load(config: &ModelConfig) -> Result<Self, ConfigurationError> {
        let model_path = config.model_file.as_deref().ok_or_else(|| {
            ConfigurationError::ModelFileMissing("model.model_file is not set".into())
        })?;
        let model_path = Path::new(model_path);
        if !model_path.is_file() {
            return Err(ConfigurationError::ModelFileMissing(
                model_path.display().to_string(),
            ));
        }

        let device = if config.gpu_layers > 0 {
            Device::cuda_if_available(0).map_err(|e| load_failed("GPU device", e))?
        } else {
            Device::Cpu
        };

        info!(path = %model_path.display(), gpu = !device.is_cpu(), "Loading local GGUF model");

        let mut file = std::fs::File::open(model_path).map_err(|e| load_failed("GGUF file", e))?;
        let gguf = gguf_file::Content::read(&mut file).map_err(|e| load_failed("GGUF header", e))?;

        let architecture = gguf
            .metadata
            .get("general.architecture")
            .and_then(|v| v.to_string().ok())
            .cloned()
            .unwrap_or_else(|| "llama".to_string());

        let weights = match architecture.as_str() {
            "qwen2" => Weights::Qwen2(
                qq2::ModelWeights::from_gguf(gguf, &mut file, &device)
                    .map_err(|e| load_failed("model weights", e))?,
            ),
            "llama" | "mistral" => Weights::Llama(
                qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
                    .map_err(|e| load_failed("model weights", e))?,
            ),
            other => {
                return Err(ConfigurationError::Unsupported(format!(
                    "GGUF architecture '{other}' (supported: llama, qwen2)"
                )));
            }
        };

        let tokenizer_path = tokenizer_path(config, model_path);
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            ConfigurationError::LoadFailed {
                what: format!("tokenizer {}", tokenizer_path.display()),
                reason: e.to_string(),
            }
        })?;

        let eos_token_ids: Vec<u32> = EOS_CANDIDATES
            .iter()
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();
        if eos_token_ids.is_empty() {
            warn!("Tokenizer defines no known end-of-sequence token; generation ends at max_tokens");
        }

        info!(
            architecture = %architecture,
            eos_tokens = ?eos_token_ids,
            "Local model loaded successfully"
        );

        Ok(Self {
            weights,
            tokenizer,
            device,
            eos_token_ids,
            context_size: config.context_size as usize,
        })
    }

    /// Generate tokens for `prompt`, sending each id through `tx` as it is
    /// sampled. Stops at EOS, a stop sequence, `max_tokens`, the context
    /// window, an abort request or a dropped receiver.
    fn generate(
        &mut self,
        prompt: &str,
        params: &CompletionParams,
        abort: &AtomicBool,
        tx: &mpsc::Sender<Result<TokenFragment, InferenceError>>,
    ) -> Result<(), InferenceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| InferenceError::Backend(format!("Tokenization failed: {e}")))?;
        let prompt_tokens = encoding.get_ids();

        if prompt_tokens.len() >= self.context_size {
            return Err(InferenceError::Backend(format!(
                "prompt is {} tokens, context window is {}",
                prompt_tokens.len(),
                self.context_size
            )));
        }
        let room = self.context_size - prompt_tokens.len();
        let max_tokens = (params.max_tokens as usize).min(room);

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens,
            temperature = params.temperature,
            "Starting local generation"
        );

        let temperature = (params.temperature > 0.0).then_some(params.temperature as f64);
        let mut logits_processor = LogitsProcessor::new(params.seed, temperature, None);

        let mut input = Tensor::new(prompt_tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let mut index_pos = 0;
        let mut generated: Vec<u32> = Vec::new();

        for _ in 0..max_tokens {
            if abort.load(Ordering::Relaxed) {
                debug!("Generation aborted by session release");
                break;
            }

            let seq_len = input.dim(1).map_err(map_candle_err)?;
            let logits = self
                .weights
                .forward(&input, index_pos)
                .and_then(|l| l.squeeze(0))
                .map_err(map_candle_err)?;
            index_pos += seq_len;

            let next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;
            if self.eos_token_ids.contains(&next_token) {
                break;
            }

            generated.push(next_token);
            if tx
                .blocking_send(Ok(TokenFragment::from_tokens(vec![next_token])))
                .is_err()
            {
                break;
            }

            if !params.stop_sequences.is_empty() {
                let text = self
                    .tokenizer
                    .decode(&generated, false)
                    .map_err(|e| InferenceError::Decode(e.to_string()))?;
                if params.stop_sequences.iter().any(|s| text.contains(s.as_str())) {
                    break;
                }
            }

            input = Tensor::new(&[next_token][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        debug!(completion_tokens = generated.len(), "Generation complete");
        Ok(())
    }
}

fn tokenizer_path(config: &ModelConfig, model_path: &Path) -> PathBuf {
    config
        .tokenizer_file
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| model_path.with_file_name("tokenizer.json"))
}

fn load_failed(what: &str, err: impl std::fmt::Display) -> ConfigurationError {
    ConfigurationError::LoadFailed {
        what: what.to_string(),
        reason: err.to_string(),
    }
}

fn map_candle_err(e: candle_core::Error) -> InferenceError {
    InferenceError::Backend(format!("Candle inference error: {e}"))
}

/// A model runtime that runs GGUF weights in-process via Candle.
pub struct LocalRuntime {
    state: Arc<Mutex<LocalModelState>>,
    tokenizer: Tokenizer,
    permit: Arc<Semaphore>,
    model: String,
}

impl LocalRuntime {
    /// Load weights and tokenizer. Blocking and slow; call from
    /// `spawn_blocking` or before the async runtime is busy.
    pub fn load(config: &ModelConfig, model: impl Into<String>) -> Result<Self, ConfigurationError> {
        let state = LocalModelState::load(config)?;
        Ok(Self {
            tokenizer: state.tokenizer.clone(),
            state: Arc::new(Mutex::new(state)),
            permit: Arc::new(Semaphore::new(1)),
            model: model.into(),
        })
    }
}

#[async_trait]
impl ModelRuntime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn create_session(&self) -> Result<Box<dyn InferenceSession>, InferenceError> {
        let permit = self
            .permit
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| InferenceError::SessionUnavailable(e.to_string()))?;

        Ok(Box::new(LocalSession {
            state: self.state.clone(),
            tokenizer: self.tokenizer.clone(),
            permit: Some(permit),
            abort: Arc::new(AtomicBool::new(false)),
            streaming: false,
            decoded_tokens: Vec::new(),
            emitted_bytes: 0,
        }))
    }
}

/// An exclusive session over the shared weights.
struct LocalSession {
    state: Arc<Mutex<LocalModelState>>,
    tokenizer: Tokenizer,
    permit: Option<OwnedSemaphorePermit>,
    abort: Arc<AtomicBool>,
    streaming: bool,
    decoded_tokens: Vec<u32>,
    emitted_bytes: usize,
}

#[async_trait]
impl InferenceSession for LocalSession {
    async fn stream_completion(
        &mut self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<FragmentStream, InferenceError> {
        if self.permit.is_none() {
            return Err(InferenceError::SessionUnavailable("session already released".into()));
        }
        if self.streaming {
            return Err(InferenceError::SessionUnavailable(
                "a completion is already streaming on this session".into(),
            ));
        }
        self.streaming = true;

        let (tx, rx) = mpsc::channel(64);
        let state = self.state.clone();
        let abort = self.abort.clone();
        let prompt = prompt.to_string();
        let params = params.clone();

        tokio::task::spawn_blocking(move || {
            let result = match state.lock() {
                Ok(mut guard) => guard.generate(&prompt, &params, &abort, &tx),
                Err(_) => Err(InferenceError::Backend("model state poisoned".into())),
            };
            if let Err(e) = result {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(rx)
    }

    /// Incremental decode: re-decode everything seen so far and return only
    /// the new suffix, holding back output while a multi-byte character is
    /// still incomplete.
    fn decode(&mut self, fragment: &TokenFragment) -> Result<String, InferenceError> {
        self.decoded_tokens.extend_from_slice(&fragment.tokens);
        let text = self
            .tokenizer
            .decode(&self.decoded_tokens, false)
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        if text.ends_with('\u{FFFD}') {
            return Ok(String::new());
        }

        let new = text.get(self.emitted_bytes..).unwrap_or_default().to_string();
        self.emitted_bytes = text.len();
        Ok(new)
    }

    fn free(&mut self) {
        self.abort.store(true, Ordering::Relaxed);
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_defaults_to_sibling_file() {
        let config = ModelConfig::default();
        let path = tokenizer_path(&config, Path::new("/models/r1/model.gguf"));
        assert_eq!(path, PathBuf::from("/models/r1/tokenizer.json"));
    }

    #[test]
    fn explicit_tokenizer_wins() {
        let config = ModelConfig {
            tokenizer_file: Some("/tok/tokenizer.json".into()),
            ..ModelConfig::default()
        };
        let path = tokenizer_path(&config, Path::new("/models/model.gguf"));
        assert_eq!(path, PathBuf::from("/tok/tokenizer.json"));
    }

    #[test]
    fn missing_model_file_is_a_configuration_error() {
        let unset = ModelConfig::default();
        assert!(matches!(
            LocalRuntime::load(&unset, "m"),
            Err(ConfigurationError::ModelFileMissing(_))
        ));

        let absent = ModelConfig {
            model_file: Some("/nonexistent/model.gguf".into()),
            ..ModelConfig::default()
        };
        assert!(matches!(
            LocalRuntime::load(&absent, "m"),
            Err(ConfigurationError::ModelFileMissing(_))
        ));
    }
}
