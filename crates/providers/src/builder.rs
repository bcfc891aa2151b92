//! Build runtimes, embedders and token counters from configuration.
//!
//! Loading local weights is blocking; call these from `spawn_blocking` when
//! an async runtime is already serving.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ragline_config::{AppConfig, ChunkingStrategy, EmbedderKind, RuntimeKind};
use ragline_core::{ConfigurationError, Embedder, ModelRuntime, TokenCounter};
use tracing::warn;

use crate::hashing::HashingEmbedder;
use crate::llama_server::LlamaServerRuntime;

/// Build the configured model runtime.
pub fn build_runtime(config: &AppConfig) -> Result<Arc<dyn ModelRuntime>, ConfigurationError> {
    let model = config.agent.model_name.clone();
    match config.model.runtime {
        RuntimeKind::LlamaServer => Ok(Arc::new(LlamaServerRuntime::new(
            &config.model.server_url,
            model,
        ))),
        RuntimeKind::Local => build_local_runtime(config, model),
    }
}

#[cfg(feature = "local")]
fn build_local_runtime(
    config: &AppConfig,
    model: String,
) -> Result<Arc<dyn ModelRuntime>, ConfigurationError> {
    Ok(Arc::new(crate::local::LocalRuntime::load(&config.model, model)?))
}

#[cfg(not(feature = "local"))]
fn build_local_runtime(
    _config: &AppConfig,
    _model: String,
) -> Result<Arc<dyn ModelRuntime>, ConfigurationError> {
    Err(ConfigurationError::Unsupported(
        "the local runtime needs the `local` feature; rebuild with --features local \
         or set model.runtime = \"llama_server\""
            .into(),
    ))
}

/// Build the configured embedder.
pub fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>, ConfigurationError> {
    match config.embedder.kind {
        EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(config.embedder.dimensions))),
        EmbedderKind::Bert => build_bert(&config.embedder.model_repo),
    }
}

#[cfg(feature = "local")]
fn build_bert(repo: &str) -> Result<Arc<dyn Embedder>, ConfigurationError> {
    Ok(Arc::new(crate::bert::BertEmbedder::load(repo)?))
}

#[cfg(not(feature = "local"))]
fn build_bert(repo: &str) -> Result<Arc<dyn Embedder>, ConfigurationError> {
    Err(ConfigurationError::Unsupported(format!(
        "embedder '{repo}' needs the `local` feature; set embedder.kind = \"hashing\""
    )))
}

/// Exact token counter for `ChunkingStrategy::ExactTokenizer`, if one can be
/// loaded. `None` means callers fall back to the character estimate.
pub fn build_token_counter(config: &AppConfig) -> Option<Arc<dyn TokenCounter>> {
    if config.pipeline.chunking != ChunkingStrategy::ExactTokenizer {
        return None;
    }

    let path = tokenizer_file(config)?;
    load_counter(&path)
}

fn tokenizer_file(config: &AppConfig) -> Option<PathBuf> {
    config.model.tokenizer_file.as_ref().map(PathBuf::from).or_else(|| {
        config
            .model
            .model_file
            .as_ref()
            .map(|f| Path::new(f).with_file_name("tokenizer.json"))
    })
}

#[cfg(feature = "local")]
fn load_counter(path: &Path) -> Option<Arc<dyn TokenCounter>> {
    match crate::tokenizer::TokenizerCounter::from_file(path) {
        Ok(counter) => Some(Arc::new(counter)),
        Err(e) => {
            warn!(error = %e, "Exact tokenizer unavailable, using character estimate");
            None
        }
    }
}

#[cfg(not(feature = "local"))]
fn load_counter(path: &Path) -> Option<Arc<dyn TokenCounter>> {
    warn!(
        path = %path.display(),
        "Exact tokenizer needs the `local` feature, using character estimate"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llama_server_runtime_from_config() {
        let mut config = AppConfig::default();
        config.model.runtime = RuntimeKind::LlamaServer;
        config.agent.model_name = "r1".into();

        let runtime = build_runtime(&config).unwrap();
        assert_eq!(runtime.name(), "llama_server");
        assert_eq!(runtime.model(), "r1");
    }

    #[test]
    fn hashing_embedder_from_config() {
        let mut config = AppConfig::default();
        config.embedder.dimensions = 128;
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.name(), "hashing");
        assert_eq!(embedder.dimensions(), 128);
    }

    #[test]
    fn no_counter_unless_exact_chunking() {
        let config = AppConfig::default();
        assert!(build_token_counter(&config).is_none());
    }

    #[test]
    fn exact_chunking_without_tokenizer_falls_back() {
        let mut config = AppConfig::default();
        config.pipeline.chunking = ChunkingStrategy::ExactTokenizer;
        config.model.tokenizer_file = Some("/nonexistent/tokenizer.json".into());
        assert!(build_token_counter(&config).is_none());
    }

    #[test]
    fn tokenizer_file_defaults_next_to_model() {
        let mut config = AppConfig::default();
        config.model.model_file = Some("/models/r1.gguf".into());
        assert_eq!(
            tokenizer_file(&config),
            Some(PathBuf::from("/models/tokenizer.json"))
        );
    }
}
