//! Wiring from configuration to a ready pipeline.
//!
//! Every command builds its components here, so a misconfigured model file
//! or an unreachable collection fails once, at startup.

use std::path::Path;
use std::sync::Arc;

use ragline_agent::{Agent, EmbedderAdapter, KnowledgeAdapter, Pipeline, RetryPolicy};
use ragline_config::{AppConfig, StoreBackend};
use ragline_core::{ConfigurationError, KnowledgeStore};
use ragline_memory::{ChromaStore, FileStore, InMemoryStore};
use tracing::info;

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load(path).map_err(|e| format!("Failed to load config: {e}"))?)
}

pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn KnowledgeStore>, ConfigurationError> {
    let store: Arc<dyn KnowledgeStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        StoreBackend::File => Arc::new(FileStore::open(
            &config.store.resolved_path(),
            &config.store.collection,
        )),
        StoreBackend::Chroma => Arc::new(
            ChromaStore::connect(&config.store.chroma_url, &config.store.collection).await?,
        ),
    };
    info!(store = store.name(), collection = %config.store.collection, "Knowledge store ready");
    Ok(store)
}

pub async fn build_knowledge(config: &AppConfig) -> Result<KnowledgeAdapter, ConfigurationError> {
    let embedder = blocking(config, ragline_providers::build_embedder).await?;
    let store = build_store(config).await?;
    info!(embedder = embedder.name(), dimensions = embedder.dimensions(), "Embedder ready");

    Ok(
        KnowledgeAdapter::new(EmbedderAdapter::new(embedder), store)
            .with_retry(RetryPolicy::from_config(&config.store)),
    )
}

pub async fn build_pipeline(config: &AppConfig) -> Result<Pipeline, ConfigurationError> {
    config.preflight()?;

    let knowledge = build_knowledge(config).await?;
    let runtime = blocking(config, ragline_providers::build_runtime).await?;
    let counter = blocking(config, |c| Ok(ragline_providers::build_token_counter(c))).await?;
    info!(runtime = runtime.name(), model = runtime.model(), "Model runtime ready");

    Pipeline::from_config(config, runtime, knowledge, counter)
}

pub async fn build_agent(config: &AppConfig) -> Result<Agent, ConfigurationError> {
    let pipeline = build_pipeline(config).await?;
    Ok(Agent::from_config(config, pipeline))
}

/// Model and tokenizer loading blocks, so it runs off the async workers.
async fn blocking<T, F>(config: &AppConfig, build: F) -> Result<T, ConfigurationError>
where
    T: Send + 'static,
    F: FnOnce(&AppConfig) -> Result<T, ConfigurationError> + Send + 'static,
{
    let config = config.clone();
    tokio::task::spawn_blocking(move || build(&config))
        .await
        .map_err(|e| ConfigurationError::LoadFailed {
            what: "component".into(),
            reason: e.to_string(),
        })?
}
