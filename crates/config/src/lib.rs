//! Configuration loading, validation, and management for Ragline.
//!
//! Loads configuration from `~/.ragline/config.toml` with environment
//! variable overrides. Validates all settings at startup; anything wrong here
//! is a fatal `ConfigurationError` and the pipeline never starts.

use ragline_core::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The default prompt template (DeepSeek-R1 distill chat format).
pub const DEFAULT_TEMPLATE: &str =
    "<｜begin▁of▁sentence｜>{system_prompt}<｜User｜>{prompt}<｜Assistant｜>";

/// Placeholder receiving the context + user prompt block.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Placeholder receiving the per-request system prompt.
pub const SYSTEM_PROMPT_PLACEHOLDER: &str = "{system_prompt}";

/// The root configuration structure.
///
/// Maps directly to `~/.ragline/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Agent identity and request handling
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model runtime settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Embedding backend
    #[serde(default)]
    pub embedder: EmbedderConfig,

    /// Knowledge store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Pipeline behaviour (RAG, summarization, chunking)
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Model label reported in every response payload
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// How many requests may be in flight at once (1 = strictly sequential)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

fn default_agent_name() -> String {
    "ragline".into()
}
fn default_model_name() -> String {
    "deepseek-r1-distill-qwen-1.5b".into()
}
fn default_max_concurrent() -> usize {
    1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            model_name: default_model_name(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

/// Which model runtime serves inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// In-process candle runtime over a GGUF file
    #[default]
    Local,
    /// A running llama.cpp `llama-server`
    LlamaServer,
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "llama_server" | "llama-server" | "server" => Ok(Self::LlamaServer),
            other => Err(format!("unknown runtime '{other}' (expected local or llama_server)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub runtime: RuntimeKind,

    /// Path to the GGUF weights (local runtime)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_file: Option<String>,

    /// Path to `tokenizer.json`; defaults to the file next to the weights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_file: Option<String>,

    /// Base URL of `llama-server`
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Layers to offload to the GPU (0 = CPU only)
    #[serde(default)]
    pub gpu_layers: u32,

    /// Context window in tokens
    #[serde(default = "default_context_size")]
    pub context_size: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Hard cap on generated tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Prompt template containing `{prompt}` and `{system_prompt}`
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_context_size() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.6
}
fn default_seed() -> u64 {
    3407
}
fn default_max_tokens() -> u32 {
    512
}
fn default_template() -> String {
    DEFAULT_TEMPLATE.into()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            model_file: None,
            tokenizer_file: None,
            server_url: default_server_url(),
            gpu_layers: 0,
            context_size: default_context_size(),
            temperature: default_temperature(),
            seed: default_seed(),
            max_tokens: default_max_tokens(),
            template: default_template(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Sentence-transformer BERT model via candle
    Bert,
    /// Feature-hashing embedder, no model download
    #[default]
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    #[serde(default)]
    pub kind: EmbedderKind,

    /// HuggingFace repo for the BERT embedder
    #[serde(default = "default_embedding_repo")]
    pub model_repo: String,

    /// Vector width for the hashing embedder
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_repo() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".into()
}
fn default_dimensions() -> usize {
    384
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::default(),
            model_repo: default_embedding_repo(),
            dimensions: default_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
    Chroma,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Collection name (Chroma) / file stem (file backend)
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Directory for the file backend; defaults to `~/.ragline/knowledge`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default = "default_chroma_url")]
    pub chroma_url: String,

    /// Attempts per knowledge write (1 = no retry)
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,

    /// Base delay for exponential backoff between write attempts
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_collection() -> String {
    "ragline".into()
}
fn default_chroma_url() -> String {
    "http://127.0.0.1:8000".into()
}
fn default_write_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    200
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            collection: default_collection(),
            path: None,
            chroma_url: default_chroma_url(),
            write_attempts: default_write_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

impl StoreConfig {
    /// Directory the file backend writes to.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("knowledge"))
    }
}

/// How prompts and contexts are measured when chunking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Never chunk
    None,
    /// `ceil(chars / chars_per_token)`
    #[default]
    CharEstimate,
    /// The model's own tokenizer, when available
    ExactTokenizer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_true")]
    pub rag_enabled: bool,

    #[serde(default = "default_true")]
    pub summarization_enabled: bool,

    #[serde(default)]
    pub chunking: ChunkingStrategy,

    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Tokens of the context window kept free for generation
    #[serde(default = "default_generation_reserve")]
    pub generation_reserve_tokens: u32,

    /// Documents recalled per request
    #[serde(default = "default_recall_k")]
    pub recall_k: usize,

    #[serde(default = "default_stop_sequences")]
    pub stop_sequences: Vec<String>,

    #[serde(default = "default_reasoning_marker")]
    pub reasoning_marker: String,

    /// Literal left behind by failed substitutions upstream
    #[serde(default = "default_artifact")]
    pub artifact: String,

    /// Send one payload per decoded fragment before the terminal payload
    #[serde(default)]
    pub stream_tokens: bool,

    /// Upper bound on one streaming completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}
fn default_chars_per_token() -> usize {
    4
}
fn default_generation_reserve() -> u32 {
    1024
}
fn default_recall_k() -> usize {
    5
}
fn default_stop_sequences() -> Vec<String> {
    vec![
        "<｜User｜>".into(),
        "<｜End｜>".into(),
        "User:".into(),
        "Assistant:".into(),
    ]
}
fn default_reasoning_marker() -> String {
    "</think>".into()
}
fn default_artifact() -> String {
    "undefined".into()
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            rag_enabled: true,
            summarization_enabled: true,
            chunking: ChunkingStrategy::default(),
            chars_per_token: default_chars_per_token(),
            generation_reserve_tokens: default_generation_reserve(),
            recall_k: default_recall_k(),
            stop_sequences: default_stop_sequences(),
            reasoning_marker: default_reasoning_marker(),
            artifact: default_artifact(),
            stream_tokens: false,
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Path precedence: `explicit` > `RAGLINE_CONFIG` > `~/.ragline/config.toml`.
    /// Environment overrides are applied afterwards, then everything is
    /// validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => std::env::var("RAGLINE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::config_dir().join("config.toml")),
        };
        let mut config = Self::read_file(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides (highest priority).
    ///
    /// - `MODEL_FILE`, `NGL`, `MODEL_TEMPLATE`, `MODEL_NAME`
    /// - `AGENT_NAME`, `CHROMA_COLLECTION`
    /// - `RAGLINE_RUNTIME`, `RAGLINE_SERVER_URL`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(file) = lookup("MODEL_FILE") {
            self.model.model_file = Some(file);
        }
        if let Some(ngl) = lookup("NGL") {
            self.model.gpu_layers = ngl.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("NGL must be a non-negative integer, got '{ngl}'"))
            })?;
        }
        if let Some(template) = lookup("MODEL_TEMPLATE") {
            self.model.template = template;
        }
        if let Some(name) = lookup("MODEL_NAME") {
            self.agent.model_name = name;
        }
        if let Some(name) = lookup("AGENT_NAME") {
            self.agent.name = name;
        }
        if let Some(collection) = lookup("CHROMA_COLLECTION") {
            self.store.collection = collection;
        }
        if let Some(runtime) = lookup("RAGLINE_RUNTIME") {
            self.model.runtime = runtime.parse().map_err(ConfigError::ValidationError)?;
        }
        if let Some(url) = lookup("RAGLINE_SERVER_URL") {
            self.model.server_url = url;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragline")
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.context_size <= self.pipeline.generation_reserve_tokens {
            return Err(ConfigError::ValidationError(format!(
                "model.context_size ({}) must exceed pipeline.generation_reserve_tokens ({})",
                self.model.context_size, self.pipeline.generation_reserve_tokens
            )));
        }

        if self.pipeline.recall_k == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.recall_k must be at least 1".into(),
            ));
        }

        for placeholder in [PROMPT_PLACEHOLDER, SYSTEM_PROMPT_PLACEHOLDER] {
            if !self.model.template.contains(placeholder) {
                return Err(ConfigError::ValidationError(format!(
                    "model.template is missing the {placeholder} placeholder"
                )));
            }
        }

        if self.store.collection.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "store.collection must not be empty".into(),
            ));
        }

        if self.store.write_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "store.write_attempts must be at least 1".into(),
            ));
        }

        if self.agent.max_concurrent_requests == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_concurrent_requests must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Startup preconditions that depend on the filesystem.
    ///
    /// A missing model file is a startup failure, never a per-request error.
    pub fn preflight(&self) -> Result<(), ConfigurationError> {
        if self.model.runtime == RuntimeKind::Local {
            let file = self.model.model_file.as_deref().ok_or_else(|| {
                ConfigurationError::ModelFileMissing(
                    "model.model_file is not set (or export MODEL_FILE)".into(),
                )
            })?;
            if !Path::new(file).is_file() {
                return Err(ConfigurationError::ModelFileMissing(file.to_string()));
            }
        }
        Ok(())
    }

    /// Tokens available to the assembled prompt.
    pub fn prompt_budget_tokens(&self) -> usize {
        self.model
            .context_size
            .saturating_sub(self.pipeline.generation_reserve_tokens) as usize
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for ConfigurationError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ReadError { path, reason } | ConfigError::ParseError { path, reason } => {
                ConfigurationError::LoadFailed {
                    what: path.display().to_string(),
                    reason,
                }
            }
            ConfigError::ValidationError(reason) => ConfigurationError::Invalid {
                key: "config".into(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.context_size, 4096);
        assert_eq!(config.model.seed, 3407);
        assert_eq!(config.pipeline.recall_k, 5);
        assert!(config.pipeline.rag_enabled);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.template, config.model.template);
        assert_eq!(parsed.pipeline.stop_sequences, config.pipeline.stop_sequences);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[model]
runtime = "llama_server"
context_size = 8192

[pipeline]
summarization_enabled = false
chunking = "exact_tokenizer"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.runtime, RuntimeKind::LlamaServer);
        assert_eq!(config.model.context_size, 8192);
        assert!(!config.pipeline.summarization_enabled);
        assert!(config.pipeline.rag_enabled);
        assert_eq!(config.pipeline.chunking, ChunkingStrategy::ExactTokenizer);
        assert_eq!(config.store.collection, "ragline");
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.model.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn template_without_placeholders_rejected() {
        let mut config = AppConfig::default();
        config.model.template = "{prompt} only".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("{system_prompt}"));
    }

    #[test]
    fn reserve_must_fit_in_context() {
        let mut config = AppConfig::default();
        config.model.context_size = 512;
        config.pipeline.generation_reserve_tokens = 512;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("MODEL_FILE", "/models/r1.gguf"),
                ("NGL", "33"),
                ("MODEL_NAME", "r1-distill"),
                ("CHROMA_COLLECTION", "history"),
                ("RAGLINE_RUNTIME", "llama-server"),
            ]))
            .unwrap();
        assert_eq!(config.model.model_file.as_deref(), Some("/models/r1.gguf"));
        assert_eq!(config.model.gpu_layers, 33);
        assert_eq!(config.agent.model_name, "r1-distill");
        assert_eq!(config.store.collection, "history");
        assert_eq!(config.model.runtime, RuntimeKind::LlamaServer);
    }

    #[test]
    fn bad_ngl_is_a_validation_error() {
        let mut config = AppConfig::default();
        let err = config.apply_env_overrides(env(&[("NGL", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.agent.name, "ragline");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nname = \"fullmetal\"\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.name, "fullmetal");
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent\nname = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn preflight_requires_model_file_for_local_runtime() {
        let mut config = AppConfig::default();
        assert!(matches!(
            config.preflight(),
            Err(ConfigurationError::ModelFileMissing(_))
        ));

        config.model.model_file = Some("/nonexistent/model.gguf".into());
        assert!(config.preflight().is_err());

        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.gguf");
        std::fs::write(&model, b"GGUF").unwrap();
        config.model.model_file = Some(model.display().to_string());
        assert!(config.preflight().is_ok());
    }

    #[test]
    fn preflight_skips_model_file_for_server_runtime() {
        let mut config = AppConfig::default();
        config.model.runtime = RuntimeKind::LlamaServer;
        assert!(config.preflight().is_ok());
    }

    #[test]
    fn prompt_budget_subtracts_reserve() {
        let config = AppConfig::default();
        assert_eq!(config.prompt_budget_tokens(), 4096 - 1024);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("{system_prompt}"));
        assert!(toml_str.contains("42618"));
    }

    #[test]
    fn config_error_maps_to_configuration_error() {
        let err: ConfigurationError = ConfigError::ValidationError("bad".into()).into();
        assert!(matches!(err, ConfigurationError::Invalid { .. }));
    }

    #[test]
    fn runtime_kind_json_name() {
        let json = serde_json::to_string(&RuntimeKind::LlamaServer).unwrap();
        assert_eq!(json, r#""llama_server""#);
    }
}
