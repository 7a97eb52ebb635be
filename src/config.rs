//! TOML configuration.
//!
//! Every section is optional and falls back to defaults, so an empty file is
//! a valid configuration. [`load_config`] validates cross-field constraints
//! that serde cannot express.
//!
//! ```toml
//! [chunking]
//! target_words = 800
//! min_words = 400
//! max_words = 1200
//!
//! [run]
//! min_length_ratio = 1.1
//! inter_chunk_delay_secs = 15
//!
//! [backend]
//! kind = "provider"
//!
//! [models.gpt4]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o"
//! api_key_env = "OPENAI_API_KEY"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ModelVariant;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_words")]
    pub target_words: usize,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_words: default_target_words(),
            min_words: default_min_words(),
            max_words: default_max_words(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_words == 0 {
            anyhow::bail!("chunking.min_words must be > 0");
        }
        if self.min_words > self.target_words || self.target_words > self.max_words {
            anyhow::bail!(
                "chunking sizes must satisfy min_words <= target_words <= max_words (got {} / {} / {})",
                self.min_words,
                self.target_words,
                self.max_words
            );
        }
        if self.max_words <= self.min_words {
            anyhow::bail!("chunking.max_words must be greater than chunking.min_words");
        }
        Ok(())
    }
}

fn default_target_words() -> usize {
    800
}
fn default_min_words() -> usize {
    400
}
fn default_max_words() -> usize {
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    #[serde(default = "default_min_length_ratio")]
    pub min_length_ratio: f64,
    /// Pause between chunk dispatches. `0` disables the delay.
    #[serde(default)]
    pub inter_chunk_delay_secs: u64,
    /// Upper bound on a single chunk's backend exchange. `0` disables it.
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub truncate_on_oversize: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            min_length_ratio: default_min_length_ratio(),
            inter_chunk_delay_secs: 0,
            chunk_timeout_secs: default_chunk_timeout_secs(),
            truncate_on_oversize: true,
        }
    }
}

impl RunConfig {
    pub fn inter_chunk_delay(&self) -> Option<Duration> {
        (self.inter_chunk_delay_secs > 0).then(|| Duration::from_secs(self.inter_chunk_delay_secs))
    }

    pub fn chunk_timeout(&self) -> Option<Duration> {
        (self.chunk_timeout_secs > 0).then(|| Duration::from_secs(self.chunk_timeout_secs))
    }
}

fn default_min_length_ratio() -> f64 {
    1.1
}
fn default_chunk_timeout_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Call model providers directly.
    #[default]
    Provider,
    /// Call a rewrite service speaking the frame protocol (e.g. `redraft serve`).
    Remote,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Provider,
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

/// Per-variant endpoint overrides (`[models.claude]`, `[models.gpt4]`, ...).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelsConfig {
    pub claude: Option<ModelConfig>,
    pub gpt4: Option<ModelConfig>,
    pub perplexity: Option<ModelConfig>,
    pub deepseek: Option<ModelConfig>,
}

impl ModelsConfig {
    pub fn get(&self, variant: ModelVariant) -> Option<&ModelConfig> {
        match variant {
            ModelVariant::Claude => self.claude.as_ref(),
            ModelVariant::Gpt4 => self.gpt4.as_ref(),
            ModelVariant::Perplexity => self.perplexity.as_ref(),
            ModelVariant::Deepseek => self.deepseek.as_ref(),
        }
    }
}

/// Endpoint settings for one [`ModelVariant`]. Providers must expose an
/// OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl ModelConfig {
    /// Built-in endpoint for a variant, used when `[models.<variant>]` is absent.
    pub fn builtin(variant: ModelVariant) -> Self {
        let (base_url, model, api_key_env) = match variant {
            ModelVariant::Claude => (
                "https://api.anthropic.com/v1",
                "claude-3-5-sonnet-latest",
                "ANTHROPIC_API_KEY",
            ),
            ModelVariant::Gpt4 => ("https://api.openai.com/v1", "gpt-4o", "OPENAI_API_KEY"),
            ModelVariant::Perplexity => (
                "https://api.perplexity.ai",
                "sonar",
                "PERPLEXITY_API_KEY",
            ),
            ModelVariant::Deepseek => (
                "https://api.deepseek.com",
                "deepseek-chat",
                "DEEPSEEK_API_KEY",
            ),
        };
        Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key_env: api_key_env.to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_max_tokens() -> usize {
    4096
}
fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("./documents")
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "warn,redraft=info".to_string()
}

impl Config {
    /// Configuration used by commands that work without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Endpoint for a variant: the configured one, else the built-in default.
    pub fn model(&self, variant: ModelVariant) -> ModelConfig {
        self.models
            .get(variant)
            .cloned()
            .unwrap_or_else(|| ModelConfig::builtin(variant))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config.chunking.validate()?;

    if !(config.run.min_length_ratio > 0.0 && config.run.min_length_ratio.is_finite()) {
        anyhow::bail!("run.min_length_ratio must be a positive number");
    }

    if config.backend.kind == BackendKind::Remote {
        match config.backend.url.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
            Some(url) => anyhow::bail!("backend.url must be an http(s) URL, got '{}'", url),
            None => anyhow::bail!("backend.url is required when backend.kind = \"remote\""),
        }
    }

    for variant in ModelVariant::ALL {
        let Some(model) = config.models.get(variant) else {
            continue;
        };
        if model.model.trim().is_empty() {
            anyhow::bail!("models.{}.model must not be empty", variant);
        }
        if model.max_tokens == 0 {
            anyhow::bail!("models.{}.max_tokens must be > 0", variant);
        }
    }

    Ok(())
}
