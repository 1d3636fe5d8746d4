//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or no file at all when the
//! default path is used) yields a working configuration rooted at
//! `~/.ragbot`.
//!
//! ```toml
//! [paths]
//! root = "/home/me/.ragbot"        # vector_dbs/ and context_folder/ live here
//!
//! [db]
//! path = "/home/me/.ragbot/personalities.sqlite"
//!
//! [embedding]
//! provider = "local"               # local | openai | ollama | disabled
//! model = "bge-large-en-v1.5"
//!
//! [chunking]
//! buffer_size = 1
//! breakpoint_std_devs = 3.0
//!
//! [retrieval]
//! k = 5
//!
//! [llm]
//! temperature = 0.7
//! max_tokens = 4096
//! max_retries = 2
//!
//! [server]
//! bind = "127.0.0.1:8501"
//! max_image_bytes = 20971520       # 20 MiB
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

fn default_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragbot")
}

impl PathsConfig {
    /// Directory holding one subdirectory per persisted vector index.
    pub fn vector_dbs(&self) -> PathBuf {
        self.root.join("vector_dbs")
    }

    /// Directory holding one subdirectory of source PDFs per index.
    pub fn context_folder(&self) -> PathBuf {
        self.root.join("context_folder")
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DbConfig {
    /// Personality database. Defaults to `<root>/personalities.sqlite`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Sentences on each side combined with a sentence before embedding.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// A breakpoint is placed where the distance exceeds
    /// `mean + breakpoint_std_devs * std_dev`.
    #[serde(default = "default_breakpoint_std_devs")]
    pub breakpoint_std_devs: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            breakpoint_std_devs: default_breakpoint_std_devs(),
        }
    }
}

fn default_buffer_size() -> usize {
    1
}
fn default_breakpoint_std_devs() -> f32 {
    3.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub base_urls: BaseUrls,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
            base_urls: BaseUrls::default(),
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout() -> u64 {
    120
}

/// Per-provider API base URLs (the part before `/chat/completions` or
/// `/messages`). Useful for proxies and local test servers.
#[derive(Debug, Deserialize, Clone)]
pub struct BaseUrls {
    #[serde(default = "default_openai_url")]
    pub openai: String,
    #[serde(default = "default_anthropic_url")]
    pub anthropic: String,
    #[serde(default = "default_groq_url")]
    pub groq: String,
    #[serde(default = "default_mistral_url")]
    pub mistral: String,
    #[serde(default = "default_ollama_url")]
    pub ollama: String,
}

impl Default for BaseUrls {
    fn default() -> Self {
        Self {
            openai: default_openai_url(),
            anthropic: default_anthropic_url(),
            groq: default_groq_url(),
            mistral: default_mistral_url(),
            ollama: default_ollama_url(),
        }
    }
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_anthropic_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}
fn default_groq_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_mistral_url() -> String {
    "https://api.mistral.ai/v1".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct S3Config {
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted image upload, in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

impl Config {
    /// Configuration with every default, rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig { root: root.into() },
            ..Self::default()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.db
            .path
            .clone()
            .unwrap_or_else(|| self.paths.root.join("personalities.sqlite"))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but falls back to defaults when `path` does not
/// exist. Used for the CLI's implicit default path.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if !config.chunking.breakpoint_std_devs.is_finite() || config.chunking.breakpoint_std_devs < 0.0
    {
        anyhow::bail!("chunking.breakpoint_std_devs must be a non-negative number");
    }

    if config.server.max_image_bytes == 0 {
        anyhow::bail!("server.max_image_bytes must be > 0");
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.chunking.buffer_size, 1);
        assert!((config.llm.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.server.max_image_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn layout_derives_from_root() {
        let config = Config::with_root("/tmp/rb");
        assert_eq!(config.paths.vector_dbs(), PathBuf::from("/tmp/rb/vector_dbs"));
        assert_eq!(
            config.paths.context_folder(),
            PathBuf::from("/tmp/rb/context_folder")
        );
        assert_eq!(config.db_path(), PathBuf::from("/tmp/rb/personalities.sqlite"));
    }

    #[test]
    fn rejects_unknown_embedding_provider() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn remote_embedding_requires_model() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"openai\"\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn rejects_zero_k() {
        let config: Config = toml::from_str("[retrieval]\nk = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }
}
