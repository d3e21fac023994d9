//! TOML configuration parsing and validation.
//!
//! Mirrors the option set enumerated in the spec's design notes: a single
//! explicit configuration record, validated eagerly at startup so a bad
//! config fails fast with a non-zero exit code rather than surfacing as a
//! runtime error mid-ingest.

use std::path::Path;

use anyhow::{bail, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub project_id: String,
    pub region: String,
    pub db: DbConfig,
    pub buckets: BucketConfig,
    pub embedding: EmbeddingConfig,
    pub models: ModelConfig,
    pub bus: BusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub instance: String,
    pub user: String,
    pub password: String,
    pub name: String,
    #[serde(default = "default_pool_min")]
    pub pool_min: u32,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
}

fn default_pool_min() -> u32 {
    1
}
fn default_pool_max() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketConfig {
    pub raw_bucket: String,
    pub processed_bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub embedding_model: String,
    pub generative_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub topic: String,
    #[serde(default = "default_subscription_concurrency")]
    pub subscription_concurrency: usize,
}

fn default_subscription_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-request token ceiling for batching (spec section 4.5: 18,000).
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
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
fn default_token_budget() -> usize {
    18_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            token_budget: default_token_budget(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap: usize,
    pub whitespace_chunk_size: usize,
    pub whitespace_chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 800,
            overlap: 200,
            whitespace_chunk_size: 10_000,
            whitespace_chunk_overlap: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_context_chunks: usize,
    pub max_chat_title_length: usize,
    pub url_fetch_retries: u32,
    pub url_fetch_backoff_base_seconds: u64,
    pub polite_delay_seconds: u64,
    pub refinement_max_iterations: u32,
    pub rrf_k: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_context_chunks: 5,
            max_chat_title_length: 80,
            url_fetch_retries: 5,
            url_fetch_backoff_base_seconds: 2,
            polite_delay_seconds: 2,
            refinement_max_iterations: 3,
            rrf_k: 60.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Load and validate a TOML config file. Mirrors the validation discipline
/// of the teacher's `load_config`: every invariant that would otherwise
/// surface as a confusing runtime error is checked once, here, at startup.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config {}: {}", path.display(), e))?;
    let config: Config = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing config {}: {}", path.display(), e))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_tokens {
        bail!("chunking.overlap must be < chunking.max_tokens");
    }
    if config.chunking.whitespace_chunk_overlap >= config.chunking.whitespace_chunk_size {
        bail!("chunking.whitespace_chunk_overlap must be < whitespace_chunk_size");
    }
    if config.retrieval.max_context_chunks < 1 {
        bail!("retrieval.max_context_chunks must be >= 1");
    }
    if config.db.pool_min > config.db.pool_max {
        bail!("db.pool_min must be <= db.pool_max");
    }
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            bail!("embedding.model is required when embedding.provider is not 'disabled'");
        }
        if config.embedding.dims.is_none() && config.embedding.provider != "local" {
            bail!("embedding.dims is required for provider '{}'", config.embedding.provider);
        }
        match config.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => bail!("embedding.provider must be one of disabled/openai/ollama/local, got '{}'", other),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> &'static str {
        r#"
project_id = "proj"
region = "us-central1"

[db]
instance = "proj:region:instance"
user = "app"
password = "secret"
name = "docs"

[buckets]
raw_bucket = "raw"
processed_bucket = "processed"

[embedding]
provider = "disabled"

[models]
embedding_model = "text-embedding-004"
generative_model = "gemini-1.5-flash"

[bus]
topic = "ingest-topic"
"#
    }

    #[test]
    fn loads_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, base_toml()).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.project_id, "proj");
        assert_eq!(config.retrieval.max_context_chunks, 5);
        assert_eq!(config.chunking.max_tokens, 800);
    }

    #[test]
    fn rejects_overlap_ge_max_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut toml = base_toml().to_string();
        toml.push_str("\n[chunking]\nmax_tokens = 100\noverlap = 100\n");
        std::fs::write(&path, toml).unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_enabled_embedding_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let toml = base_toml().replace(
            "[embedding]\nprovider = \"disabled\"",
            "[embedding]\nprovider = \"openai\"",
        );
        std::fs::write(&path, toml).unwrap();
        assert!(load_config(&path).is_err());
    }
}
