//! TOML configuration with CLI overrides.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below, and `ragx` runs without any config file at all.
//!
//! ```toml
//! [chunking]
//! chunk_size = 800
//! overlap = 120
//! min_chunk_len = 30
//!
//! [embedding]
//! provider = "local"          # local | openai | ollama | hash
//! model = "all-minilm-l6-v2"
//! batch_size = 64
//! max_retries = 1
//! timeout_secs = 30
//!
//! [retrieval]
//! k = 5
//! search = "flat"             # flat | ivf
//! nlist = 64
//! nprobe = 8
//! preview_chars = 500
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use ragx_core::index::BuildOptions;
use ragx_core::search::IvfParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_chunk_len")]
    pub min_chunk_len: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_chunk_len: default_min_chunk_len(),
        }
    }
}

fn default_chunk_size() -> usize {
    ragx_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    ragx_core::chunk::DEFAULT_OVERLAP
}
fn default_min_chunk_len() -> usize {
    ragx_core::dedup::DEFAULT_MIN_CHUNK_LEN
}

/// Provider used when neither the config nor the index names one.
pub const DEFAULT_PROVIDER: &str = "local";

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `None` until set by a file or flag; see [`EmbeddingConfig::provider`].
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    /// The configured provider, or [`DEFAULT_PROVIDER`].
    pub fn provider(&self) -> &str {
        self.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    1
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_search")]
    pub search: String,
    #[serde(default = "default_nlist")]
    pub nlist: usize,
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,
    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            search: default_search(),
            nlist: default_nlist(),
            nprobe: default_nprobe(),
            kmeans_iterations: default_kmeans_iterations(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_search() -> String {
    "flat".to_string()
}
fn default_nlist() -> usize {
    64
}
fn default_nprobe() -> usize {
    8
}
fn default_kmeans_iterations() -> usize {
    10
}
fn default_preview_chars() -> usize {
    500
}

impl Config {
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            chunk_size: self.chunking.chunk_size,
            overlap: self.chunking.overlap,
            min_chunk_len: self.chunking.min_chunk_len,
            batch_size: self.embedding.batch_size,
        }
    }

    pub fn ivf_params(&self) -> IvfParams {
        IvfParams {
            nlist: self.retrieval.nlist,
            nprobe: self.retrieval.nprobe,
            iterations: self.retrieval.kmeans_iterations,
        }
    }

    /// Reject values that cannot produce a usable build or query.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!(ragx_core::IndexError::InvalidConfig(
                "chunking.chunk_size must be > 0".to_string()
            ));
        }
        if self.embedding.batch_size == 0 {
            bail!(ragx_core::IndexError::InvalidConfig(
                "embedding.batch_size must be > 0".to_string()
            ));
        }
        if self.retrieval.k == 0 {
            bail!(ragx_core::IndexError::InvalidConfig(
                "retrieval.k must be >= 1".to_string()
            ));
        }
        if self.retrieval.nlist == 0 || self.retrieval.nprobe == 0 {
            bail!(ragx_core::IndexError::InvalidConfig(
                "retrieval.nlist and retrieval.nprobe must be > 0".to_string()
            ));
        }

        match self.embedding.provider() {
            "local" | "openai" | "ollama" | "hash" => {}
            other => bail!(ragx_core::IndexError::InvalidConfig(format!(
                "unknown embedding provider '{}'; must be local, openai, ollama, or hash",
                other
            ))),
        }
        if self.embedding.dims == Some(0) {
            bail!(ragx_core::IndexError::InvalidConfig(
                "embedding.dims must be > 0".to_string()
            ));
        }

        match self.retrieval.search.as_str() {
            "flat" | "ivf" => {}
            other => bail!(ragx_core::IndexError::InvalidConfig(format!(
                "unknown search kind '{}'; must be flat or ivf",
                other
            ))),
        }

        Ok(())
    }
}

/// Read and parse a TOML config file. Validation happens after CLI overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}
