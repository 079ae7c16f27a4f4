use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::chunk::ChunkPolicy;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Path of the analytical query engine's own database.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_percentage")]
    pub overlap_percentage: u8,
    #[serde(default)]
    pub preserve_separators: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_percentage: default_overlap_percentage(),
            preserve_separators: false,
        }
    }
}

impl ChunkingConfig {
    pub fn to_policy(&self) -> ChunkPolicy {
        ChunkPolicy {
            max_chars: self.max_chars,
            overlap_percentage: self.overlap_percentage,
            preserve_separators: self.preserve_separators,
        }
    }
}

fn default_max_chars() -> usize {
    2000
}
fn default_overlap_percentage() -> u8 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
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
    /// Endpoint override for the http backend.
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the environment variable holding the http backend credential.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
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
fn default_api_key_env() -> String {
    "SATCHEL_EMBED_API_KEY".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidInput(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::InvalidInput(format!("failed to parse config file: {}", e)))?;

    // Validate chunking
    if config.chunking.max_chars == 0 {
        return Err(Error::InvalidInput("chunking.max_chars must be > 0".into()));
    }
    if config.chunking.overlap_percentage > 100 {
        return Err(Error::InvalidInput(
            "chunking.overlap_percentage must be in 0..=100".into(),
        ));
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.batch_size == 0 {
            return Err(Error::InvalidInput("embedding.batch_size must be > 0".into()));
        }
        if config.embedding.provider == "http" {
            if config.embedding.model.is_none() {
                return Err(Error::InvalidInput(
                    "embedding.model must be specified when provider is 'http'".into(),
                ));
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                return Err(Error::InvalidInput(
                    "embedding.dims must be > 0 when provider is 'http'".into(),
                ));
            }
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "http" | "local" => {}
        other => {
            return Err(Error::InvalidInput(format!(
                "unknown embedding provider: '{}'. Must be disabled, http, or local.",
                other
            )))
        }
    }

    Ok(config)
}
