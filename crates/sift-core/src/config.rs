//! Persisted config (store path, chunking, search, embedding provider) in the app data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::chunks::ChunkParams;

const CONFIG_FILENAME: &str = "config.toml";
const STORE_FILENAME: &str = "embeddings.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the embedding store is persisted. Defaults to `embeddings.json` in the app data dir.
    pub store_path: Option<String>,
    pub chunking: ChunkParams,
    pub search: SearchConfig,
    pub provider: ProviderConfig,
}

impl Config {
    /// Resolved store file path.
    pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(p) = self.store_path.as_deref().filter(|s| !s.is_empty()) {
            return Ok(PathBuf::from(p));
        }
        let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join(STORE_FILENAME))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum number of results; 0 means unbounded.
    pub top_k: usize,
    /// Minimum similarity (inclusive) for a document to be returned.
    pub threshold: f32,
    /// Age in days after which the store should be rebuilt.
    pub max_age_days: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.3,
            max_age_days: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Local,
    OpenAi,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Model name; empty picks the backend's default.
    pub model: String,
    /// Endpoint for remote backends; empty picks the backend's default.
    pub base_url: String,
    /// Environment variable holding the API key (remote backends that need one).
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Local,
            model: String::new(),
            base_url: String::new(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

/// Path of the config file in the app data directory.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|d| d.join(CONFIG_FILENAME))
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };
    load_config_from(&path).unwrap_or_default()
}

/// Load config from an explicit file. Unlike [`load_config`], failures are reported.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
    toml::from_str(&s).map_err(ConfigError::Parse)
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoDataDir)?;
    save_config_to(config, &path)
}

/// Save config to an explicit file.
pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid chunking: overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidChunking { chunk_size: usize, overlap: usize },
    #[error("no embedding provider configured")]
    NoProvider,
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to read config: {0}")]
    Read(std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
}
