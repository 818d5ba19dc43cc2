//! Configuration management for the cache gateway
//!
//! Loads a YAML file into typed sections with sensible defaults; `PORT`
//! overrides the configured HTTP port so the binary runs unconfigured in a
//! container.

use crate::utils::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Cache engine settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Snapshot and key-registry paths
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upstream provider settings
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {:?}", path);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::config(format!("Failed to read config file: {e}")))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| CacheError::config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Apply environment overrides (`PORT`)
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring unparsable PORT override"),
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.provider_timeout_secs == 0 {
            return Err(CacheError::config("provider_timeout_secs must be positive"));
        }
        if self.cache.embedding_cache_capacity == 0 {
            return Err(CacheError::config(
                "embedding_cache_capacity must be positive",
            ));
        }
        if self.server.host.is_empty() {
            return Err(CacheError::config("server.host must not be empty"));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origins; empty allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Cache engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default TTL for entries created on a miss (7 days)
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,
    /// Capacity of the process-wide embedding LRU
    #[serde(default = "default_embedding_cache_capacity")]
    pub embedding_cache_capacity: usize,
    /// Deadline for each outbound provider call
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl_seconds(),
            embedding_cache_capacity: default_embedding_cache_capacity(),
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

fn default_ttl_seconds() -> u64 {
    crate::core::models::DEFAULT_TTL_SECONDS
}

fn default_embedding_cache_capacity() -> usize {
    crate::core::embedding_cache::DEFAULT_CAPACITY
}

fn default_provider_timeout_secs() -> u64 {
    30
}

/// Snapshot and key storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Snapshot artifact path
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// API-key registry path
    #[serde(default = "default_keys_path")]
    pub keys_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            keys_path: default_keys_path(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("cache_data/snapshot.json")
}

fn default_keys_path() -> PathBuf {
    PathBuf::from("cache_data/api_keys.json")
}

/// Upstream OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Embedding model
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    /// Chat model used when a request does not name one
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            embed_model: default_embed_model(),
            chat_model: default_chat_model(),
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key from the environment; empty when unset
    pub fn api_key(&self) -> String {
        std::env::var(&self.api_key_env).unwrap_or_default()
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embed_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_chat_model() -> String {
    crate::core::models::DEFAULT_CHAT_MODEL.to_string()
}
