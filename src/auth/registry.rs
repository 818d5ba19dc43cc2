//! Key registry: activity validation and usage accounting
//!
//! The file-backed implementation auto-creates well-formed keys on first
//! sight (free plan), mirrors them to a JSON file, and appends usage rows to
//! a JSON-lines file. Registry failures are surfaced as errors for callers
//! to log; only an explicitly inactive key rejects a request.

use crate::utils::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Metadata recorded for an API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Tenant the key belongs to
    pub tenant_id: String,
    /// Plan label
    #[serde(default = "default_plan")]
    pub plan: String,
    /// Inactive keys are rejected
    #[serde(default = "default_active")]
    pub active: bool,
    /// First time the key was seen
    pub created_at: DateTime<Utc>,
    /// Last authenticated use
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Authenticated uses
    #[serde(default)]
    pub use_count: u64,
}

fn default_plan() -> String {
    "free".to_string()
}

fn default_active() -> bool {
    true
}

/// One usage accounting row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Key that made the request
    pub api_key: String,
    /// Tenant derived from the key
    pub tenant_id: String,
    /// Endpoint served
    pub endpoint: String,
    /// Cache hits in this request
    pub cache_hits: u64,
    /// Cache misses in this request
    pub cache_misses: u64,
    /// Tokens consumed upstream (0 when unknown)
    pub tokens_used: u64,
    /// Cost estimate (0 when unknown)
    pub cost_estimate: f64,
    /// When the request completed
    pub timestamp: DateTime<Utc>,
}

/// Validates keys and records their usage
#[async_trait::async_trait]
pub trait KeyRegistry: Send + Sync {
    /// Validate a raw token, auto-registering unknown well-formed keys
    async fn validate(&self, raw_token: &str) -> Result<KeyInfo>;

    /// Record an authenticated use of the key
    async fn record_use(&self, raw_token: &str, tenant_id: &str) -> Result<()>;

    /// Append a usage accounting row
    async fn log_usage(&self, record: UsageRecord) -> Result<()>;
}

/// JSON-file-backed key registry
pub struct FileKeyRegistry {
    keys_path: PathBuf,
    usage_path: PathBuf,
    keys: Mutex<HashMap<String, KeyInfo>>,
}

impl FileKeyRegistry {
    /// Load the registry, starting empty when the file is absent or bad
    pub async fn load(keys_path: PathBuf) -> Self {
        let keys = match tokio::fs::read(&keys_path).await {
            Ok(body) => match serde_json::from_slice::<HashMap<String, KeyInfo>>(&body) {
                Ok(keys) => {
                    info!(path = %keys_path.display(), keys = keys.len(), "key registry loaded");
                    keys
                }
                Err(e) => {
                    warn!(path = %keys_path.display(), error = %e, "key registry unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %keys_path.display(), error = %e, "key registry unreadable, starting empty");
                HashMap::new()
            }
        };

        let usage_path = keys_path.with_file_name("usage.jsonl");
        Self {
            keys_path,
            usage_path,
            keys: Mutex::new(keys),
        }
    }

    async fn persist(&self, keys: &HashMap<String, KeyInfo>) -> Result<()> {
        if let Some(parent) = self.keys_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CacheError::storage(format!("create key dir: {e}")))?;
            }
        }
        let body = serde_json::to_vec_pretty(keys)
            .map_err(|e| CacheError::storage(format!("encode keys: {e}")))?;
        let tmp = self.keys_path.with_extension("tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| CacheError::storage(format!("write keys temp file: {e}")))?;
        tokio::fs::rename(&tmp, &self.keys_path)
            .await
            .map_err(|e| CacheError::storage(format!("rename keys into place: {e}")))?;
        Ok(())
    }

    /// Path of the usage accounting file
    pub fn usage_path(&self) -> &Path {
        &self.usage_path
    }
}

#[async_trait::async_trait]
impl KeyRegistry for FileKeyRegistry {
    async fn validate(&self, raw_token: &str) -> Result<KeyInfo> {
        let mut keys = self.keys.lock().await;
        if let Some(info) = keys.get(raw_token) {
            if !info.active {
                return Err(CacheError::unauthorized("API key is inactive"));
            }
            return Ok(info.clone());
        }

        // Unknown but well-formed key: auto-register on the free plan
        let tenant_id = raw_token.split('-').nth(1).unwrap_or("unknown").to_string();
        let info = KeyInfo {
            tenant_id: tenant_id.clone(),
            plan: default_plan(),
            active: true,
            created_at: Utc::now(),
            last_used_at: None,
            use_count: 0,
        };
        keys.insert(raw_token.to_string(), info.clone());
        info!(tenant = %tenant_id, "API key auto-created");
        self.persist(&keys).await?;
        Ok(info)
    }

    async fn record_use(&self, raw_token: &str, _tenant_id: &str) -> Result<()> {
        let mut keys = self.keys.lock().await;
        if let Some(info) = keys.get_mut(raw_token) {
            info.use_count += 1;
            info.last_used_at = Some(Utc::now());
        }
        self.persist(&keys).await
    }

    async fn log_usage(&self, record: UsageRecord) -> Result<()> {
        if let Some(parent) = self.usage_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CacheError::storage(format!("create usage dir: {e}")))?;
            }
        }
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| CacheError::storage(format!("encode usage row: {e}")))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.usage_path)
            .await
            .map_err(|e| CacheError::storage(format!("open usage file: {e}")))?;
        file.write_all(&line)
            .await
            .map_err(|e| CacheError::storage(format!("append usage row: {e}")))?;
        Ok(())
    }
}
