//! Durable snapshots of tenant state
//!
//! A single JSON artifact holds every tenant's cache. The header carries a
//! schema version; unknown fields are ignored on load and missing fields
//! take defaults, so older snapshots keep loading as the schema grows.
//! Saves are atomic (write-temp then rename). Freshness is not re-checked at
//! load time; stale entries are filtered lazily on the read path.

use crate::core::engine::CacheService;
use crate::core::tenant::{
    EVENTS_CAP, LATENCY_WINDOW, MAX_SIM_THRESHOLD, MIN_SIM_THRESHOLD, TenantState,
};
use crate::core::types::{CacheEntry, CacheEvent};
use crate::utils::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Current snapshot schema version
pub const SCHEMA_VERSION: u32 = 1;

/// On-disk snapshot artifact
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version of the writer
    pub schema_version: u32,
    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,
    /// Per-tenant state
    #[serde(default)]
    pub tenants: HashMap<String, TenantSnapshot>,
}

/// Serialized form of one tenant's state
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TenantSnapshot {
    /// Exact-match keys pointing at row indices
    #[serde(default)]
    pub exact: HashMap<String, usize>,
    /// Stored entries in insertion order
    #[serde(default)]
    pub rows: Vec<CacheEntry>,
    #[serde(default)]
    pub hits: u64,
    #[serde(default)]
    pub misses: u64,
    #[serde(default)]
    pub semantic_hits: u64,
    #[serde(default)]
    pub latencies_ms: Vec<f64>,
    #[serde(default = "default_sim_threshold")]
    pub sim_threshold: f64,
    #[serde(default)]
    pub domain_thresholds: HashMap<String, f64>,
    #[serde(default)]
    pub events: Vec<CacheEvent>,
}

fn default_sim_threshold() -> f64 {
    crate::core::tenant::INITIAL_SIM_THRESHOLD
}

impl TenantSnapshot {
    /// Copy a tenant's state into its serialized form
    pub(crate) fn from_state(state: &TenantState) -> Self {
        Self {
            exact: state.exact.clone(),
            rows: state.rows.clone(),
            hits: state.hits,
            misses: state.misses,
            semantic_hits: state.semantic_hits,
            latencies_ms: state.latencies_ms.iter().copied().collect(),
            sim_threshold: state.sim_threshold,
            domain_thresholds: state.domain_thresholds.clone(),
            events: state.events.iter().cloned().collect(),
        }
    }

    /// Rebuild live tenant state, re-adding vectors in row order
    pub(crate) fn into_state(self) -> Result<TenantState> {
        let mut state = TenantState::new();

        for entry in &self.rows {
            state.index.add(&entry.embedding)?;
        }
        state.rows = self.rows;
        // Drop exact keys whose row no longer exists rather than fail the load
        state.exact = self
            .exact
            .into_iter()
            .filter(|(_, row)| *row < state.rows.len())
            .collect();

        state.hits = self.hits;
        state.misses = self.misses;
        state.semantic_hits = self.semantic_hits.min(self.hits);
        state.sim_threshold = self
            .sim_threshold
            .clamp(MIN_SIM_THRESHOLD, MAX_SIM_THRESHOLD);
        state.domain_thresholds = self.domain_thresholds;

        let latency_start = self.latencies_ms.len().saturating_sub(LATENCY_WINDOW);
        state.latencies_ms = self.latencies_ms[latency_start..].iter().copied().collect();

        let events_start = self.events.len().saturating_sub(EVENTS_CAP);
        state.events = self.events[events_start..].iter().cloned().collect();

        debug_assert_eq!(state.rows.len(), state.index.len());
        Ok(state)
    }
}

/// Atomically persist a snapshot
pub async fn save(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::storage(format!("create snapshot dir: {e}")))?;
        }
    }

    let body = serde_json::to_vec(snapshot)
        .map_err(|e| CacheError::storage(format!("encode snapshot: {e}")))?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| CacheError::storage(format!("write snapshot temp file: {e}")))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| CacheError::storage(format!("rename snapshot into place: {e}")))?;

    Ok(())
}

/// Load a snapshot; `None` when absent or written by an unknown future schema
pub async fn load(path: &Path) -> Result<Option<Snapshot>> {
    let body = match tokio::fs::read(path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::storage(format!("read snapshot: {e}"))),
    };

    let snapshot: Snapshot = serde_json::from_slice(&body)
        .map_err(|e| CacheError::storage(format!("decode snapshot: {e}")))?;

    if snapshot.schema_version > SCHEMA_VERSION {
        warn!(
            found = snapshot.schema_version,
            supported = SCHEMA_VERSION,
            "snapshot written by a newer schema, starting empty"
        );
        return Ok(None);
    }

    Ok(Some(snapshot))
}

/// Spawn the coalescing background saver
///
/// Returns the capacity-1 signal sender handed to the cache service. Each
/// received signal produces one full save; signals arriving while a save is
/// pending collapse into it.
pub fn spawn_snapshotter(service: Arc<CacheService>, path: PathBuf) -> mpsc::Sender<()> {
    let (tx, mut rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            if let Err(e) = service.save_snapshot(&path).await {
                warn!(error = %e, "background snapshot failed");
            }
        }
        debug!("snapshot signal channel closed");
    });
    tx
}
