//! Core data types for the semantic cache

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How a request was served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Normalized prompt matched an exact key
    Exact,
    /// Nearest stored entry cleared the accept rules
    Semantic,
    /// Freshly generated and stored
    Miss,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Exact => write!(f, "exact"),
            Decision::Semantic => write!(f, "semantic"),
            Decision::Miss => write!(f, "miss"),
        }
    }
}

/// One cached (prompt, response) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical prompt form used as the exact key
    pub prompt_norm: String,
    /// Cached response
    pub response_text: String,
    /// Unit-length embedding, persisted as contiguous little-endian f32
    #[serde(with = "embedding_base64")]
    pub embedding: Vec<f32>,
    /// Identifier of the generator that produced the response
    pub model: String,
    /// Freshness window in seconds
    pub ttl_seconds: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last time the entry served a hit
    pub last_used_at: DateTime<Utc>,
    /// Number of hits served
    #[serde(default)]
    pub use_count: u64,
    /// Domain tag assigned at insertion
    #[serde(default = "default_domain")]
    pub domain: String,
    /// How the entry was most recently served
    #[serde(default = "default_strategy")]
    pub strategy: Decision,
}

fn default_domain() -> String {
    crate::core::domain::GENERAL.to_string()
}

fn default_strategy() -> Decision {
    Decision::Miss
}

impl CacheEntry {
    /// Whether the entry is within its freshness window
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.created_at + Duration::seconds(self.ttl_seconds as i64)
    }

    /// Age in fractional days
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 86_400_000.0
    }
}

/// Append-only audit record, one per completed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEvent {
    /// Completion timestamp
    pub timestamp: DateTime<Utc>,
    /// Tenant that issued the request
    pub tenant_id: String,
    /// Stable hash of the normalized prompt
    pub prompt_hash: String,
    /// Decision taken
    pub decision: Decision,
    /// Base cosine similarity (1.0 exact, 0.0 miss)
    pub similarity: f64,
    /// Request latency in milliseconds
    pub latency_ms: f64,
    /// Confidence of a semantic match (0 otherwise)
    #[serde(default)]
    pub confidence: f64,
    /// Hybrid score of a semantic match (0 otherwise)
    #[serde(default)]
    pub hybrid_score: f64,
}

/// Cache decision metadata returned with every answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMeta {
    /// Decision taken
    pub hit: Decision,
    /// Base cosine similarity
    pub similarity: f64,
    /// Hybrid score, present on semantic hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hybrid_score: Option<f64>,
    /// Confidence, present on semantic hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Request latency in milliseconds
    pub latency_ms: f64,
    /// Matching strategy label
    pub strategy: String,
    /// Threshold the accepted candidate cleared, present on semantic hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_used: Option<f64>,
}

/// Per-tenant metrics snapshot, computed on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tenant identifier
    pub tenant: String,
    /// Total completed requests
    pub requests: u64,
    /// Total hits (exact + semantic)
    pub hits: u64,
    /// Semantic hits only
    pub semantic_hits: u64,
    /// Misses
    pub misses: u64,
    /// hits / requests (0 when no requests)
    pub hit_ratio: f64,
    /// semantic_hits / requests
    pub semantic_hit_ratio: f64,
    /// Mean latency over the bounded window
    pub avg_latency_ms: f64,
    /// Median latency
    pub p50_latency_ms: f64,
    /// 95th percentile latency
    pub p95_latency_ms: f64,
    /// Coarse token-savings estimate (100 per hit, part of the contract)
    pub tokens_saved_est: u64,
    /// Current adaptive similarity threshold
    pub sim_threshold: f64,
    /// Number of stored entries
    pub entries: usize,
    /// Mean confidence over semantic events
    pub avg_confidence: f64,
    /// Mean hybrid score over semantic events
    pub avg_hybrid_score: f64,
    /// Semantic events with confidence >= 0.8
    pub high_confidence_hits: usize,
    /// high_confidence_hits / semantic events
    pub high_confidence_ratio: f64,
}

/// Embeddings serialize as base64 over contiguous little-endian f32 bytes
pub mod embedding_base64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(vector: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        let mut bytes = Vec::with_capacity(vector.len() * 4);
        for value in vector {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(serde::de::Error::custom(
                "embedding byte length is not a multiple of 4",
            ));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
