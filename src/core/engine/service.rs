//! Core cache service implementation

use super::utils::{hash_prompt, round3, round4};
use crate::config::CacheConfig;
use crate::core::context::ContextEmbedder;
use crate::core::domain;
use crate::core::embedding_cache::EmbeddingCache;
use crate::core::models::{ChatMessage, join_user_text};
use crate::core::normalize::normalize;
use crate::core::providers::{ChatProvider, EmbeddingProvider};
use crate::core::scoring;
use crate::core::tenant::{HitKind, TenantState};
use crate::core::types::{CacheEntry, CacheEvent, Decision, MetricsSnapshot, QueryMeta};
use crate::storage::snapshot::{self, SCHEMA_VERSION, Snapshot, TenantSnapshot};
use crate::utils::error::{CacheError, Result};
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Candidates fetched from the index before re-ranking
const SEARCH_FANOUT: usize = 20;
/// A tenant's inserts between coalesced snapshot signals
const SNAPSHOT_EVERY_INSERTS: usize = 10;
/// Minimum confidence for a normal semantic accept
const ACCEPT_CONFIDENCE: f64 = 0.7;
/// Base-similarity floor of the typo-tolerance path
const TYPO_MIN_SIMILARITY: f64 = 0.65;
/// Confidence floor of the typo-tolerance path
const TYPO_MIN_CONFIDENCE: f64 = 0.65;

/// A scored semantic candidate
#[derive(Debug, Clone)]
struct Candidate {
    row: usize,
    base_sim: f64,
    hybrid: f64,
    confidence: f64,
}

/// Process-wide cache state and the query pipeline over it
///
/// Owns every tenant's state, the shared embedding cache, and the
/// collaborator handles. Constructed explicitly at startup and shared behind
/// an `Arc`; request handlers only ever go through its methods.
pub struct CacheService {
    tenants: DashMap<String, Arc<RwLock<TenantState>>>,
    embedder: ContextEmbedder,
    chat: Arc<dyn ChatProvider>,
    chat_deadline: Duration,
    snapshot_tx: OnceCell<mpsc::Sender<()>>,
}

impl CacheService {
    /// Create a new cache service wired to its collaborators
    pub fn new(
        config: &CacheConfig,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        chat_provider: Arc<dyn ChatProvider>,
    ) -> Self {
        info!(
            embedding_cache_capacity = config.embedding_cache_capacity,
            provider_timeout_secs = config.provider_timeout_secs,
            "initializing cache service"
        );
        let embeddings = Arc::new(EmbeddingCache::new(config.embedding_cache_capacity));
        let deadline = Duration::from_secs(config.provider_timeout_secs);

        Self {
            tenants: DashMap::new(),
            embedder: ContextEmbedder::new(embeddings, embedding_provider, deadline),
            chat: chat_provider,
            chat_deadline: deadline,
            snapshot_tx: OnceCell::new(),
        }
    }

    /// Attach the coalescing snapshot signal; later calls are ignored
    pub fn set_snapshot_signal(&self, tx: mpsc::Sender<()>) {
        let _ = self.snapshot_tx.set(tx);
    }

    fn signal_snapshot(&self) {
        if let Some(tx) = self.snapshot_tx.get() {
            // Capacity-1 channel: a full buffer means a save is already due
            let _ = tx.try_send(());
        }
    }

    /// Get or create a tenant's state handle
    pub fn tenant(&self, tenant_id: &str) -> Arc<RwLock<TenantState>> {
        self.tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(TenantState::new())))
            .clone()
    }

    /// Number of known tenants
    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    /// Total stored entries across tenants
    pub async fn entry_count(&self) -> usize {
        let handles: Vec<Arc<RwLock<TenantState>>> =
            self.tenants.iter().map(|e| e.value().clone()).collect();
        let mut total = 0;
        for handle in handles {
            total += handle.read().await.rows.len();
        }
        total
    }

    /// Serve one query through the cache pipeline
    ///
    /// Exact lookup first, then semantic search with hybrid re-ranking, then
    /// the miss path: call the chat provider, store the new entry, and
    /// signal the snapshotter every few inserts. The adaptive threshold is
    /// nudged after every completed request.
    pub async fn query(
        &self,
        tenant_id: &str,
        messages: &[ChatMessage],
        model: &str,
        ttl_seconds: u64,
        temperature: f32,
    ) -> Result<(String, QueryMeta)> {
        let started = Instant::now();
        let user_text = join_user_text(messages);
        let prompt_norm = normalize(&user_text);
        let prompt_hash = hash_prompt(&prompt_norm);
        let tenant = self.tenant(tenant_id);

        // 1) exact
        let rows_len = {
            let mut state = tenant.write().await;
            if let Some((row, entry)) = state.get_exact(&prompt_norm) {
                if entry.model == model && entry.is_fresh(Utc::now()) {
                    let response_text = entry.response_text.clone();
                    state.touch(row, Utc::now(), Decision::Exact);
                    state.record_hit(HitKind::Exact);
                    let latency = elapsed_ms(started);
                    state.append_latency(latency);
                    state.append_event(CacheEvent {
                        timestamp: Utc::now(),
                        tenant_id: tenant_id.to_string(),
                        prompt_hash,
                        decision: Decision::Exact,
                        similarity: 1.0,
                        latency_ms: latency,
                        confidence: 0.0,
                        hybrid_score: 0.0,
                    });
                    state.adapt_threshold();
                    info!(
                        tenant = %tenant_id,
                        decision = "exact",
                        similarity = 1.0,
                        key = %truncate(&prompt_norm, 80),
                        "cache decision"
                    );
                    let meta = QueryMeta {
                        hit: Decision::Exact,
                        similarity: 1.0,
                        hybrid_score: None,
                        confidence: None,
                        latency_ms: latency,
                        strategy: "hybrid".to_string(),
                        threshold_used: None,
                    };
                    return Ok((response_text, meta));
                }
            }
            state.rows.len()
        };

        // 2) semantic, with the embedding kept for reuse on the miss path
        let mut query_embedding: Option<(Vec<f32>, String)> = None;
        if rows_len > 0 {
            match self.embedder.embed_query(messages, &prompt_norm).await {
                Ok(embedded) => {
                    if let Some(result) = self
                        .semantic_lookup(
                            tenant_id,
                            &tenant,
                            &embedded.0,
                            &embedded.1,
                            &prompt_norm,
                            &prompt_hash,
                            started,
                        )
                        .await
                    {
                        return Ok(result);
                    }
                    query_embedding = Some(embedded);
                }
                Err(e) => {
                    // No exact hit was available; degrade to the miss path
                    warn!(
                        tenant = %tenant_id,
                        error = %e,
                        "embedding unavailable during query, falling through to miss path"
                    );
                }
            }
        }

        // 3) miss: generate, then store
        let response_text = tokio::time::timeout(
            self.chat_deadline,
            self.chat.complete(messages, temperature),
        )
        .await
        .map_err(|_| {
            CacheError::ProviderTimeout(format!(
                "chat call exceeded {}s deadline",
                self.chat_deadline.as_secs()
            ))
        })?
        .map_err(CacheError::from)?;

        // Reuse the query-path embedding; the shared cache makes a fresh
        // computation a lookup in the common case.
        let insert_embedding = match query_embedding {
            Some(embedded) => Some(embedded),
            None => match self.embedder.embed_query(messages, &prompt_norm).await {
                Ok(embedded) => Some(embedded),
                Err(e) => {
                    warn!(
                        tenant = %tenant_id,
                        error = %e,
                        "embedding unavailable on miss path, serving response without caching"
                    );
                    None
                }
            },
        };

        let domain_text = if user_text.is_empty() {
            prompt_norm.clone()
        } else {
            user_text.clone()
        };

        {
            let mut state = tenant.write().await;
            state.record_miss();

            if let Some((embedding, _)) = insert_embedding {
                let now = Utc::now();
                let entry = CacheEntry {
                    prompt_norm: prompt_norm.clone(),
                    response_text: response_text.clone(),
                    embedding,
                    model: model.to_string(),
                    ttl_seconds,
                    created_at: now,
                    last_used_at: now,
                    use_count: 0,
                    domain: domain::classify(&domain_text).to_string(),
                    strategy: Decision::Miss,
                };
                match state.insert(entry) {
                    Ok(_) => {
                        if state.rows.len() % SNAPSHOT_EVERY_INSERTS == 0 {
                            self.signal_snapshot();
                        }
                    }
                    Err(e) => {
                        warn!(tenant = %tenant_id, error = %e, "failed to index new entry");
                    }
                }
            }

            let latency = elapsed_ms(started);
            state.append_latency(latency);
            state.append_event(CacheEvent {
                timestamp: Utc::now(),
                tenant_id: tenant_id.to_string(),
                prompt_hash,
                decision: Decision::Miss,
                similarity: 0.0,
                latency_ms: latency,
                confidence: 0.0,
                hybrid_score: 0.0,
            });
            state.adapt_threshold();

            info!(
                tenant = %tenant_id,
                decision = "miss",
                similarity = 0.0,
                key = %truncate(&prompt_norm, 80),
                "cache decision"
            );
            let meta = QueryMeta {
                hit: Decision::Miss,
                similarity: 0.0,
                hybrid_score: None,
                confidence: None,
                latency_ms: latency,
                strategy: "hybrid".to_string(),
                threshold_used: None,
            };
            Ok((response_text, meta))
        }
    }

    /// Semantic search, re-ranking, and the accept rules
    ///
    /// Returns the served response when a candidate is accepted, `None` to
    /// fall through to the miss path.
    #[allow(clippy::too_many_arguments)]
    async fn semantic_lookup(
        &self,
        tenant_id: &str,
        tenant: &Arc<RwLock<TenantState>>,
        query: &[f32],
        primary_text: &str,
        prompt_norm: &str,
        prompt_hash: &str,
        started: Instant,
    ) -> Option<(String, QueryMeta)> {
        let mut state = tenant.write().await;
        let fanout = SEARCH_FANOUT.min(state.rows.len());
        let matches = state.index.search(query, fanout);
        let now = Utc::now();

        let mut candidates: Vec<Candidate> = Vec::with_capacity(matches.len());
        for (row, sim) in matches {
            let Some(entry) = state.rows.get(row) else {
                // Stale index row: treat as a non-match, never panic
                warn!(
                    tenant = %tenant_id,
                    row,
                    rows = state.rows.len(),
                    "index returned an out-of-range row"
                );
                continue;
            };
            if !entry.is_fresh(now) {
                continue;
            }
            let base_sim = sim as f64;
            let hybrid = scoring::hybrid_score(base_sim, primary_text, entry, now);
            let confidence = scoring::confidence(hybrid, base_sim, entry, now);
            candidates.push(Candidate {
                row,
                base_sim,
                hybrid,
                confidence,
            });
        }

        candidates.sort_by(|a, b| {
            b.hybrid
                .partial_cmp(&a.hybrid)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let query_domain = domain::classify(primary_text);
        let threshold = state.adaptive_threshold(candidates.len(), query_domain);

        let mut accepted: Option<(Candidate, f64)> = None;
        for candidate in &candidates {
            // (a) normal accept: above threshold with good confidence
            if candidate.hybrid >= threshold && candidate.confidence >= ACCEPT_CONFIDENCE {
                accepted = Some((candidate.clone(), threshold));
                break;
            }
            // (b) typo tolerance: strong base similarity with decent confidence
            if candidate.base_sim >= TYPO_MIN_SIMILARITY
                && candidate.confidence >= TYPO_MIN_CONFIDENCE
            {
                let relaxed = TYPO_MIN_SIMILARITY.max(candidate.base_sim - 0.02);
                if candidate.hybrid >= relaxed {
                    info!(
                        tenant = %tenant_id,
                        similarity = round4(candidate.base_sim),
                        hybrid = round4(candidate.hybrid),
                        confidence = round4(candidate.confidence),
                        "typo-tolerance accept"
                    );
                    accepted = Some((candidate.clone(), relaxed));
                    break;
                }
            }
        }

        let (candidate, threshold_used) = accepted?;
        let response_text = state.rows[candidate.row].response_text.clone();
        state.touch(candidate.row, now, Decision::Semantic);
        state.record_hit(HitKind::Semantic);
        let latency = elapsed_ms(started);
        state.append_latency(latency);
        state.append_event(CacheEvent {
            timestamp: Utc::now(),
            tenant_id: tenant_id.to_string(),
            prompt_hash: prompt_hash.to_string(),
            decision: Decision::Semantic,
            similarity: round4(candidate.base_sim),
            latency_ms: latency,
            confidence: round4(candidate.confidence),
            hybrid_score: round4(candidate.hybrid),
        });
        state.adapt_threshold();

        info!(
            tenant = %tenant_id,
            decision = "semantic",
            similarity = round4(candidate.base_sim),
            hybrid = round4(candidate.hybrid),
            confidence = round4(candidate.confidence),
            threshold = round3(threshold_used),
            key = %truncate(prompt_norm, 80),
            "cache decision"
        );

        let meta = QueryMeta {
            hit: Decision::Semantic,
            similarity: round4(candidate.base_sim),
            hybrid_score: Some(round4(candidate.hybrid)),
            confidence: Some(round4(candidate.confidence)),
            latency_ms: latency,
            strategy: "hybrid-enhanced".to_string(),
            threshold_used: Some(round3(threshold_used)),
        };
        Some((response_text, meta))
    }

    /// Metrics snapshot for a tenant, computed under one read lock
    pub async fn metrics(&self, tenant_id: &str) -> MetricsSnapshot {
        let tenant = self.tenant(tenant_id);
        let state = tenant.read().await;
        state.metrics(tenant_id)
    }

    /// Up to `limit` most recent events for a tenant, newest first
    pub async fn events(&self, tenant_id: &str, limit: usize) -> Vec<CacheEvent> {
        let tenant = self.tenant(tenant_id);
        let state = tenant.read().await;
        state.recent_events(limit)
    }

    /// Set an operator-provided domain threshold for a tenant
    pub async fn set_domain_threshold(&self, tenant_id: &str, domain: &str, threshold: f64) {
        let tenant = self.tenant(tenant_id);
        let mut state = tenant.write().await;
        state.set_domain_threshold(domain, threshold);
        info!(tenant = %tenant_id, domain = %domain, threshold, "domain threshold updated");
    }

    /// Copy-on-read export of all tenant state
    ///
    /// Each tenant is copied under its own read lock, so a snapshot never
    /// observes a partially mutated tenant.
    pub async fn export(&self) -> Snapshot {
        let handles: Vec<(String, Arc<RwLock<TenantState>>)> = self
            .tenants
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut tenants = HashMap::new();
        for (tenant_id, handle) in handles {
            let state = handle.read().await;
            tenants.insert(tenant_id, TenantSnapshot::from_state(&state));
        }

        Snapshot {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            tenants,
        }
    }

    /// Replace tenant state from a loaded snapshot
    pub fn restore(&self, snapshot: Snapshot) -> Result<()> {
        for (tenant_id, tenant_snapshot) in snapshot.tenants {
            let state = tenant_snapshot.into_state()?;
            debug!(
                tenant = %tenant_id,
                entries = state.rows.len(),
                "restored tenant from snapshot"
            );
            self.tenants
                .insert(tenant_id, Arc::new(RwLock::new(state)));
        }
        Ok(())
    }

    /// Export and persist a snapshot
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let started = Instant::now();
        let snapshot = self.export().await;
        let tenants = snapshot.tenants.len();
        let entries: usize = snapshot.tenants.values().map(|t| t.rows.len()).sum();
        snapshot::save(path, &snapshot).await?;
        info!(
            tenants,
            entries,
            time_ms = started.elapsed().as_millis() as u64,
            "cache saved"
        );
        Ok(())
    }

    /// Load a snapshot if one exists; `false` when starting empty
    pub async fn load_snapshot(&self, path: &Path) -> Result<bool> {
        let started = Instant::now();
        match snapshot::load(path).await? {
            Some(snapshot) => {
                let tenants = snapshot.tenants.len();
                let entries: usize = snapshot.tenants.values().map(|t| t.rows.len()).sum();
                self.restore(snapshot)?;
                info!(
                    tenants,
                    entries,
                    time_ms = started.elapsed().as_millis() as u64,
                    "cache loaded"
                );
                Ok(true)
            }
            None => {
                info!(
                    time_ms = started.elapsed().as_millis() as u64,
                    "no cache snapshot found, starting empty"
                );
                Ok(false)
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
