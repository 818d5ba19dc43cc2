//! Per-tenant cache state
//!
//! Owns the exact-match map, the row list and its vector index, counters,
//! the bounded latency window and event ring, and the adaptive similarity
//! threshold. A tenant's state is always accessed under its own lock, held
//! by the engine.

use crate::core::engine::utils::{round2, round3};
use crate::core::types::{CacheEntry, CacheEvent, Decision, MetricsSnapshot};
use crate::storage::vector::VectorIndex;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// Initial per-tenant similarity threshold
pub const INITIAL_SIM_THRESHOLD: f64 = 0.72;
/// Lower clamp of the adaptive threshold
pub const MIN_SIM_THRESHOLD: f64 = 0.70;
/// Upper clamp of the adaptive threshold
pub const MAX_SIM_THRESHOLD: f64 = 0.92;
/// Single adjustment step of the slow-control loop
const ADAPT_STEP: f64 = 0.01;
/// Traffic needed before the threshold adapts at all
const ADAPT_MIN_REQUESTS: u64 = 20;

/// Event ring capacity
pub const EVENTS_CAP: usize = 1000;
/// Latency window capacity
pub const LATENCY_WINDOW: usize = 10_000;

/// Kind of cache hit being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    /// Exact-key hit
    Exact,
    /// Semantic (re-ranked) hit
    Semantic,
}

/// State of one tenant's cache
#[derive(Debug, Default)]
pub struct TenantState {
    /// Exact-match map: normalized prompt to row index
    pub(crate) exact: HashMap<String, usize>,
    /// Stored entries; the i-th row backs the i-th index vector
    pub(crate) rows: Vec<CacheEntry>,
    /// Inner-product index over the row embeddings
    pub(crate) index: VectorIndex,
    /// Total hits (exact + semantic)
    pub(crate) hits: u64,
    /// Total misses
    pub(crate) misses: u64,
    /// Semantic hits only
    pub(crate) semantic_hits: u64,
    /// Bounded window of request latencies
    pub(crate) latencies_ms: VecDeque<f64>,
    /// Adaptive similarity threshold
    pub(crate) sim_threshold: f64,
    /// Operator-set per-domain thresholds
    pub(crate) domain_thresholds: HashMap<String, f64>,
    /// Bounded ring of audit events
    pub(crate) events: VecDeque<CacheEvent>,
}

impl TenantState {
    /// Create an empty tenant state
    pub fn new() -> Self {
        Self {
            sim_threshold: INITIAL_SIM_THRESHOLD,
            ..Default::default()
        }
    }

    /// Look up the exact-match row for a normalized prompt
    pub fn get_exact(&self, key: &str) -> Option<(usize, &CacheEntry)> {
        let row = *self.exact.get(key)?;
        self.rows.get(row).map(|entry| (row, entry))
    }

    /// Bump a row's usage counters after serving a hit
    pub fn touch(&mut self, row: usize, now: DateTime<Utc>, strategy: Decision) {
        if let Some(entry) = self.rows.get_mut(row) {
            entry.use_count += 1;
            entry.last_used_at = now;
            entry.strategy = strategy;
        }
    }

    /// Insert an entry, keeping `rows`, `exact`, and the index in lockstep
    ///
    /// The index is extended first so a rejected vector (dimension drift)
    /// leaves `rows.len() == index.len()` intact. An existing exact key is
    /// re-pointed at the new row; the old row stays searchable until its TTL
    /// filters it out.
    pub fn insert(&mut self, entry: CacheEntry) -> Result<usize> {
        let row = self.index.add(&entry.embedding)?;
        self.exact.insert(entry.prompt_norm.clone(), row);
        self.rows.push(entry);
        debug_assert_eq!(self.rows.len(), self.index.len());
        Ok(row)
    }

    /// Record a hit of the given kind
    pub fn record_hit(&mut self, kind: HitKind) {
        self.hits += 1;
        if kind == HitKind::Semantic {
            self.semantic_hits += 1;
        }
    }

    /// Record a miss
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// Append a latency sample, discarding the oldest past the window
    pub fn append_latency(&mut self, latency_ms: f64) {
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);
    }

    /// Append an audit event, discarding the oldest past the ring capacity
    pub fn append_event(&mut self, event: CacheEvent) {
        if self.events.len() == EVENTS_CAP {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Up to `limit` most recent events, newest first
    pub fn recent_events(&self, limit: usize) -> Vec<CacheEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    /// Effective accept threshold for this query
    ///
    /// Starts from the adaptive threshold, floors it while the cache is
    /// small, applies the stricter of any domain threshold, and tightens
    /// slightly when many candidates are in play.
    pub fn adaptive_threshold(&self, num_candidates: usize, domain: &str) -> f64 {
        let mut base = if self.rows.len() < 10 {
            self.sim_threshold.max(0.70)
        } else if self.rows.len() < 20 {
            self.sim_threshold.max(0.72)
        } else {
            self.sim_threshold
        };

        if let Some(domain_threshold) = self.domain_thresholds.get(domain) {
            base = base.max(*domain_threshold);
        }

        if num_candidates > 10 {
            base += 0.02;
        }

        base
    }

    /// Slow-control loop run after each completed query
    ///
    /// Nudges the threshold by at most one step per call once traffic is
    /// non-trivial, clamped to [0.70, 0.92].
    pub fn adapt_threshold(&mut self) {
        let total = self.hits + self.misses;
        if total < ADAPT_MIN_REQUESTS {
            return;
        }
        let hit_ratio = self.hits as f64 / total as f64;
        if hit_ratio < 0.55 {
            self.sim_threshold = (self.sim_threshold - ADAPT_STEP).max(MIN_SIM_THRESHOLD);
        } else if hit_ratio > 0.85 {
            self.sim_threshold = (self.sim_threshold + ADAPT_STEP).min(MAX_SIM_THRESHOLD);
        }
    }

    /// Set an operator-provided domain threshold
    pub fn set_domain_threshold(&mut self, domain: &str, threshold: f64) {
        self.domain_thresholds.insert(domain.to_string(), threshold);
    }

    /// Compute the on-demand metrics snapshot
    pub fn metrics(&self, tenant_id: &str) -> MetricsSnapshot {
        let total = self.hits + self.misses;
        let hit_ratio = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
        let semantic_hit_ratio = if total > 0 {
            self.semantic_hits as f64 / total as f64
        } else {
            0.0
        };

        let mut sorted: Vec<f64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let avg_latency = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        let semantic_events: Vec<&CacheEvent> = self
            .events
            .iter()
            .filter(|e| e.decision == Decision::Semantic)
            .collect();
        let (avg_confidence, avg_hybrid_score) = if semantic_events.is_empty() {
            (0.0, 0.0)
        } else {
            let n = semantic_events.len() as f64;
            (
                semantic_events.iter().map(|e| e.confidence).sum::<f64>() / n,
                semantic_events.iter().map(|e| e.hybrid_score).sum::<f64>() / n,
            )
        };
        let high_confidence_hits = semantic_events
            .iter()
            .filter(|e| e.confidence >= 0.8)
            .count();
        let high_confidence_ratio = if semantic_events.is_empty() {
            0.0
        } else {
            high_confidence_hits as f64 / semantic_events.len() as f64
        };

        MetricsSnapshot {
            tenant: tenant_id.to_string(),
            requests: total,
            hits: self.hits,
            semantic_hits: self.semantic_hits,
            misses: self.misses,
            hit_ratio: round3(hit_ratio),
            semantic_hit_ratio: round3(semantic_hit_ratio),
            avg_latency_ms: round2(avg_latency),
            p50_latency_ms: round2(percentile(&sorted, 50.0)),
            p95_latency_ms: round2(percentile(&sorted, 95.0)),
            tokens_saved_est: self.hits * 100,
            sim_threshold: round3(self.sim_threshold),
            entries: self.rows.len(),
            avg_confidence: round3(avg_confidence),
            avg_hybrid_score: round3(avg_hybrid_score),
            high_confidence_hits,
            high_confidence_ratio: round3(high_confidence_ratio),
        }
    }
}

/// Linear-interpolation percentile over pre-sorted samples
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            let fraction = rank - lower as f64;
            sorted[lower] + fraction * (sorted[upper] - sorted[lower])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(prompt_norm: &str, embedding: Vec<f32>) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            prompt_norm: prompt_norm.to_string(),
            response_text: format!("answer to {prompt_norm}"),
            embedding,
            model: "gpt-4o-mini".to_string(),
            ttl_seconds: 3600,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            domain: "general".to_string(),
            strategy: Decision::Miss,
        }
    }

    fn event(decision: Decision, confidence: f64, hybrid_score: f64) -> CacheEvent {
        CacheEvent {
            timestamp: Utc::now(),
            tenant_id: "t1".to_string(),
            prompt_hash: "abc".to_string(),
            decision,
            similarity: 0.9,
            latency_ms: 1.0,
            confidence,
            hybrid_score,
        }
    }

    #[test]
    fn test_insert_keeps_rows_and_index_in_lockstep() {
        let mut state = TenantState::new();
        state.insert(entry("a", vec![1.0, 0.0])).unwrap();
        state.insert(entry("b", vec![0.0, 1.0])).unwrap();

        assert_eq!(state.rows.len(), state.index.len());
        // Every exact key resolves to a row holding that key
        for (key, &row) in &state.exact {
            assert_eq!(&state.rows[row].prompt_norm, key);
        }
    }

    #[test]
    fn test_insert_rejecting_bad_vector_leaves_state_consistent() {
        let mut state = TenantState::new();
        state.insert(entry("a", vec![1.0, 0.0])).unwrap();
        assert!(state.insert(entry("b", vec![1.0, 0.0, 0.0])).is_err());

        assert_eq!(state.rows.len(), 1);
        assert_eq!(state.index.len(), 1);
        assert!(state.get_exact("b").is_none());
    }

    #[test]
    fn test_overwrite_repoints_exact_key() {
        let mut state = TenantState::new();
        state.insert(entry("a", vec![1.0, 0.0])).unwrap();
        let mut newer = entry("a", vec![0.0, 1.0]);
        newer.response_text = "newer answer".to_string();
        state.insert(newer).unwrap();

        assert_eq!(state.rows.len(), 2);
        let (row, found) = state.get_exact("a").unwrap();
        assert_eq!(row, 1);
        assert_eq!(found.response_text, "newer answer");
    }

    #[test]
    fn test_counters_are_monotone_and_bounded() {
        let mut state = TenantState::new();
        state.record_hit(HitKind::Exact);
        state.record_hit(HitKind::Semantic);
        state.record_miss();

        assert_eq!(state.hits, 2);
        assert_eq!(state.semantic_hits, 1);
        assert_eq!(state.misses, 1);
        assert!(state.semantic_hits <= state.hits);
    }

    #[test]
    fn test_event_ring_is_bounded() {
        let mut state = TenantState::new();
        for i in 0..(EVENTS_CAP + 50) {
            let mut e = event(Decision::Miss, 0.0, 0.0);
            e.prompt_hash = format!("{i}");
            state.append_event(e);
        }

        assert_eq!(state.events.len(), EVENTS_CAP);
        // Oldest were discarded
        assert_eq!(state.events.front().unwrap().prompt_hash, "50");
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut state = TenantState::new();
        for i in 0..(LATENCY_WINDOW + 10) {
            state.append_latency(i as f64);
        }
        assert_eq!(state.latencies_ms.len(), LATENCY_WINDOW);
        assert_eq!(*state.latencies_ms.front().unwrap(), 10.0);
    }

    #[test]
    fn test_recent_events_newest_first() {
        let mut state = TenantState::new();
        for i in 0..5 {
            let mut e = event(Decision::Miss, 0.0, 0.0);
            e.prompt_hash = format!("{i}");
            state.append_event(e);
        }

        let recent = state.recent_events(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].prompt_hash, "4");
        assert_eq!(recent[2].prompt_hash, "2");
    }

    #[test]
    fn test_adaptive_threshold_small_cache_floors() {
        let mut state = TenantState::new();
        state.sim_threshold = 0.70;

        for i in 0..5 {
            state
                .insert(entry(&format!("p{i}"), vec![1.0, i as f32]))
                .unwrap();
        }
        // Fewer than 10 rows: floor at 0.70
        assert!((state.adaptive_threshold(1, "general") - 0.70).abs() < 1e-9);

        for i in 5..15 {
            state
                .insert(entry(&format!("p{i}"), vec![1.0, i as f32]))
                .unwrap();
        }
        // 10..20 rows: floor at 0.72
        assert!((state.adaptive_threshold(1, "general") - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_threshold_domain_and_fanout() {
        let mut state = TenantState::new();
        state.set_domain_threshold("finance", 0.80);

        assert!((state.adaptive_threshold(1, "finance") - 0.80).abs() < 1e-9);
        assert!((state.adaptive_threshold(1, "general") - 0.72).abs() < 1e-9);
        // More than 10 candidates tightens by 0.02
        assert!((state.adaptive_threshold(11, "finance") - 0.82).abs() < 1e-9);
    }

    #[test]
    fn test_adapt_threshold_needs_traffic() {
        let mut state = TenantState::new();
        for _ in 0..19 {
            state.record_miss();
            state.adapt_threshold();
        }
        assert!((state.sim_threshold - INITIAL_SIM_THRESHOLD).abs() < 1e-9);

        state.record_miss();
        state.adapt_threshold();
        assert!((state.sim_threshold - (INITIAL_SIM_THRESHOLD - 0.01)).abs() < 1e-9);
    }

    #[test]
    fn test_adapt_threshold_clamps_and_steps_by_one() {
        let mut state = TenantState::new();
        for _ in 0..100 {
            state.record_miss();
            let before = state.sim_threshold;
            state.adapt_threshold();
            assert!((before - state.sim_threshold).abs() <= 0.01 + 1e-9);
            assert!(state.sim_threshold >= MIN_SIM_THRESHOLD - 1e-9);
        }
        assert!((state.sim_threshold - MIN_SIM_THRESHOLD).abs() < 1e-9);

        // Drive the ratio high and watch the upper clamp
        let mut state = TenantState::new();
        for _ in 0..200 {
            state.record_hit(HitKind::Exact);
            state.adapt_threshold();
            assert!(state.sim_threshold <= MAX_SIM_THRESHOLD + 1e-9);
        }
        assert!((state.sim_threshold - MAX_SIM_THRESHOLD).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_ratios_and_estimates() {
        let mut state = TenantState::new();
        state.record_hit(HitKind::Exact);
        state.record_hit(HitKind::Semantic);
        state.record_miss();
        state.record_miss();
        for latency in [10.0, 20.0, 30.0, 40.0] {
            state.append_latency(latency);
        }

        let m = state.metrics("t1");
        assert_eq!(m.requests, 4);
        assert_eq!(m.hits, 2);
        assert_eq!(m.misses, 2);
        assert!((m.hit_ratio - 0.5).abs() < 1e-9);
        assert!((m.semantic_hit_ratio - 0.25).abs() < 1e-9);
        assert_eq!(m.tokens_saved_est, 200);
        assert!((m.avg_latency_ms - 25.0).abs() < 1e-9);
        assert!((m.p50_latency_ms - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_empty_tenant() {
        let state = TenantState::new();
        let m = state.metrics("t1");
        assert_eq!(m.requests, 0);
        assert_eq!(m.hit_ratio, 0.0);
        assert_eq!(m.p95_latency_ms, 0.0);
        assert_eq!(m.avg_confidence, 0.0);
    }

    #[test]
    fn test_metrics_semantic_quality() {
        let mut state = TenantState::new();
        state.append_event(event(Decision::Semantic, 0.9, 0.8));
        state.append_event(event(Decision::Semantic, 0.7, 0.6));
        state.append_event(event(Decision::Exact, 0.0, 0.0));

        let m = state.metrics("t1");
        assert!((m.avg_confidence - 0.8).abs() < 1e-9);
        assert!((m.avg_hybrid_score - 0.7).abs() < 1e-9);
        assert_eq!(m.high_confidence_hits, 1);
        assert!((m.high_confidence_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ttl_expiry_is_visible_to_get_exact_callers() {
        let mut state = TenantState::new();
        let mut stale = entry("a", vec![1.0, 0.0]);
        stale.ttl_seconds = 1;
        stale.created_at = Utc::now() - Duration::seconds(2);
        state.insert(stale).unwrap();

        let (_, found) = state.get_exact("a").unwrap();
        assert!(!found.is_fresh(Utc::now()));
    }
}
