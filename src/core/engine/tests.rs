//! Engine-level tests for the cache pipeline

use crate::config::CacheConfig;
use crate::core::engine::CacheService;
use crate::core::models::ChatMessage;
use crate::core::providers::{ChatProvider, EmbeddingProvider, ProviderError, ProviderResult};
use crate::core::types::Decision;
use crate::storage::vector::l2_normalize;
use crate::utils::error::CacheError;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const MODEL: &str = "gpt-4o-mini";
const TTL: u64 = 7 * 24 * 3600;

/// Deterministic embedder: fixed vectors for known texts, an optional
/// hash-derived unit vector for everything else.
struct StubEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    hashed_dim: Option<usize>,
    calls: AtomicUsize,
}

impl StubEmbedder {
    fn mapped(vectors: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: vectors
                .iter()
                .map(|(k, v)| {
                    let mut v = v.clone();
                    l2_normalize(&mut v);
                    (k.to_lowercase(), v)
                })
                .collect(),
            hashed_dim: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn hashed(dim: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            hashed_dim: Some(dim),
            calls: AtomicUsize::new(0),
        }
    }
}

fn hashed_unit_vector(text: &str, dim: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut seed = u64::from_le_bytes(digest[..8].try_into().unwrap()) | 1;
    let mut vector = Vec::with_capacity(dim);
    for _ in 0..dim {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        vector.push((seed as f64 / u64::MAX as f64) as f32 - 0.5);
    }
    l2_normalize(&mut vector);
    vector
}

#[async_trait::async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(vector) = self.vectors.get(&text.trim().to_lowercase()) {
            return Ok(vector.clone());
        }
        match self.hashed_dim {
            Some(dim) => Ok(hashed_unit_vector(text, dim)),
            None => Err(ProviderError::Fatal(format!("no stub vector for {text:?}"))),
        }
    }
}

struct StubChat {
    calls: AtomicUsize,
    fail: bool,
}

impl StubChat {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait::async_trait]
impl ChatProvider for StubChat {
    async fn complete(&self, messages: &[ChatMessage], _temperature: f32) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Fatal("chat upstream down".to_string()));
        }
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(format!("generated: {last}"))
    }
}

fn service(embedder: Arc<StubEmbedder>, chat: Arc<StubChat>) -> CacheService {
    CacheService::new(&CacheConfig::default(), embedder, chat)
}

fn user(content: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(content)]
}

#[tokio::test]
async fn test_miss_then_exact_hit() {
    let embedder = Arc::new(StubEmbedder::hashed(64));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    let (answer_a, meta_a) = svc
        .query("t1", &user("What is AI?"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    assert_eq!(meta_a.hit, Decision::Miss);
    assert_eq!(meta_a.similarity, 0.0);
    assert_eq!(meta_a.strategy, "hybrid");

    let (answer_b, meta_b) = svc
        .query("t1", &user("What is AI?"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    assert_eq!(meta_b.hit, Decision::Exact);
    assert_eq!(meta_b.similarity, 1.0);
    assert_eq!(answer_a, answer_b);
    assert_eq!(chat.calls.load(Ordering::SeqCst), 1);

    let metrics = svc.metrics("t1").await;
    assert_eq!(metrics.entries, 1);
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.semantic_hits, 0);
}

#[tokio::test]
async fn test_exact_hit_normalizes_whitespace_and_case() {
    let embedder = Arc::new(StubEmbedder::hashed(64));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    svc.query("t1", &user("What is AI?"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    let (_, meta) = svc
        .query("t1", &user("  what   is ai? "), MODEL, TTL, 0.2)
        .await
        .unwrap();

    assert_eq!(meta.hit, Decision::Exact);
    assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exact_requires_matching_model() {
    let embedder = Arc::new(StubEmbedder::hashed(64));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    svc.query("t1", &user("What is AI?"), "gpt-4o-mini", TTL, 0.2)
        .await
        .unwrap();
    let (_, meta) = svc
        .query("t1", &user("What is AI?"), "gpt-4o", TTL, 0.2)
        .await
        .unwrap();

    // The model gate only guards the exact path; the identical prompt is
    // picked up semantically (cosine 1.0) instead of as an exact hit.
    assert_eq!(meta.hit, Decision::Semantic);
    assert!((meta.similarity - 1.0).abs() < 1e-4);

    let metrics = svc.metrics("t1").await;
    assert_eq!(metrics.entries, 1);
    assert_eq!(metrics.semantic_hits, 1);
}

#[tokio::test]
async fn test_semantic_hit_on_paraphrase() {
    // Stubbed cosine 0.9 between the cached prompt and the paraphrase
    let embedder = Arc::new(StubEmbedder::mapped(&[
        ("explain semantic caching basics", vec![1.0, 0.0]),
        ("explain semantic caching", vec![0.9, (1.0f32 - 0.81).sqrt()]),
    ]));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    svc.query("t2", &user("Explain semantic caching basics"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    let (answer, meta) = svc
        .query("t2", &user("Explain semantic caching"), MODEL, TTL, 0.2)
        .await
        .unwrap();

    assert_eq!(meta.hit, Decision::Semantic);
    assert!(meta.similarity >= 0.85);
    assert_eq!(meta.strategy, "hybrid-enhanced");
    let hybrid = meta.hybrid_score.unwrap();
    assert!(hybrid >= meta.similarity * 0.6);
    assert!(meta.confidence.unwrap() >= 0.7);
    assert!((meta.threshold_used.unwrap() - 0.72).abs() < 1e-9);
    assert_eq!(answer, "generated: Explain semantic caching basics");
    assert_eq!(chat.calls.load(Ordering::SeqCst), 1);

    let metrics = svc.metrics("t2").await;
    assert_eq!(metrics.semantic_hits, 1);
    assert_eq!(metrics.hits, 1);
}

#[tokio::test]
async fn test_typo_tolerance_accepts_proven_entry() {
    // Reordered tokens dodge the exact key while keeping full lexical
    // overlap; the stubbed cosine is only 0.68.
    let cos = 0.68f32;
    let embedder = Arc::new(StubEmbedder::mapped(&[
        ("what is comptr", vec![1.0, 0.0]),
        ("comptr what is", vec![cos, (1.0 - cos * cos).sqrt()]),
    ]));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    svc.query("t3", &user("what is comptr"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    // Ten exact hits mark the entry as proven
    for _ in 0..10 {
        let (_, meta) = svc
            .query("t3", &user("what is comptr"), MODEL, TTL, 0.2)
            .await
            .unwrap();
        assert_eq!(meta.hit, Decision::Exact);
    }

    let (_, meta) = svc
        .query("t3", &user("comptr what is"), MODEL, TTL, 0.2)
        .await
        .unwrap();

    assert_eq!(meta.hit, Decision::Semantic);
    assert!((meta.similarity - 0.68).abs() < 1e-3);
    assert!(meta.threshold_used.unwrap() <= 0.66 + 1e-9);
    assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_low_similarity_low_overlap_is_a_miss() {
    let cos = 0.5f32;
    let embedder = Arc::new(StubEmbedder::mapped(&[
        ("completely different question", vec![1.0, 0.0]),
        ("unrelated words here", vec![cos, (1.0 - cos * cos).sqrt()]),
    ]));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    svc.query("t1", &user("completely different question"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    let (_, meta) = svc
        .query("t1", &user("unrelated words here"), MODEL, TTL, 0.2)
        .await
        .unwrap();

    assert_eq!(meta.hit, Decision::Miss);
    assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_ttl_expiry_is_a_miss_and_overwrites() {
    let embedder = Arc::new(StubEmbedder::hashed(64));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    svc.query("t4", &user("What is AI?"), MODEL, 1, 0.2)
        .await
        .unwrap();

    // Age the entry past its 1s TTL
    {
        let tenant = svc.tenant("t4");
        let mut state = tenant.write().await;
        state.rows[0].created_at = state.rows[0].created_at - Duration::seconds(2);
    }

    let (_, meta) = svc
        .query("t4", &user("What is AI?"), MODEL, 1, 0.2)
        .await
        .unwrap();
    assert_eq!(meta.hit, Decision::Miss);
    assert_eq!(chat.calls.load(Ordering::SeqCst), 2);

    let tenant = svc.tenant("t4");
    let state = tenant.read().await;
    assert_eq!(state.rows.len(), 2);
    assert_eq!(state.exact.len(), 1);
    // The exact key now points at the fresh replacement
    let (row, entry) = state.get_exact("what is ai?").unwrap();
    assert_eq!(row, 1);
    assert!(entry.is_fresh(chrono::Utc::now()));
}

#[tokio::test]
async fn test_adaptive_threshold_drift_over_misses() {
    let embedder = Arc::new(StubEmbedder::hashed(256));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat);

    for i in 0..20 {
        svc.query("t5", &user(&format!("unique question number {i}")), MODEL, TTL, 0.2)
            .await
            .unwrap();
    }
    {
        let tenant = svc.tenant("t5");
        let state = tenant.read().await;
        // Exactly one downward step after the 20th request
        assert!((state.sim_threshold - 0.71).abs() < 1e-9);
    }

    for i in 20..40 {
        svc.query("t5", &user(&format!("unique question number {i}")), MODEL, TTL, 0.2)
            .await
            .unwrap();
    }
    let tenant = svc.tenant("t5");
    let state = tenant.read().await;
    // Clamped at the lower bound on subsequent adjustments
    assert!((state.sim_threshold - 0.70).abs() < 1e-9);
}

#[tokio::test]
async fn test_embedding_failure_degrades_to_uncached_miss() {
    // Mapped stub with no entry for the second query: embed fails there
    let embedder = Arc::new(StubEmbedder::mapped(&[("known prompt", vec![1.0, 0.0])]));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    svc.query("t6", &user("known prompt"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    let (answer, meta) = svc
        .query("t6", &user("unknown prompt"), MODEL, TTL, 0.2)
        .await
        .unwrap();

    assert_eq!(meta.hit, Decision::Miss);
    assert_eq!(answer, "generated: unknown prompt");

    let metrics = svc.metrics("t6").await;
    assert_eq!(metrics.misses, 2);
    // The uncachable response was served but not stored
    assert_eq!(metrics.entries, 1);
}

#[tokio::test]
async fn test_embedding_failure_still_serves_exact_hit() {
    let embedder = Arc::new(StubEmbedder::mapped(&[("known prompt", vec![1.0, 0.0])]));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    svc.query("t6", &user("known prompt"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    let (_, meta) = svc
        .query("t6", &user("known prompt"), MODEL, TTL, 0.2)
        .await
        .unwrap();

    assert_eq!(meta.hit, Decision::Exact);
    assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_chat_failure_surfaces_and_inserts_nothing() {
    let embedder = Arc::new(StubEmbedder::hashed(64));
    let chat = Arc::new(StubChat::failing());
    let svc = service(embedder, chat);

    let err = svc
        .query("t7", &user("What is AI?"), MODEL, TTL, 0.2)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::FatalProvider(_)));

    let metrics = svc.metrics("t7").await;
    assert_eq!(metrics.entries, 0);
    assert_eq!(metrics.requests, 0);
}

#[tokio::test]
async fn test_both_providers_failing_surfaces_single_error() {
    // The mapped stub has no vector for the query, so embedding fails;
    // the chat provider fails too. One error comes back, not two.
    let embedder = Arc::new(StubEmbedder::mapped(&[("seed", vec![1.0, 0.0])]));
    let seeded = service(embedder.clone(), Arc::new(StubChat::new()));
    seeded.query("t8", &user("seed"), MODEL, TTL, 0.2).await.unwrap();
    let snapshot = seeded.export().await;

    let failing = service(embedder, Arc::new(StubChat::failing()));
    failing.restore(snapshot).unwrap();

    let err = failing
        .query("t8", &user("no vector for this"), MODEL, TTL, 0.2)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::FatalProvider(_)));

    let metrics = failing.metrics("t8").await;
    assert_eq!(metrics.entries, 1);
    assert_eq!(metrics.misses, 1);
}

#[tokio::test]
async fn test_events_are_recorded_newest_first() {
    let embedder = Arc::new(StubEmbedder::hashed(64));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat);

    svc.query("t9", &user("first"), MODEL, TTL, 0.2).await.unwrap();
    svc.query("t9", &user("first"), MODEL, TTL, 0.2).await.unwrap();
    svc.query("t9", &user("second"), MODEL, TTL, 0.2).await.unwrap();

    let events = svc.events("t9", 10).await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].decision, Decision::Miss);
    assert_eq!(events[1].decision, Decision::Exact);
    assert_eq!(events[2].decision, Decision::Miss);
    assert_eq!(events[1].similarity, 1.0);
    assert!(events.iter().all(|e| e.tenant_id == "t9"));

    let limited = svc.events("t9", 2).await;
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let embedder = Arc::new(StubEmbedder::hashed(64));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat.clone());

    svc.query("a", &user("What is AI?"), MODEL, TTL, 0.2).await.unwrap();
    let (_, meta) = svc
        .query("b", &user("What is AI?"), MODEL, TTL, 0.2)
        .await
        .unwrap();

    // Tenant b cannot see tenant a's entry
    assert_eq!(meta.hit, Decision::Miss);
    assert_eq!(svc.metrics("a").await.entries, 1);
    assert_eq!(svc.metrics("b").await.entries, 1);
    assert_eq!(svc.tenant_count(), 2);
    assert_eq!(svc.entry_count().await, 2);
}

#[tokio::test]
async fn test_stored_embeddings_are_unit_norm() {
    let embedder = Arc::new(StubEmbedder::hashed(64));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder, chat);

    for i in 0..5 {
        svc.query("t10", &user(&format!("question {i}")), MODEL, TTL, 0.2)
            .await
            .unwrap();
    }

    let tenant = svc.tenant("t10");
    let state = tenant.read().await;
    assert_eq!(state.rows.len(), state.index.len());
    for entry in &state.rows {
        let norm: f32 = entry.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}

#[tokio::test]
async fn test_snapshot_round_trip_through_service() {
    let embedder = Arc::new(StubEmbedder::hashed(64));
    let chat = Arc::new(StubChat::new());
    let svc = service(embedder.clone(), chat.clone());

    for prompt in ["What is AI?", "What is ML?", "capital of France"] {
        svc.query("t11", &user(prompt), MODEL, TTL, 0.2).await.unwrap();
    }
    svc.query("t11", &user("What is AI?"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    let before = svc.metrics("t11").await;
    let events_before = svc.events("t11", 1000).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    svc.save_snapshot(&path).await.unwrap();

    // Fresh process state
    let reloaded = service(embedder, chat);
    assert!(reloaded.load_snapshot(&path).await.unwrap());

    let after = reloaded.metrics("t11").await;
    assert_eq!(after.requests, before.requests);
    assert_eq!(after.hits, before.hits);
    assert_eq!(after.entries, before.entries);
    assert_eq!(after.sim_threshold, before.sim_threshold);

    let events_after = reloaded.events("t11", 1000).await;
    assert_eq!(events_after.len(), events_before.len());
    for (a, b) in events_after.iter().zip(events_before.iter()) {
        assert_eq!(a.prompt_hash, b.prompt_hash);
        assert_eq!(a.decision, b.decision);
    }

    // Cached answers survive the restart
    let (_, meta) = reloaded
        .query("t11", &user("What is AI?"), MODEL, TTL, 0.2)
        .await
        .unwrap();
    assert_eq!(meta.hit, Decision::Exact);
}
