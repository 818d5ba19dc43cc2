//! Process-wide bounded LRU cache from raw text to unit embedding vectors
//!
//! Sits between the context embedder and the embedding provider so repeated
//! texts never recompute an embedding. Keys are lowercased trimmed text;
//! stored vectors are returned byte-identical.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default capacity when the configuration does not set one
pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded LRU embedding cache
pub struct EmbeddingCache {
    inner: Mutex<LruCache<String, Arc<Vec<f32>>>>,
}

impl EmbeddingCache {
    /// Create a cache with the given capacity (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up the embedding for a text, refreshing its recency
    pub fn get(&self, text: &str) -> Option<Arc<Vec<f32>>> {
        self.inner.lock().get(&cache_key(text)).cloned()
    }

    /// Store an embedding, evicting the least-recently-used entry when full
    pub fn put(&self, text: &str, vector: Arc<Vec<f32>>) {
        self.inner.lock().put(cache_key(text), vector);
    }

    /// Number of cached embeddings
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn cache_key(text: &str) -> String {
    text.trim().to_lowercase()
}
