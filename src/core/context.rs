//! Context-aware query embedding
//!
//! Builds the embedding used for semantic search: the last user message
//! carries most of the weight, with a short window of preceding user
//! messages mixed in. All provider calls go through the shared embedding
//! cache and carry a deadline.

use crate::core::embedding_cache::EmbeddingCache;
use crate::core::models::{ChatMessage, MessageRole};
use crate::core::providers::EmbeddingProvider;
use crate::storage::vector::l2_normalize;
use crate::utils::error::{CacheError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Weight of the last user message
const PRIMARY_WEIGHT: f32 = 0.7;
/// Weight of the context window
const CONTEXT_WEIGHT: f32 = 0.3;
/// Context window covers up to this many trailing user messages
const CONTEXT_WINDOW: usize = 3;

/// Builds query embeddings from conversation context
pub struct ContextEmbedder {
    cache: Arc<EmbeddingCache>,
    provider: Arc<dyn EmbeddingProvider>,
    deadline: Duration,
}

impl ContextEmbedder {
    /// Create a new context embedder
    pub fn new(
        cache: Arc<EmbeddingCache>,
        provider: Arc<dyn EmbeddingProvider>,
        deadline: Duration,
    ) -> Self {
        Self {
            cache,
            provider,
            deadline,
        }
    }

    /// Embed a single text, consulting the cache first
    async fn embed_text(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        if let Some(vector) = self.cache.get(text) {
            return Ok(vector);
        }

        let vector = tokio::time::timeout(self.deadline, self.provider.embed(text))
            .await
            .map_err(|_| {
                CacheError::ProviderTimeout(format!(
                    "embedding call exceeded {}s deadline",
                    self.deadline.as_secs()
                ))
            })??;

        let vector = Arc::new(vector);
        self.cache.put(text, vector.clone());
        Ok(vector)
    }

    /// Build the query embedding and return it with the primary text
    ///
    /// The primary text is the last user message, falling back to the
    /// normalized prompt when the conversation has no user turns. With more
    /// than one user message the trailing window is blended in and the
    /// result re-normalized; otherwise the primary embedding is returned
    /// unchanged.
    pub async fn embed_query(
        &self,
        messages: &[ChatMessage],
        prompt_norm: &str,
    ) -> Result<(Vec<f32>, String)> {
        let user_msgs: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .collect();

        let primary_text = user_msgs.last().copied().unwrap_or(prompt_norm).to_string();
        let primary = self.embed_text(&primary_text).await?;

        if user_msgs.len() > 1 {
            let window_start = user_msgs.len().saturating_sub(CONTEXT_WINDOW);
            let context_text = user_msgs[window_start..].join(" ");
            let context = self.embed_text(&context_text).await?;

            if context.len() != primary.len() {
                warn!(
                    primary_dim = primary.len(),
                    context_dim = context.len(),
                    "context embedding dimension mismatch, using primary only"
                );
                return Ok((primary.as_ref().clone(), primary_text));
            }

            let mut combined: Vec<f32> = primary
                .iter()
                .zip(context.iter())
                .map(|(p, c)| PRIMARY_WEIGHT * p + CONTEXT_WEIGHT * c)
                .collect();
            l2_normalize(&mut combined);
            return Ok((combined, primary_text));
        }

        Ok((primary.as_ref().clone(), primary_text))
    }
}
