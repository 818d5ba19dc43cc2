//! Collaborator capabilities consumed by the cache engine
//!
//! The engine talks to the outside world through two narrow traits: an
//! embedding provider (text to unit vector) and a chat provider (messages to
//! text). Production implementations live in [`openai`]; tests use
//! deterministic stubs.

mod openai;

pub use openai::{OpenAiChat, OpenAiEmbeddings};

use crate::core::models::ChatMessage;
use thiserror::Error;

/// Failure modes of an outbound provider call
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The call exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// Retriable failure (5xx, overload, connection reset)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Non-retriable failure (bad request, invalid credentials)
    #[error("fatal failure: {0}")]
    Fatal(String),
}

/// Result type for provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Trait for embedding providers
///
/// Implementations must return L2-normalized vectors and be deterministic
/// for a given model and input.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate a unit-length embedding for the text
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;
}

/// Trait for chat completion providers
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Generate a completion for the conversation
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> ProviderResult<String>;
}
