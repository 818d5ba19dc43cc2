//! OpenAI-compatible provider implementations
//!
//! Thin reqwest wrappers over the `/embeddings` and `/chat/completions`
//! endpoints of any OpenAI-compatible API.

use super::{ChatProvider, EmbeddingProvider, ProviderError, ProviderResult};
use crate::core::models::ChatMessage;
use crate::storage::vector::l2_normalize;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Embedding provider backed by an OpenAI-compatible `/embeddings` endpoint
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddings {
    /// Create a new embeddings client
    pub fn new(api_base: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(classify_transport_error)?;

        let response = check_status(response)?;
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("embedding response decode: {e}")))?;

        let mut vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::Fatal("embedding response had no data".to_string()))?;
        l2_normalize(&mut vector);

        debug!(
            model = %self.model,
            text_len = text.len(),
            time_ms = started.elapsed().as_millis() as u64,
            "embedding generated"
        );
        Ok(vector)
    }
}

/// Chat provider backed by an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiChat {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    /// Create a new chat client
    pub fn new(api_base: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatResponseChoice>,
}

#[derive(Deserialize)]
struct ChatResponseChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> ProviderResult<String> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                temperature,
            })
            .send()
            .await
            .map_err(classify_transport_error)?;

        let response = check_status(response)?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("chat response decode: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Fatal("chat response had no content".to_string()))?;

        debug!(
            model = %self.model,
            temperature,
            time_ms = started.elapsed().as_millis() as u64,
            "chat completion generated"
        );
        Ok(content.trim().to_string())
    }
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_connect() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Fatal(err.to_string())
    }
}

fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.is_server_error() || status.as_u16() == 429 {
        Err(ProviderError::Transient(format!("upstream returned {status}")))
    } else {
        Err(ProviderError::Fatal(format!("upstream returned {status}")))
    }
}
