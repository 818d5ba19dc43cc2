//! # semcache-rs
//!
//! A multi-tenant semantic response cache that sits in front of an LLM chat
//! API. Each prompt is served from a previously computed response when its
//! normalized form matches exactly, or when a stored prompt is semantically
//! close enough under hybrid re-ranking; otherwise a fresh response is
//! generated and cached.
//!
//! ## Features
//!
//! - **OpenAI Compatible**: `POST /v1/chat/completions` plus a simple
//!   `GET /query` endpoint
//! - **Exact + Semantic Matching**: normalized exact keys backed by an
//!   inner-product vector index with hybrid re-ranking and confidence
//!   scoring
//! - **Adaptive Thresholds**: per-tenant similarity thresholds nudged by
//!   observed hit ratios
//! - **Multi-Tenant**: tenants derived from bearer API keys, each with its
//!   own index, counters, and event ring
//! - **Durable**: periodic and shutdown snapshots restore the cache across
//!   restarts
//!
//! ## Gateway Mode
//!
//! ```rust,no_run
//! use semcache_rs::{Config, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config/gateway.yaml").await?;
//!     let gateway = Gateway::new(config).await?;
//!     gateway.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod core;
pub mod server;
pub mod storage;
pub mod utils;

// Re-export main types
pub use crate::config::Config;
pub use crate::core::engine::CacheService;
pub use crate::core::models::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, MessageRole,
};
pub use crate::core::providers::{ChatProvider, EmbeddingProvider, ProviderError};
pub use crate::core::types::{CacheEntry, CacheEvent, Decision, MetricsSnapshot, QueryMeta};
pub use crate::utils::error::{CacheError, Result};

use tracing::info;

/// A minimal gateway wrapper over the HTTP server
pub struct Gateway {
    server: server::HttpServer,
}

impl Gateway {
    /// Create a new gateway instance
    pub async fn new(config: Config) -> Result<Self> {
        info!("Creating new gateway instance");

        let server = server::HttpServer::new(&config).await?;
        Ok(Self { server })
    }

    /// Run the gateway server
    pub async fn run(self) -> Result<()> {
        info!("Starting semantic cache gateway");
        self.server.start().await
    }
}

// Version information
/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Name of the crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
