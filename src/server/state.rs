//! Application state shared across HTTP handlers

use crate::auth::KeyRegistry;
use crate::config::Config;
use crate::core::engine::CacheService;
use std::sync::Arc;

/// HTTP server state shared across handlers
///
/// Holds the process-wide cache service and the key registry. All fields
/// are `Arc`-wrapped for cheap cloning into the worker threads.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration (shared read-only)
    pub config: Arc<Config>,
    /// The cache engine and every tenant's state
    pub cache: Arc<CacheService>,
    /// API-key registry
    pub keys: Arc<dyn KeyRegistry>,
}

impl AppState {
    /// Create a new AppState with shared resources
    pub fn new(config: Config, cache: Arc<CacheService>, keys: Arc<dyn KeyRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            cache,
            keys,
        }
    }
}
