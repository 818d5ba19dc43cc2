//! Server builder and the `run_server` entry point

use crate::config::Config;
use crate::server::server::HttpServer;
use crate::utils::error::{CacheError, Result};
use tracing::info;

/// Server builder for explicit configuration
pub struct ServerBuilder {
    config: Option<Config>,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self { config: None }
    }

    /// Set configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the HTTP server
    pub async fn build(self) -> Result<HttpServer> {
        let config = self
            .config
            .ok_or_else(|| CacheError::config("Configuration is required"))?;

        HttpServer::new(&config).await
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the server with automatic configuration loading
///
/// Loads `config/gateway.yaml` when present, falls back to defaults, and
/// applies the `PORT` environment override.
pub async fn run_server() -> Result<()> {
    info!("Starting semantic cache gateway");

    let config_path = "config/gateway.yaml";
    let mut config = match Config::from_file(config_path).await {
        Ok(config) => {
            info!("Configuration file loaded: {}", config_path);
            config
        }
        Err(e) => {
            info!(error = %e, "No usable configuration file, using defaults");
            Config::default()
        }
    };
    config.apply_env();

    let server = HttpServer::new(&config).await?;
    info!(
        "Server starting at: http://{}:{}",
        config.server.host, config.server.port
    );
    info!("API Endpoints:");
    info!("   GET  /health - Health check");
    info!("   GET  /metrics - Tenant cache metrics");
    info!("   GET  /query - Single-prompt cached query");
    info!("   GET  /events - Recent cache events");
    info!("   POST /v1/chat/completions - Chat completions");

    server.start().await
}
