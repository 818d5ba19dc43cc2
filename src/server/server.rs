//! HTTP server core implementation

use crate::auth::FileKeyRegistry;
use crate::config::{Config, ServerConfig};
use crate::core::engine::CacheService;
use crate::core::providers::{OpenAiChat, OpenAiEmbeddings};
use crate::server::routes;
use crate::server::state::AppState;
use crate::storage::snapshot::spawn_snapshotter;
use crate::utils::error::{CacheError, Result};
use actix_cors::Cors;
use actix_web::{App, HttpServer as ActixHttpServer, middleware::DefaultHeaders, web};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// HTTP server
pub struct HttpServer {
    /// Server configuration
    config: ServerConfig,
    /// Application state
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server wired to the real providers
    ///
    /// Loads the snapshot from durable storage (starting empty on any
    /// failure) and spawns the coalescing background snapshotter.
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Creating HTTP server");

        let timeout = Duration::from_secs(config.cache.provider_timeout_secs);
        let api_key = config.provider.api_key();
        if api_key.is_empty() {
            warn!(
                env = %config.provider.api_key_env,
                "provider API key is not set; upstream calls will fail"
            );
        }

        let embeddings = Arc::new(OpenAiEmbeddings::new(
            &config.provider.api_base,
            &api_key,
            &config.provider.embed_model,
            timeout,
        ));
        let chat = Arc::new(OpenAiChat::new(
            &config.provider.api_base,
            &api_key,
            &config.provider.chat_model,
            timeout,
        ));

        let cache = Arc::new(CacheService::new(&config.cache, embeddings, chat));
        if let Err(e) = cache.load_snapshot(&config.storage.snapshot_path).await {
            // Storage failures never block startup
            warn!(error = %e, "snapshot load failed, starting empty");
        }
        let snapshot_tx = spawn_snapshotter(cache.clone(), config.storage.snapshot_path.clone());
        cache.set_snapshot_signal(snapshot_tx);

        let keys = Arc::new(FileKeyRegistry::load(config.storage.keys_path.clone()).await);
        let state = AppState::new(config.clone(), cache, keys);

        Ok(Self {
            config: config.server.clone(),
            state,
        })
    }

    /// Create the Actix-web application
    pub(crate) fn create_app(
        state: web::Data<AppState>,
    ) -> App<
        impl actix_web::dev::ServiceFactory<
            actix_web::dev::ServiceRequest,
            Config = (),
            Response = actix_web::dev::ServiceResponse<impl actix_web::body::MessageBody>,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        let allowed_origins = &state.config.server.allowed_origins;
        let mut cors = Cors::default()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
        if allowed_origins.is_empty() {
            cors = cors.allow_any_origin();
        } else {
            for origin in allowed_origins {
                cors = cors.allowed_origin(origin);
            }
        }

        App::new()
            .app_data(state)
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .wrap(cors)
            .wrap(DefaultHeaders::new().add(("Server", "semcache-rs")))
            .configure(routes::health::configure_routes)
            .configure(routes::cache::configure_routes)
            .configure(routes::chat::configure_routes)
    }

    /// Start the HTTP server and snapshot state on graceful shutdown
    pub async fn start(self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Starting HTTP server on {}", bind_addr);

        let cache = self.state.cache.clone();
        let snapshot_path = self.state.config.storage.snapshot_path.clone();
        let state = web::Data::new(self.state);

        let server = ActixHttpServer::new(move || Self::create_app(state.clone()))
            .bind(&bind_addr)
            .map_err(|e| CacheError::config(format!("Failed to bind {bind_addr}: {e}")))?
            .run();

        info!("HTTP server listening on {}", bind_addr);

        // Runs until SIGINT/SIGTERM stops the accept loop
        server
            .await
            .map_err(|e| CacheError::internal(format!("Server error: {e}")))?;

        info!("Shutdown signal received, saving cache");
        if let Err(e) = cache.save_snapshot(&snapshot_path).await {
            error!(error = %e, "final snapshot failed");
        }

        info!("HTTP server stopped");
        Ok(())
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get application state
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

fn json_error_handler(
    err: actix_web::error::JsonPayloadError,
    _req: &actix_web::HttpRequest,
) -> actix_web::Error {
    CacheError::Validation(err.to_string()).into()
}

fn query_error_handler(
    err: actix_web::error::QueryPayloadError,
    _req: &actix_web::HttpRequest,
) -> actix_web::Error {
    CacheError::Validation(err.to_string()).into()
}
