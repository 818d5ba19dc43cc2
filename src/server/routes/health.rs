//! Health check endpoint

use crate::server::state::AppState;
use actix_web::{HttpResponse, web};
use tracing::debug;

/// Configure health routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check));
}

/// Basic health check with cache statistics
///
/// Unauthenticated; used by load balancers and monitoring.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let tenants = state.cache.tenant_count();
    let total_entries = state.cache.entry_count().await;
    debug!(tenants, total_entries, "health check");

    HttpResponse::Ok().json(HealthStatus {
        status: "ok",
        service: "semantic-cache",
        version: env!("CARGO_PKG_VERSION"),
        cache: CacheHealth {
            tenants,
            total_entries,
        },
    })
}

/// Health payload
#[derive(Debug, Clone, serde::Serialize)]
struct HealthStatus {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    cache: CacheHealth,
}

/// Cache statistics block
#[derive(Debug, Clone, serde::Serialize)]
struct CacheHealth {
    tenants: usize,
    total_entries: usize,
}
