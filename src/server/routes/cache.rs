//! Cache query, metrics, events, and operator endpoints

use crate::auth::{AuthedTenant, UsageRecord};
use crate::core::models::{ChatMessage, DEFAULT_TEMPERATURE};
use crate::core::types::{CacheEvent, Decision, MetricsSnapshot, QueryMeta};
use crate::server::state::AppState;
use crate::utils::error::{CacheError, Result};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Configure cache routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(get_metrics))
        .route("/query", web::get().to(simple_query))
        .route("/events", web::get().to(get_events))
        .route("/admin/snapshot", web::post().to(trigger_snapshot))
        .route("/admin/domains", web::put().to(set_domain_threshold));
}

/// Record a usage accounting row; failures are logged, never surfaced
pub(crate) async fn log_usage(
    state: &AppState,
    auth: &AuthedTenant,
    endpoint: &str,
    meta: &QueryMeta,
) {
    let record = UsageRecord {
        api_key: auth.api_key.clone(),
        tenant_id: auth.tenant_id.clone(),
        endpoint: endpoint.to_string(),
        cache_hits: u64::from(meta.hit != Decision::Miss),
        cache_misses: u64::from(meta.hit == Decision::Miss),
        tokens_used: 0,
        cost_estimate: 0.0,
        timestamp: chrono::Utc::now(),
    };
    if let Err(e) = state.keys.log_usage(record).await {
        warn!(tenant = %auth.tenant_id, endpoint, error = %e, "usage logging failed");
    }
}

/// Per-tenant cache performance metrics
async fn get_metrics(state: web::Data<AppState>, auth: AuthedTenant) -> HttpResponse {
    let metrics = state.cache.metrics(&auth.tenant_id).await;
    info!(
        tenant = %auth.tenant_id,
        endpoint = "/metrics",
        hit_ratio = metrics.hit_ratio,
        "metrics read"
    );
    HttpResponse::Ok().json(metrics)
}

/// Query parameters of the simple query endpoint
#[derive(Debug, Deserialize)]
pub struct QueryParams {
    /// The prompt to serve
    pub prompt: String,
    /// Model override; the configured chat model when absent
    #[serde(default)]
    pub model: Option<String>,
}

/// Response body of the simple query endpoint
#[derive(Debug, Serialize)]
struct QueryResponse {
    answer: String,
    meta: QueryMeta,
    metrics: MetricsSnapshot,
}

/// Single-message query through the cache
async fn simple_query(
    state: web::Data<AppState>,
    auth: AuthedTenant,
    params: web::Query<QueryParams>,
) -> Result<HttpResponse> {
    let model = params
        .model
        .clone()
        .unwrap_or_else(|| state.config.provider.chat_model.clone());
    let messages = vec![ChatMessage::user(&params.prompt)];

    let (answer, meta) = state
        .cache
        .query(
            &auth.tenant_id,
            &messages,
            &model,
            state.config.cache.default_ttl_seconds,
            DEFAULT_TEMPERATURE,
        )
        .await?;

    info!(
        tenant = %auth.tenant_id,
        endpoint = "/query",
        decision = %meta.hit,
        similarity = meta.similarity,
        latency_ms = meta.latency_ms,
        model = %model,
        prompt_len = params.prompt.len(),
        "request served"
    );
    log_usage(&state, &auth, "/query", &meta).await;

    let metrics = state.cache.metrics(&auth.tenant_id).await;
    Ok(HttpResponse::Ok().json(QueryResponse {
        answer,
        meta,
        metrics,
    }))
}

/// Query parameters of the events endpoint
#[derive(Debug, Deserialize)]
pub struct EventsParams {
    /// Maximum events to return, bounded to [1, 1000]
    #[serde(default = "default_events_limit")]
    pub limit: usize,
}

fn default_events_limit() -> usize {
    100
}

/// Recent cache events, newest first
async fn get_events(
    state: web::Data<AppState>,
    auth: AuthedTenant,
    params: web::Query<EventsParams>,
) -> Result<HttpResponse> {
    if params.limit < 1 || params.limit > 1000 {
        return Err(CacheError::validation("limit must be between 1 and 1000"));
    }

    let events: Vec<CacheEvent> = state.cache.events(&auth.tenant_id, params.limit).await;
    Ok(HttpResponse::Ok().json(events))
}

/// Response of the operator snapshot trigger
#[derive(Debug, Serialize)]
struct SnapshotResponse {
    saved: bool,
    tenants: usize,
    entries: usize,
}

/// Explicit operator snapshot trigger
async fn trigger_snapshot(state: web::Data<AppState>, auth: AuthedTenant) -> HttpResponse {
    let path = &state.config.storage.snapshot_path;
    let saved = match state.cache.save_snapshot(path).await {
        Ok(()) => true,
        Err(e) => {
            warn!(tenant = %auth.tenant_id, error = %e, "operator snapshot failed");
            false
        }
    };

    HttpResponse::Ok().json(SnapshotResponse {
        saved,
        tenants: state.cache.tenant_count(),
        entries: state.cache.entry_count().await,
    })
}

/// Body of the domain-threshold operator endpoint
#[derive(Debug, Deserialize)]
pub struct DomainThresholdRequest {
    /// Domain tag the threshold applies to
    pub domain: String,
    /// Similarity threshold in [0, 1]
    pub threshold: f64,
}

/// Set a per-tenant domain threshold
async fn set_domain_threshold(
    state: web::Data<AppState>,
    auth: AuthedTenant,
    body: web::Json<DomainThresholdRequest>,
) -> Result<HttpResponse> {
    if body.domain.trim().is_empty() {
        return Err(CacheError::validation("domain must not be empty"));
    }
    if !(0.0..=1.0).contains(&body.threshold) {
        return Err(CacheError::validation("threshold must be within [0, 1]"));
    }

    state
        .cache
        .set_domain_threshold(&auth.tenant_id, body.domain.trim(), body.threshold)
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "updated": true,
        "domain": body.domain.trim(),
        "threshold": body.threshold,
    })))
}
