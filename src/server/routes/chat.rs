//! OpenAI-compatible chat completions endpoint

use crate::auth::AuthedTenant;
use crate::core::models::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, MessageRole, ResponseMessage, Usage,
};
use crate::server::routes::cache::log_usage;
use crate::server::state::AppState;
use crate::utils::error::{CacheError, Result};
use actix_web::{HttpResponse, web};
use tracing::info;
use uuid::Uuid;

/// Configure chat routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/chat/completions", web::post().to(chat_completions));
}

/// Chat completions served through the semantic cache
///
/// Accepts the OpenAI body shape (plus `ttl_seconds`) and returns a
/// `chat.completion` object whose `meta` field carries the cache decision.
async fn chat_completions(
    state: web::Data<AppState>,
    auth: AuthedTenant,
    request: web::Json<ChatCompletionRequest>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    if request.messages.is_empty() {
        return Err(CacheError::validation("messages must not be empty"));
    }
    if !(0.0..=2.0).contains(&request.temperature) {
        return Err(CacheError::validation(
            "temperature must be within [0.0, 2.0]",
        ));
    }

    let (answer, meta) = state
        .cache
        .query(
            &auth.tenant_id,
            &request.messages,
            &request.model,
            request.ttl_seconds,
            request.temperature,
        )
        .await?;

    info!(
        tenant = %auth.tenant_id,
        endpoint = "/v1/chat/completions",
        decision = %meta.hit,
        similarity = meta.similarity,
        latency_ms = meta.latency_ms,
        "request served"
    );
    log_usage(&state, &auth, "/v1/chat/completions", &meta).await;

    let response = ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: request.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: MessageRole::Assistant,
                content: answer,
            },
            finish_reason: "stop".to_string(),
        }],
        usage: Usage::default(),
        meta,
    };

    Ok(HttpResponse::Ok().json(response))
}
