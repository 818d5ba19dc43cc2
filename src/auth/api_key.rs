//! Bearer API-key parsing and the request extractor

use crate::server::state::AppState;
use crate::utils::error::{CacheError, Result};
use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest, web};
use futures::future::LocalBoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Accepted header shape: `Bearer sc-<tenant>-<anything>`
static API_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Bearer\s+(sc-[A-Za-z0-9_-]+)$").expect("static regex compiles"));

/// A parsed API key
#[derive(Debug, Clone)]
pub struct ApiKey {
    /// Raw token (without the `Bearer ` prefix)
    pub token: String,
    /// Tenant identifier: the second dash-delimited segment
    pub tenant_id: String,
}

/// Parse an `Authorization` header value into an API key
pub fn parse_bearer(header: Option<&str>) -> Result<ApiKey> {
    let header = header.ok_or_else(|| CacheError::unauthorized("Missing or invalid API key"))?;
    let captures = API_KEY_RE
        .captures(header)
        .ok_or_else(|| CacheError::unauthorized("Missing or invalid API key"))?;

    let token = captures[1].to_string();
    let segments: Vec<&str> = token.split('-').collect();
    if segments.len() < 3 {
        return Err(CacheError::unauthorized("Malformed API key"));
    }

    Ok(ApiKey {
        tenant_id: segments[1].to_string(),
        token,
    })
}

/// Authenticated tenant, extracted from the `Authorization` header
///
/// Parsing failures return 401 with the literal messages above. Registry
/// lookups run afterwards: an explicitly inactive key is rejected, while
/// registry I/O failures are logged and ignored.
#[derive(Debug, Clone)]
pub struct AuthedTenant {
    /// Tenant identifier
    pub tenant_id: String,
    /// Raw API key, kept for usage accounting
    pub api_key: String,
    /// Plan recorded for the key
    pub plan: String,
}

impl FromRequest for AuthedTenant {
    type Error = CacheError;
    type Future = LocalBoxFuture<'static, Result<Self>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let header = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let state = req.app_data::<web::Data<AppState>>().cloned();

        Box::pin(async move {
            let key = parse_bearer(header.as_deref())?;
            let mut plan = "free".to_string();

            if let Some(state) = state {
                match state.keys.validate(&key.token).await {
                    Ok(info) => {
                        plan = info.plan;
                        if let Err(e) = state.keys.record_use(&key.token, &key.tenant_id).await {
                            warn!(tenant = %key.tenant_id, error = %e, "key usage recording failed");
                        }
                    }
                    Err(CacheError::Unauthorized(message)) => {
                        return Err(CacheError::Unauthorized(message));
                    }
                    Err(e) => {
                        warn!(tenant = %key.tenant_id, error = %e, "key registry unavailable");
                    }
                }
            }

            Ok(AuthedTenant {
                tenant_id: key.tenant_id,
                api_key: key.token,
                plan,
            })
        })
    }
}
