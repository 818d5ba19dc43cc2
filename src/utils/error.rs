//! Error handling for the cache gateway
//!
//! This module defines all error types used throughout the service and their
//! HTTP mappings.

use crate::core::providers::ProviderError;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

/// Result type alias for the cache gateway
pub type Result<T> = std::result::Result<T, CacheError>;

/// Main error type for the cache gateway
#[derive(Error, Debug)]
pub enum CacheError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Missing or malformed API key
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed request body or out-of-range parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provider call exceeded its deadline
    #[error("Provider timeout: {0}")]
    ProviderTimeout(String),

    /// Retriable provider failure (5xx, connection reset)
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// Non-retriable provider failure
    #[error("Fatal provider error: {0}")]
    FatalProvider(String),

    /// Snapshot load/save failure; never fails a request
    #[error("Storage error: {0}")]
    Storage(String),

    /// Detected invariant violation (index/rows mismatch and the like)
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    /// Internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ResponseError for CacheError {
    fn error_response(&self) -> HttpResponse {
        let (status_code, error_code, message) = match self {
            CacheError::Unauthorized(msg) => (
                actix_web::http::StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                msg.clone(),
            ),
            CacheError::Validation(msg) => (
                actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            CacheError::ProviderTimeout(_) => (
                actix_web::http::StatusCode::GATEWAY_TIMEOUT,
                "PROVIDER_TIMEOUT",
                self.to_string(),
            ),
            CacheError::TransientProvider(_) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "PROVIDER_UNAVAILABLE",
                self.to_string(),
            ),
            CacheError::FatalProvider(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "PROVIDER_ERROR",
                self.to_string(),
            ),
            CacheError::Config(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                self.to_string(),
            ),
            CacheError::InternalInvariant(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_INVARIANT",
                "An internal error occurred".to_string(),
            ),
            _ => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: error_code.to_string(),
                message,
                timestamp: chrono::Utc::now().timestamp(),
            },
        };

        HttpResponse::build(status_code).json(error_response)
    }
}

/// Standard error response format
#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(serde::Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub timestamp: i64,
}

/// Helper functions for creating specific errors
impl CacheError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage(message.into())
    }

    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::InternalInvariant(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

impl From<ProviderError> for CacheError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(message) => CacheError::ProviderTimeout(message),
            ProviderError::Transient(message) => CacheError::TransientProvider(message),
            ProviderError::Fatal(message) => CacheError::FatalProvider(message),
        }
    }
}
