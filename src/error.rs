//! Error types for the cache and its HTTP front-end
//!
//! Provides unified error handling using thiserror. A cache miss is not an
//! error: `Cache::get` returns `None`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::cache::ScopeId;
use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Errors returned by the cache core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A single value's cost exceeds the whole memory budget
    #[error("Entry too large: {size} bytes exceeds budget of {max} bytes")]
    EntryTooLarge { size: u64, max: u64 },

    /// Rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Write or removal against a scope that is not registered
    #[error("Unknown scope: {0}")]
    UnknownScope(ScopeId),

    /// Key pattern failed to compile
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

// == API Error Enum ==
/// Errors surfaced by the HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Key not found in cache (absent or expired)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rejected by the cache
    #[error(transparent)]
    Cache(#[from] CacheError),
}

// == IntoResponse Implementation ==
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Cache(CacheError::EntryTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Cache(CacheError::InvalidPattern(_)) => StatusCode::BAD_REQUEST,
            ApiError::Cache(CacheError::UnknownScope(_)) => StatusCode::NOT_FOUND,
            ApiError::Cache(CacheError::InvalidConfiguration(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

/// Result type for HTTP handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
