//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::debug;

use crate::cache::{Cache, TtlMode};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    BatchOp, BatchRequest, BatchResponse, ClearResponse, DeleteResponse, GetResponse,
    HealthResponse, InvalidatePatternRequest, InvalidateResponse, InvalidateTagsRequest,
    SetRequest, SetResponse, StatsResponse,
};

/// Ceiling for per-request adaptive TTLs when the cache default is not adaptive.
const FALLBACK_ADAPTIVE_MAX_TTL: Duration = Duration::from_secs(3600);

/// Application state shared across all handlers.
///
/// The cache synchronizes internally, so handlers share it through a plain `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Shared cache
    pub cache: Arc<Cache<String, String>>,
    /// Ceiling applied to requests that ask for adaptive expiry
    pub adaptive_max_ttl: Duration,
}

impl AppState {
    /// Creates a new AppState around the given cache.
    pub fn new(cache: Cache<String, String>) -> Self {
        let adaptive_max_ttl = match cache.config().ttl_mode {
            TtlMode::Adaptive { max_ttl } => max_ttl,
            _ => FALLBACK_ADAPTIVE_MAX_TTL,
        };
        Self {
            cache: Arc::new(cache),
            adaptive_max_ttl,
        }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let cache = config.cache_builder().build()?;
        Ok(Self {
            cache: Arc::new(cache),
            adaptive_max_ttl: Duration::from_secs(config.adaptive_max_ttl),
        })
    }
}

/// Handler for PUT /set
///
/// Stores a key-value pair in the cache with optional TTL, mode and tags.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> ApiResult<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(ApiError::InvalidRequest(error_msg));
    }

    let options = req.put_options(state.adaptive_max_ttl);
    state.cache.put_with(req.key.clone(), req.value, options)?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
///
/// Retrieves a value from the cache by key. Absent and expired keys are 404.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<GetResponse>> {
    let (value, remaining) = state
        .cache
        .get_with_ttl(&key)
        .ok_or_else(|| ApiError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(key, value).with_ttl_remaining(remaining)))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    if !state.cache.remove(&key) {
        return Err(ApiError::NotFound(key));
    }

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /invalidate/tags
pub async fn invalidate_tags_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateTagsRequest>,
) -> ApiResult<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(ApiError::InvalidRequest(error_msg));
    }

    let removed = state.cache.invalidate_by_tags(&req.tags);
    Ok(Json(InvalidateResponse { removed }))
}

/// Handler for POST /invalidate/pattern
pub async fn invalidate_pattern_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidatePatternRequest>,
) -> ApiResult<Json<InvalidateResponse>> {
    let pattern = req.compile()?;

    let removed = state.cache.invalidate_pattern(&pattern);
    Ok(Json(InvalidateResponse { removed }))
}

/// Handler for POST /batch
///
/// Stages every operation in one transaction; either all apply or none do.
pub async fn batch_handler(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(ApiError::InvalidRequest(error_msg));
    }

    let applied = req.ops.len();
    let mut tx = state.cache.transaction();
    for op in req.ops {
        match op {
            BatchOp::Put(set) => {
                let options = set.put_options(state.adaptive_max_ttl);
                tx.put_with(set.key, set.value, options);
            }
            BatchOp::Remove { key } => {
                tx.remove(key);
            }
        }
    }
    let summary = tx.commit()?;
    debug!(applied, "applied batch");

    Ok(Json(BatchResponse::new(applied, summary)))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    state.cache.clear();
    Json(ClearResponse::new())
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
