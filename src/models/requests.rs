//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use std::time::Duration;

use serde::Deserialize;

use crate::cache::{KeyPattern, PutOptions, TtlMode};
use crate::error::Result;

/// Longest key accepted over HTTP, in bytes.
pub const MAX_KEY_LENGTH: usize = 256;

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: The value to store
/// - `ttl`: Optional TTL in seconds (uses default if not specified)
/// - `mode`: Optional expiry mode (`absolute`, `sliding`, `adaptive`)
/// - `tags`: Invalidation tags
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: String,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Optional expiry mode override
    #[serde(default)]
    pub mode: Option<String>,
    /// Tags the entry can be invalidated by
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if let Some(error) = validate_key(&self.key) {
            return Some(error);
        }
        if self.tags.iter().any(|tag| tag.is_empty()) {
            return Some("Tags cannot be empty".to_string());
        }
        if let Some(mode) = &self.mode {
            if TtlMode::parse(mode, Duration::ZERO).is_none() {
                return Some(format!("Unknown TTL mode '{}'", mode));
            }
        }
        None
    }

    /// Put options for this request. Adaptive mode is capped at `adaptive_max_ttl`.
    pub fn put_options(&self, adaptive_max_ttl: Duration) -> PutOptions {
        let mut options = PutOptions::new().tags(self.tags.iter().cloned());
        if let Some(secs) = self.ttl {
            options = options.ttl(Duration::from_secs(secs));
        }
        if let Some(mode) = self
            .mode
            .as_deref()
            .and_then(|mode| TtlMode::parse(mode, adaptive_max_ttl))
        {
            options = options.mode(mode);
        }
        options
    }
}

fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}

/// Request body for POST /invalidate/tags
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateTagsRequest {
    pub tags: Vec<String>,
}

impl InvalidateTagsRequest {
    pub fn validate(&self) -> Option<String> {
        if self.tags.is_empty() {
            return Some("At least one tag is required".to_string());
        }
        None
    }
}

/// Request body for POST /invalidate/pattern
///
/// `pattern` is a glob (`*`, `?`) unless `regex` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidatePatternRequest {
    pub pattern: String,
    #[serde(default)]
    pub regex: bool,
}

impl InvalidatePatternRequest {
    pub fn compile(&self) -> Result<KeyPattern> {
        if self.regex {
            KeyPattern::regex(&self.pattern)
        } else {
            KeyPattern::glob(&self.pattern)
        }
    }
}

/// One operation of a batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOp {
    Put(SetRequest),
    Remove { key: String },
}

/// Request body for POST /batch. Applied as one transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub ops: Vec<BatchOp>,
}

impl BatchRequest {
    pub fn validate(&self) -> Option<String> {
        self.ops.iter().enumerate().find_map(|(index, op)| {
            let error = match op {
                BatchOp::Put(req) => req.validate(),
                BatchOp::Remove { key } => validate_key(key),
            };
            error.map(|error| format!("Operation {}: {}", index, error))
        })
    }
}
