//! Mini Cache - An embeddable in-memory cache with an HTTP front-end
//!
//! Provides TTL expiration (absolute, sliding, adaptive), LRU eviction under
//! entry-count and memory budgets, tag, pattern and scope invalidation, and
//! transactional batches.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{Cache, CacheBuilder, PutOptions};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_sweeper;
