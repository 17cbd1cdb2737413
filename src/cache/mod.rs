//! Cache Module
//!
//! Provides in-memory caching with TTL expiration, LRU eviction under count
//! and memory budgets, and tag, pattern, scope and transactional invalidation.

mod builder;
mod clock;
mod entry;
mod lru;
mod pattern;
mod size;
mod stats;
mod store;
mod tags;
mod transaction;


// Re-export public types
pub use builder::{
    CacheBuilder, CacheConfig, EvictionListener, RemovalCause, DEFAULT_MAX_MEMORY_BYTES,
    DEFAULT_SWEEP_BATCH_SIZE, DEFAULT_SWEEP_INTERVAL,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use entry::{adaptive_ttl, TtlMode};
pub use lru::LruTracker;
pub use pattern::KeyPattern;
pub use size::{ByteSize, FnSize, JsonSize, SizeAccounting, SizeCalculator, UnitSize};
pub use stats::{CacheMetrics, CacheStats, MetricsSink, TracingSink};
pub use store::{Cache, PutOptions};
pub use tags::{normalize_tags, ScopeId, ScopeIndex, TagIndex};
pub use transaction::{CommitSummary, Transaction};
