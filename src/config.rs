//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{
    ByteSize, CacheBuilder, TtlMode, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_SWEEP_BATCH_SIZE,
};

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Maximum number of entries the cache can hold
    pub max_entries: usize,
    /// Maximum total size of cached values in bytes
    pub max_memory_bytes: u64,
    /// Default TTL in seconds for entries without explicit TTL (0 = no expiry)
    pub default_ttl: u64,
    /// Default expiry mode: `absolute`, `sliding` or `adaptive`
    pub ttl_mode: String,
    /// Upper bound in seconds for adaptive TTLs
    pub adaptive_max_ttl: u64,
    /// Background sweep interval in seconds (0 = disabled)
    pub sweep_interval: u64,
    /// Expired entries removed per sweep batch
    pub sweep_batch_size: usize,
    /// HTTP server port
    pub server_port: u16,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `MAX_MEMORY_BYTES` - Memory budget in bytes (default: 64 MiB)
    /// - `DEFAULT_TTL` - Default TTL in seconds, 0 for none (default: 300)
    /// - `TTL_MODE` - `absolute`, `sliding` or `adaptive` (default: absolute)
    /// - `ADAPTIVE_MAX_TTL` - Adaptive TTL ceiling in seconds (default: 3600)
    /// - `SWEEP_INTERVAL` - Sweep frequency in seconds, 0 disables (default: 60)
    /// - `SWEEP_BATCH_SIZE` - Entries removed per sweep batch (default: 256)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            max_memory_bytes: env_or("MAX_MEMORY_BYTES", defaults.max_memory_bytes),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            ttl_mode: env::var("TTL_MODE")
                .map(|v| v.trim().to_lowercase())
                .unwrap_or(defaults.ttl_mode),
            adaptive_max_ttl: env_or("ADAPTIVE_MAX_TTL", defaults.adaptive_max_ttl),
            sweep_interval: env_or("SWEEP_INTERVAL", defaults.sweep_interval),
            sweep_batch_size: env_or("SWEEP_BATCH_SIZE", defaults.sweep_batch_size),
            server_port: env_or("SERVER_PORT", defaults.server_port),
        }
    }

    /// The configured expiry mode. Unknown names fall back to absolute.
    pub fn ttl_mode(&self) -> TtlMode {
        TtlMode::parse(&self.ttl_mode, Duration::from_secs(self.adaptive_max_ttl))
            .unwrap_or_default()
    }

    /// Maps the configuration onto a builder for the server's string cache,
    /// charging each value its byte length.
    pub fn cache_builder(&self) -> CacheBuilder<String, String> {
        let mut builder = CacheBuilder::new()
            .max_entries(self.max_entries)
            .max_memory_bytes(self.max_memory_bytes)
            .ttl_mode(self.ttl_mode())
            .sweep_interval(Duration::from_secs(self.sweep_interval))
            .sweep_batch_size(self.sweep_batch_size)
            .size_calculator(ByteSize);
        if self.default_ttl > 0 {
            builder = builder.default_ttl(Duration::from_secs(self.default_ttl));
        }
        builder
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            default_ttl: 300,
            ttl_mode: "absolute".to_string(),
            adaptive_max_ttl: 3600,
            sweep_interval: 60,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
            server_port: 3000,
        }
    }
}
