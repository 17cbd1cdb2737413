//! Cache Builder Module
//!
//! Constructor-time configuration. Settings are fixed for the lifetime of the
//! built instance; invalid combinations are rejected before a cache exists.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::entry::TtlMode;
use super::size::{SizeCalculator, UnitSize};
use super::store::Cache;
use crate::error::{CacheError, Result};

/// Default memory budget: 64 MiB.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Default background sweep period.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of expired entries removed per write-lock acquisition.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 256;

// == Removal Cause ==
/// Why an entry was handed to the eviction listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Removed to bring the cache back within its count or memory budget
    Capacity,
    /// Removed because its TTL elapsed
    Expired,
}

/// Hook invoked synchronously, after the cache lock is released, for every
/// evicted or expired entry.
pub type EvictionListener<K, V> = Arc<dyn Fn(&K, &V, RemovalCause) + Send + Sync>;

// == Cache Config ==
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of live entries
    pub max_entries: usize,
    /// Maximum sum of entry sizes
    pub max_memory_bytes: u64,
    /// TTL applied to puts that do not carry one; `None` = no expiry
    pub default_ttl: Option<Duration>,
    /// Expiry mode applied to puts that do not override it
    pub ttl_mode: TtlMode,
    /// Background sweep period; zero disables the sweeper
    pub sweep_interval: Duration,
    /// Expired entries removed per sweep batch
    pub sweep_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            default_ttl: None,
            ttl_mode: TtlMode::Absolute,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }
}

impl CacheConfig {
    // == Validate ==
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfiguration(
                "max_entries must be greater than zero".to_string(),
            ));
        }
        if self.max_memory_bytes == 0 {
            return Err(CacheError::InvalidConfiguration(
                "max_memory_bytes must be greater than zero".to_string(),
            ));
        }
        if self.default_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::InvalidConfiguration(
                "default_ttl must be greater than zero; leave it unset for no expiry".to_string(),
            ));
        }
        if self.sweep_batch_size == 0 {
            return Err(CacheError::InvalidConfiguration(
                "sweep_batch_size must be greater than zero".to_string(),
            ));
        }
        if let TtlMode::Adaptive { max_ttl } = self.ttl_mode {
            if max_ttl.is_zero() {
                return Err(CacheError::InvalidConfiguration(
                    "adaptive TTL requires a non-zero max_ttl".to_string(),
                ));
            }
            if let Some(base) = self.default_ttl {
                if base > max_ttl {
                    return Err(CacheError::InvalidConfiguration(format!(
                        "default_ttl {:?} exceeds adaptive max_ttl {:?}",
                        base, max_ttl
                    )));
                }
            }
        }
        Ok(())
    }
}

// == Cache Builder ==
/// Builds a [`Cache`].
///
/// ```
/// use std::time::Duration;
/// use mini_cache::cache::{ByteSize, Cache};
///
/// let cache: Cache<String, String> = Cache::builder()
///     .max_entries(10_000)
///     .max_memory_bytes(16 * 1024 * 1024)
///     .default_ttl(Duration::from_secs(300))
///     .size_calculator(ByteSize)
///     .build()
///     .unwrap();
/// assert!(cache.is_empty());
/// ```
pub struct CacheBuilder<K, V> {
    config: CacheConfig,
    size_calculator: Arc<dyn SizeCalculator<V>>,
    clock: Arc<dyn Clock>,
    on_evict: Option<EvictionListener<K, V>>,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
            size_calculator: Arc::new(UnitSize),
            clock: Arc::new(SystemClock),
            on_evict: None,
        }
    }
}

impl<K, V> CacheBuilder<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every setting with `config`.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.config.max_entries = max_entries;
        self
    }

    pub fn max_memory_bytes(mut self, max_memory_bytes: u64) -> Self {
        self.config.max_memory_bytes = max_memory_bytes;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = Some(ttl);
        self
    }

    pub fn ttl_mode(mut self, mode: TtlMode) -> Self {
        self.config.ttl_mode = mode;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn sweep_batch_size(mut self, batch_size: usize) -> Self {
        self.config.sweep_batch_size = batch_size;
        self
    }

    /// Without a calculator every value costs one unit.
    pub fn size_calculator(mut self, calculator: impl SizeCalculator<V> + 'static) -> Self {
        self.size_calculator = Arc::new(calculator);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn on_evict<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, &V, RemovalCause) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(listener));
        self
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    // == Build ==
    pub fn build(self) -> Result<Cache<K, V>> {
        self.config.validate()?;
        Ok(Cache::from_parts(
            self.config,
            self.size_calculator,
            self.clock,
            self.on_evict,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> CacheBuilder<String, String> {
        CacheBuilder::new()
    }

    #[test]
    fn test_config_default_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_max_entries_rejected() {
        let result = builder().max_entries(0).build();
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_memory_budget_rejected() {
        let result = builder().max_memory_bytes(0).build();
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_sweep_batch_rejected() {
        let result = builder().sweep_batch_size(0).build();
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_default_ttl_rejected() {
        let result = builder().default_ttl(Duration::ZERO).build();
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_adaptive_requires_max_ttl_above_default() {
        let result = builder()
            .default_ttl(Duration::from_secs(120))
            .ttl_mode(TtlMode::Adaptive {
                max_ttl: Duration::from_secs(60),
            })
            .build();
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));

        let result = builder()
            .ttl_mode(TtlMode::Adaptive {
                max_ttl: Duration::ZERO,
            })
            .build();
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_builder_applies_settings() {
        let cache = builder()
            .max_entries(5)
            .max_memory_bytes(500)
            .default_ttl(Duration::from_secs(9))
            .ttl_mode(TtlMode::Sliding)
            .sweep_interval(Duration::ZERO)
            .build()
            .unwrap();

        let config = cache.config();
        assert_eq!(config.max_entries, 5);
        assert_eq!(config.max_memory_bytes, 500);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(9)));
        assert_eq!(config.ttl_mode, TtlMode::Sliding);
        assert!(config.sweep_interval.is_zero());
    }
}
