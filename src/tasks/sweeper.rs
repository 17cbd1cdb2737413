//! Expiry Sweeper Task
//!
//! Background task that periodically removes expired cache entries so that
//! unread entries do not hold memory until eviction reaches them.
//!
//! A sweep walks the recency index in chunks of `sweep_batch_size` entries.
//! Each chunk is scanned under the shared lock and its expired keys removed
//! under the exclusive one, then the task yields before resuming at the next
//! tick. No single lock section grows with the size of the cache.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::{Cache, MetricsSink};

/// Spawns the expiry sweeper for `cache`.
///
/// Period and batch size come from the cache's configuration. Returns `None`
/// when the configured interval is zero. After every sweep the current stats
/// are handed to `sink`, if one is given.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(config.cache_builder().build()?);
/// let sweeper = spawn_sweeper(cache.clone(), Some(Arc::new(TracingSink)));
/// // Later, during shutdown:
/// if let Some(handle) = sweeper {
///     handle.abort();
/// }
/// ```
pub fn spawn_sweeper<K, V>(
    cache: Arc<Cache<K, V>>,
    sink: Option<Arc<dyn MetricsSink>>,
) -> Option<JoinHandle<()>>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let period = cache.config().sweep_interval;
    if period.is_zero() {
        info!("Expiry sweeper disabled");
        return None;
    }
    let batch_size = cache.config().sweep_batch_size;

    Some(tokio::spawn(async move {
        info!(
            "Starting expiry sweeper with interval of {:?} and batch size {}",
            period, batch_size
        );

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let removed = sweep_once(&cache, batch_size).await;
            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }

            if let Some(sink) = &sink {
                sink.publish(&cache.stats());
            }
        }
    }))
}

/// Runs one full sweep, returning the number of entries removed.
pub async fn sweep_once<K, V>(cache: &Cache<K, V>, batch_size: usize) -> usize
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    let batch_size = batch_size.max(1);
    let mut cursor = 0;
    let mut total = 0;

    loop {
        let (keys, next) = cache.scan_expired(cursor, batch_size);
        if !keys.is_empty() {
            total += cache.remove_expired(&keys);
        }
        let Some(next) = next else {
            break;
        };
        cursor = next;
        tokio::task::yield_now().await;
    }

    total
}
