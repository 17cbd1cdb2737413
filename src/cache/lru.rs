//! LRU Tracker Module
//!
//! Implements Least Recently Used ordering for cache eviction.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::hash::Hash;

// == LRU Tracker ==
/// Orders keys by recency tick for LRU eviction.
///
/// Ticks come from a single monotonically increasing counter, so they are
/// unique and also encode insertion order:
/// - Smallest tick = least recently used
/// - Largest tick = most recently used
///
/// Reads under the shared lock advance an entry's own tick without touching
/// this index. The store reconciles during eviction by re-queueing any key whose
/// live tick is newer than the indexed one.
#[derive(Debug)]
pub struct LruTracker<K> {
    /// Keys ordered by tick
    order: BTreeMap<u64, K>,
    /// Tick each key is currently indexed under
    positions: HashMap<K, u64>,
}

impl<K> Default for LruTracker<K> {
    fn default() -> Self {
        Self {
            order: BTreeMap::new(),
            positions: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq + Clone> LruTracker<K> {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Indexes `key` at `tick`, replacing any previous position.
    pub fn touch(&mut self, key: &K, tick: u64) {
        if let Some(old) = self.positions.insert(key.clone(), tick) {
            self.order.remove(&old);
        }
        self.order.insert(tick, key.clone());
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &K) {
        if let Some(tick) = self.positions.remove(key) {
            self.order.remove(&tick);
        }
    }

    // == Pop Oldest ==
    /// Removes and returns the least recently indexed key with its tick.
    pub fn pop_oldest(&mut self) -> Option<(u64, K)> {
        let (tick, key) = self.order.pop_first()?;
        self.positions.remove(&key);
        Some((tick, key))
    }

    // == Slots After ==
    /// Up to `limit` index slots with a tick greater than `after`, oldest first.
    ///
    /// Ticks are stable across lock releases, so a caller can walk the whole
    /// index in bounded steps by resuming from the last tick it saw.
    pub fn slots_after(&self, after: u64, limit: usize) -> impl Iterator<Item = (u64, &K)> {
        self.order
            .range((Bound::Excluded(after), Bound::Unbounded))
            .take(limit)
            .map(|(tick, key)| (*tick, key))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.positions.clear();
    }
}
