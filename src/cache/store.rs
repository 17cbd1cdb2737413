//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with LRU tracking, size
//! accounting, TTL expiration and tag/scope invalidation.
//!
//! # Locking
//! All structural state sits behind one `RwLock`. A hit on a live entry only
//! takes the shared lock: recency, last access, access count and adaptive
//! leases are per-entry atomics. Every structural change (put, remove,
//! invalidation, eviction, commit) takes the exclusive lock, which also makes
//! get/put on the same key mutually exclusive and serializes commits.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::builder::{CacheBuilder, CacheConfig, EvictionListener, RemovalCause};
use super::clock::Clock;
use super::entry::{duration_to_nanos, CacheEntry, TtlMode};
use super::lru::LruTracker;
use super::pattern::KeyPattern;
use super::size::{SizeAccounting, SizeCalculator};
use super::stats::{CacheMetrics, CacheStats};
use super::tags::{normalize_tags, ScopeId, ScopeIndex, TagIndex};
use super::transaction::{CommitSummary, StagedOp, Transaction};
use crate::error::{CacheError, Result};

// == Put Options ==
/// Per-write settings. Unset fields fall back to the cache configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutOptions {
    /// Overrides the default TTL
    pub ttl: Option<Duration>,
    /// Stores the entry without expiry, ignoring any default TTL
    pub no_expiry: bool,
    /// Overrides the configured TTL mode
    pub mode: Option<TtlMode>,
    /// Invalidation tags
    pub tags: Vec<String>,
    /// Caller-supplied cost, bypassing the size calculator
    pub cost: Option<u64>,
    /// Lifecycle scope the entry belongs to
    pub scope: Option<ScopeId>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn no_expiry(mut self) -> Self {
        self.no_expiry = true;
        self
    }

    pub fn mode(mut self, mode: TtlMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn cost(mut self, cost: u64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn scope(mut self, scope: ScopeId) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// A put whose size and expiry have been resolved outside the lock.
struct PreparedPut<K, V> {
    key: K,
    value: V,
    size: u64,
    mode: TtlMode,
    ttl: Option<Duration>,
    tags: Vec<String>,
    scope: Option<ScopeId>,
}

impl<K, V> PreparedPut<K, V> {
    /// A zero TTL is already expired: the write replaces any previous entry
    /// but nothing is installed.
    fn is_dead_on_arrival(&self) -> bool {
        self.ttl.is_some_and(|ttl| ttl.is_zero())
    }
}

enum PreparedOp<K, V> {
    Put(PreparedPut<K, V>),
    Remove(K),
}

/// Entry removed by eviction or expiry, queued for the listener.
type Removed<K, V> = (K, V, RemovalCause);

// == Cache Core ==
/// Structural state guarded by the cache lock.
struct CacheCore<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    lru: LruTracker<K>,
    tags: TagIndex<K>,
    scopes: ScopeIndex<K>,
    memory: SizeAccounting,
}

impl<K, V> CacheCore<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    fn new(max_memory_bytes: u64) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            tags: TagIndex::new(),
            scopes: ScopeIndex::new(),
            memory: SizeAccounting::new(max_memory_bytes),
        }
    }

    /// Installs an entry in the map and every index. The key must be absent.
    fn attach(&mut self, key: K, entry: CacheEntry<V>) {
        self.lru.touch(&key, entry.recency());
        self.tags.insert(&key, &entry.tags);
        if let Some(scope) = entry.scope {
            self.scopes.insert(scope, &key);
        }
        self.memory.charge(entry.size);
        self.entries.insert(key, entry);
        debug_assert_eq!(self.entries.len(), self.lru.len());
    }

    /// Removes an entry from the map and every index.
    fn detach<Q>(&mut self, key: &Q) -> Option<(K, CacheEntry<V>)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (key, entry) = self.entries.remove_entry(key)?;
        self.lru.remove(&key);
        self.tags.remove(&key, &entry.tags);
        if let Some(scope) = entry.scope {
            self.scopes.remove(scope, &key);
        }
        self.memory.release(entry.size);
        debug_assert_eq!(self.entries.len(), self.lru.len());
        Some((key, entry))
    }

    fn install(&mut self, put: PreparedPut<K, V>, now: u64, tick: u64) {
        self.detach(&put.key);
        if put.is_dead_on_arrival() {
            return;
        }
        let entry = CacheEntry::new(
            put.value, put.size, put.tags, put.scope, put.mode, put.ttl, now, tick,
        );
        self.attach(put.key, entry);
    }

    fn over_budget(&self, max_entries: usize) -> bool {
        self.entries.len() > max_entries || self.memory.over_budget()
    }

    // == Evict To Budget ==
    /// Removes least recently used entries until both budgets hold.
    ///
    /// Index slots whose tick is older than the entry's live recency (the
    /// entry was read under the shared lock) are re-queued at the live tick,
    /// so the entry actually removed is always the true LRU entry.
    fn evict_to_budget(&mut self, max_entries: usize, now: u64) -> Vec<Removed<K, V>> {
        let mut removed = Vec::new();

        while self.over_budget(max_entries) {
            let Some((tick, key)) = self.lru.pop_oldest() else {
                break;
            };
            let live = match self.entries.get(&key) {
                Some(entry) => entry.recency(),
                None => {
                    debug_assert!(false, "LRU index referenced missing key {:?}", key);
                    continue;
                }
            };
            if live > tick {
                self.lru.touch(&key, live);
                continue;
            }
            if let Some((key, entry)) = self.detach(&key) {
                let cause = if entry.is_expired(now) {
                    RemovalCause::Expired
                } else {
                    RemovalCause::Capacity
                };
                debug!(key = ?key, size = entry.size, cause = ?cause, "evicted cache entry");
                removed.push((key, entry.value, cause));
            }
        }

        debug_assert!(
            !self.memory.over_budget(),
            "memory budget still exceeded after evicting every entry"
        );
        removed
    }

    /// Detaches every key in `keys`. Entries whose TTL already elapsed were
    /// logically absent: they are returned for dispatch as expirations and
    /// left out of the live count.
    fn detach_all<'k, I>(&mut self, keys: I, now: u64) -> (usize, Vec<Removed<K, V>>)
    where
        I: IntoIterator<Item = &'k K>,
        K: 'k,
    {
        let mut live = 0;
        let mut expired = Vec::new();
        for key in keys {
            if let Some((key, entry)) = self.detach(key) {
                if entry.is_expired(now) {
                    expired.push((key, entry.value, RemovalCause::Expired));
                } else {
                    live += 1;
                }
            }
        }
        (live, expired)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.tags.clear();
        self.scopes.clear_members();
        self.memory.reset();
    }
}

// == Cache ==
/// Thread-safe in-memory cache with TTL expiry, LRU eviction under count
/// and memory budgets, and tag/pattern/scope invalidation.
///
/// Share it between tasks with `Arc<Cache<K, V>>`.
pub struct Cache<K, V> {
    core: RwLock<CacheCore<K, V>>,
    metrics: CacheMetrics,
    config: CacheConfig,
    size_calculator: Arc<dyn SizeCalculator<V>>,
    clock: Arc<dyn Clock>,
    epoch: Instant,
    tick: AtomicU64,
    on_evict: Option<EvictionListener<K, V>>,
}

impl<K, V> Cache<K, V> {
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    pub(crate) fn from_parts(
        config: CacheConfig,
        size_calculator: Arc<dyn SizeCalculator<V>>,
        clock: Arc<dyn Clock>,
        on_evict: Option<EvictionListener<K, V>>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            core: RwLock::new(CacheCore::new(config.max_memory_bytes)),
            metrics: CacheMetrics::new(),
            config,
            size_calculator,
            clock,
            epoch,
            tick: AtomicU64::new(0),
            on_evict,
        }
    }

    fn now(&self) -> u64 {
        duration_to_nanos(self.clock.now().saturating_duration_since(self.epoch))
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    // == Set ==
    /// Stores `value` with the configured defaults.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.put_with(key, value, PutOptions::default())
    }

    /// Stores or fully replaces the entry for `key`.
    ///
    /// Fails with [`CacheError::EntryTooLarge`] when the value alone exceeds
    /// the memory budget, leaving the cache untouched. Otherwise the entry
    /// becomes the most recently used and least recently used entries are
    /// evicted until both budgets hold again.
    pub fn put_with(&self, key: K, value: V, options: PutOptions) -> Result<()> {
        let put = self.prepare(key, value, options)?;

        let removed = {
            let mut core = self.core.write();
            if let Some(scope) = put.scope {
                if !core.scopes.is_open(scope) {
                    return Err(CacheError::UnknownScope(scope));
                }
            }
            let now = self.now();
            core.install(put, now, self.next_tick());
            core.evict_to_budget(self.config.max_entries, now)
        };

        self.dispatch(removed);
        Ok(())
    }

    /// Resolves size and expiry for a write, rejecting oversized values.
    fn prepare(&self, key: K, value: V, options: PutOptions) -> Result<PreparedPut<K, V>> {
        let size = options
            .cost
            .unwrap_or_else(|| self.size_calculator.size_of(&value));
        if size > self.config.max_memory_bytes {
            warn!(
                key = ?key,
                size,
                max = self.config.max_memory_bytes,
                "rejected entry larger than memory budget"
            );
            return Err(CacheError::EntryTooLarge {
                size,
                max: self.config.max_memory_bytes,
            });
        }

        let ttl = if options.no_expiry {
            None
        } else {
            options.ttl.or(self.config.default_ttl)
        };

        Ok(PreparedPut {
            key,
            value,
            size,
            mode: options.mode.unwrap_or(self.config.ttl_mode),
            ttl,
            tags: normalize_tags(options.tags),
            scope: options.scope,
        })
    }

    // == Get ==
    /// Returns the value for `key` if present and unexpired.
    ///
    /// A hit renews sliding leases and makes the entry most recently used. An
    /// expired entry is removed as a side effect and reported as a miss.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_with_ttl(key).map(|(value, _)| value)
    }

    /// Same as [`Cache::get`], also returning the lifetime left after this
    /// read (`None` for entries without expiry). Both come from one lookup.
    pub fn get_with_ttl<Q>(&self, key: &Q) -> Option<(V, Option<Duration>)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        {
            let core = self.core.read();
            match core.entries.get(key) {
                None => {
                    self.metrics.record_miss();
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => {
                    entry.record_access(now, self.next_tick());
                    self.metrics.record_hit();
                    return Some((entry.value.clone(), entry.ttl_remaining(now)));
                }
                Some(_) => {}
            }
        }

        // Expired under the shared lock: re-check under the exclusive lock,
        // a concurrent put may have replaced the entry in between.
        let mut core = self.core.write();
        let now = self.now();
        if let Some(entry) = core.entries.get(key) {
            if !entry.is_expired(now) {
                entry.record_access(now, self.next_tick());
                self.metrics.record_hit();
                return Some((entry.value.clone(), entry.ttl_remaining(now)));
            }
        }
        let expired = core.detach(key);
        drop(core);

        self.metrics.record_miss();
        if let Some((key, entry)) = expired {
            debug!(key = ?key, "removed expired cache entry on read");
            self.dispatch(vec![(key, entry.value, RemovalCause::Expired)]);
        }
        None
    }

    /// Whether `key` holds an unexpired entry. Does not affect recency or stats.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        self.core
            .read()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remaining lifetime of a live entry; `None` if absent, expired or
    /// stored without expiry.
    pub fn ttl_remaining<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        let core = self.core.read();
        let entry = core.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.ttl_remaining(now)
    }

    // == Delete ==
    /// Removes the entry for `key`. Returns whether a live entry was removed;
    /// an entry found already expired is dropped as an expiration instead.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut core = self.core.write();
        let now = self.now();
        let removed = core.detach(key);
        drop(core);

        match removed {
            Some((key, entry)) if entry.is_expired(now) => {
                debug!(key = ?key, "removed expired cache entry on delete");
                self.dispatch(vec![(key, entry.value, RemovalCause::Expired)]);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    // == Clear ==
    /// Drops every entry and index. Registered scopes stay open.
    pub fn clear(&self) {
        let mut core = self.core.write();
        let count = core.entries.len();
        core.clear();
        drop(core);
        debug!(count, "cleared cache");
    }

    // == Invalidate By Tags ==
    /// Removes every entry carrying any of `tags`. Each entry is removed once,
    /// and detached from all of its tags.
    pub fn invalidate_by_tags<I, S>(&self, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags: Vec<S> = tags.into_iter().collect();
        let mut core = self.core.write();
        let now = self.now();
        let keys = core.tags.keys_for_any(tags.iter().map(|tag| tag.as_ref()));
        let (removed, expired) = core.detach_all(&keys, now);
        drop(core);

        self.metrics.record_invalidations(removed as u64);
        debug!(removed, "invalidated cache entries by tag");
        self.dispatch(expired);
        removed
    }

    /// Keys currently indexed under `tag`.
    pub fn keys_for_tag(&self, tag: &str) -> Vec<K> {
        self.core.read().tags.keys_for(tag)
    }

    // == Invalidate Pattern ==
    /// Removes every entry whose key, in its `Display` form, matches `pattern`.
    /// Scans all keys.
    pub fn invalidate_pattern(&self, pattern: &KeyPattern) -> usize
    where
        K: fmt::Display,
    {
        let mut core = self.core.write();
        let now = self.now();
        let keys: Vec<K> = core
            .entries
            .keys()
            .filter(|key| pattern.is_match(&key.to_string()))
            .cloned()
            .collect();
        let (removed, expired) = core.detach_all(&keys, now);
        drop(core);

        self.metrics.record_invalidations(removed as u64);
        debug!(pattern = pattern.as_str(), removed, "invalidated cache entries by pattern");
        self.dispatch(expired);
        removed
    }

    // == Scopes ==
    /// Registers a new lifecycle scope.
    pub fn open_scope(&self) -> ScopeId {
        self.core.write().scopes.open()
    }

    /// Removes every entry written under `scope`; the scope stays open.
    pub fn remove_by_scope(&self, scope: ScopeId) -> Result<usize> {
        let mut core = self.core.write();
        if !core.scopes.is_open(scope) {
            return Err(CacheError::UnknownScope(scope));
        }
        let now = self.now();
        let keys = core.scopes.keys(scope);
        let (removed, expired) = core.detach_all(&keys, now);
        drop(core);

        self.metrics.record_invalidations(removed as u64);
        debug!(%scope, removed, "removed cache entries by scope");
        self.dispatch(expired);
        Ok(removed)
    }

    /// Removes every entry written under `scope` and deregisters it.
    pub fn close_scope(&self, scope: ScopeId) -> Result<usize> {
        let mut core = self.core.write();
        let keys = core
            .scopes
            .close(scope)
            .ok_or(CacheError::UnknownScope(scope))?;
        let now = self.now();
        let (removed, expired) = core.detach_all(&keys, now);
        drop(core);

        self.metrics.record_invalidations(removed as u64);
        debug!(%scope, removed, "closed cache scope");
        self.dispatch(expired);
        Ok(removed)
    }

    // == Transactions ==
    /// Opens a staging view. Nothing is visible to readers until commit.
    pub fn transaction(&self) -> Transaction<'_, K, V> {
        Transaction::new(self)
    }

    /// Applies staged operations atomically under the exclusive lock.
    ///
    /// Every put is validated before anything is applied, so a failing
    /// commit leaves the cache unchanged.
    pub(crate) fn commit_ops(&self, ops: Vec<StagedOp<K, V>>) -> Result<CommitSummary> {
        let prepared = ops
            .into_iter()
            .map(|op| match op {
                StagedOp::Put { key, value, options } => {
                    self.prepare(key, value, options).map(PreparedOp::Put)
                }
                StagedOp::Remove { key } => Ok(PreparedOp::Remove(key)),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut summary = CommitSummary::default();
        let mut stale = Vec::new();
        let mut removed = {
            let mut core = self.core.write();
            for op in &prepared {
                if let PreparedOp::Put(PreparedPut {
                    scope: Some(scope), ..
                }) = op
                {
                    if !core.scopes.is_open(*scope) {
                        return Err(CacheError::UnknownScope(*scope));
                    }
                }
            }

            let now = self.now();
            for op in prepared {
                match op {
                    PreparedOp::Put(put) => {
                        core.install(put, now, self.next_tick());
                        summary.written += 1;
                    }
                    PreparedOp::Remove(key) => {
                        let (live, expired) = core.detach_all([&key], now);
                        summary.removed += live;
                        stale.extend(expired);
                    }
                }
            }
            core.evict_to_budget(self.config.max_entries, now)
        };

        summary.evicted = removed
            .iter()
            .filter(|(_, _, cause)| *cause == RemovalCause::Capacity)
            .count();
        removed.extend(stale);
        debug!(
            written = summary.written,
            removed = summary.removed,
            evicted = summary.evicted,
            "committed cache transaction"
        );
        self.dispatch(removed);
        Ok(summary)
    }

    // == Cleanup Expired ==
    /// Checks at most `limit` entries, walking the recency index from the
    /// first tick after `after`. Returns the expired keys among them and the
    /// tick to resume from, or `None` once the whole index has been walked.
    ///
    /// Each call holds the shared lock for `limit` lookups at most, so a sweep
    /// over a large cache is a sequence of short scans.
    pub fn scan_expired(&self, after: u64, limit: usize) -> (Vec<K>, Option<u64>) {
        let now = self.now();
        let core = self.core.read();
        let mut expired = Vec::new();
        let mut last = None;
        let mut seen = 0;
        for (tick, key) in core.lru.slots_after(after, limit) {
            seen += 1;
            last = Some(tick);
            if core
                .entries
                .get(key)
                .is_some_and(|entry| entry.is_expired(now))
            {
                expired.push(key.clone());
            }
        }
        let resume = if seen == limit { last } else { None };
        (expired, resume)
    }

    /// Removes the given keys if they are still expired. Returns the number removed.
    pub fn remove_expired(&self, keys: &[K]) -> usize {
        let removed: Vec<Removed<K, V>> = {
            let mut core = self.core.write();
            let now = self.now();
            let still_expired: Vec<&K> = keys
                .iter()
                .filter(|key| {
                    core.entries
                        .get(*key)
                        .is_some_and(|entry| entry.is_expired(now))
                })
                .collect();

            let mut removed = Vec::with_capacity(still_expired.len());
            for key in still_expired {
                if let Some((key, entry)) = core.detach(key) {
                    removed.push((key, entry.value, RemovalCause::Expired));
                }
            }
            removed
        };

        if !removed.is_empty() {
            debug!(removed = removed.len(), "removed expired cache entries");
        }

        let count = removed.len();
        self.dispatch(removed);
        count
    }

    /// Removes all expired entries in one pass.
    pub fn cleanup_expired(&self) -> usize {
        let (keys, _) = self.scan_expired(0, usize::MAX);
        self.remove_expired(&keys)
    }

    // == Stats ==
    /// Snapshot of counters and occupancy. Does not affect recency.
    pub fn stats(&self) -> CacheStats {
        let core = self.core.read();
        self.metrics
            .snapshot(core.entries.len(), core.memory.current())
    }

    pub fn len(&self) -> usize {
        self.core.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.read().entries.is_empty()
    }

    /// Sum of the sizes of all stored entries.
    pub fn memory_usage(&self) -> u64 {
        self.core.read().memory.current()
    }

    /// Whether `additional` bytes fit without eviction.
    pub fn has_capacity_for(&self, additional: u64) -> bool {
        self.core.read().memory.has_capacity_for(additional)
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let core = self.core.read();
        let mut keys: Vec<(u64, K)> = core
            .entries
            .iter()
            .map(|(key, entry)| (entry.recency(), key.clone()))
            .collect();
        keys.sort_unstable_by_key(|(tick, _)| *tick);
        keys.into_iter().map(|(_, key)| key).collect()
    }

    // == Invariants ==
    /// Verifies that the map, LRU index, tag index, scope index and memory
    /// total agree with each other.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let core = self.core.read();

        let total: u128 = core.entries.values().map(|entry| u128::from(entry.size)).sum();
        if total != u128::from(core.memory.current()) {
            return Err(format!(
                "memory total {} does not match entry sizes {}",
                core.memory.current(),
                total
            ));
        }
        if core.lru.len() != core.entries.len() {
            return Err(format!(
                "LRU tracks {} keys for {} entries",
                core.lru.len(),
                core.entries.len()
            ));
        }

        for (key, entry) in &core.entries {
            if !core.lru.contains(key) {
                return Err(format!("key {:?} missing from LRU index", key));
            }
            for tag in &entry.tags {
                if !core.tags.contains(tag, key) {
                    return Err(format!("key {:?} missing from tag {:?}", key, tag));
                }
            }
            if let Some(scope) = entry.scope {
                if !core.scopes.contains(scope, key) {
                    return Err(format!("key {:?} missing from {}", key, scope));
                }
            }
        }

        for (tag, keys) in core.tags.iter() {
            if keys.is_empty() {
                return Err(format!("empty bucket left for tag {:?}", tag));
            }
            for key in keys {
                match core.entries.get(key) {
                    Some(entry) if entry.tags.contains(tag) => {}
                    _ => return Err(format!("tag {:?} references stale key {:?}", tag, key)),
                }
            }
        }

        for (scope, keys) in core.scopes.iter() {
            for key in keys {
                match core.entries.get(key) {
                    Some(entry) if entry.scope == Some(*scope) => {}
                    _ => return Err(format!("{} references stale key {:?}", scope, key)),
                }
            }
        }

        Ok(())
    }

    /// Hands removed entries to the listener and the counters. Must be called
    /// without holding the cache lock.
    fn dispatch(&self, removed: Vec<Removed<K, V>>) {
        if removed.is_empty() {
            return;
        }

        let expired = removed
            .iter()
            .filter(|(_, _, cause)| *cause == RemovalCause::Expired)
            .count() as u64;
        self.metrics.record_expirations(expired);
        self.metrics
            .record_evictions(removed.len() as u64 - expired);

        if let Some(listener) = &self.on_evict {
            for (key, value, cause) in &removed {
                listener(key, value, *cause);
            }
        }
    }
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ByteSize, MockClock};
    use parking_lot::Mutex;

    fn cache(max_entries: usize) -> (Cache<String, i32>, MockClock) {
        let clock = MockClock::new();
        let cache = Cache::builder()
            .max_entries(max_entries)
            .clock(clock.clone())
            .build()
            .unwrap();
        (cache, clock)
    }

    fn byte_cache(max_bytes: u64) -> Cache<String, String> {
        Cache::builder()
            .max_memory_bytes(max_bytes)
            .size_calculator(ByteSize)
            .build()
            .unwrap()
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_store_new() {
        let (cache, _) = cache(100);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_set_and_get() {
        let (cache, _) = cache(100);

        cache.put(key("key1"), 1).unwrap();

        assert_eq!(cache.get("key1"), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let (cache, _) = cache(100);
        assert_eq!(cache.get("nonexistent"), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (cache, _) = cache(100);
        cache.put(key("k"), 1).unwrap();

        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
        assert!(cache.is_empty());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_clear_twice_is_harmless() {
        let (cache, _) = cache(100);
        cache
            .put_with(key("a"), 1, PutOptions::new().tag("t"))
            .unwrap();

        cache.clear();
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
        assert!(cache.keys_for_tag("t").is_empty());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_lru_scenario_read_protects_entry() {
        let (cache, _) = cache(2);

        cache.put(key("a"), 1).unwrap();
        cache.put(key("b"), 2).unwrap();
        assert_eq!(cache.get("a"), Some(1));
        cache.put(key("c"), 3).unwrap();

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_evicts_first_inserted_without_reads() {
        let (cache, _) = cache(3);
        for (i, k) in ["k1", "k2", "k3", "k4"].iter().enumerate() {
            cache.put(key(k), i as i32).unwrap();
        }

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("k1"));
        assert_eq!(cache.keys_by_recency(), vec![key("k2"), key("k3"), key("k4")]);
    }

    #[test]
    fn test_overwrite_refreshes_recency() {
        let (cache, _) = cache(2);
        cache.put(key("a"), 1).unwrap();
        cache.put(key("b"), 2).unwrap();
        cache.put(key("a"), 10).unwrap();
        cache.put(key("c"), 3).unwrap();

        assert_eq!(cache.get("a"), Some(10));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_absolute_ttl_boundary() {
        let (cache, clock) = cache(100);
        cache
            .put_with(key("k"), 1, PutOptions::new().ttl(Duration::from_secs(10)))
            .unwrap();

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(cache.get("k"), Some(1));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty(), "Expired entry should be removed on read");
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_sliding_ttl_renewal() {
        let (cache, clock) = cache(100);
        cache
            .put_with(
                key("s"),
                1,
                PutOptions::new()
                    .ttl(Duration::from_secs(5))
                    .mode(TtlMode::Sliding),
            )
            .unwrap();

        for _ in 0..10 {
            clock.advance(Duration::from_secs(4));
            assert_eq!(cache.get("s"), Some(1));
        }

        clock.advance(Duration::from_millis(4_999));
        assert!(cache.contains("s"));
        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("s"), None);
    }

    #[test]
    fn test_zero_ttl_never_readable() {
        let (cache, _) = cache(100);
        cache.put(key("x"), 1).unwrap();

        cache
            .put_with(key("x"), 2, PutOptions::new().ttl(Duration::ZERO))
            .unwrap();

        assert_eq!(cache.get("x"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_default_ttl_and_no_expiry() {
        let clock = MockClock::new();
        let cache: Cache<String, i32> = Cache::builder()
            .default_ttl(Duration::from_secs(1))
            .clock(clock.clone())
            .build()
            .unwrap();

        cache.put(key("default"), 1).unwrap();
        cache
            .put_with(key("forever"), 2, PutOptions::new().no_expiry())
            .unwrap();
        clock.advance(Duration::from_secs(3600));

        assert_eq!(cache.get("default"), None);
        assert_eq!(cache.get("forever"), Some(2));
        assert_eq!(cache.ttl_remaining("forever"), None);
    }

    #[test]
    fn test_adaptive_ttl_extends_hot_entries() {
        let clock = MockClock::new();
        let cache: Cache<String, i32> = Cache::builder()
            .default_ttl(Duration::from_secs(10))
            .ttl_mode(TtlMode::Adaptive {
                max_ttl: Duration::from_secs(60),
            })
            .clock(clock.clone())
            .build()
            .unwrap();
        cache.put(key("hot"), 1).unwrap();
        cache.put(key("cold"), 2).unwrap();

        for _ in 0..20 {
            clock.advance(Duration::from_millis(100));
            cache.get("hot");
        }
        cache.get("cold");

        clock.advance(Duration::from_secs(15));
        assert_eq!(cache.get("cold"), None);
        assert_eq!(cache.get("hot"), Some(1));
    }

    #[test]
    fn test_entry_too_large_leaves_cache_unchanged() {
        let cache = byte_cache(10);
        cache.put(key("a"), "12345".to_string()).unwrap();

        let result = cache.put(key("b"), "x".repeat(11));

        assert!(matches!(
            result,
            Err(CacheError::EntryTooLarge { size: 11, max: 10 })
        ));
        assert_eq!(cache.memory_usage(), 5);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_memory_budget_evicts_until_within() {
        let cache = byte_cache(10);
        cache.put(key("a"), "aaaa".to_string()).unwrap();
        cache.put(key("b"), "bbbb".to_string()).unwrap();
        cache.put(key("c"), "cccccc".to_string()).unwrap();

        assert_eq!(cache.memory_usage(), 10);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(!cache.has_capacity_for(1));
    }

    #[test]
    fn test_replacement_updates_size_and_tags() {
        let cache = byte_cache(100);
        cache
            .put_with(key("k"), "v1".to_string(), PutOptions::new().tags(["old", "shared"]))
            .unwrap();
        cache
            .put_with(key("k"), "value2".to_string(), PutOptions::new().tags(["new", "shared"]))
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.memory_usage(), 6);
        assert!(cache.keys_for_tag("old").is_empty());
        assert_eq!(cache.keys_for_tag("new"), vec![key("k")]);
        assert_eq!(cache.keys_for_tag("shared"), vec![key("k")]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_caller_supplied_cost() {
        let cache = byte_cache(100);
        cache
            .put_with(key("k"), "tiny".to_string(), PutOptions::new().cost(60))
            .unwrap();
        assert_eq!(cache.memory_usage(), 60);
        assert!(!cache.has_capacity_for(41));
    }

    #[test]
    fn test_invalidate_by_tags() {
        let (cache, _) = cache(100);
        cache
            .put_with(key("a"), 1, PutOptions::new().tag("user:42"))
            .unwrap();
        cache
            .put_with(key("b"), 2, PutOptions::new().tags(["user:42", "session"]))
            .unwrap();
        cache
            .put_with(key("c"), 3, PutOptions::new().tag("session"))
            .unwrap();

        let removed = cache.invalidate_by_tags(["user:42"]);

        assert_eq!(removed, 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.keys_for_tag("session"), vec![key("c")]);
        assert_eq!(cache.stats().invalidations, 2);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_invalidate_by_overlapping_tags_removes_once() {
        let (cache, _) = cache(100);
        cache
            .put_with(key("b"), 2, PutOptions::new().tags(["user:42", "session"]))
            .unwrap();

        assert_eq!(cache.invalidate_by_tags(["user:42", "session"]), 1);
        assert_eq!(cache.invalidate_by_tags(["user:42"]), 0);
    }

    #[test]
    fn test_invalidate_pattern() {
        let (cache, _) = cache(100);
        for k in ["user:1", "user:2", "feed:1"] {
            cache.put(key(k), 0).unwrap();
        }

        let removed = cache.invalidate_pattern(&KeyPattern::glob("user:*").unwrap());

        assert_eq!(removed, 2);
        assert!(cache.contains("feed:1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_scope_removal() {
        let (cache, _) = cache(100);
        let screen = cache.open_scope();
        cache
            .put_with(key("a"), 1, PutOptions::new().scope(screen))
            .unwrap();
        cache
            .put_with(key("b"), 2, PutOptions::new().scope(screen))
            .unwrap();
        cache.put(key("c"), 3).unwrap();

        assert_eq!(cache.remove_by_scope(screen).unwrap(), 2);
        assert_eq!(cache.len(), 1);

        cache
            .put_with(key("d"), 4, PutOptions::new().scope(screen))
            .unwrap();
        assert_eq!(cache.close_scope(screen).unwrap(), 1);

        let result = cache.put_with(key("e"), 5, PutOptions::new().scope(screen));
        assert_eq!(result, Err(CacheError::UnknownScope(screen)));
        assert_eq!(
            cache.remove_by_scope(screen),
            Err(CacheError::UnknownScope(screen))
        );
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_cleanup_expired() {
        let (cache, clock) = cache(100);
        cache
            .put_with(key("short"), 1, PutOptions::new().ttl(Duration::from_secs(1)))
            .unwrap();
        cache
            .put_with(key("long"), 2, PutOptions::new().ttl(Duration::from_secs(10)))
            .unwrap();

        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[test]
    fn test_scan_expired_resumes_from_cursor() {
        let (cache, clock) = cache(100);
        for i in 0..5 {
            let ttl = if i % 2 == 0 { 1 } else { 60 };
            cache
                .put_with(key(&format!("k{}", i)), i, PutOptions::new().ttl(Duration::from_secs(ttl)))
                .unwrap();
        }
        clock.advance(Duration::from_secs(2));

        let (first, cursor) = cache.scan_expired(0, 2);
        assert_eq!(first, vec![key("k0")]);
        let cursor = cursor.unwrap();

        let (second, cursor) = cache.scan_expired(cursor, 2);
        assert_eq!(second, vec![key("k2")]);
        let cursor = cursor.unwrap();

        let (last, cursor) = cache.scan_expired(cursor, 2);
        assert_eq!(last, vec![key("k4")]);
        assert_eq!(cursor, None, "a short scan means the index is exhausted");
        assert_eq!(cache.len(), 5, "scanning never removes");
    }

    #[test]
    fn test_remove_of_expired_entry_reports_absent() {
        let (cache, clock) = cache(100);
        cache
            .put_with(key("stale"), 1, PutOptions::new().ttl(Duration::from_secs(1)))
            .unwrap();
        clock.advance(Duration::from_secs(1));

        assert!(!cache.remove("stale"));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_invalidation_counts_only_live_entries() {
        let (cache, clock) = cache(100);
        let scope = cache.open_scope();
        for (k, ttl) in [("user:1", 1), ("user:2", 60)] {
            cache
                .put_with(
                    key(k),
                    0,
                    PutOptions::new()
                        .ttl(Duration::from_secs(ttl))
                        .tag("user")
                        .scope(scope),
                )
                .unwrap();
        }
        for (k, ttl) in [("feed:1", 1), ("feed:2", 60)] {
            cache
                .put_with(key(k), 0, PutOptions::new().ttl(Duration::from_secs(ttl)))
                .unwrap();
        }
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.invalidate_pattern(&KeyPattern::glob("feed:*").unwrap()), 1);
        assert_eq!(cache.invalidate_by_tags(["user"]), 1);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.invalidations, 2);
        assert_eq!(stats.expirations, 2);

        cache
            .put_with(key("user:3"), 0, PutOptions::new().ttl(Duration::from_secs(1)).scope(scope))
            .unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.close_scope(scope).unwrap(), 0);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_get_with_ttl_reads_once() {
        let (cache, clock) = cache(100);
        cache
            .put_with(
                key("s"),
                7,
                PutOptions::new()
                    .ttl(Duration::from_secs(10))
                    .mode(TtlMode::Sliding),
            )
            .unwrap();
        cache.put(key("forever"), 1).unwrap();
        clock.advance(Duration::from_secs(4));

        assert_eq!(cache.get_with_ttl("s"), Some((7, Some(Duration::from_secs(10)))));
        assert_eq!(cache.get_with_ttl("forever"), Some((1, None)));
        assert_eq!(cache.get_with_ttl("missing"), None);
        assert_eq!(cache.stats().hits, 2);

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get_with_ttl("s"), None);
    }

    #[test]
    fn test_costs_near_u64_max_do_not_wrap() {
        let cache: Cache<String, String> = Cache::builder()
            .max_memory_bytes(u64::MAX)
            .build()
            .unwrap();
        cache
            .put_with(key("a"), key("1"), PutOptions::new().cost(u64::MAX - 1))
            .unwrap();
        cache
            .put_with(key("b"), key("2"), PutOptions::new().cost(u64::MAX - 1))
            .unwrap();

        assert!(!cache.contains("a"), "the older entry pays for the newer one");
        assert!(cache.contains("b"));
        assert_eq!(cache.memory_usage(), u64::MAX - 1);
        assert_eq!(cache.stats().evictions, 1);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_eviction_listener() {
        let seen: Arc<Mutex<Vec<(String, i32, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let clock = MockClock::new();
        let cache: Cache<String, i32> = Cache::builder()
            .max_entries(1)
            .clock(clock.clone())
            .on_evict(move |k: &String, v: &i32, cause| sink.lock().push((k.clone(), *v, cause)))
            .build()
            .unwrap();

        cache.put(key("a"), 1).unwrap();
        cache.put(key("b"), 2).unwrap();
        cache
            .put_with(key("c"), 3, PutOptions::new().ttl(Duration::from_secs(1)))
            .unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("c"), None);

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                (key("a"), 1, RemovalCause::Capacity),
                (key("b"), 2, RemovalCause::Capacity),
                (key("c"), 3, RemovalCause::Expired),
            ]
        );
    }

    #[test]
    fn test_store_stats() {
        let (cache, _) = cache(100);

        cache.put(key("key1"), 1).unwrap();
        cache.get("key1");
        cache.get("nonexistent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.memory_usage, 1);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache: Arc<Cache<String, usize>> = Arc::new(
            Cache::builder()
                .max_entries(64)
                .build()
                .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let k = format!("k{}", (t * 31 + i) % 100);
                        if i % 3 == 0 {
                            cache.put(k, i).unwrap();
                        } else if let Some(v) = cache.get(&k) {
                            assert!(v < 500);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 64);
        cache.check_invariants().unwrap();
    }
}
