//! Cache Entry Module
//!
//! Defines individual cache entries and the expiry rules applied to them.
//!
//! Timestamps are stored as nanoseconds since the owning cache's epoch so the
//! mutable access metadata can live in atomics and be updated under a shared lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::tags::ScopeId;

/// Sentinel lease meaning "never expires".
const NO_EXPIRY: u64 = u64::MAX;

// == TTL Mode ==
/// How an entry's deadline is derived from its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtlMode {
    /// Deadline fixed at `created_at + ttl`.
    #[default]
    Absolute,
    /// Deadline is `last_access + ttl`, renewed on every hit.
    Sliding,
    /// Sliding lease whose length grows with access frequency, capped at `max_ttl`.
    Adaptive { max_ttl: Duration },
}

impl TtlMode {
    /// Parses the textual form used by configuration (`absolute`, `sliding`, `adaptive`).
    pub fn parse(mode: &str, adaptive_max_ttl: Duration) -> Option<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "absolute" => Some(TtlMode::Absolute),
            "sliding" => Some(TtlMode::Sliding),
            "adaptive" => Some(TtlMode::Adaptive {
                max_ttl: adaptive_max_ttl,
            }),
            _ => None,
        }
    }
}

// == Adaptive TTL ==
/// Computes the adaptive lease: `min(max_ttl, base * (1 + accesses_per_second))`.
///
/// The multiplier is non-decreasing in access frequency. An entry younger than
/// one second is treated as one second old.
pub fn adaptive_ttl(base: Duration, max_ttl: Duration, access_count: u64, age: Duration) -> Duration {
    if base.is_zero() || max_ttl <= base {
        return base.min(max_ttl);
    }

    let age_secs = age.as_secs_f64().max(1.0);
    let rate = access_count as f64 / age_secs;
    let ceiling = max_ttl.as_secs_f64() / base.as_secs_f64();
    let factor = (1.0 + rate).min(ceiling);

    base.mul_f64(factor).min(max_ttl)
}

// == Cache Entry ==
/// A stored value together with its accounting and expiry metadata.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
    /// The stored value
    pub(crate) value: V,
    /// Cost charged against the memory budget
    pub(crate) size: u64,
    /// Invalidation tags, deduplicated
    pub(crate) tags: Vec<String>,
    /// Lifecycle scope the entry was registered under
    pub(crate) scope: Option<ScopeId>,
    mode: TtlMode,
    base_ttl: Option<Duration>,
    created_at: u64,
    last_access: AtomicU64,
    access_count: AtomicU64,
    lease: AtomicU64,
    recency: AtomicU64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry written at `now` (nanoseconds since cache epoch).
    ///
    /// `ttl = None` means the entry never expires. An adaptive lease starts
    /// at the TTL capped by `max_ttl`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        value: V,
        size: u64,
        tags: Vec<String>,
        scope: Option<ScopeId>,
        mode: TtlMode,
        ttl: Option<Duration>,
        now: u64,
        tick: u64,
    ) -> Self {
        let initial = match mode {
            TtlMode::Adaptive { max_ttl } => ttl.map(|ttl| ttl.min(max_ttl)),
            _ => ttl,
        };
        let lease = initial.map(duration_to_nanos).unwrap_or(NO_EXPIRY);
        Self {
            value,
            size,
            tags,
            scope,
            mode,
            base_ttl: ttl,
            created_at: now,
            last_access: AtomicU64::new(now),
            access_count: AtomicU64::new(0),
            lease: AtomicU64::new(lease),
            recency: AtomicU64::new(tick),
        }
    }

    // == Deadline ==
    /// Instant (cache-epoch nanoseconds) at which the entry stops being readable.
    pub(crate) fn deadline(&self) -> Option<u64> {
        let lease = self.lease.load(Ordering::Acquire);
        if lease == NO_EXPIRY {
            return None;
        }
        let anchor = match self.mode {
            TtlMode::Absolute => self.created_at,
            TtlMode::Sliding | TtlMode::Adaptive { .. } => self.last_access.load(Ordering::Acquire),
        };
        Some(anchor.saturating_add(lease))
    }

    // == Is Expired ==
    /// An entry is expired once `now >= deadline`.
    pub(crate) fn is_expired(&self, now: u64) -> bool {
        match self.deadline() {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    // == Time To Live ==
    /// Remaining lifetime at `now`; `None` for entries without expiry.
    pub(crate) fn ttl_remaining(&self, now: u64) -> Option<Duration> {
        self.deadline()
            .map(|deadline| Duration::from_nanos(deadline.saturating_sub(now)))
    }

    // == Record Access ==
    /// Registers a successful read: renews sliding leases, bumps the access
    /// counter and moves the entry to the most recent position.
    ///
    /// A read never moves the deadline backwards. When the access rate of an
    /// adaptive entry drops, its lease shrinks only as far as the deadline
    /// already granted.
    pub(crate) fn record_access(&self, now: u64, tick: u64) {
        let count = self.access_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.recency.fetch_max(tick, Ordering::AcqRel);

        if let (TtlMode::Adaptive { max_ttl }, Some(base)) = (self.mode, self.base_ttl) {
            let granted = self.deadline().unwrap_or(0);
            let age = Duration::from_nanos(now.saturating_sub(self.created_at));
            let lease = duration_to_nanos(adaptive_ttl(base, max_ttl, count, age))
                .max(granted.saturating_sub(now));
            self.last_access.fetch_max(now, Ordering::AcqRel);
            self.lease.store(lease, Ordering::Release);
        } else {
            self.last_access.fetch_max(now, Ordering::AcqRel);
        }
    }

    /// Current recency tick; larger is more recent.
    pub(crate) fn recency(&self) -> u64 {
        self.recency.load(Ordering::Acquire)
    }
}

// == Utility Functions ==
/// Converts a duration to nanoseconds, saturating at `u64::MAX - 1` so it never
/// collides with the "no expiry" sentinel.
pub(crate) fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos())
        .unwrap_or(NO_EXPIRY)
        .min(NO_EXPIRY - 1)
}
