//! Size Accounting Module
//!
//! Pluggable per-value cost calculators and the running memory total they feed.

use serde::Serialize;

// == Size Calculator ==
/// Computes the cost a value is charged against the memory budget.
pub trait SizeCalculator<V>: Send + Sync {
    fn size_of(&self, value: &V) -> u64;
}

/// Treats every value as one unit, turning the memory budget into a count budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitSize;

impl<V> SizeCalculator<V> for UnitSize {
    fn size_of(&self, _value: &V) -> u64 {
        1
    }
}

/// Charges the encoded byte length (strings, byte buffers).
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteSize;

impl<V: AsRef<[u8]>> SizeCalculator<V> for ByteSize {
    fn size_of(&self, value: &V) -> u64 {
        value.as_ref().len() as u64
    }
}

/// Approximates structured values by the length of their JSON encoding.
///
/// Values that fail to serialize are charged `fallback` bytes.
#[derive(Debug, Clone, Copy)]
pub struct JsonSize {
    pub fallback: u64,
}

impl Default for JsonSize {
    fn default() -> Self {
        Self { fallback: 64 }
    }
}

impl<V: Serialize> SizeCalculator<V> for JsonSize {
    fn size_of(&self, value: &V) -> u64 {
        serde_json::to_vec(value)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(self.fallback)
    }
}

/// Adapts a closure into a calculator.
pub struct FnSize<F>(pub F);

impl<V, F> SizeCalculator<V> for FnSize<F>
where
    F: Fn(&V) -> u64 + Send + Sync,
{
    fn size_of(&self, value: &V) -> u64 {
        (self.0)(value)
    }
}

// == Size Accounting ==
/// Running total of charged bytes against a fixed budget.
#[derive(Debug, Clone)]
pub struct SizeAccounting {
    max_bytes: u64,
    /// Wider than any single cost so charges made before eviction never wrap.
    current: u128,
}

impl SizeAccounting {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            current: 0,
        }
    }

    /// Bytes currently charged, saturating at `u64::MAX` while over budget.
    pub fn current(&self) -> u64 {
        u64::try_from(self.current).unwrap_or(u64::MAX)
    }

    /// Whether `additional` bytes fit without evicting anything.
    pub fn has_capacity_for(&self, additional: u64) -> bool {
        self.current + u128::from(additional) <= u128::from(self.max_bytes)
    }

    pub fn over_budget(&self) -> bool {
        self.current > u128::from(self.max_bytes)
    }

    pub fn charge(&mut self, size: u64) {
        self.current += u128::from(size);
    }

    pub fn release(&mut self, size: u64) {
        let size = u128::from(size);
        debug_assert!(size <= self.current, "released more bytes than charged");
        self.current = self.current.saturating_sub(size);
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}
