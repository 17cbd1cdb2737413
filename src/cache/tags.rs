//! Tag and Scope Index Module
//!
//! Reverse indexes used for group invalidation: tag → keys and scope → keys.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

// == Tag Index ==
/// Maps each tag to the set of keys carrying it.
///
/// Buckets are dropped as soon as they become empty so a removed key never
/// leaves an empty or dangling bucket behind.
#[derive(Debug)]
pub struct TagIndex<K> {
    buckets: HashMap<String, HashSet<K>>,
}

impl<K> Default for TagIndex<K> {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq + Clone> TagIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `key` under every tag in `tags`.
    pub fn insert(&mut self, key: &K, tags: &[String]) {
        for tag in tags {
            self.buckets
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    /// Detaches `key` from every tag in `tags` (the key's full tag set).
    pub fn remove(&mut self, key: &K, tags: &[String]) {
        for tag in tags {
            if let Some(bucket) = self.buckets.get_mut(tag) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.buckets.remove(tag);
                }
            }
        }
    }

    /// Distinct keys carrying any of `tags`.
    pub fn keys_for_any<'a, I>(&self, tags: I) -> HashSet<K>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut keys = HashSet::new();
        for tag in tags {
            if let Some(bucket) = self.buckets.get(tag) {
                keys.extend(bucket.iter().cloned());
            }
        }
        keys
    }

    pub fn keys_for(&self, tag: &str) -> Vec<K> {
        self.buckets
            .get(tag)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, tag: &str, key: &K) -> bool {
        self.buckets
            .get(tag)
            .is_some_and(|bucket| bucket.contains(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HashSet<K>)> {
        self.buckets.iter()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

/// Deduplicates tags while keeping first-seen order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(Into::into)
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

// == Scopes ==
/// Explicit lifecycle token. Entries written under a scope can be dropped
/// together when the owner reaches the end of its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Registered scopes and the keys written under each.
#[derive(Debug)]
pub struct ScopeIndex<K> {
    scopes: HashMap<ScopeId, HashSet<K>>,
    next_id: u64,
}

impl<K> Default for ScopeIndex<K> {
    fn default() -> Self {
        Self {
            scopes: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<K: Hash + Eq + Clone> ScopeIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh scope.
    pub fn open(&mut self) -> ScopeId {
        let id = ScopeId(self.next_id);
        self.next_id += 1;
        self.scopes.insert(id, HashSet::new());
        id
    }

    pub fn is_open(&self, scope: ScopeId) -> bool {
        self.scopes.contains_key(&scope)
    }

    /// Deregisters a scope, returning the keys it still owned.
    pub fn close(&mut self, scope: ScopeId) -> Option<HashSet<K>> {
        self.scopes.remove(&scope)
    }

    pub fn insert(&mut self, scope: ScopeId, key: &K) {
        if let Some(keys) = self.scopes.get_mut(&scope) {
            keys.insert(key.clone());
        }
    }

    pub fn remove(&mut self, scope: ScopeId, key: &K) {
        if let Some(keys) = self.scopes.get_mut(&scope) {
            keys.remove(key);
        }
    }

    pub fn keys(&self, scope: ScopeId) -> Vec<K> {
        self.scopes
            .get(&scope)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, scope: ScopeId, key: &K) -> bool {
        self.scopes
            .get(&scope)
            .is_some_and(|keys| keys.contains(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScopeId, &HashSet<K>)> {
        self.scopes.iter()
    }

    /// Empties every scope but keeps them registered.
    pub fn clear_members(&mut self) {
        for keys in self.scopes.values_mut() {
            keys.clear();
        }
    }
}
