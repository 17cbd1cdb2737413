//! Transaction Module
//!
//! Staged batches of puts and removes applied atomically on commit.
//!
//! Staged operations live only in the transaction, so readers of the cache
//! keep seeing the last committed state and are never blocked by an open
//! transaction. Commits serialize on the cache's exclusive lock: a commit that
//! arrives while another is applying waits its turn rather than failing.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use tracing::debug;

use super::store::{Cache, PutOptions};
use crate::error::Result;

/// One staged operation.
#[derive(Debug, Clone)]
pub(crate) enum StagedOp<K, V> {
    Put {
        key: K,
        value: V,
        options: PutOptions,
    },
    Remove {
        key: K,
    },
}

impl<K, V> StagedOp<K, V> {
    fn key(&self) -> &K {
        match self {
            StagedOp::Put { key, .. } | StagedOp::Remove { key } => key,
        }
    }
}

// == Commit Summary ==
/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Puts applied
    pub written: usize,
    /// Removes that found a live entry
    pub removed: usize,
    /// Entries evicted to restore the budgets afterwards
    pub evicted: usize,
}

// == Transaction ==
/// A staging view over a [`Cache`].
///
/// Dropping a transaction without committing rolls it back.
pub struct Transaction<'a, K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    cache: &'a Cache<K, V>,
    ops: Vec<StagedOp<K, V>>,
}

impl<'a, K, V> Transaction<'a, K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    pub(crate) fn new(cache: &'a Cache<K, V>) -> Self {
        Self {
            cache,
            ops: Vec::new(),
        }
    }

    /// Stages a put with the cache defaults.
    pub fn put(&mut self, key: K, value: V) -> &mut Self {
        self.put_with(key, value, PutOptions::default())
    }

    pub fn put_with(&mut self, key: K, value: V, options: PutOptions) -> &mut Self {
        self.ops.push(StagedOp::Put {
            key,
            value,
            options,
        });
        self
    }

    pub fn remove(&mut self, key: K) -> &mut Self {
        self.ops.push(StagedOp::Remove { key });
        self
    }

    /// Reads through the staging view: the latest staged operation on `key`
    /// wins, otherwise the committed value is returned.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let staged = self
            .ops
            .iter()
            .rev()
            .find(|op| <K as Borrow<Q>>::borrow(op.key()) == key);

        match staged {
            Some(StagedOp::Put { value, options, .. }) => {
                if options.ttl.is_some_and(|ttl| ttl.is_zero()) {
                    None
                } else {
                    Some(value.clone())
                }
            }
            Some(StagedOp::Remove { .. }) => None,
            None => self.cache.get(key),
        }
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    // == Commit ==
    /// Applies every staged operation at once. On error nothing is applied.
    pub fn commit(mut self) -> Result<CommitSummary> {
        let ops = std::mem::take(&mut self.ops);
        self.cache.commit_ops(ops)
    }

    // == Rollback ==
    /// Discards every staged operation.
    pub fn rollback(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if !self.ops.is_empty() {
            debug!(staged = self.ops.len(), "rolled back cache transaction");
            self.ops.clear();
        }
    }
}

impl<K, V> Drop for Transaction<'_, K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    fn drop(&mut self) {
        self.discard();
    }
}
