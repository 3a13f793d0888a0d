//! Internally synchronized LRU cache capability.
//!
//! Callers get a plain `get`/`put` surface; locking stays inside.

use lru::LruCache;
use parking_lot::Mutex;
use std::{hash::Hash, num::NonZeroUsize};

/// Fixed-capacity LRU cache, safe to share across threads.
#[derive(Debug)]
pub struct Cache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> Cache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A zero capacity is rounded up to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    /// Look up `key`, refreshing its recency on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    /// Insert or replace the entry for `key`.
    pub fn put(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    /// Whether `key` is present, without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
