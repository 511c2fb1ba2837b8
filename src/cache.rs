//! Process-wide memoization primitives
//!
//! Two cache classes back the read path:
//! - [`Memo`]: unbounded, for values with a finite keyspace that cannot
//!   change within a process lifetime (ticker exchange assignment, holiday
//!   calendars, open-date sets).
//! - [`LruCache`]: small and bounded, for expensive derived results that may
//!   be recomputed if evicted. Eviction is a performance concern only; every
//!   cached value is a deterministic projection of stored state.

use crate::error::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

/// Unbounded memo over a concurrent map
pub struct Memo<K, V> {
    map: DashMap<K, V>,
}

impl<K, V> std::fmt::Debug for Memo<K, V>
where
    K: Eq + Hash + std::fmt::Debug,
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo").field("map", &self.map).finish()
    }
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).map(|v| v.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    /// Return the cached value, or compute and cache it.
    pub fn get_or_try_insert<F>(&self, key: &K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute()?;
        self.map.insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K, V> Default for Memo<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded least-recently-used cache
///
/// Entries carry an access stamp; when the cache is full the entry with the
/// oldest stamp is evicted.
#[derive(Debug)]
pub struct LruCache<K, V> {
    inner: Mutex<LruInner<K, V>>,
}

#[derive(Debug)]
struct LruInner<K, V> {
    capacity: usize,
    tick: u64,
    map: HashMap<K, (u64, V)>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                capacity: capacity.max(1),
                tick: 0,
                map: HashMap::new(),
            }),
        }
    }

    /// Look up a value, refreshing its access stamp on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.map.get_mut(key).map(|entry| {
            entry.0 = tick;
            entry.1.clone()
        })
    }

    /// Insert a value, evicting the least-recently-used entry when full.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.map.contains_key(&key) && inner.map.len() >= inner.capacity {
            if let Some(oldest) = inner
                .map
                .iter()
                .min_by_key(|(_, (stamp, _))| *stamp)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&oldest);
            }
        }
        inner.map.insert(key, (tick, value));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_memo_computes_once() {
        let memo: Memo<String, i64> = Memo::new();
        let mut calls = 0;

        let first = memo
            .get_or_try_insert(&"k".to_string(), || {
                calls += 1;
                Ok(7)
            })
            .unwrap();
        let second = memo
            .get_or_try_insert(&"k".to_string(), || {
                calls += 1;
                Ok(8)
            })
            .unwrap();

        assert_eq!(first, 7);
        assert_eq!(second, 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_memo_does_not_cache_failures() {
        let memo: Memo<String, i64> = Memo::new();

        let failed = memo.get_or_try_insert(&"k".to_string(), || {
            Err(AppError::Validation("nope".to_string()))
        });
        assert!(failed.is_err());

        let value = memo.get_or_try_insert(&"k".to_string(), || Ok(3)).unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let cache: LruCache<&str, i64> = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get(&"a"), Some(1));

        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_lru_updates_existing_key_without_eviction() {
        let cache: LruCache<&str, i64> = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
