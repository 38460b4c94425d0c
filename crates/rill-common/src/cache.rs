//! Bounded, expiring shared caches.
//!
//! Two shapes are provided: [`TaggedCache`], which maps keys to shared
//! values and canonicalises duplicate inserts, and [`KeyCache`], which only
//! remembers key presence. Both are internally synchronised and safe to call
//! from any thread.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default target number of resident entries.
pub const DEFAULT_CACHE_TARGET_SIZE: usize = 16384;

/// Default entry lifetime.
pub const DEFAULT_CACHE_TARGET_AGE: Duration = Duration::from_secs(300);

struct Entry<V> {
    value: Arc<V>,
    last_access: Instant,
}

struct TaggedCacheInner<K, V> {
    entries: HashMap<K, Entry<V>>,
    hits: u64,
    misses: u64,
}

/// A bounded cache of shared values keyed by `K`.
///
/// Insertion is canonicalising: inserting under a key that is already
/// resident refreshes the access time and returns the resident value instead
/// of replacing it. Callers that build an object and insert it therefore
/// always end up holding the one shared copy, which is what guarantees
/// structural sharing of tree nodes across ledgers.
pub struct TaggedCache<K, V> {
    name: &'static str,
    inner: Mutex<TaggedCacheInner<K, V>>,
    target_size: usize,
    target_age: Duration,
}

impl<K: Eq + Hash + Clone, V> TaggedCache<K, V> {
    pub fn new(name: &'static str, target_size: usize, target_age: Duration) -> Self {
        Self {
            name,
            inner: Mutex::new(TaggedCacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            target_size,
            target_age,
        }
    }

    /// The cache's diagnostic label.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fetch the shared value for `key`, refreshing its access time.
    pub fn fetch(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = Instant::now();
                let value = Arc::clone(&entry.value);
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert `value` under `key`, returning the canonical shared value.
    ///
    /// If the key is already resident the resident value is returned and the
    /// caller's object is dropped; otherwise the caller's object becomes the
    /// resident one.
    pub fn canonicalize(&self, key: K, value: Arc<V>) -> Arc<V> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.last_access = Instant::now();
            return Arc::clone(&entry.value);
        }
        inner.entries.insert(
            key,
            Entry {
                value: Arc::clone(&value),
                last_access: Instant::now(),
            },
        );
        value
    }

    /// Remove expired entries, and if the cache is still over its target
    /// size, the oldest entries beyond it.
    pub fn sweep(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner
            .entries
            .retain(|_, entry| now.duration_since(entry.last_access) < self.target_age);

        if inner.entries.len() > self.target_size {
            let excess = inner.entries.len() - self.target_size;
            let mut ages: Vec<(K, Instant)> = inner
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.last_access))
                .collect();
            ages.sort_by_key(|(_, at)| *at);
            for (key, _) in ages.into_iter().take(excess) {
                inner.entries.remove(&key);
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entry_count: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if inner.hits + inner.misses > 0 {
                inner.hits as f64 / (inner.hits + inner.misses) as f64
            } else {
                0.0
            },
        }
    }
}

/// Hit/miss counters for a cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Remembers key presence with an expiry.
///
/// Re-inserting an existing key refreshes its access time.
pub struct KeyCache<K> {
    inner: Mutex<HashMap<K, Instant>>,
    target_size: usize,
    target_age: Duration,
}

impl<K: Eq + Hash + Clone> KeyCache<K> {
    pub fn new(target_size: usize, target_age: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            target_size,
            target_age,
        }
    }

    /// Insert `key`, refreshing it if already present.
    pub fn insert(&self, key: K) {
        self.inner.lock().insert(key, Instant::now());
    }

    /// Refresh the access time of `key` if present. Returns whether the key
    /// was there.
    pub fn touch_if_exists(&self, key: &K) -> bool {
        match self.inner.lock().get_mut(key) {
            Some(at) => {
                *at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Whether `key` is resident, without refreshing it.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Remove expired keys, then the oldest keys beyond the target size.
    pub fn sweep(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.retain(|_, at| now.duration_since(*at) < self.target_age);

        if inner.len() > self.target_size {
            let excess = inner.len() - self.target_size;
            let mut ages: Vec<(K, Instant)> =
                inner.iter().map(|(k, at)| (k.clone(), *at)).collect();
            ages.sort_by_key(|(_, at)| *at);
            for (key, _) in ages.into_iter().take(excess) {
                inner.remove(&key);
            }
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_miss_then_hit() {
        let cache: TaggedCache<u32, String> =
            TaggedCache::new("test", 16, Duration::from_secs(60));
        assert!(cache.fetch(&1).is_none());

        cache.canonicalize(1, Arc::new("one".to_string()));
        assert_eq!(*cache.fetch(&1).unwrap(), "one");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_canonicalize_keeps_resident_value() {
        let cache: TaggedCache<u32, String> =
            TaggedCache::new("test", 16, Duration::from_secs(60));
        let first = cache.canonicalize(7, Arc::new("first".to_string()));
        let second = cache.canonicalize(7, Arc::new("second".to_string()));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, "first");
    }

    #[test]
    fn test_sweep_expires_entries() {
        let cache: TaggedCache<u32, u32> = TaggedCache::new("test", 16, Duration::ZERO);
        cache.canonicalize(1, Arc::new(1));
        cache.sweep();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_bounds_size() {
        let cache: TaggedCache<u32, u32> = TaggedCache::new("test", 4, Duration::from_secs(60));
        for i in 0..10 {
            cache.canonicalize(i, Arc::new(i));
        }
        cache.sweep();
        assert!(cache.len() <= 4);
    }

    #[test]
    fn test_key_cache() {
        let cache: KeyCache<u32> = KeyCache::new(16, Duration::from_secs(60));
        assert!(!cache.touch_if_exists(&5));
        cache.insert(5);
        assert!(cache.touch_if_exists(&5));
        assert!(cache.contains(&5));
        cache.clear();
        assert!(cache.is_empty());
    }
}
