//! Bounded in-process LRU store

use crate::error::Miss;
use crate::key::CacheKey;
use crate::store::Store;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory store evicting the least recently used entry beyond `max_size`
///
/// A `max_size` of 0 means unbounded.
pub struct MemoryStore<V> {
    entries: Mutex<LruCache<CacheKey, Entry<V>>>,
    ttl: Option<Duration>,
}

impl<V: Clone + Send> MemoryStore<V> {
    /// Create a store holding at most `max_size` entries
    pub fn new(max_size: usize) -> Self {
        let cache = match NonZeroUsize::new(max_size) {
            Some(bound) => LruCache::new(bound),
            None => LruCache::unbounded(),
        };
        debug!("Initialized memory store (max_size = {})", max_size);
        Self {
            entries: Mutex::new(cache),
            ttl: None,
        }
    }

    /// Create a store whose entries also expire `ttl` after being written
    pub fn with_ttl(max_size: usize, ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new(max_size)
        }
    }

    /// Number of entries currently held (expired ones included until touched)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Send> Store<V> for MemoryStore<V> {
    fn get(&self, key: &CacheKey) -> Result<V, Miss> {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        match entries.get(key) {
            None => Err(Miss::Absent),
            Some(entry) if entry.is_expired(now) => {
                entries.pop(key);
                Err(Miss::Expired)
            }
            Some(entry) => Ok(entry.value.clone()),
        }
    }

    fn set(&self, key: &CacheKey, value: V) {
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.clone(), Entry { value, expires_at }) {
            if evicted != *key {
                debug!("Evicted {} from memory store", evicted);
            }
        }
    }
}

#[async_trait::async_trait]
impl<V: Clone + Send + 'static> crate::store::AsyncStore<V> for MemoryStore<V> {
    async fn get(&self, key: &CacheKey) -> Result<V, Miss> {
        Store::get(self, key)
    }

    async fn set(&self, key: &CacheKey, value: V) {
        Store::set(self, key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> CacheKey {
        CacheKey::from(k)
    }

    #[test]
    fn set_then_get() {
        let store = MemoryStore::new(10);
        store.set(&key("a"), "alpha".to_string());
        assert_eq!(store.get(&key("a")), Ok("alpha".to_string()));
    }

    #[test]
    fn bounded_lru_keeps_latest() {
        let store = MemoryStore::new(1);

        store.set(&key("1"), 1);
        store.set(&key("2"), 2);
        store.set(&key("3"), 3);

        assert_eq!(store.get(&key("1")), Err(Miss::Absent));
        assert_eq!(store.get(&key("2")), Err(Miss::Absent));
        assert_eq!(store.get(&key("3")), Ok(3));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unbounded_keeps_everything() {
        let store = MemoryStore::new(0);

        store.set(&key("1"), 1);
        store.set(&key("2"), 2);
        store.set(&key("3"), 3);

        assert_eq!(store.get(&key("1")), Ok(1));
        assert_eq!(store.get(&key("2")), Ok(2));
        assert_eq!(store.get(&key("3")), Ok(3));
    }

    #[test]
    fn get_promotes_entry() {
        let store = MemoryStore::new(2);

        store.set(&key("old"), 1);
        store.set(&key("new"), 2);
        // Touch "old" so "new" becomes least recently used
        assert_eq!(store.get(&key("old")), Ok(1));
        store.set(&key("newest"), 3);

        assert_eq!(store.get(&key("old")), Ok(1));
        assert_eq!(store.get(&key("new")), Err(Miss::Absent));
        assert_eq!(store.get(&key("newest")), Ok(3));
    }

    #[test]
    fn overwrite_does_not_grow() {
        let store = MemoryStore::new(2);
        store.set(&key("a"), 1);
        store.set(&key("a"), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key("a")), Ok(2));
    }

    #[test]
    fn ttl_expires_entries() {
        let store = MemoryStore::with_ttl(0, Duration::from_millis(20));
        store.set(&key("a"), 1);
        assert_eq!(store.get(&key("a")), Ok(1));

        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(store.get(&key("a")), Err(Miss::Expired));
        assert!(store.is_empty());
    }
}
