//! Cache storage.

use std::sync::RwLock;

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_CACHE_EVICT_TOTAL: &str = "fascio_cache_evict_total";
const METRIC_CACHE_FLUSH_TOTAL: &str = "fascio_cache_flush_total";

/// A processed artifact ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedContent {
    pub body: Bytes,
    /// Fingerprint of `body`, quoted when sent as an `ETag`.
    pub etag: String,
}

impl ProcessedContent {
    pub fn new(body: impl Into<Bytes>, etag: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            etag: etag.into(),
        }
    }
}

/// Storage for processed artifacts.
///
/// Implementations must be safe to share across request tasks and the
/// invalidation scheduler. `clear` is atomic with respect to `get`: a reader
/// sees the store either before or after the flush.
pub trait ProcessingCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<ProcessedContent>;

    fn put(&self, key: CacheKey, content: ProcessedContent);

    /// Drop every entry.
    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded in-memory cache with least-recently-used eviction.
pub struct LruProcessingCache {
    entries: RwLock<LruCache<CacheKey, ProcessedContent>>,
}

impl LruProcessingCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity_non_zero())),
        }
    }

    pub fn capacity(&self) -> usize {
        rw_read(&self.entries, SOURCE, "capacity").cap().get()
    }
}

impl Default for LruProcessingCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl ProcessingCache for LruProcessingCache {
    fn get(&self, key: &CacheKey) -> Option<ProcessedContent> {
        // LRU lookups reorder entries, so even reads need the write lock.
        rw_write(&self.entries, SOURCE, "get").get(key).cloned()
    }

    fn put(&self, key: CacheKey, content: ProcessedContent) {
        let evicted = rw_write(&self.entries, SOURCE, "put").push(key.clone(), content);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
            debug!(target = "fascio::cache", key = %evicted_key, "evicted processed artifact");
        }
    }

    fn clear(&self) {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        let dropped = entries.len();
        entries.clear();
        drop(entries);
        counter!(METRIC_CACHE_FLUSH_TOTAL).increment(1);
        debug!(target = "fascio::cache", dropped, "flushed processed artifacts");
    }

    fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resource::{GroupId, ResourceType};

    fn key(name: &str) -> CacheKey {
        CacheKey::new(GroupId::new(name, ResourceType::Js), true, "00000000")
    }

    #[test]
    fn put_then_get() {
        let cache = LruProcessingCache::default();
        assert!(cache.get(&key("app")).is_none());

        cache.put(key("app"), ProcessedContent::new("var a;", "abc"));
        let hit = cache.get(&key("app")).expect("cached");
        assert_eq!(hit.body, Bytes::from_static(b"var a;"));
        assert_eq!(hit.etag, "abc");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache = LruProcessingCache::new(&CacheConfig { capacity: 2 });
        cache.put(key("a"), ProcessedContent::new("a", "1"));
        cache.put(key("b"), ProcessedContent::new("b", "2"));
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("c"), ProcessedContent::new("c", "3"));

        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = LruProcessingCache::default();
        cache.put(key("a"), ProcessedContent::new("a", "1"));
        cache.put(key("b"), ProcessedContent::new("b", "2"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&key("a")).is_none());
    }
}
