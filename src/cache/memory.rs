//! In-process cache backend.
//!
//! Bounded by entry count with LRU eviction. Expired entries are dropped when
//! they are next touched.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::keys::Tag;
use super::lock::mutex_lock;
use super::store::{CacheBackend, CacheError};
use super::tags::TagIndex;

const SOURCE: &str = "cache::memory";
const METRIC_CACHE_EVICT: &str = "pinfall_cache_evict_total";

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct MemoryState {
    entries: LruCache<String, Entry>,
    tags: TagIndex,
}

impl MemoryState {
    fn drop_key(&mut self, key: &str) {
        self.entries.pop(key);
        self.tags.unregister(key);
    }
}

pub struct MemoryCacheBackend {
    state: Mutex<MemoryState>,
}

impl MemoryCacheBackend {
    /// A zero limit is clamped to one entry.
    pub fn new(entry_limit: usize) -> Self {
        let capacity = NonZeroUsize::new(entry_limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::new(capacity),
                tags: TagIndex::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut state = mutex_lock(&self.state, SOURCE, "get");
        let now = Instant::now();

        match state.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }

        debug!(key, "Dropping expired cache entry");
        state.drop_key(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        tags: &[Tag],
    ) -> Result<(), CacheError> {
        let mut state = mutex_lock(&self.state, SOURCE, "set");
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now);

        let displaced = state
            .entries
            .push(key.to_string(), Entry { value, expires_at });

        if let Some((evicted_key, _)) = displaced.filter(|(displaced_key, _)| displaced_key != key) {
            state.tags.unregister(&evicted_key);
            counter!(METRIC_CACHE_EVICT).increment(1);
            debug!(key = %evicted_key, "Evicted cache entry");
        }

        state.tags.register(key, tags);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        mutex_lock(&self.state, SOURCE, "remove").drop_key(key);
        Ok(())
    }

    async fn remove_tag(&self, tag: &Tag) -> Result<(), CacheError> {
        let mut state = mutex_lock(&self.state, SOURCE, "remove_tag");
        let keys = state.tags.unregister_tag(tag);
        for key in &keys {
            state.entries.pop(key.as_str());
        }
        debug!(tag = %tag, removed = keys.len(), "Removed tagged entries");
        Ok(())
    }
}
