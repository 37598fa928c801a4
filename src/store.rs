//! Cache store interface, bundled in-memory backend, and the typed wrapper
//! the middleware reads and writes through.

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use thiserror::Error;
use tracing::{debug, warn};

use crate::codec;
use crate::entry::CacheEntry;
use crate::lock::{read_guard, write_guard};

/// Store failures visible to the middleware. Every one of them degrades to
/// a miss or a dropped write; none ever reaches the client.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache store operation timed out")]
    Timeout,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Byte-addressable `(key → bytes, ttl)` service backing the middleware.
///
/// Implementations must be safe for concurrent use. Per-key last-writer-wins
/// is the only cross-request guarantee the middleware relies on.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()>;
}

const DEFAULT_MEMORY_ENTRIES: usize = 1024;

/// Bundled in-memory store: LRU-bounded, TTL-checked on read.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, StoredValue>>,
}

struct StoredValue {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_ENTRIES)
    }

    /// Capacity in entries; zero is clamped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        read_guard(&self.entries, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let mut entries = write_guard(&self.entries, "get");
        match entries.get(key) {
            Some(stored) if stored.expires_at.is_none_or(|at| at > Instant::now()) => {
                Ok(Some(stored.value.clone()))
            }
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()> {
        let expires_at = Instant::now().checked_add(ttl);
        write_guard(&self.entries, "set").put(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }
}

/// Codec-applying wrapper around the raw store. Failures on the read side
/// read as a miss; write failures are logged and dropped.
#[derive(Clone)]
pub(crate) struct TypedStore {
    inner: Arc<dyn CacheStore>,
}

impl TypedStore {
    pub(crate) fn new(inner: Arc<dyn CacheStore>) -> Self {
        Self { inner }
    }

    pub(crate) async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let bytes = match self.inner.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(error) => {
                warn!(key, %error, "cache read failed; treating as miss");
                return None;
            }
        };
        let entry = codec::deserialize(&bytes);
        if entry.is_none() {
            debug!(key, "discarding cache entry that failed to decode");
        }
        entry
    }

    pub(crate) async fn set_entry(&self, key: &str, entry: &CacheEntry, ttl: Duration) {
        if let Err(error) = self.inner.set(key, codec::serialize(entry), ttl).await {
            warn!(key, %error, "cache write failed; response served uncached");
        }
    }
}
