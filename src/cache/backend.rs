//! Key-value backends
//!
//! The cache layer only needs multi-get and multi-set (plus delete for explicit
//! key expiry). Anything offering these with per-key atomicity qualifies.

use crate::cache::types::{CacheKey, CacheValue};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A key-value store with batched primitives
///
/// No cross-key transaction is expected from `set_many`; each entry only has
/// to be applied atomically on its own.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// A name for tracing
    fn name(&self) -> &'static str;

    /// Fetch the given keys. Absent keys are simply missing from the map.
    async fn get_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheValue>>;

    /// Store every entry with the given time-to-live
    async fn set_many(&self, entries: HashMap<CacheKey, CacheValue>, ttl: Duration) -> Result<()>;

    /// Delete the given keys, returning how many existed
    async fn delete_many(&self, keys: &[CacheKey]) -> Result<usize>;
}

#[async_trait]
impl<B: CacheBackend + ?Sized> CacheBackend for Arc<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn get_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheValue>> {
        (**self).get_many(keys).await
    }

    async fn set_many(&self, entries: HashMap<CacheKey, CacheValue>, ttl: Duration) -> Result<()> {
        (**self).set_many(entries, ttl).await
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> Result<usize> {
        (**self).delete_many(keys).await
    }
}

/// Counters kept by the in-memory backend
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Keys requested through `get_many`
    pub gets: u64,

    /// `get_many` calls
    pub get_calls: u64,

    /// Entries written through `set_many`
    pub sets: u64,

    /// `set_many` calls
    pub set_calls: u64,

    /// Entries removed through `delete_many`
    pub deletes: u64,

    /// Entries evicted by the LRU bound
    pub evictions: u64,

    /// Entries dropped after their TTL elapsed
    pub expirations: u64,
}

/// Stored value with its expiry
#[derive(Debug, Clone)]
struct StoredEntry {
    value: CacheValue,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn new(value: CacheValue, ttl: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Internal storage
#[derive(Default)]
struct MemoryStore {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, StoredEntry>,

    /// LRU tracking: maintains access order
    lru_queue: VecDeque<CacheKey>,

    stats: BackendStats,
}

impl MemoryStore {
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.lru_queue.retain(|k| k != key);
            true
        } else {
            false
        }
    }
}

/// In-process backend with TTL expiry and LRU eviction
///
/// Behaves like a memcached-style store: entries can disappear at any time,
/// either through expiry or through eviction once `max_entries` is reached.
#[derive(Clone)]
pub struct MemoryBackend {
    max_entries: usize,
    store: Arc<RwLock<MemoryStore>>,
}

impl MemoryBackend {
    /// Default capacity
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    /// Create a backend with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_MAX_ENTRIES)
    }

    /// Create a backend holding at most `max_entries` keys
    pub fn with_capacity(max_entries: usize) -> Self {
        info!("Initializing in-memory cache backend (max_entries: {})", max_entries);

        Self {
            max_entries: max_entries.max(1),
            store: Arc::new(RwLock::new(MemoryStore::default())),
        }
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.entries.values().filter(|e| !e.is_expired()).count()
    }

    /// Check if the backend is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Check if a key exists (without updating LRU order)
    pub async fn contains_key(&self, key: &str) -> bool {
        let store = self.store.read().await;
        store.entries.get(key).is_some_and(|e| !e.is_expired())
    }

    /// Read a raw value without touching counters or LRU order
    pub async fn peek(&self, key: &str) -> Option<CacheValue> {
        let store = self.store.read().await;
        store
            .entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone())
    }

    /// Remove every entry
    pub async fn clear(&self) {
        let mut store = self.store.write().await;
        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();
        info!("Cleared {} entries from memory backend", count);
    }

    /// Get backend statistics
    pub async fn stats(&self) -> BackendStats {
        let store = self.store.read().await;
        store.stats.clone()
    }

    /// Internal: Evict least recently used entries until one more fits
    fn evict_if_needed(&self, store: &mut MemoryStore) {
        while store.entries.len() >= self.max_entries {
            match store.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting entry due to max_entries limit: {}", key);
                    store.entries.remove(&key);
                    store.stats.evictions += 1;
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheValue>> {
        let mut store = self.store.write().await;
        let mut found = HashMap::with_capacity(keys.len());

        store.stats.get_calls += 1;
        store.stats.gets += keys.len() as u64;

        for key in keys {
            let expired = match store.entries.get(key) {
                Some(entry) if entry.is_expired() => true,
                Some(entry) => {
                    found.insert(key.clone(), entry.value.clone());
                    false
                }
                None => continue,
            };

            if expired {
                debug!("Backend entry expired: {}", key);
                store.remove_entry(key);
                store.stats.expirations += 1;
            } else {
                store.touch(key);
            }
        }

        Ok(found)
    }

    async fn set_many(&self, entries: HashMap<CacheKey, CacheValue>, ttl: Duration) -> Result<()> {
        let mut store = self.store.write().await;

        store.stats.set_calls += 1;
        store.stats.sets += entries.len() as u64;

        for (key, value) in entries {
            let entry = StoredEntry::new(value, ttl);

            if !store.entries.contains_key(&key) {
                self.evict_if_needed(&mut store);
            }
            store.entries.insert(key.clone(), entry);
            store.touch(&key);
        }

        Ok(())
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> Result<usize> {
        let mut store = self.store.write().await;
        let mut removed = 0;

        for key in keys {
            if store.remove_entry(key) {
                removed += 1;
            }
        }

        store.stats.deletes += removed as u64;
        Ok(removed)
    }
}
