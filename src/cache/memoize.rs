//! Memoization with group-tagged freshness
//!
//! A memoized call reads the envelope and every group marker in one
//! `fetch_many`, and on a miss writes the new envelope together with the
//! markers it was checked against in one `store_many`. Hits cost one round
//! trip and misses two, however many groups a key belongs to.
//!
//! ## Example
//!
//! ```rust
//! use potatocache::cache::{CacheConfig, MemoryBackend, Memoizer};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let memoizer = Memoizer::new(Arc::new(MemoryBackend::new()), CacheConfig::default())?;
//!
//! let author = memoizer
//!     .cached::<u64>()
//!     .arg_key(|id| format!("author:{}", id))
//!     .arg_groups(|id| vec![format!("author{}_data", id)])
//!     .debug(true)
//!     .build(|id: u64| async move { Ok::<_, std::io::Error>(format!("author #{}", id)) })?;
//!
//! assert_eq!(author.call(1).await?, "author #1");
//! assert_eq!(author.call(1).await?, "author #1");
//! assert_eq!(author.call_stats().map(|s| s.call_count()), Some(1));
//!
//! memoizer.invalidator().invalidate_groups(["author1_data"]).await?;
//! author.call(1).await?;
//! assert_eq!(author.call_stats().map(|s| s.call_count()), Some(2));
//! # Ok(())
//! # }
//! ```

use crate::cache::backend::CacheBackend;
use crate::cache::config::{BackendErrorPolicy, CacheConfig};
use crate::cache::entry::{is_null_sentinel, Envelope};
use crate::cache::invalidation::GroupInvalidator;
use crate::cache::tag_store::{dedup_groups, TagStore};
use crate::cache::types::{CacheKey, CacheStats, GroupName, Marker};
use crate::error::{CacheError, CallError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type KeyFn<A> = Arc<dyn Fn(&A) -> CacheKey + Send + Sync>;
type GroupsFn<A> = Arc<dyn Fn(&A) -> Vec<GroupName> + Send + Sync>;

/// How a wrapped function derives its cache key
pub enum KeyStrategy<A> {
    /// The same key for every call
    Literal(CacheKey),
    /// A key built from the call's arguments
    FromArgs(KeyFn<A>),
}

impl<A> KeyStrategy<A> {
    /// Compute the cache key for one call
    pub fn key_for(&self, args: &A) -> CacheKey {
        match self {
            KeyStrategy::Literal(key) => key.clone(),
            KeyStrategy::FromArgs(build) => build(args),
        }
    }
}

impl<A> Clone for KeyStrategy<A> {
    fn clone(&self) -> Self {
        match self {
            KeyStrategy::Literal(key) => KeyStrategy::Literal(key.clone()),
            KeyStrategy::FromArgs(build) => KeyStrategy::FromArgs(Arc::clone(build)),
        }
    }
}

impl<A> fmt::Debug for KeyStrategy<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::Literal(key) => f.debug_tuple("Literal").field(key).finish(),
            KeyStrategy::FromArgs(_) => f.write_str("FromArgs(..)"),
        }
    }
}

/// Recomputation counter of a debug-mode wrapper
#[derive(Debug, Clone, Default)]
pub struct CallStats {
    calls: Arc<AtomicU64>,
}

impl CallStats {
    /// Number of times the wrapped function actually ran
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    recomputations: AtomicU64,
    uncacheable: AtomicU64,
    backend_errors: AtomicU64,
}

/// What a single `fetch_many` revealed about one key
struct Lookup<V> {
    envelope: Option<Envelope<V>>,
    markers: HashMap<GroupName, Marker>,
}

/// Caches computation results under group-tagged envelopes
///
/// Cheap to clone; clones share the backend and the counters.
#[derive(Clone)]
pub struct Memoizer {
    store: TagStore,
    metrics: Arc<Metrics>,
}

impl Memoizer {
    /// Create a memoizer over `backend`
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Result<Self> {
        let store = TagStore::new(backend, config)?;
        info!(
            backend = store.backend_name(),
            policy = ?store.config().on_backend_error,
            "Memoizer ready"
        );
        Ok(Self::from_store(store))
    }

    /// Create a memoizer sharing an existing tag store
    pub fn from_store(store: TagStore) -> Self {
        Self {
            store,
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Tag store backing this memoizer
    pub fn store(&self) -> &TagStore {
        &self.store
    }

    /// Invalidator writing to the same store
    pub fn invalidator(&self) -> GroupInvalidator {
        GroupInvalidator::new(self.store.clone())
    }

    /// Start configuring a wrapped function taking `A`
    pub fn cached<A>(&self) -> CachedFnBuilder<A> {
        CachedFnBuilder::new(self.clone())
    }

    /// Get memoizer statistics
    pub fn stats(&self) -> CacheStats {
        let m = &self.metrics;
        CacheStats {
            hits: m.hits.load(Ordering::Relaxed),
            misses: m.misses.load(Ordering::Relaxed),
            stale: m.stale.load(Ordering::Relaxed),
            recomputations: m.recomputations.load(Ordering::Relaxed),
            uncacheable: m.uncacheable.load(Ordering::Relaxed),
            backend_errors: m.backend_errors.load(Ordering::Relaxed),
        }
    }

    /// Return the cached value for `cache_key`, computing it if needed
    ///
    /// The cached value is fresh only while every group in `groups` still has
    /// the marker recorded when it was cached. Errors from `compute` are
    /// returned as `CallError::Compute` and nothing is written.
    pub async fn memoize<V, E, F, Fut>(
        &self,
        cache_key: &str,
        groups: &[GroupName],
        compute: F,
    ) -> std::result::Result<V, CallError<E>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        self.memoize_counted(cache_key, groups, None, compute).await
    }

    async fn memoize_counted<V, E, F, Fut>(
        &self,
        cache_key: &str,
        groups: &[GroupName],
        call_stats: Option<&CallStats>,
        compute: F,
    ) -> std::result::Result<V, CallError<E>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        self.store.check_cache_key(cache_key)?;
        for group in groups {
            self.store.check_group_name(group)?;
        }
        let groups = dedup_groups(groups);

        let lookup = match self.lookup::<V>(cache_key, &groups).await {
            Ok(lookup) => lookup,
            Err(e) => {
                self.absorb_backend_error(cache_key, e)?;
                // nothing trustworthy was read, so nothing is written back
                return self.compute(call_stats, compute).await;
            }
        };

        match lookup.envelope {
            Some(envelope) if envelope.is_fresh(&groups, &lookup.markers) => {
                debug!("Cache hit: {} (age {:?})", cache_key, envelope.age());
                self.record(&self.metrics.hits);
                return Ok(envelope.value);
            }
            Some(envelope) => {
                debug!(
                    "Cache stale: {} (group markers changed, age {:?})",
                    cache_key,
                    envelope.age()
                );
                self.record(&self.metrics.stale);
            }
            None => {
                debug!("Cache miss: {}", cache_key);
                self.record(&self.metrics.misses);
            }
        }

        let value = self.compute(call_stats, compute).await?;

        if is_null_sentinel(&value) {
            debug!("Not caching null result for {}", cache_key);
            self.record(&self.metrics.uncacheable);
            return Ok(value);
        }

        let envelope = Envelope::new(value, &groups, &lookup.markers);
        let mut entries = HashMap::with_capacity(groups.len() + 1);
        entries.insert(cache_key.to_string(), envelope.to_cache_value()?);
        // rewrite every marker, current or freshly minted, so groups outlive their members
        for (group, marker) in &lookup.markers {
            entries.insert(self.store.group_key(group), marker.to_cache_value());
        }

        match self.store.store_many(entries).await {
            Ok(()) => debug!("Cached {} with {} group(s)", cache_key, groups.len()),
            Err(e) => self.absorb_backend_error(cache_key, e)?,
        }

        Ok(envelope.value)
    }

    /// Read the envelope and the current marker of every group in one round trip
    async fn lookup<V: DeserializeOwned>(
        &self,
        cache_key: &str,
        groups: &[GroupName],
    ) -> Result<Lookup<V>> {
        let group_keys: Vec<CacheKey> = groups.iter().map(|g| self.store.group_key(g)).collect();

        let mut keys = Vec::with_capacity(groups.len() + 1);
        keys.push(cache_key.to_string());
        keys.extend(group_keys.iter().cloned());

        let mut found = self.store.fetch_many(&keys).await?;

        let envelope = found
            .remove(cache_key)
            .and_then(|raw| Envelope::from_cache_value(cache_key, &raw));

        let markers = groups
            .iter()
            .zip(&group_keys)
            .map(|(group, group_key)| {
                let marker = found
                    .get(group_key)
                    .and_then(|raw| Marker::parse(raw))
                    .unwrap_or_else(|| {
                        debug!("Group {} has no marker; starting a new generation", group);
                        Marker::mint()
                    });
                (group.clone(), marker)
            })
            .collect();

        Ok(Lookup { envelope, markers })
    }

    async fn compute<V, E, F, Fut>(
        &self,
        call_stats: Option<&CallStats>,
        compute: F,
    ) -> std::result::Result<V, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        self.record(&self.metrics.recomputations);
        if let Some(stats) = call_stats {
            stats.record();
        }

        compute().await.map_err(CallError::Compute)
    }

    /// Apply the configured backend failure policy
    fn absorb_backend_error(&self, cache_key: &str, error: CacheError) -> Result<()> {
        self.record(&self.metrics.backend_errors);

        match self.store.config().on_backend_error {
            BackendErrorPolicy::Propagate => Err(error),
            BackendErrorPolicy::Recompute => {
                warn!(key = %cache_key, error = %error, "Cache backend failed; serving uncached value");
                Ok(())
            }
        }
    }

    fn record(&self, counter: &AtomicU64) {
        if self.store.config().enable_metrics {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Builder for a memoized function
///
/// Exactly one of [`key`](Self::key) and [`arg_key`](Self::arg_key) must be set.
pub struct CachedFnBuilder<A> {
    memoizer: Memoizer,
    key: Option<CacheKey>,
    arg_key: Option<KeyFn<A>>,
    groups: Vec<GroupName>,
    arg_groups: Option<GroupsFn<A>>,
    debug: bool,
}

impl<A> CachedFnBuilder<A> {
    fn new(memoizer: Memoizer) -> Self {
        Self {
            memoizer,
            key: None,
            arg_key: None,
            groups: Vec::new(),
            arg_groups: None,
            debug: false,
        }
    }

    /// Use a fixed cache key
    pub fn key(mut self, key: impl Into<CacheKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Derive the cache key from the call's arguments
    pub fn arg_key(mut self, build: impl Fn(&A) -> CacheKey + Send + Sync + 'static) -> Self {
        self.arg_key = Some(Arc::new(build));
        self
    }

    /// Add a group the cached value belongs to
    pub fn group(mut self, group: impl Into<GroupName>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Add several groups
    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<GroupName>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Add groups derived from the call's arguments
    pub fn arg_groups(
        mut self,
        build: impl Fn(&A) -> Vec<GroupName> + Send + Sync + 'static,
    ) -> Self {
        self.arg_groups = Some(Arc::new(build));
        self
    }

    /// Count recomputations, exposed through [`CachedFn::call_stats`]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Wrap `func`
    ///
    /// Fails with `ConfigError` before touching the backend when the key
    /// configuration is ambiguous or a fixed key/group is invalid.
    pub fn build<F>(self, func: F) -> Result<CachedFn<A, F>> {
        let key = match (self.key, self.arg_key) {
            (Some(key), None) => {
                self.memoizer.store.check_cache_key(&key)?;
                KeyStrategy::Literal(key)
            }
            (None, Some(build)) => KeyStrategy::FromArgs(build),
            (Some(_), Some(_)) => {
                return Err(CacheError::ConfigError(
                    "both key and arg_key given; choose one".to_string(),
                ))
            }
            (None, None) => {
                return Err(CacheError::ConfigError(
                    "either key or arg_key is required".to_string(),
                ))
            }
        };

        for group in &self.groups {
            self.memoizer.store.check_group_name(group)?;
        }

        Ok(CachedFn {
            memoizer: self.memoizer,
            key,
            groups: self.groups,
            arg_groups: self.arg_groups,
            func,
            stats: self.debug.then(CallStats::default),
        })
    }
}

/// A function whose results are memoized under group-tagged envelopes
pub struct CachedFn<A, F> {
    memoizer: Memoizer,
    key: KeyStrategy<A>,
    groups: Vec<GroupName>,
    arg_groups: Option<GroupsFn<A>>,
    func: F,
    stats: Option<CallStats>,
}

impl<A, F> CachedFn<A, F> {
    /// Call the function, answering from cache when fresh
    pub async fn call<Fut, V, E>(&self, args: A) -> std::result::Result<V, CallError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        V: Serialize + DeserializeOwned,
    {
        let key = self.key.key_for(&args);
        let mut groups = self.groups.clone();
        if let Some(build) = &self.arg_groups {
            groups.extend(build(&args));
        }

        self.memoizer
            .memoize_counted(&key, &groups, self.stats.as_ref(), || (self.func)(args))
            .await
    }

    /// Recomputation counter, present in debug mode
    pub fn call_stats(&self) -> Option<CallStats> {
        self.stats.clone()
    }

    pub fn key_strategy(&self) -> &KeyStrategy<A> {
        &self.key
    }
}
