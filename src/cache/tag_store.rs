//! Namespaced multi-get / multi-set over a backend
//!
//! Cache keys are used verbatim; group names are stored under
//! `group_key_prefix + name`. Keeping the two in disjoint sub-namespaces is
//! what lets a single multi-get return both the envelope and the markers.

use crate::cache::backend::CacheBackend;
use crate::cache::config::CacheConfig;
use crate::cache::types::{CacheKey, CacheValue, GroupName};
use crate::error::{CacheError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Thin I/O layer shared by the memoizer and the invalidator
#[derive(Clone)]
pub struct TagStore {
    backend: Arc<dyn CacheBackend>,
    config: Arc<CacheConfig>,
}

impl TagStore {
    /// Create a tag store over `backend`
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            backend,
            config: Arc::new(config),
        })
    }

    /// Configuration the store was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Name of the underlying backend, for logging
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Backend key holding the marker of `group`
    pub fn group_key(&self, group: &str) -> CacheKey {
        format!("{}{}", self.config.group_key_prefix, group)
    }

    /// Reject cache keys that are empty or fall inside the group namespace
    pub fn check_cache_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::ConfigError("cache key must not be empty".to_string()));
        }

        if key.starts_with(&self.config.group_key_prefix) {
            return Err(CacheError::ConfigError(format!(
                "cache key {:?} collides with the group namespace {:?}",
                key, self.config.group_key_prefix
            )));
        }

        Ok(())
    }

    /// Reject empty group names
    pub fn check_group_name(&self, group: &str) -> Result<()> {
        if group.is_empty() {
            return Err(CacheError::ConfigError("group name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Fetch several keys in one backend round trip
    pub async fn fetch_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheValue>> {
        debug!(backend = self.backend.name(), count = keys.len(), "fetch_many");
        self.with_timeout("get_many", self.backend.get_many(keys)).await
    }

    /// Store several entries in one backend round trip
    pub async fn store_many(&self, entries: HashMap<CacheKey, CacheValue>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let ttl = self.config.ttl_with_jitter();
        debug!(backend = self.backend.name(), count = entries.len(), ?ttl, "store_many");
        self.with_timeout("set_many", self.backend.set_many(entries, ttl)).await
    }

    /// Delete several keys in one backend round trip
    pub async fn delete_many(&self, keys: &[CacheKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        debug!(backend = self.backend.name(), count = keys.len(), "delete_many");
        self.with_timeout("delete_many", self.backend.delete_many(keys)).await
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout: Duration = self.config.backend_timeout;

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::TimeoutError {
                timeout_ms: timeout.as_millis() as u64,
                context: format!("{} on {} backend", operation, self.backend.name()),
            }),
        }
    }
}

/// Remove duplicate group names, keeping first-seen order
pub(crate) fn dedup_groups(groups: &[GroupName]) -> Vec<GroupName> {
    let mut seen = std::collections::HashSet::with_capacity(groups.len());
    groups
        .iter()
        .filter(|g| seen.insert(g.as_str()))
        .cloned()
        .collect()
}
