//! Group and key invalidation
//!
//! Invalidating a group writes a fresh marker under its name and nothing
//! else: member keys are never enumerated. Every envelope recorded against
//! the old marker is found stale by the next memoized call that reads it,
//! and is left for the backend's own eviction to reclaim.

use crate::cache::tag_store::{dedup_groups, TagStore};
use crate::cache::types::{CacheKey, GroupName, Marker};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Reason for cache invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Groups moved to a new generation
    GroupExpired,

    /// Specific cache keys were deleted
    KeyExpired,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::GroupExpired => write!(f, "group expired"),
            InvalidationReason::KeyExpired => write!(f, "key expired"),
        }
    }
}

/// Record of one invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Groups or keys that were invalidated
    pub keys: Vec<String>,

    /// Keys that actually existed, for key expiry
    pub removed: Option<usize>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            removed: None,
        }
    }

    fn with_removed(mut self, removed: usize) -> Self {
        self.removed = Some(removed);
        self
    }

    /// Check if nothing was invalidated
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Expires groups by replacing their markers
///
/// Needs no read beforehand and no knowledge of which keys belong to a group.
#[derive(Clone)]
pub struct GroupInvalidator {
    store: TagStore,
}

impl GroupInvalidator {
    /// Create an invalidator over `store`
    pub fn new(store: TagStore) -> Self {
        Self { store }
    }

    /// Mint a new marker for each group and write them in one `store_many`
    ///
    /// Backend failures are always returned: dropping an invalidation would
    /// keep serving stale values.
    pub async fn invalidate_groups<I, S>(&self, groups: I) -> Result<InvalidationEvent>
    where
        I: IntoIterator<Item = S>,
        S: Into<GroupName>,
    {
        let groups: Vec<GroupName> = groups.into_iter().map(Into::into).collect();
        for group in &groups {
            self.store.check_group_name(group)?;
        }
        let groups = dedup_groups(&groups);

        if groups.is_empty() {
            debug!("invalidate_groups called with no groups");
            return Ok(InvalidationEvent::new(InvalidationReason::GroupExpired, groups));
        }

        let entries: HashMap<CacheKey, String> = groups
            .iter()
            .map(|group| (self.store.group_key(group), Marker::mint().to_cache_value()))
            .collect();

        self.store.store_many(entries).await?;
        info!("Expired {} group(s): {}", groups.len(), groups.join(", "));

        Ok(InvalidationEvent::new(InvalidationReason::GroupExpired, groups))
    }

    /// Delete specific cache keys
    ///
    /// Point expiry of keys the caller already knows; the event records how
    /// many of them existed.
    pub async fn invalidate_keys<I, S>(&self, keys: I) -> Result<InvalidationEvent>
    where
        I: IntoIterator<Item = S>,
        S: Into<CacheKey>,
    {
        let keys: Vec<CacheKey> = keys.into_iter().map(Into::into).collect();
        for key in &keys {
            self.store.check_cache_key(key)?;
        }

        let removed = self.store.delete_many(&keys).await?;
        info!("Expired {} of {} key(s)", removed, keys.len());

        Ok(InvalidationEvent::new(InvalidationReason::KeyExpired, keys).with_removed(removed))
    }
}
