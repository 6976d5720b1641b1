//! Envelope stored under a cache key
//!
//! An envelope pairs a computed value with the marker of every group the key
//! belonged to when it was cached. Freshness is decided by comparing those
//! recorded markers against the ones currently in the store.

use crate::cache::types::{CacheValue, GroupName, Marker};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// The structure written under a cache key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<V> {
    /// The cached value
    pub value: V,

    /// Marker of each group at the time of caching
    #[serde(default)]
    pub group_markers: BTreeMap<GroupName, Marker>,

    /// When the value was computed
    pub cached_at: DateTime<Utc>,
}

impl<V> Envelope<V> {
    /// Build an envelope recording the given markers for `groups`
    ///
    /// Every group must have an entry in `markers`; the memoizer guarantees
    /// this by minting a marker for each group whose slot was empty.
    pub fn new(value: V, groups: &[GroupName], markers: &HashMap<GroupName, Marker>) -> Self {
        let group_markers = groups
            .iter()
            .filter_map(|group| markers.get(group).map(|m| (group.clone(), m.clone())))
            .collect();

        Self {
            value,
            group_markers,
            cached_at: Utc::now(),
        }
    }

    /// Check whether this envelope is fresh against the current markers
    ///
    /// Fresh iff the recorded groups are exactly the requested ones and every
    /// recorded marker equals the current one. A group missing from either
    /// side counts as a mismatch, so dropping a group from a key's group set
    /// cannot hide an invalidation of that group.
    pub fn is_fresh(&self, groups: &[GroupName], current: &HashMap<GroupName, Marker>) -> bool {
        let requested: HashSet<&str> = groups.iter().map(String::as_str).collect();
        if self.group_markers.len() != requested.len()
            || !self.group_markers.keys().all(|g| requested.contains(g.as_str()))
        {
            return false;
        }

        groups.iter().all(|group| {
            match (self.group_markers.get(group), current.get(group)) {
                (Some(recorded), Some(now)) => recorded == now,
                _ => false,
            }
        })
    }

    /// Age of the cached value
    pub fn age(&self) -> std::time::Duration {
        (Utc::now() - self.cached_at)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(0))
    }
}

impl<V: Serialize> Envelope<V> {
    /// Serialize to cache value
    pub fn to_cache_value(&self) -> Result<CacheValue> {
        serde_json::to_string(self).map_err(|e| CacheError::SerializationError(e.to_string()))
    }
}

impl<V: DeserializeOwned> Envelope<V> {
    /// Deserialize from cache value
    ///
    /// A malformed entry is not an error: it is logged and reported as absent,
    /// so the caller recomputes and overwrites it.
    pub fn from_cache_value(key: &str, raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding malformed cache envelope");
                None
            }
        }
    }
}

/// Check whether a value encodes to the null sentinel
///
/// Such values are returned to the caller but never stored, since a stored
/// null cannot be told apart from a missing entry by every backend.
pub fn is_null_sentinel<V: Serialize>(value: &V) -> bool {
    matches!(serde_json::to_value(value), Ok(serde_json::Value::Null))
}
