//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Cache key type - one cached computation result
pub type CacheKey = String;

/// Group name type - a set of cache keys invalidated together
pub type GroupName = String;

/// Value representation native to the backing store
pub type CacheValue = String;

/// Opaque token naming the current generation of a group
///
/// Markers are minted, never mutated: invalidating a group replaces its marker
/// with a fresh one, which makes every envelope recorded against the old one stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(String);

impl Marker {
    /// Length of the hex rendering of a 128-bit marker
    pub const HEX_LEN: usize = 32;

    /// Mint a fresh, globally unique marker
    pub fn mint() -> Self {
        Marker(Uuid::new_v4().simple().to_string())
    }

    /// Parse a marker read back from the store
    ///
    /// Anything that is not a 128-bit hex string is rejected, so a corrupted
    /// marker slot behaves exactly like an evicted one.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == Self::HEX_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Marker(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Encode for storage under a group key
    pub fn to_cache_value(&self) -> CacheValue {
        self.0.clone()
    }

    /// The marker's hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Statistics for memoizer activity
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls answered from a fresh envelope
    pub hits: u64,

    /// Calls that found no usable envelope (absent or malformed)
    pub misses: u64,

    /// Calls whose envelope existed but disagreed with a current group marker
    pub stale: u64,

    /// Number of times a wrapped computation was invoked
    pub recomputations: u64,

    /// Computed results that encode to null and were therefore not stored
    pub uncacheable: u64,

    /// Backend failures observed, whether propagated or absorbed
    pub backend_errors: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.lookups();
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate (absent plus stale) as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Total number of completed lookups
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses + self.stale
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, stale: {}, hit_rate: {:.2}%, recomputations: {}, backend_errors: {} }}",
            self.hits,
            self.misses,
            self.stale,
            self.hit_rate(),
            self.recomputations,
            self.backend_errors
        )
    }
}
