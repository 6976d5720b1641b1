//! # Group-Tagged Caching Layer
//!
//! This module caches computation results in any key-value store offering
//! multi-get and multi-set, and expires whole groups of related results with a
//! single write.
//!
//! ## How it works
//!
//! - Every group name owns a **marker**: a random 128-bit token stored under
//!   `group_key_prefix + name`.
//! - A cached value is wrapped in an **envelope** recording the marker of each
//!   of its groups at caching time.
//! - On read, the envelope and all markers come back from one `get_many`. The
//!   value is served only if every recorded marker still matches.
//! - Expiring a group writes a new marker. Member keys are never enumerated;
//!   their envelopes simply stop matching.
//! - A missing marker (never written, or evicted) counts as a fresh
//!   invalidation, so eviction can only cause extra recomputation, never
//!   stale reads.
//!
//! ## Example
//!
//! ```rust
//! use potatocache::cache::{CacheConfig, MemoryBackend, Memoizer};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let memoizer = Memoizer::new(Arc::new(MemoryBackend::new()), CacheConfig::default())?;
//! let groups = vec!["author1_data".to_string()];
//!
//! let name = memoizer
//!     .memoize("author:1", &groups, || async { Ok::<_, std::io::Error>("John".to_string()) })
//!     .await?;
//! assert_eq!(name, "John");
//!
//! // one write expires every value cached in the group
//! memoizer.invalidator().invalidate_groups(["author1_data"]).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod memoize;
pub mod tag_store;
pub mod types;

pub use backend::{BackendStats, CacheBackend, MemoryBackend};
pub use config::{BackendErrorPolicy, CacheConfig, CacheConfigBuilder};
pub use entry::Envelope;
pub use invalidation::{GroupInvalidator, InvalidationEvent, InvalidationReason};
pub use memoize::{CachedFn, CachedFnBuilder, CallStats, KeyStrategy, Memoizer};
pub use tag_store::TagStore;
pub use types::{CacheKey, CacheStats, CacheValue, GroupName, Marker};
