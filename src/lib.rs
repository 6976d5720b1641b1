//! # potatocache
//!
//! Group-tag cache invalidation for Rust, layered over any key-value store
//! with multi-get and multi-set.
//!
//! ## Features
//!
//! - Memoize async computations under a fixed or argument-derived key
//! - Tag cached values with any number of groups
//! - Expire a whole group with one write, without enumerating its members
//! - One backend round trip per hit, two per miss, whatever the group count
//! - Pluggable backends through the [`CacheBackend`] trait
//! - Configurable behaviour when the backend is unavailable
//!
//! ## Caching a function
//!
//! A blog caches author details and comments (which embed the author's name).
//! Both share the author's group, so updating the author expires both.
//!
//! ```no_run
//! use potatocache::{CacheConfig, MemoryBackend, Memoizer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let memoizer = Memoizer::new(Arc::new(MemoryBackend::new()), CacheConfig::from_env()?)?;
//!
//!     let author_details = memoizer
//!         .cached::<u64>()
//!         .arg_key(|id| format!("author:{}", id))
//!         .arg_groups(|id| vec![format!("author{}_data", id)])
//!         .build(|id: u64| async move {
//!             Ok::<_, std::io::Error>(format!("author #{}", id))
//!         })?;
//!
//!     let comment_details = memoizer
//!         .cached::<(u64, u64)>()
//!         .arg_key(|(comment_id, _)| format!("comment:{}", comment_id))
//!         .arg_groups(|(_, author_id)| vec![format!("author{}_data", author_id)])
//!         .build(|(comment_id, author_id): (u64, u64)| async move {
//!             Ok::<_, std::io::Error>(format!("comment {} by #{}", comment_id, author_id))
//!         })?;
//!
//!     author_details.call(1).await?;
//!     comment_details.call((7, 1)).await?;
//!
//!     // author 1 changed: both cached values are recomputed on next access
//!     memoizer.invalidator().invalidate_groups(["author1_data"]).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Inline memoization
//!
//! When the groups depend on data not part of the key, call
//! [`Memoizer::memoize`] directly:
//!
//! ```no_run
//! use potatocache::{CacheConfig, MemoryBackend, Memoizer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let memoizer = Memoizer::new(Arc::new(MemoryBackend::new()), CacheConfig::default())?;
//!     let (post_id, author_id) = (3, 1);
//!
//!     let text = memoizer
//!         .memoize(
//!             &format!("post:{}", post_id),
//!             &[format!("author{}_data", author_id)],
//!             || async { Ok::<_, std::io::Error>("post body".to_string()) },
//!         )
//!         .await?;
//!     println!("{}", text);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    BackendErrorPolicy, BackendStats, CacheBackend, CacheConfig, CacheConfigBuilder, CacheKey,
    CacheStats, CacheValue, CachedFn, CachedFnBuilder, CallStats, Envelope, GroupInvalidator,
    GroupName, InvalidationEvent, InvalidationReason, KeyStrategy, Marker, Memoizer,
    MemoryBackend, TagStore,
};
pub use error::{CacheError, CallError, Result};
