//! Error types for cache operations
//!
//! This module defines the error types for the potatocache library. Cache-layer
//! failures (`CacheError`) are kept distinct from failures of the computation
//! being cached, which travel verbatim inside `CallError::Compute`.

use thiserror::Error;

/// Main error type for cache-layer operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Configuration error - caller programming error, raised before any I/O
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Backend unavailable or rejected the request
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Backend call did not complete in time
    #[error("Backend operation timed out after {timeout_ms}ms: {context}")]
    TimeoutError { timeout_ms: u64, context: String },

    /// A computed value could not be encoded for storage
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Whether the error came from the backing store rather than from the caller
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            CacheError::BackendError(_) | CacheError::TimeoutError { .. }
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

/// Error returned by a memoized call
///
/// `Compute` carries the wrapped computation's own error untouched; it is never
/// cached and never converted into a cache error.
#[derive(Error, Debug)]
pub enum CallError<E> {
    /// The cache layer failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The wrapped computation failed
    #[error("Computation failed: {0}")]
    Compute(E),
}

impl<E> CallError<E> {
    /// Check if this is a cache-layer failure
    pub fn is_cache(&self) -> bool {
        matches!(self, CallError::Cache(_))
    }

    /// Extract the computation's error, if that is what failed
    pub fn into_compute(self) -> Option<E> {
        match self {
            CallError::Compute(e) => Some(e),
            CallError::Cache(_) => None,
        }
    }
}
