//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// One year, the effectively unbounded physical TTL
const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// What a memoized call does when the backing store fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendErrorPolicy {
    /// Surface the failure to the caller as `CallError::Cache`
    Propagate,
    /// Treat the failure as a miss and run the computation directly
    Recompute,
}

impl FromStr for BackendErrorPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "propagate" => Ok(BackendErrorPolicy::Propagate),
            "recompute" => Ok(BackendErrorPolicy::Recompute),
            other => Err(CacheError::ConfigError(format!(
                "unknown backend error policy: {}",
                other
            ))),
        }
    }
}

/// Configuration for the memoizer and invalidator
///
/// Correctness rests entirely on group markers; the physical TTL only guards
/// against the backend's own storage limits, hence the one-year default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Physical time-to-live for envelopes and markers
    pub entry_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0)
    pub ttl_jitter: f64,

    /// Prefix placed before every group name in the backing store
    pub group_key_prefix: String,

    /// Behaviour of memoized calls when the backend fails
    pub on_backend_error: BackendErrorPolicy,

    /// Upper bound for a single backend call
    pub backend_timeout: Duration,

    /// Enable memoizer hit/miss counters
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: DEFAULT_ENTRY_TTL,
            ttl_jitter: 0.0,
            group_key_prefix: "group:".to_string(),
            on_backend_error: BackendErrorPolicy::Propagate,
            backend_timeout: Duration::from_secs(5),
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.entry_ttl.is_zero() {
            return Err(CacheError::ConfigError(
                "entry_ttl must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.group_key_prefix.is_empty() {
            return Err(CacheError::ConfigError(
                "group_key_prefix must not be empty".to_string(),
            ));
        }

        if self.backend_timeout.is_zero() {
            return Err(CacheError::ConfigError(
                "backend_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Calculate actual TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.entry_ttl;
        }

        let base_secs = self.entry_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        // beyond Duration's range the jitter is meaningless
        Duration::try_from_secs_f64(final_secs).unwrap_or(self.entry_ttl)
    }

    /// Load configuration from the environment
    ///
    /// Reads a `.env` file if present, then the `POTATOCACHE_*` variables.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(secs) = lookup("POTATOCACHE_ENTRY_TTL_SECS") {
            builder = builder.entry_ttl(Duration::from_secs(parse_var(
                "POTATOCACHE_ENTRY_TTL_SECS",
                &secs,
            )?));
        }
        if let Some(jitter) = lookup("POTATOCACHE_TTL_JITTER") {
            builder = builder.ttl_jitter(parse_var("POTATOCACHE_TTL_JITTER", &jitter)?);
        }
        if let Some(prefix) = lookup("POTATOCACHE_GROUP_PREFIX") {
            builder = builder.group_key_prefix(prefix);
        }
        if let Some(ms) = lookup("POTATOCACHE_BACKEND_TIMEOUT_MS") {
            builder = builder.backend_timeout(Duration::from_millis(parse_var(
                "POTATOCACHE_BACKEND_TIMEOUT_MS",
                &ms,
            )?));
        }
        if let Some(policy) = lookup("POTATOCACHE_ON_BACKEND_ERROR") {
            builder = builder.on_backend_error(policy.parse()?);
        }
        if let Some(enabled) = lookup("POTATOCACHE_ENABLE_METRICS") {
            builder = builder.enable_metrics(parse_var("POTATOCACHE_ENABLE_METRICS", &enabled)?);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| CacheError::ConfigError(format!("{}={:?}: {}", name, raw, e)))
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    entry_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    group_key_prefix: Option<String>,
    on_backend_error: Option<BackendErrorPolicy>,
    backend_timeout: Option<Duration>,
    enable_metrics: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set physical TTL for envelopes and markers
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set the group key prefix
    pub fn group_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_key_prefix = Some(prefix.into());
        self
    }

    /// Set the backend failure policy
    pub fn on_backend_error(mut self, policy: BackendErrorPolicy) -> Self {
        self.on_backend_error = Some(policy);
        self
    }

    /// Set the per-call backend timeout
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            entry_ttl: self.entry_ttl.unwrap_or(defaults.entry_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            group_key_prefix: self.group_key_prefix.unwrap_or(defaults.group_key_prefix),
            on_backend_error: self.on_backend_error.unwrap_or(defaults.on_backend_error),
            backend_timeout: self.backend_timeout.unwrap_or(defaults.backend_timeout),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Configuration for tests: short timeout, deterministic TTL
    pub fn testing() -> Self {
        Self {
            backend_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    /// Configuration that keeps serving computed values when the backend is down
    pub fn resilient() -> Self {
        Self {
            on_backend_error: BackendErrorPolicy::Recompute,
            backend_timeout: Duration::from_secs(1),
            ttl_jitter: 0.05,
            ..Default::default()
        }
    }
}
