//! Proxy cache.
//!
//! The cache is a single named set of IP strings shared by every detector
//! process. Membership in the set is the classification fast path.

mod memory;
mod redis_set;

pub use self::memory::MemoryCache;
pub use self::redis_set::RedisCache;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

/// Default name of the cache set.
pub const DEFAULT_SET_KEY: &str = "proxies";

/// Cache operation errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to connect to the cache.
    #[error("failed to connect to cache: {0}")]
    Connect(#[source] redis::RedisError),

    /// A cache command failed.
    #[error("cache command failed: {0}")]
    Command(#[source] redis::RedisError),

    /// Cache unreachable (non-Redis backends).
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Name of the set holding proxy IPs.
    pub set_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            set_key: DEFAULT_SET_KEY.to_string(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let port = lookup("REDIS_PORT")
            .map(|v| v.trim().parse::<u16>())
            .transpose()
            .context("REDIS_PORT must be a port number.")?
            .unwrap_or(defaults.port);

        Ok(Self {
            host: lookup("REDIS_HOST").unwrap_or(defaults.host),
            port,
            username: lookup("REDIS_USERNAME").filter(|s| !s.is_empty()),
            password: lookup("REDIS_PASSWORD").filter(|s| !s.is_empty()),
            set_key: lookup("PXD_CACHE_SET")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.set_key),
        })
    }
}

/// Set-oriented store of IPs already classified as proxies.
#[async_trait]
pub trait ProxyCache: Send + Sync {
    /// Name of the underlying set.
    fn set_key(&self) -> &str;

    /// Returns true if `ip` is in the set.
    async fn contains(&self, ip: &str) -> Result<bool, CacheError>;

    /// Add `ip`. Returns true if it was not already present.
    async fn add(&self, ip: &str) -> Result<bool, CacheError>;

    /// Add many IPs. Returns how many were newly added.
    async fn add_many(&self, ips: &[String]) -> Result<u64, CacheError>;

    /// Remove `ip`. Returns true if it was present.
    async fn remove(&self, ip: &str) -> Result<bool, CacheError>;

    /// Number of members.
    async fn cardinality(&self) -> Result<u64, CacheError>;

    /// Every member.
    async fn members(&self) -> Result<Vec<String>, CacheError>;

    /// Drop every member.
    async fn clear(&self) -> Result<(), CacheError>;
}
