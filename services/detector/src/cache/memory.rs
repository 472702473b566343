//! In-memory proxy cache for tests and local runs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheError, ProxyCache, DEFAULT_SET_KEY};

/// Process-local proxy cache.
pub struct MemoryCache {
    set_key: String,
    members: RwLock<HashSet<String>>,

    /// When set, every operation fails with `CacheError::Unavailable`.
    unavailable: AtomicBool,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            set_key: DEFAULT_SET_KEY.to_string(),
            members: RwLock::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Create a cache holding `ips`.
    pub fn with_ips<I, S>(ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: RwLock::new(ips.into_iter().map(Into::into).collect()),
            ..Self::new()
        }
    }

    /// Simulate the cache going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable(
                "memory cache marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProxyCache for MemoryCache {
    fn set_key(&self) -> &str {
        &self.set_key
    }

    async fn contains(&self, ip: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        Ok(self.members.read().await.contains(ip))
    }

    async fn add(&self, ip: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        Ok(self.members.write().await.insert(ip.to_string()))
    }

    async fn add_many(&self, ips: &[String]) -> Result<u64, CacheError> {
        self.check_available()?;
        let mut members = self.members.write().await;
        Ok(ips.iter().filter(|ip| members.insert((*ip).clone())).count() as u64)
    }

    async fn remove(&self, ip: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        Ok(self.members.write().await.remove(ip))
    }

    async fn cardinality(&self) -> Result<u64, CacheError> {
        self.check_available()?;
        Ok(self.members.read().await.len() as u64)
    }

    async fn members(&self) -> Result<Vec<String>, CacheError> {
        self.check_available()?;
        Ok(self.members.read().await.iter().cloned().collect())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.check_available()?;
        self.members.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_semantics() {
        let cache = MemoryCache::new();
        assert!(cache.add("10.0.0.1").await.unwrap());
        assert!(!cache.add("10.0.0.1").await.unwrap());
        assert!(cache.contains("10.0.0.1").await.unwrap());

        let added = cache
            .add_many(&["10.0.0.1".to_string(), "10.0.0.2".to_string()])
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(cache.cardinality().await.unwrap(), 2);

        assert!(cache.remove("10.0.0.2").await.unwrap());
        assert!(!cache.remove("10.0.0.2").await.unwrap());

        cache.clear().await.unwrap();
        assert_eq!(cache.cardinality().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let cache = MemoryCache::with_ips(["10.0.0.1"]);
        cache.set_unavailable(true);
        assert!(matches!(
            cache.contains("10.0.0.1").await,
            Err(CacheError::Unavailable(_))
        ));
    }
}
