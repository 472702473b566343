//! Redis-backed proxy cache.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::{debug, info};

use super::{CacheConfig, CacheError, ProxyCache};

/// Members sent per `SADD` during bulk loads.
const BULK_CHUNK: usize = 1000;

/// Proxy cache stored as a Redis set.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    set_key: String,
}

impl RedisCache {
    /// Connect to Redis.
    ///
    /// The connection manager reconnects on its own after transient failures.
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        info!(
            host = %config.host,
            port = config.port,
            set_key = %config.set_key,
            "Connecting to cache"
        );

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: RedisConnectionInfo {
                username: config.username.clone(),
                password: config.password.clone(),
                ..Default::default()
            },
        };

        let client = redis::Client::open(info).map_err(CacheError::Connect)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(CacheError::Connect)?;

        info!("Cache connection established");

        Ok(Self {
            conn,
            set_key: config.set_key.clone(),
        })
    }
}

#[async_trait]
impl ProxyCache for RedisCache {
    fn set_key(&self) -> &str {
        &self.set_key
    }

    async fn contains(&self, ip: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        conn.sismember(&self.set_key, ip)
            .await
            .map_err(CacheError::Command)
    }

    async fn add(&self, ip: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let added: u64 = conn
            .sadd(&self.set_key, ip)
            .await
            .map_err(CacheError::Command)?;
        Ok(added > 0)
    }

    async fn add_many(&self, ips: &[String]) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let mut total = 0;

        for chunk in ips.chunks(BULK_CHUNK) {
            let added: u64 = conn
                .sadd(&self.set_key, chunk.to_vec())
                .await
                .map_err(CacheError::Command)?;
            total += added;
        }

        debug!(
            set_key = %self.set_key,
            requested = ips.len(),
            added = total,
            "Bulk added to cache"
        );
        Ok(total)
    }

    async fn remove(&self, ip: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .srem(&self.set_key, ip)
            .await
            .map_err(CacheError::Command)?;
        Ok(removed > 0)
    }

    async fn cardinality(&self) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        conn.scard(&self.set_key)
            .await
            .map_err(CacheError::Command)
    }

    async fn members(&self) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.smembers(&self.set_key)
            .await
            .map_err(CacheError::Command)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.del(&self.set_key).await.map_err(CacheError::Command)?;
        Ok(())
    }
}
