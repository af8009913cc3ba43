//! Primary cache tier.
//!
//! Any key/value store exposing get / set-with-TTL / delete can serve as the
//! primary tier. Values cross this boundary as JSON text.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use tally_types::TallyError;

/// A remote key/value store used as the primary cache tier.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TallyError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TallyError>;

    async fn delete(&self, key: &str) -> Result<(), TallyError>;
}

/// Redis implementation of the primary tier.
pub struct RedisCacheBackend {
    client: redis::Client,
    key_prefix: String,
}

impl RedisCacheBackend {
    /// Create a backend from a connection URL. Connections are opened per
    /// call, so a Redis outage surfaces as per-call errors the cache absorbs.
    pub fn new(connection_url: &str, key_prefix: impl Into<String>) -> Result<Self, TallyError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| TallyError::CacheError(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
        })
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:cache:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, TallyError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TallyError::CacheError(e.to_string()))
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, TallyError> {
        let mut conn = self.connection().await?;
        conn.get(self.cache_key(key))
            .await
            .map_err(|e| TallyError::CacheError(e.to_string()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TallyError> {
        let mut conn = self.connection().await?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        conn.pset_ex::<_, _, ()>(self.cache_key(key), value, millis)
            .await
            .map_err(|e| TallyError::CacheError(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), TallyError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.cache_key(key))
            .await
            .map_err(|e| TallyError::CacheError(e.to_string()))
    }
}
