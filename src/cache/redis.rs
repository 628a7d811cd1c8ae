//! Redis cache backend.
//!
//! Connections are per-operation: each call clones the multiplexed
//! connection, so no cache state survives between calls and a dropped Redis
//! node only surfaces as `CacheError::Unavailable` on the next operation.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use super::client::{CacheClient, CacheError};

pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        // SET key value NX EX ttl — atomic create-if-absent with expiry.
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.del(key).await?)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;
        let mut removed = 0u64;
        let mut cursor = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let deleted: u64 = conn.del(keys).await?;
                removed += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.connection().await?;
        // TTL returns -2 for a missing key and -1 for a key without expiry.
        let seconds: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        if seconds < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_secs(seconds as u64)))
    }
}
