// crates/warden-server/src/cache/redis.rs
// Redis cache backend (shared keyspace with the rate limiter)

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::Cache;
use crate::config::RedisConfig;
use crate::error::Result;

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect with automatic reconnection. The manager re-establishes the
    /// connection in the background; individual commands fail fast into
    /// the redis breaker while it is down.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// A cloned connection handle for the rate limiter.
    pub fn manager(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn del_prefix(&self, prefix: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(format!("{prefix}*")).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if !keys.is_empty() {
            let _: () = conn.del(keys).await?;
        }
        Ok(())
    }
}
