// crates/warden-server/src/cache/mod.rs
// Best-effort cache port over a shared keyspace

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::observability::metrics;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// Get/Set/Delete with TTL. Implementations share one keyspace; key
/// prefixes (`rules:`, `ratelimit:`, `session:`) partition it.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    /// Delete every key under a prefix (session teardown).
    async fn del_prefix(&self, prefix: &str) -> Result<()>;
}

/// Best-effort wrapper handed to the engine and rule catalog: errors are
/// logged and counted, never propagated, so a cache outage can't fail a
/// validation.
#[derive(Clone)]
pub struct CacheHandle {
    inner: Option<Arc<dyn Cache>>,
}

impl CacheHandle {
    pub fn new(inner: Arc<dyn Cache>) -> Self {
        Self { inner: Some(inner) }
    }

    /// A handle that caches nothing (enable_cache = false).
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let cache = self.inner.as_ref()?;
        match cache.get(key).await {
            Ok(Some(value)) => {
                metrics::record_cache_result(true);
                Some(value)
            }
            Ok(None) => {
                metrics::record_cache_result(false);
                None
            }
            Err(e) => {
                metrics::record_cache_error();
                tracing::warn!(key, "cache get failed: {}", e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let Some(cache) = self.inner.as_ref() else {
            return;
        };
        if let Err(e) = cache.set(key, value, ttl).await {
            metrics::record_cache_error();
            tracing::warn!(key, "cache set failed: {}", e);
        }
    }

    pub async fn del(&self, key: &str) {
        let Some(cache) = self.inner.as_ref() else {
            return;
        };
        if let Err(e) = cache.del(key).await {
            metrics::record_cache_error();
            tracing::warn!(key, "cache del failed: {}", e);
        }
    }

    pub async fn del_prefix(&self, prefix: &str) {
        let Some(cache) = self.inner.as_ref() else {
            return;
        };
        if let Err(e) = cache.del_prefix(prefix).await {
            metrics::record_cache_error();
            tracing::warn!(prefix, "cache prefix delete failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_handle_is_inert() {
        let handle = CacheHandle::disabled();
        assert!(!handle.is_enabled());
        assert!(handle.get("k").await.is_none());
        handle.set("k", "v", Duration::from_secs(1)).await;
        assert!(handle.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_handle_roundtrip_via_memory() {
        let handle = CacheHandle::new(Arc::new(MemoryCache::default()));
        handle.set("rules:project:p", "[]", Duration::from_secs(60)).await;
        assert_eq!(handle.get("rules:project:p").await.as_deref(), Some("[]"));
        handle.del("rules:project:p").await;
        assert!(handle.get("rules:project:p").await.is_none());
    }
}
