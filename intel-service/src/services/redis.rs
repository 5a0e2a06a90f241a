//! Raw key-value store access for caching and sessions.
//!
//! `CacheStore` is the narrow surface the rest of the service consumes;
//! `RedisCache` is the production implementation and `MemoryCache` the
//! in-process fake used by tests.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error>;
    /// Delete every key matching a glob pattern. Must iterate the keyspace
    /// incrementally; a blocking full scan is not acceptable under load.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, anyhow::Error>;
    async fn ping(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own and is cheap to clone
        // per in-flight request.
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get key: {}", e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set key: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete key: {}", e))?;
        Ok(removed > 0)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        // SCAN in batches instead of KEYS, which blocks the server.
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to scan keys: {}", e))?;

            if !keys.is_empty() {
                let removed: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to delete keys: {}", e))?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(deleted)
    }

    async fn ping(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-memory `CacheStore` for tests. TTLs are accepted and ignored.
#[derive(Default)]
pub struct MemoryCache {
    pub entries: Mutex<HashMap<String, String>>,
    /// When set, every operation fails; used to test degraded-store paths.
    pub fail: Mutex<bool>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().expect("mutex poisoned") = fail;
    }

    fn check_failing(&self) -> Result<(), anyhow::Error> {
        if *self.fail.lock().expect("mutex poisoned") {
            return Err(anyhow::anyhow!("memory cache forced failure"));
        }
        Ok(())
    }

    fn pattern_matches(pattern: &str, key: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.check_failing()?;
        Ok(self
            .entries
            .lock()
            .expect("mutex poisoned")
            .get(key)
            .cloned())
    }

    async fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<(), anyhow::Error> {
        self.check_failing()?;
        self.entries
            .lock()
            .expect("mutex poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        self.check_failing()?;
        Ok(self
            .entries
            .lock()
            .expect("mutex poisoned")
            .remove(key)
            .is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, anyhow::Error> {
        self.check_failing()?;
        let mut entries = self.entries.lock().expect("mutex poisoned");
        let matching: Vec<String> = entries
            .keys()
            .filter(|k| Self::pattern_matches(pattern, k))
            .cloned()
            .collect();
        for key in &matching {
            entries.remove(key);
        }
        Ok(matching.len() as u64)
    }

    async fn ping(&self) -> Result<(), anyhow::Error> {
        self.check_failing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_pattern_delete_is_prefix_scoped() {
        let cache = MemoryCache::new();
        cache.set_ex("ns:indicator:1:abc", "a", 60).await.unwrap();
        cache.set_ex("ns:indicator:2:abc", "b", 60).await.unwrap();
        cache.set_ex("ns:indicator_list:xyz:abc", "c", 60).await.unwrap();

        let deleted = cache.delete_pattern("ns:indicator:1:*").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(cache.get_raw("ns:indicator:1:abc").await.unwrap().is_none());
        assert!(cache.get_raw("ns:indicator:2:abc").await.unwrap().is_some());
        assert!(cache
            .get_raw("ns:indicator_list:xyz:abc")
            .await
            .unwrap()
            .is_some());
    }
}
