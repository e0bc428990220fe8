//! Redis-backed JSON cache for query and aggregation results.

use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::ReadingError;

/// Namespaced JSON cache with TTLs and prefix invalidation.
#[derive(Clone)]
pub struct ReadingCache {
    redis: ConnectionManager,
    namespace: String,
}

impl ReadingCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            namespace: "aq:cache".to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Fetch and deserialize a cached value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ReadingError> {
        let mut conn = self.redis.clone();

        let raw: Option<String> = redis::cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await?;

        match raw {
            Some(json) => Ok(serde_json::from_str(&json).ok()),
            None => Ok(None),
        }
    }

    /// Serialize and store a value with a TTL.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), ReadingError> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(value)?;

        redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(json)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    /// Delete one cached key.
    pub async fn delete(&self, key: &str) -> Result<(), ReadingError> {
        let mut conn = self.redis.clone();
        redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Invalidate every key under a prefix (SCAN + DEL).
    ///
    /// The namespace keeps the keyspace flat and small, so a cursor scan is
    /// bounded. Returns the number of keys removed.
    pub async fn invalidate(&self, prefix: &str) -> Result<usize, ReadingError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}:{}*", self.namespace, prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: usize = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await?;
                removed += deleted;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if removed > 0 {
            debug!(prefix = %pattern, count = removed, "Invalidated cache keys");
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires actual Redis
    async fn test_cache_roundtrip_and_invalidate() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let client = redis::Client::open(url).unwrap();
        let manager = ConnectionManager::new(client).await.unwrap();
        let cache = ReadingCache::new(manager).with_namespace("aq:cache:test");

        cache
            .set("daily-stats:paris:2026-03-14", &42u32, Duration::from_secs(60))
            .await
            .unwrap();

        let value: Option<u32> = cache.get("daily-stats:paris:2026-03-14").await.unwrap();
        assert_eq!(value, Some(42));

        let removed = cache.invalidate("daily-stats:paris").await.unwrap();
        assert_eq!(removed, 1);

        let value: Option<u32> = cache.get("daily-stats:paris:2026-03-14").await.unwrap();
        assert_eq!(value, None);
    }
}
