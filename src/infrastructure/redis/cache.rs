//! TTL key-value cache used for object keys and presigned URLs.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;

use super::client::RedisService;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Namespaces for cache entries; the rendered key is `<kind>:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    ObjectKey,
    DownloadUrl,
}

impl CacheKind {
    fn prefix(&self) -> &'static str {
        match self {
            CacheKind::ObjectKey => "key",
            CacheKind::DownloadUrl => "url",
        }
    }

    pub fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix(), id)
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}

pub struct RedisCache {
    redis: RedisService,
}

impl RedisCache {
    pub fn new(redis: RedisService) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.redis.get_conn();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.redis.get_conn();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.get_conn();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.redis.get_conn();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_kind() {
        assert_eq!(CacheKind::ObjectKey.key("abc"), "key:abc");
        assert_eq!(
            CacheKind::DownloadUrl.key("originals/abc/original.mp4"),
            "url:originals/abc/original.mp4"
        );
    }
}
