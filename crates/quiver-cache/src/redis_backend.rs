//! Redis cache backend.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
//! - `QUIVER_CACHE_PREFIX`: key prefix shared by all entries (default: "quiver:")

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use quiver_core::{defaults, CacheBackend, Error, Result};

/// Cache backend backed by a multiplexed Redis connection.
///
/// When the initial connection fails the backend stays constructed but
/// reports every call as unavailable, so callers fail open.
#[derive(Clone)]
pub struct RedisBackend {
    /// Redis connection manager (None if the connection could not be made).
    connection: Option<ConnectionManager>,
    /// Key prefix.
    prefix: String,
}

impl RedisBackend {
    /// Connect using `REDIS_URL` and `QUIVER_CACHE_PREFIX`.
    pub async fn from_env() -> Self {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| defaults::REDIS_URL.to_string());
        let prefix =
            std::env::var("QUIVER_CACHE_PREFIX").unwrap_or_else(|_| "quiver:".to_string());
        Self::connect(&redis_url, prefix).await
    }

    /// Connect to `redis_url`; never fails, see type docs.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Self {
        let connection = match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    info!(
                        subsystem = "cache",
                        component = "redis",
                        url = %redis_url.replace(|c: char| c.is_ascii_alphanumeric(), "*"),
                        "Redis cache connected"
                    );
                    Some(conn)
                }
                Err(e) => {
                    warn!("Failed to connect to Redis, cache will fail open: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Invalid Redis URL, cache will fail open: {}", e);
                None
            }
        };

        Self {
            connection,
            prefix: prefix.into(),
        }
    }

    /// A backend with no connection (every call unavailable).
    pub fn disconnected() -> Self {
        Self {
            connection: None,
            prefix: "quiver:".to_string(),
        }
    }

    /// Check if a connection was established.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn conn(&self) -> Result<ConnectionManager> {
        self.connection
            .clone()
            .ok_or_else(|| Error::CacheUnavailable("Redis not connected".to_string()))
    }
}

fn unavailable(op: &str, e: redis::RedisError) -> Error {
    Error::CacheUnavailable(format!("Redis {} error: {}", op, e))
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        let value = conn
            .get::<_, Option<String>>(self.full_key(key))
            .await
            .map_err(|e| unavailable("GET", e))?;
        debug!(
            cache_key = key,
            hit = value.is_some(),
            "Redis GET"
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn()?;
        // SETEX rejects a zero TTL.
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.full_key(key), value, ttl_secs)
            .await
            .map_err(|e| unavailable("SET", e))?;
        debug!(cache_key = key, ttl_secs, "Redis SET");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn()?;
        conn.del::<_, ()>(self.full_key(key))
            .await
            .map_err(|e| unavailable("DEL", e))?;
        debug!(cache_key = key, "Redis DEL");
        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key_prefix() {
        let backend = RedisBackend::disconnected();
        assert_eq!(backend.full_key("schema:neo4j:v1"), "quiver:schema:neo4j:v1");
    }

    #[tokio::test]
    async fn test_disconnected_backend_is_unavailable() {
        let backend = RedisBackend::disconnected();
        assert!(!backend.is_connected());
        let err = backend.get("k").await.unwrap_err();
        assert_eq!(err.code(), "CACHE_UNAVAILABLE");
        assert!(backend
            .set("k", "v", Duration::from_secs(1))
            .await
            .is_err());
        assert!(backend.delete("k").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_does_not_panic() {
        let backend = RedisBackend::connect("not a url", "t:").await;
        assert!(!backend.is_connected());
    }
}
