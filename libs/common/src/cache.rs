//! Redis client wrapper
//!
//! Services use Redis as a lightweight work queue: producers `push` onto a
//! list and a background consumer `pop`s from the other end.

use anyhow::Result;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Ok(RedisConfig { url })
    }
}

/// Shared Redis handle; connections are multiplexed and opened per call
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    /// Open a client for `config.url`; no connection is made until first use
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized");
        Ok(RedisPool { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Push a value onto the head of a list, returning the new length
    pub async fn push(&self, list: &str, value: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.lpush(list, value).await?;
        Ok(len)
    }

    /// Pop a value from the tail of a list, so `push`/`pop` form a FIFO
    pub async fn pop(&self, list: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.rpop(list, None).await?;
        Ok(value)
    }

    /// Drop a key (a whole list included)
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: u64 = conn.del(key).await?;
        Ok(())
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> RedisConfig {
        RedisConfig {
            url: "redis://localhost:6379".to_string(),
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_connection() -> Result<()> {
        let pool = RedisPool::new(&local_config()).await?;
        assert!(pool.health_check().await?);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_push_pop_is_fifo() -> Result<()> {
        let pool = RedisPool::new(&local_config()).await?;
        let list = "test_queue_fifo";
        pool.delete(list).await?;

        pool.push(list, "first").await?;
        pool.push(list, "second").await?;

        assert_eq!(pool.pop(list).await?, Some("first".to_string()));
        assert_eq!(pool.pop(list).await?, Some("second".to_string()));
        assert_eq!(pool.pop(list).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_client_opens_lazily() {
        let pool = RedisPool::new(&RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
        })
        .await;
        assert!(pool.is_ok());
    }
}
