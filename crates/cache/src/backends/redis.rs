//! Redis-backed cache storage.
//!
//! Commands run over a multiplexed async connection obtained per operation
//! from the shared [`Client`], so the backend is cheap to clone and safe to
//! share across tasks. TTLs map to `SETEX`; pattern listing maps to `KEYS`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;

use crate::backend::{CacheBackend, CacheError};

/// Redis implementation of [`CacheBackend`].
pub struct RedisBackend {
    client: Client,
}

impl RedisBackend {
    /// Connect to Redis and verify the connection with a `PING`.
    pub async fn connect(host: &str, port: u16) -> Result<Self, CacheError> {
        let url = format!("redis://{host}:{port}");
        tracing::info!(host, port, "Connecting to Redis");

        let client = Client::open(url.as_str())?;

        let mut conn = client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::debug!(response = %pong, "Redis connection established");

        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        match ttl {
            Some(ttl) => {
                redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs())
                    .arg(value)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
            None => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await?;
        Ok(keys)
    }
}
