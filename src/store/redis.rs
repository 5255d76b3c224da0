use super::{CounterStore, WindowMode};
use crate::error::{RateLimitError, Result};
use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, FromRedisValue, RedisError, Value};
use async_trait::async_trait;

/// Redis-backed counter store.
///
/// Holds a multiplexed connection; clones share the same underlying socket,
/// so no lock is taken per request.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            RateLimitError::Configuration(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| RateLimitError::Store(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(target: "redis_ratelimit::store", "Connected to Redis");
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

/// Redis refuses to INCR a key that holds a non-integer or non-string value.
fn holds_non_counter(err: &RedisError) -> bool {
    err.code() == Some("WRONGTYPE") || err.to_string().contains("not an integer")
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window_secs: u64, mode: WindowMode) -> Result<u64> {
        let mut connection = self.connection.clone();

        // MULTI/EXEC: no other client can interleave between INCR and EXPIRE.
        let mut pipe = ::redis::pipe();
        pipe.atomic().incr(key, 1);
        pipe.cmd("EXPIRE").arg(key).arg(window_secs);
        if mode == WindowMode::Fixed {
            // Requires Redis 7.0 or later.
            pipe.arg("NX");
        }
        pipe.ignore();

        let results: Vec<Value> = pipe
            .query_async(&mut connection)
            .await
            .map_err(|e| {
                if holds_non_counter(&e) {
                    RateLimitError::MalformedCount {
                        key: key.to_string(),
                        value: e.to_string(),
                    }
                } else {
                    RateLimitError::Store(format!("INCR/EXPIRE failed: {}", e))
                }
            })?;

        let value = results.first().ok_or_else(|| RateLimitError::MalformedCount {
            key: key.to_string(),
            value: "empty transaction result".to_string(),
        })?;

        u64::from_redis_value(value).map_err(|_| RateLimitError::MalformedCount {
            key: key.to_string(),
            value: format!("{:?}", value),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| RateLimitError::Store(format!("Ping failed: {}", e)))?;
        Ok(())
    }
}
