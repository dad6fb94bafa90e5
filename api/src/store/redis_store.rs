use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::{CounterIncrement, CounterStore, StoreError};

/// Redis/Dragonfly-backed counters shared by every API replica.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect and verify the connection with a PING.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!(error = %e, "failed to create redis client for rate limiting");
            backend(e)
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            warn!(error = %e, "failed to create redis connection manager");
            backend(e)
        })?;

        let store = Self { connection };
        store.ping().await?;
        debug!("connected to redis counter store");
        Ok(store)
    }
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get_counts(&self, keys: &[String]) -> Result<Vec<u64>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        let values: Vec<Option<u64>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(values.into_iter().map(|value| value.unwrap_or(0)).collect())
    }

    async fn increment_all(&self, increments: &[CounterIncrement]) -> Result<(), StoreError> {
        if increments.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        for increment in increments {
            let ttl_ms = u64::try_from(increment.ttl.as_millis())
                .unwrap_or(u64::MAX)
                .max(1);
            pipe.cmd("INCR")
                .arg(&increment.key)
                .ignore()
                .cmd("PEXPIRE")
                .arg(&increment.key)
                .arg(ttl_ms)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await.map_err(backend)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(backend)
    }
}
