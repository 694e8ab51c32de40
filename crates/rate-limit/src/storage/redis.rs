//! Redis-backed counter storage, shared by every instance pointing at the same server.

use std::time::Duration;

use config::RedisConfig;
use redis::RedisError;

use super::redis_pool::{Pool, create_pool};
use super::{CounterRecord, CounterStorage, StorageError};

/// Redis-based counter storage. Records are JSON strings written with `SET .. EX`, shared by
/// every instance pointing at the same server.
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
}

impl RedisStorage {
    /// Create a new Redis storage instance.
    ///
    /// An unreachable server is not an error here: requests are admitted until it comes back.
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        let storage = Self {
            pool,
            key_prefix: config.key_prefix.clone(),
        };

        match storage.ping().await {
            Ok(()) => log::debug!("Connected to Redis rate limit storage"),
            Err(e) => log::warn!("Redis rate limit storage is not reachable, requests will be admitted until it is: {e}"),
        }

        Ok(storage)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e: RedisError| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

/// How often an update is retried when another writer changes the key in between.
const MAX_ATTEMPTS: usize = 16;

fn query_error(e: RedisError) -> StorageError {
    StorageError::Query(e.to_string())
}

/// Decodes a stored record. Anything that is not a counter record reads as absent, so the
/// next write replaces it.
fn decode(key: &str, value: Option<String>) -> Option<CounterRecord> {
    let value = value?;

    match serde_json::from_str(&value) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("Replacing malformed counter record at '{key}': {e}");
            None
        }
    }
}

impl CounterStorage for RedisStorage {
    /// Optimistic transaction: `WATCH` the key, read it, then `MULTI`/`SET .. EX`/`EXEC`.
    /// `EXEC` is aborted when another client wrote the key after `WATCH`, and the update
    /// starts over with the fresh value.
    async fn update<F>(&self, key: &str, ttl: Duration, f: F) -> Result<CounterRecord, StorageError>
    where
        F: Fn(Option<CounterRecord>) -> CounterRecord + Send + Sync,
    {
        let key = self.redis_key(key);
        let ttl_secs = ttl.as_secs().max(1);

        // Pooled connections are not shared while checked out, so WATCH only sees this update.
        // Recycling sends UNWATCH in case an error left a watch behind.
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        for attempt in 1..=MAX_ATTEMPTS {
            let _: () = redis::cmd("WATCH")
                .arg(&key)
                .query_async(&mut *conn)
                .await
                .map_err(query_error)?;

            let value: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut *conn)
                .await
                .map_err(query_error)?;

            let record = f(decode(&key, value));
            let encoded = serde_json::to_string(&record).map_err(|e| StorageError::Malformed(e.to_string()))?;

            let committed: Option<(String,)> = redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(&key)
                .arg(encoded)
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut *conn)
                .await
                .map_err(query_error)?;

            if committed.is_some() {
                return Ok(record);
            }

            log::debug!("Counter at '{key}' changed during update, retrying (attempt {attempt})");
        }

        Err(StorageError::Query(format!(
            "counter at '{key}' kept changing during {MAX_ATTEMPTS} update attempts"
        )))
    }
}
