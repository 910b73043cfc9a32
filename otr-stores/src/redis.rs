// Copyright 2025 OTR Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Redis-backed checkpoint store.
//!
//! The production backend for the last-processed-timestamp checkpoint.
//! The same key is written by the downstream publisher after each
//! successful broadcast and read by the tailer on session start, so both
//! sides must agree on the layout:
//!
//! ```text
//! key:   {prefix}lastProcessedEntry
//! value: decimal string of (seconds << 32) | counter
//! ```
//!
//! # Features
//!
//! - **Connection pooling** via `deadpool-redis`
//! - **Bounded retries** with exponential backoff on transient errors
//! - **Startup `PING`** so misconfiguration surfaces at construction
//!
//! # Example
//!
//! ```rust,no_run
//! use otr_stores::redis::{RedisConfig, RedisStore};
//! use otr_core::checkpoint::CheckpointStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::builder()
//!     .url("redis://localhost:6379")
//!     .pool_size(10)
//!     .build()?;
//!
//! let store = RedisStore::new(config).await?;
//!
//! match store.last_processed_timestamp("myapp::").await? {
//!     Some(ts) => println!("resuming after {}.{}", ts.time, ts.increment),
//!     None => println!("no checkpoint yet"),
//! }
//! # Ok(())
//! # }
//! ```

use bson::Timestamp;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use otr_core::checkpoint::{CheckpointError, CheckpointStore};
use otr_core::event::{pack_timestamp, unpack_timestamp};
use redis::{AsyncCommands, RedisError};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Key suffix appended to the configured prefix.
const KEY_SUFFIX: &str = "lastProcessedEntry";

/// Maximum number of retry attempts for transient Redis errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_RETRY_DELAY_MS: u64 = 100;

/// Configuration for the Redis-backed checkpoint store.
///
/// Use [`RedisConfigBuilder`] to construct this configuration with
/// validation.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., `redis://localhost:6379`)
    pub url: String,

    /// Connection pool size (default: 10)
    pub pool_size: usize,

    /// Connection timeout (default: 5 seconds)
    pub connection_timeout: Duration,

    /// Maximum number of retries for transient errors (default: 3)
    pub max_retries: u32,
}

impl RedisConfig {
    /// Creates a new builder for `RedisConfig`.
    #[must_use]
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::default()
    }
}

/// Builder for [`RedisConfig`] with validation.
#[derive(Debug, Default)]
pub struct RedisConfigBuilder {
    url: Option<String>,
    pool_size: Option<usize>,
    connection_timeout: Option<Duration>,
    max_retries: Option<u32>,
}

impl RedisConfigBuilder {
    /// Sets the Redis connection URL.
    ///
    /// # Formats
    ///
    /// - Standalone: `redis://localhost:6379`
    /// - With auth: `redis://:password@localhost:6379`
    /// - TLS: `rediss://localhost:6380`
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the connection pool size.
    ///
    /// Default: 10
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets the connection timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of retries for transient errors.
    ///
    /// Default: 3
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Builds the `RedisConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not provided or the pool size is 0.
    pub fn build(self) -> Result<RedisConfig, CheckpointError> {
        let url = self
            .url
            .ok_or_else(|| CheckpointError::Other("Redis URL is required".to_string()))?;

        let pool_size = self.pool_size.unwrap_or(10);
        if pool_size == 0 {
            return Err(CheckpointError::Other(
                "pool size must be greater than 0".to_string(),
            ));
        }

        Ok(RedisConfig {
            url,
            pool_size,
            connection_timeout: self.connection_timeout.unwrap_or(Duration::from_secs(5)),
            max_retries: self.max_retries.unwrap_or(MAX_RETRIES),
        })
    }
}

/// Redis-backed checkpoint store.
///
/// `RedisStore` is `Send + Sync` and cheap to clone; the underlying
/// connection pool handles concurrent access from the tailer and the
/// publisher.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    config: RedisConfig,
}

impl RedisStore {
    /// Creates a new `RedisStore` with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or the initial
    /// `PING` fails.
    pub async fn new(config: RedisConfig) -> Result<Self, CheckpointError> {
        debug!(url = %config.url, "initializing Redis checkpoint store");

        let mut pool_config = PoolConfig::from_url(&config.url);

        if let Some(pool) = pool_config.pool.as_mut() {
            pool.max_size = config.pool_size;
            pool.timeouts.wait = Some(config.connection_timeout);
            pool.timeouts.create = Some(config.connection_timeout);
            pool.timeouts.recycle = Some(config.connection_timeout);
        }

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                error!(error = %e, "failed to create Redis connection pool");
                CheckpointError::Connection(format!("failed to create pool: {e}"))
            })?;

        let mut conn = pool.get().await.map_err(|e| {
            error!(error = %e, "failed to get connection from pool");
            CheckpointError::Connection(format!("failed to connect to Redis: {e}"))
        })?;

        redis::cmd("PING")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| {
                error!(error = %e, "Redis PING failed");
                CheckpointError::Connection(format!("Redis connection test failed: {e}"))
            })?;

        debug!("Redis checkpoint store initialized");

        Ok(Self { pool, config })
    }

    /// Generates the Redis key for a given prefix.
    fn checkpoint_key(prefix: &str) -> String {
        format!("{prefix}{KEY_SUFFIX}")
    }

    /// Executes a Redis operation with retry logic for transient errors.
    async fn with_retry<F, T, Fut>(&self, operation: F) -> Result<T, CheckpointError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::is_retryable(&e) && retries < self.config.max_retries => {
                    retries += 1;
                    let delay =
                        Duration::from_millis(BASE_RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    warn!(
                        attempt = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Redis operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(retries, error = %e, "Redis operation failed");
                    return Err(CheckpointError::Connection(format!(
                        "Redis operation failed: {e}"
                    )));
                }
            }
        }
    }

    /// Determines if a Redis error is retryable.
    fn is_retryable(error: &RedisError) -> bool {
        matches!(
            error.kind(),
            redis::ErrorKind::IoError | redis::ErrorKind::ResponseError
        )
    }

    /// Encodes a timestamp as the stored string form.
    fn encode_timestamp(timestamp: Timestamp) -> String {
        pack_timestamp(timestamp).to_string()
    }

    /// Decodes the stored string form back into a timestamp.
    fn decode_timestamp(value: &str) -> Result<Timestamp, CheckpointError> {
        value
            .parse::<u64>()
            .map(unpack_timestamp)
            .map_err(|e| {
                CheckpointError::Serialization(format!(
                    "invalid checkpoint value {value:?}: {e}"
                ))
            })
    }
}

#[async_trait::async_trait]
impl CheckpointStore for RedisStore {
    async fn last_processed_timestamp(
        &self,
        prefix: &str,
    ) -> Result<Option<Timestamp>, CheckpointError> {
        let key = Self::checkpoint_key(prefix);
        let pool = self.pool.clone();

        let value: Option<String> = self
            .with_retry(|| async {
                let mut conn = pool.get().await.map_err(|e| {
                    RedisError::from((
                        redis::ErrorKind::IoError,
                        "failed to get connection from pool",
                        e.to_string(),
                    ))
                })?;

                conn.get(&key).await
            })
            .await?;

        match value {
            Some(value) => {
                let timestamp = Self::decode_timestamp(&value)?;
                debug!(key = %key, seconds = timestamp.time, "read checkpoint");
                Ok(Some(timestamp))
            }
            None => {
                debug!(key = %key, "no checkpoint stored");
                Ok(None)
            }
        }
    }

    async fn save_last_processed_timestamp(
        &self,
        prefix: &str,
        timestamp: Timestamp,
    ) -> Result<(), CheckpointError> {
        let key = Self::checkpoint_key(prefix);
        let value = Self::encode_timestamp(timestamp);
        let pool = self.pool.clone();

        self.with_retry::<_, (), _>(|| async {
            let mut conn = pool.get().await.map_err(|e| {
                RedisError::from((
                    redis::ErrorKind::IoError,
                    "failed to get connection from pool",
                    e.to_string(),
                ))
            })?;

            conn.set(&key, &value).await
        })
        .await?;

        debug!(key = %key, seconds = timestamp.time, "saved checkpoint");
        Ok(())
    }

    async fn close(&self) -> Result<(), CheckpointError> {
        // The pool is dropped with the store; deadpool needs no explicit
        // shutdown.
        debug!("closing Redis checkpoint store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_key_appends_suffix_to_prefix() {
        assert_eq!(
            RedisStore::checkpoint_key("myapp::"),
            "myapp::lastProcessedEntry"
        );
        assert_eq!(RedisStore::checkpoint_key(""), "lastProcessedEntry");
    }

    #[test]
    fn config_builder_applies_defaults() {
        let config = RedisConfig::builder()
            .url("redis://localhost:6379")
            .build()
            .unwrap();

        assert_eq!(config.pool_size, 10);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn config_builder_requires_url() {
        assert!(RedisConfig::builder().pool_size(10).build().is_err());
    }

    #[test]
    fn config_builder_rejects_zero_pool_size() {
        let result = RedisConfig::builder()
            .url("redis://localhost:6379")
            .pool_size(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn timestamp_encoding_round_trips() {
        let ts = Timestamp {
            time: 1_700_000_000,
            increment: 42,
        };

        let encoded = RedisStore::encode_timestamp(ts);
        assert_eq!(encoded, ((1_700_000_000_u64 << 32) | 42).to_string());
        assert_eq!(RedisStore::decode_timestamp(&encoded).unwrap(), ts);
    }

    #[test]
    fn garbage_checkpoint_value_is_a_serialization_error() {
        let result = RedisStore::decode_timestamp("not a number");
        assert!(matches!(result, Err(CheckpointError::Serialization(_))));
    }
}
