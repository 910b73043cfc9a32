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

//! In-memory checkpoint store.
//!
//! A thread-safe, in-process implementation of
//! [`CheckpointStore`] for local development, tests, and single-instance
//! deployments where the checkpoint does not need to survive a restart.
//!
//! ⚠️ Checkpoints are lost when the process exits; after a restart the
//! tailer will resume from the end of the oplog instead. Use
//! [`RedisStore`](crate::redis::RedisStore) in production.
//!
//! # Example
//!
//! ```rust
//! use otr_stores::memory::MemoryStore;
//! use otr_core::checkpoint::CheckpointStore;
//! use bson::Timestamp;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//!
//! let ts = Timestamp { time: 1_700_000_000, increment: 4 };
//! store.save_last_processed_timestamp("myapp::", ts).await?;
//!
//! assert_eq!(store.last_processed_timestamp("myapp::").await?, Some(ts));
//! # Ok(())
//! # }
//! ```

use bson::Timestamp;
use otr_core::checkpoint::{CheckpointError, CheckpointStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory checkpoint store, keyed by prefix.
///
/// Cloning is cheap and clones share the same underlying map, so a store
/// can be handed to both the tailer and a publisher in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    checkpoints: Arc<RwLock<HashMap<String, Timestamp>>>,
}

impl MemoryStore {
    /// Creates a new, empty in-memory checkpoint store.
    #[must_use]
    pub fn new() -> Self {
        debug!("creating in-memory checkpoint store");
        Self::default()
    }

    /// Creates a store pre-populated with checkpoints, keyed by prefix.
    ///
    /// Useful for tests that need an existing resume point.
    #[must_use]
    pub fn with_checkpoints(checkpoints: HashMap<String, Timestamp>) -> Self {
        Self {
            checkpoints: Arc::new(RwLock::new(checkpoints)),
        }
    }

    /// Returns the number of stored checkpoints.
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    /// Returns `true` if no checkpoint is stored.
    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }

    /// Removes all stored checkpoints.
    pub async fn clear(&self) {
        self.checkpoints.write().await.clear();
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryStore {
    async fn last_processed_timestamp(
        &self,
        prefix: &str,
    ) -> Result<Option<Timestamp>, CheckpointError> {
        Ok(self.checkpoints.read().await.get(prefix).copied())
    }

    async fn save_last_processed_timestamp(
        &self,
        prefix: &str,
        timestamp: Timestamp,
    ) -> Result<(), CheckpointError> {
        self.checkpoints
            .write()
            .await
            .insert(prefix.to_string(), timestamp);
        Ok(())
    }

    async fn close(&self) -> Result<(), CheckpointError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(time: u32, increment: u32) -> Timestamp {
        Timestamp { time, increment }
    }

    #[tokio::test]
    async fn save_then_read_round_trips() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);

        store
            .save_last_processed_timestamp("a::", ts(10, 1))
            .await
            .unwrap();

        assert_eq!(
            store.last_processed_timestamp("a::").await.unwrap(),
            Some(ts(10, 1))
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn missing_checkpoint_reads_as_none() {
        let store = MemoryStore::new();
        assert_eq!(store.last_processed_timestamp("a::").await.unwrap(), None);
    }

    #[tokio::test]
    async fn prefixes_are_independent() {
        let store = MemoryStore::new();
        store
            .save_last_processed_timestamp("a::", ts(10, 1))
            .await
            .unwrap();
        store
            .save_last_processed_timestamp("b::", ts(20, 2))
            .await
            .unwrap();

        assert_eq!(
            store.last_processed_timestamp("a::").await.unwrap(),
            Some(ts(10, 1))
        );
        assert_eq!(
            store.last_processed_timestamp("b::").await.unwrap(),
            Some(ts(20, 2))
        );
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();

        store
            .save_last_processed_timestamp("a::", ts(10, 1))
            .await
            .unwrap();

        assert_eq!(
            other.last_processed_timestamp("a::").await.unwrap(),
            Some(ts(10, 1))
        );
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = MemoryStore::with_checkpoints(HashMap::from([(
            "a::".to_string(),
            ts(10, 1),
        )]));

        store.clear().await;
        assert!(store.is_empty().await);
    }
}
