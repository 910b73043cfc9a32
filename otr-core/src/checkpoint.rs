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

//! Checkpoint storage for the tailer's resume point.
//!
//! The [`CheckpointStore`] trait abstracts the bus-side record of the last
//! oplog timestamp whose events were fully published. The tailer only
//! reads it (to decide where to resume); the downstream publisher owns the
//! writes. Because the publisher's write can lag arbitrarily behind
//! emission, resuming from the checkpoint may replay events — duplicates
//! are acceptable, gaps are not.
//!
//! # Example
//!
//! ```rust
//! use otr_core::checkpoint::{CheckpointStore, CheckpointError};
//! use bson::Timestamp;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use tokio::sync::RwLock;
//!
//! // Minimal in-memory implementation for tests
//! #[derive(Default)]
//! struct TestStore {
//!     inner: Arc<RwLock<HashMap<String, Timestamp>>>,
//! }
//!
//! #[async_trait::async_trait]
//! impl CheckpointStore for TestStore {
//!     async fn last_processed_timestamp(
//!         &self,
//!         prefix: &str,
//!     ) -> Result<Option<Timestamp>, CheckpointError> {
//!         Ok(self.inner.read().await.get(prefix).copied())
//!     }
//!
//!     async fn save_last_processed_timestamp(
//!         &self,
//!         prefix: &str,
//!         timestamp: Timestamp,
//!     ) -> Result<(), CheckpointError> {
//!         self.inner.write().await.insert(prefix.to_string(), timestamp);
//!         Ok(())
//!     }
//!
//!     async fn close(&self) -> Result<(), CheckpointError> {
//!         Ok(())
//!     }
//! }
//! ```

use bson::Timestamp;

/// Trait for checkpoint storage backends.
///
/// A *missing* checkpoint is a normal condition (fresh deployment, expired
/// key) and is reported as `Ok(None)`; errors are reserved for transport
/// and encoding failures.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Reads the timestamp of the last fully published oplog entry under
    /// the given key prefix.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store cannot answer; an absent
    /// checkpoint is `Ok(None)`.
    async fn last_processed_timestamp(
        &self,
        prefix: &str,
    ) -> Result<Option<Timestamp>, CheckpointError>;

    /// Records the timestamp of the last fully published oplog entry.
    ///
    /// Called by the publisher after a successful broadcast, never by the
    /// tailer itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be written.
    async fn save_last_processed_timestamp(
        &self,
        prefix: &str,
        timestamp: Timestamp,
    ) -> Result<(), CheckpointError>;

    /// Closes the store, releasing any resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be closed cleanly.
    async fn close(&self) -> Result<(), CheckpointError>;
}

/// Errors that can occur during checkpoint store operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Other errors
    #[error("Checkpoint store error: {0}")]
    Other(String),
}
