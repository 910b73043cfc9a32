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

//! Checkpoint store implementations for the OTR bridge.
//!
//! This crate provides backend implementations of the
//! [`CheckpointStore`](otr_core::checkpoint::CheckpointStore) trait — the
//! bus-side record of the last oplog timestamp whose events were fully
//! published.
//!
//! # Available Stores
//!
//! - **Redis** (`redis-store` feature, default): the production backend,
//!   shared with the publisher that writes the checkpoint
//! - **Memory**: in-process storage for tests and single-instance runs
//!
//! # Example: Redis Store
//!
//! ```rust,ignore
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
//! let checkpoint = store.last_processed_timestamp("myapp::").await?;
//! println!("resuming after {:?}", checkpoint);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod memory;

#[cfg(feature = "redis-store")]
pub mod redis;
