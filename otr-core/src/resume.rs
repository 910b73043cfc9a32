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

//! Resume-point resolution.
//!
//! Decides the oplog timestamp from which a tailing session starts
//! reading. Three tiers, each logged when it falls through:
//!
//! 1. The checkpoint stored on the bus, when fresh enough. A checkpoint
//!    older than `max_catch_up` is deliberately skipped — replaying a long
//!    window would flood the publisher with obsolete events, so the bridge
//!    prefers resuming at the head of the oplog over a stale replay.
//! 2. The timestamp of the newest entry currently in the oplog.
//! 3. The current wall clock, packed into the seconds half of the
//!    timestamp. This last resort keeps the tailer live when both the bus
//!    and the database fail to answer, at the cost of possibly skipping
//!    records written in between.
//!
//! The oplog-end lookup is passed in as a closure so the tiering logic can
//! be exercised without a database connection.

use crate::checkpoint::CheckpointStore;
use bson::Timestamp;
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Resolves the timestamp strictly after which the cursor should start.
///
/// `latest_oplog_timestamp` must return the timestamp of the newest entry
/// currently in the oplog; it is only invoked when the checkpoint tier
/// does not apply.
pub async fn resolve_start_timestamp<S, F, Fut, E>(
    store: &S,
    prefix: &str,
    max_catch_up: Duration,
    latest_oplog_timestamp: F,
) -> Timestamp
where
    S: CheckpointStore + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Timestamp, E>>,
    E: fmt::Display,
{
    match store.last_processed_timestamp(prefix).await {
        Ok(Some(checkpoint)) => {
            if is_fresh(checkpoint, max_catch_up) {
                info!(
                    seconds = checkpoint.time,
                    "found last processed timestamp, resuming oplog tailing"
                );
                return checkpoint;
            }

            warn!(
                seconds = checkpoint.time,
                "last processed timestamp is too far in the past; will start from end of oplog"
            );
        }
        Ok(None) => {
            info!("no last processed timestamp stored; will start from end of oplog");
        }
        Err(e) => {
            error!(
                error = %e,
                "error querying for last processed timestamp; will start from end of oplog"
            );
        }
    }

    match latest_oplog_timestamp().await {
        Ok(end) => {
            info!(seconds = end.time, "starting tailing from end of oplog");
            end
        }
        Err(e) => {
            let now = wall_clock_timestamp();
            error!(
                error = %e,
                seconds = now.time,
                "could not read end of oplog; resuming from current wall clock, records may be skipped"
            );
            now
        }
    }
}

/// A checkpoint is fresh when its wall-clock seconds lie strictly inside
/// the catch-up window ending now.
fn is_fresh(checkpoint: Timestamp, max_catch_up: Duration) -> bool {
    let horizon = Utc::now().timestamp() - max_catch_up.as_secs() as i64;
    i64::from(checkpoint.time) > horizon
}

/// Synthesizes a timestamp from the current wall clock: seconds in the
/// upper half, a zeroed intra-second counter.
fn wall_clock_timestamp() -> Timestamp {
    Timestamp {
        time: Utc::now().timestamp() as u32,
        increment: 0,
    }
}
