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

//! Persistent oplog tailing.
//!
//! The [`Tailer`] maintains a durable, resumable cursor over
//! `local.oplog.rs`, decodes each record into [`ChangeEvent`]s, and feeds
//! them to the output channel read by the downstream publisher. It owns
//! the policy for where to resume (see [`crate::resume`]), how to recover
//! from disconnection, and how to cooperate with an orderly shutdown.
//!
//! # Sessions
//!
//! One *session* is a single cursor lifecycle: resolve a resume point,
//! open a tailable cursor strictly after it, and drain records until the
//! cursor errors or a stop is requested. The supervisor loop in
//! [`Tailer::tail`] reruns sessions forever, sleeping one requery interval
//! between attempts, until stopped.
//!
//! Within a session the cursor waits up to one second for new entries
//! before surfacing an empty batch; silence is therefore observable but
//! never tears the session down. A cursor that dies without an error is
//! re-opened in place with a `ts > last_seen` filter so nothing already
//! yielded is re-read.
//!
//! # Shutdown
//!
//! Stop signals are cooperative: they are observed between cursor reads
//! and while blocked on an output send. Events decoded from an
//! already-fetched record are always emitted before the tailer returns —
//! the send is multiplexed with the stop signal without abandoning the
//! in-flight event, so a slow publisher still receives everything it was
//! promised while shutdown latency stays bounded by a single send.
//!
//! # Example
//!
//! ```rust,no_run
//! use otr_core::tailer::{Tailer, TailerConfig};
//! use otr_core::checkpoint::CheckpointStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::sync::{broadcast, mpsc};
//!
//! # async fn example<S: CheckpointStore + 'static>(store: Arc<S>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
//!
//! let config = TailerConfig::builder()
//!     .redis_prefix("myapp::")
//!     .max_catch_up(Duration::from_secs(60))
//!     .build()?;
//!
//! let tailer = Tailer::new(client, store, config);
//!
//! let (out, mut events) = mpsc::channel(1024);
//! let (stop_tx, stop_rx) = broadcast::channel(1);
//!
//! tokio::spawn(async move { tailer.tail(out, stop_rx).await });
//!
//! while let Some(event) = events.recv().await {
//!     println!("{} changed in {}", event.document_id, event.namespace);
//! }
//!
//! // Later: request shutdown
//! let _ = stop_tx.send(());
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::CheckpointStore;
use crate::decode::{self, DecodeError};
use crate::event::{ChangeEvent, RawOplogEntry};
use crate::metrics::{self, EntryStatus, NO_DATABASE};
use crate::resume;
use bson::{doc, RawDocumentBuf, Timestamp};
use futures::TryStreamExt;
use mongodb::options::CursorType;
use mongodb::{Client, Collection, Cursor};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Idle wait on the tailing cursor, and the supervisor's retry backoff.
const REQUERY_DURATION: Duration = Duration::from_secs(1);

/// Database holding the replication oplog.
const OPLOG_DATABASE: &str = "local";

/// Collection holding the replication oplog.
const OPLOG_COLLECTION: &str = "oplog.rs";

/// Default staleness bound for resuming from the stored checkpoint.
const DEFAULT_MAX_CATCH_UP: Duration = Duration::from_secs(60);

/// Configuration for the tailer.
///
/// Use [`TailerConfigBuilder`] to construct instances:
///
/// ```rust
/// use otr_core::tailer::TailerConfig;
/// use std::time::Duration;
///
/// let config = TailerConfig::builder()
///     .redis_prefix("myapp::")
///     .max_catch_up(Duration::from_secs(120))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Key prefix passed through to the checkpoint store
    pub redis_prefix: String,

    /// How old the stored checkpoint may be and still be resumed from
    pub max_catch_up: Duration,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            redis_prefix: String::new(),
            max_catch_up: DEFAULT_MAX_CATCH_UP,
        }
    }
}

impl TailerConfig {
    /// Creates a new builder for configuring a tailer.
    #[must_use]
    pub fn builder() -> TailerConfigBuilder {
        TailerConfigBuilder::default()
    }
}

/// Builder for [`TailerConfig`].
#[derive(Debug, Default)]
pub struct TailerConfigBuilder {
    redis_prefix: Option<String>,
    max_catch_up: Option<Duration>,
}

impl TailerConfigBuilder {
    /// Sets the key prefix passed to the checkpoint store.
    ///
    /// Default: empty.
    #[must_use]
    pub fn redis_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.redis_prefix = Some(prefix.into());
        self
    }

    /// Sets the staleness bound for resuming from the stored checkpoint.
    ///
    /// Default: 60 seconds.
    #[must_use]
    pub fn max_catch_up(mut self, max_catch_up: Duration) -> Self {
        self.max_catch_up = Some(max_catch_up);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroMaxCatchUp`] if `max_catch_up` is zero —
    /// a zero window would reject every stored checkpoint.
    pub fn build(self) -> Result<TailerConfig, ConfigError> {
        let max_catch_up = self.max_catch_up.unwrap_or(DEFAULT_MAX_CATCH_UP);
        if max_catch_up.is_zero() {
            return Err(ConfigError::ZeroMaxCatchUp);
        }

        Ok(TailerConfig {
            redis_prefix: self.redis_prefix.unwrap_or_default(),
            max_catch_up,
        })
    }
}

/// Tailer configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `max_catch_up` must be greater than zero
    #[error("max_catch_up must be greater than zero")]
    ZeroMaxCatchUp,
}

/// How a tailing session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// A stop was requested (or the output channel closed); do not retry
    Stopped,
    /// The session ended on its own; retry after backoff
    Retry,
}

/// Failures while asking for the newest entry in the oplog.
#[derive(Debug, Error)]
enum OplogEndError {
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    #[error(transparent)]
    Decode(#[from] bson::de::Error),

    #[error("oplog is empty")]
    Empty,
}

/// Persistently tails the oplog of a MongoDB cluster, handling
/// reconnection and resumption of where it left off.
///
/// See the [module documentation](self) for session and shutdown
/// semantics.
pub struct Tailer<S> {
    client: Client,
    store: Arc<S>,
    config: TailerConfig,
}

impl<S: CheckpointStore> Tailer<S> {
    /// Creates a tailer over the given cluster and checkpoint store.
    pub fn new(client: Client, store: Arc<S>, config: TailerConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Tails the oplog until `shutdown` is signaled.
    ///
    /// Events are delivered to `out` in oplog order; a slow receiver
    /// blocks the tailer, which is the intended backpressure. The channel
    /// is never closed from this side. Nothing short of a stop signal (or
    /// the receiver going away) makes this return.
    pub async fn tail(
        &self,
        out: mpsc::Sender<ChangeEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            info!("starting oplog tailing");
            let outcome = self.tail_once(&out, &mut shutdown).await;
            info!("oplog tailing ended");

            if outcome == SessionEnd::Stopped {
                return;
            }

            metrics::increment_tailing_restarts();
            error!("oplog tailing stopped prematurely; retrying after backoff");

            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(REQUERY_DURATION) => {}
            }
        }
    }

    /// One tailing session: resolve the resume point, open a tailing
    /// cursor strictly after it, and drain records until the cursor errors
    /// or a stop arrives.
    async fn tail_once(
        &self,
        out: &mpsc::Sender<ChangeEvent>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        // A fresh collection handle per attempt, so a poisoned cursor from
        // a previous session carries nothing over.
        let oplog: Collection<RawDocumentBuf> = self
            .client
            .database(OPLOG_DATABASE)
            .collection(OPLOG_COLLECTION);

        let start = resume::resolve_start_timestamp(
            self.store.as_ref(),
            &self.config.redis_prefix,
            self.config.max_catch_up,
            || latest_oplog_timestamp(&oplog),
        )
        .await;

        let mut cursor = match open_cursor(&oplog, start).await {
            Ok(cursor) => cursor,
            Err(e) => {
                error!(error = %e, "failed to open oplog cursor");
                return SessionEnd::Retry;
            }
        };

        // Greatest timestamp yielded in this session; seeds the re-open
        // filter when the cursor dies.
        let mut last_seen = start;

        loop {
            if stop_requested(shutdown) {
                info!("received stop; aborting oplog tailing");
                return SessionEnd::Stopped;
            }

            match cursor.try_next().await {
                Ok(Some(raw)) => {
                    let (timestamp, events) = unmarshal_entry(&raw);
                    if let Some(timestamp) = timestamp {
                        last_seen = timestamp;
                    }

                    if forward_events(out, shutdown, events).await {
                        info!("received stop; aborting oplog tailing");
                        return SessionEnd::Stopped;
                    }
                }

                Ok(None) => {
                    if cursor.is_alive() {
                        // Await window expired with nothing new.
                        debug!("oplog cursor idle, continuing");
                        continue;
                    }

                    // The cursor expired. Make a new one to pick up from
                    // where we left off.
                    info!(
                        seconds = last_seen.time,
                        "oplog cursor expired; reopening past last seen entry"
                    );
                    cursor = match open_cursor(&oplog, last_seen).await {
                        Ok(cursor) => cursor,
                        Err(e) => {
                            error!(error = %e, "failed to reopen oplog cursor");
                            return SessionEnd::Retry;
                        }
                    };
                }

                Err(e) => {
                    error!(error = %e, "error from oplog cursor");
                    return SessionEnd::Retry;
                }
            }
        }
    }
}

/// Opens a tailing cursor over records strictly newer than `after`, in
/// natural (write) order, waiting up to [`REQUERY_DURATION`] at the tail.
async fn open_cursor(
    oplog: &Collection<RawDocumentBuf>,
    after: Timestamp,
) -> Result<Cursor<RawDocumentBuf>, mongodb::error::Error> {
    oplog
        .find(doc! { "ts": { "$gt": after } })
        .sort(doc! { "$natural": 1 })
        .cursor_type(CursorType::TailableAwait)
        .max_await_time(REQUERY_DURATION)
        .await
}

/// Timestamp of the newest entry currently in the oplog, used as the
/// resume point when no usable checkpoint exists.
async fn latest_oplog_timestamp(
    oplog: &Collection<RawDocumentBuf>,
) -> Result<Timestamp, OplogEndError> {
    let raw = oplog
        .find_one(doc! {})
        .sort(doc! { "$natural": -1 })
        .await?;

    let Some(raw) = raw else {
        return Err(OplogEndError::Empty);
    };

    let entry: RawOplogEntry = bson::from_slice(raw.as_bytes())?;
    debug!(seconds = entry.timestamp.time, "got latest oplog entry");
    Ok(entry.timestamp)
}

/// Deserializes and decodes a single raw oplog record, observing its size
/// into the entries histogram.
///
/// The record's timestamp is returned even when the record is ignored or
/// errored, so the session tracks the last entry it read regardless of
/// what became of it.
fn unmarshal_entry(raw: &RawDocumentBuf) -> (Option<Timestamp>, Vec<ChangeEvent>) {
    let bytes = raw.as_bytes();

    let entry: RawOplogEntry = match bson::from_slice(bytes) {
        Ok(entry) => entry,
        Err(e) => {
            error!(error = %e, "error deserializing oplog entry");
            metrics::record_oplog_entry_size(bytes.len(), NO_DATABASE, EntryStatus::Ignored);
            return (None, Vec::new());
        }
    };

    let timestamp = entry.timestamp;
    let (events, status, database) = collect_events(decode::decode(entry));
    metrics::record_oplog_entry_size(bytes.len(), &database, status);

    (Some(timestamp), events)
}

/// Splits decode results into publishable events plus the record's status
/// classification and database label.
fn collect_events(
    decoded: Vec<Result<ChangeEvent, DecodeError>>,
) -> (Vec<ChangeEvent>, EntryStatus, String) {
    let Some(first) = decoded.first() else {
        return (Vec::new(), EntryStatus::Ignored, NO_DATABASE.to_string());
    };

    let database = match first {
        Ok(event) => event.namespace.database.clone(),
        Err(DecodeError::MissingDocumentId { namespace }) => namespace.database.clone(),
    };

    let mut events = Vec::with_capacity(decoded.len());
    let mut status = EntryStatus::Processed;

    for result in decoded {
        match result {
            Ok(event) => events.push(event),
            Err(e) => {
                status = EntryStatus::Error;
                error!(error = %e, "error processing oplog entry");
            }
        }
    }

    (events, status, database)
}

/// Delivers decoded events to the output channel, watching for a stop
/// signal without abandoning any in-flight send.
///
/// Returns true when tailing should end: a stop was observed (after every
/// pending event was still delivered) or the receiving side went away.
async fn forward_events(
    out: &mpsc::Sender<ChangeEvent>,
    shutdown: &mut broadcast::Receiver<()>,
    events: Vec<ChangeEvent>,
) -> bool {
    let mut stop = false;

    for event in events {
        let database = event.namespace.database.clone();
        let operation = event.operation;

        let mut send = pin!(out.send(event));
        let delivered = loop {
            tokio::select! {
                biased;
                _ = shutdown.recv(), if !stop => stop = true,
                result = &mut send => break result.is_ok(),
            }
        };

        if !delivered {
            warn!("output channel closed; aborting oplog tailing");
            return true;
        }

        metrics::increment_events_emitted(&database, operation.as_str());
    }

    stop
}

/// Non-blocking check of the stop channel.
fn stop_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    match shutdown.try_recv() {
        Ok(()) | Err(TryRecvError::Closed | TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty) => false,
    }
}
