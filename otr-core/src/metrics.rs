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

//! Metrics instrumentation for the oplog tailer.
//!
//! Uses the `metrics` facade crate so the exporter (Prometheus, StatsD,
//! ...) is chosen by the embedding process; the tailer only records
//! observations against the process-global registry.
//!
//! # Labels
//!
//! Labels are kept to fixed, low-cardinality sets:
//! - **database**: source database name, or `(no database)` when a record
//!   produced no events
//! - **status**: one of `ignored`, `processed`, `error` (see
//!   [`EntryStatus`])
//! - **operation**: `insert`, `update`, or `remove`
//!
//! Never label by document id or timestamp.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Oplog entries observed by the tailer, by raw record size in bytes.
///
/// Type: Histogram
/// Labels: database, status
/// Unit: bytes
pub const OPLOG_ENTRIES_BY_SIZE: &str = "otr_oplog_entries_by_size";

/// Change events handed to the output channel.
///
/// Type: Counter
/// Labels: database, operation
const EVENTS_EMITTED_TOTAL: &str = "otr_events_emitted_total";

/// Tailing sessions that ended prematurely and were restarted.
///
/// Type: Counter
const TAILING_RESTARTS_TOTAL: &str = "otr_tailing_restarts_total";

/// Database label used when a record produced no events.
pub const NO_DATABASE: &str = "(no database)";

/// Registers metric descriptions for exporters.
///
/// Call once at application startup, before the tailer records anything.
pub fn init_metrics() {
    describe_histogram!(
        OPLOG_ENTRIES_BY_SIZE,
        Unit::Bytes,
        "Oplog entries observed by the tailer, by raw record size"
    );

    describe_counter!(
        EVENTS_EMITTED_TOTAL,
        "Total number of change events handed to the output channel"
    );

    describe_counter!(
        TAILING_RESTARTS_TOTAL,
        "Total number of oplog tailing sessions that ended prematurely and were restarted"
    );
}

/// Records the raw size of one oplog entry, labeled by the database it
/// touched and how the record was classified.
pub fn record_oplog_entry_size(bytes: usize, database: &str, status: EntryStatus) {
    histogram!(
        OPLOG_ENTRIES_BY_SIZE,
        "database" => database.to_string(),
        "status" => status.as_str()
    )
    .record(bytes as f64);
}

/// Increments the emitted-event counter.
pub fn increment_events_emitted(database: &str, operation: &'static str) {
    counter!(
        EVENTS_EMITTED_TOTAL,
        "database" => database.to_string(),
        "operation" => operation
    )
    .increment(1);
}

/// Increments the premature-session-restart counter.
pub fn increment_tailing_restarts() {
    counter!(TAILING_RESTARTS_TOTAL).increment(1);
}

/// Classification of one raw oplog record, used as the `status` label.
///
/// A fixed set keeps label cardinality bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// The record produced no events (no-op, foreign command, unparseable)
    Ignored,
    /// At least one event was produced and every child processed cleanly
    Processed,
    /// At least one child of the record failed to process
    Error,
}

impl EntryStatus {
    /// Returns the status as a static string for metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Processed => "processed",
            Self::Error => "error",
        }
    }
}
