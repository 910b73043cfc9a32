//! Oplog Event Representation
//!
//! This module defines the event types that flow through the OTR bridge.
//! A [`RawOplogEntry`] is one record as read from the `local.oplog.rs`
//! collection; a [`ChangeEvent`] is the normalized change notification the
//! tailer hands to the downstream publisher.
//!
//! # Examples
//!
//! ```rust
//! use otr_core::event::{ChangeEvent, Namespace, OperationType};
//! use bson::{doc, Bson, Timestamp};
//!
//! let event = ChangeEvent {
//!     operation: OperationType::Insert,
//!     timestamp: Timestamp { time: 1_700_000_000, increment: 1 },
//!     namespace: Namespace::parse("app.users"),
//!     document_id: Bson::Int32(7),
//!     payload: doc! { "_id": 7, "name": "Ada" },
//!     tx_idx: 0,
//! };
//!
//! assert!(event.is_insert());
//! assert_eq!(event.database_name(), "app");
//! assert_eq!(event.collection_name(), "users");
//! ```

use bson::{Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation kinds carried by a [`ChangeEvent`].
///
/// Commands never appear here; the decoder either expands them into their
/// child writes or drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A document was inserted into a collection
    Insert,

    /// A document was updated in place
    Update,

    /// A document was removed from a collection
    Remove,
}

impl OperationType {
    /// Returns the operation as a static string for serialization and
    /// metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

/// Raw operation codes as they appear in the oplog `op` field.
///
/// Anything outside the four codes the tailer understands deserializes to
/// [`RawOperation::Other`] and is ignored by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RawOperation {
    /// `"i"` — insert
    #[serde(rename = "i")]
    Insert,

    /// `"u"` — update
    #[serde(rename = "u")]
    Update,

    /// `"d"` — delete
    #[serde(rename = "d")]
    Remove,

    /// `"c"` — command (transactional batches arrive as these)
    #[serde(rename = "c")]
    Command,

    /// Any other code (`"n"` no-ops and future additions)
    #[serde(other)]
    Other,
}

/// A namespace (database + collection) parsed from the oplog `ns` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name
    pub database: String,

    /// Collection name; empty when the namespace had no `.` separator
    pub collection: String,
}

impl Namespace {
    /// Creates a namespace from database and collection names.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Splits a raw `ns` string at the first `.`.
    ///
    /// `"d.c.more"` parses as database `d`, collection `c.more`; a string
    /// without a dot parses as a database with an empty collection.
    #[must_use]
    pub fn parse(namespace: &str) -> Self {
        match namespace.split_once('.') {
            Some((database, collection)) => Self::new(database, collection),
            None => Self::new(namespace, ""),
        }
    }

    /// Returns the fully qualified `database.collection` form.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Target identifier carried in the oplog `o2` field of update records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTarget {
    /// The `_id` of the updated document
    #[serde(rename = "_id")]
    pub id: Option<Bson>,
}

/// One raw record read from the oplog.
///
/// Fields the tailer does not use (`h`, `v`, `wall`, ...) are ignored at
/// deserialization time.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOplogEntry {
    /// Oplog timestamp ordering this record; zero when absent, as inside
    /// `applyOps` children (which inherit the parent's timestamp anyway)
    #[serde(rename = "ts", default = "zero_timestamp")]
    pub timestamp: Timestamp,

    /// Operation code
    #[serde(rename = "op")]
    pub operation: RawOperation,

    /// `database.collection`, or `admin.$cmd` for commands
    #[serde(rename = "ns", default)]
    pub namespace: String,

    /// Operation payload; shape depends on the operation
    #[serde(rename = "o", default)]
    pub document: Document,

    /// Update target, present only for updates
    #[serde(rename = "o2", default)]
    pub update_target: Option<UpdateTarget>,
}

fn zero_timestamp() -> Timestamp {
    Timestamp {
        time: 0,
        increment: 0,
    }
}

/// The normalized change notification emitted by the tailer.
///
/// One `ChangeEvent` corresponds to exactly one write recorded in the
/// oplog. Events that originate from the same transactional batch share a
/// `timestamp` and are ordered by `tx_idx`; the pair
/// `(timestamp, tx_idx)` is strictly increasing along a tailing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The kind of write that occurred
    pub operation: OperationType,

    /// Oplog timestamp of the enclosing record; children of a
    /// transactional batch inherit the parent command's timestamp
    pub timestamp: Timestamp,

    /// Where the write occurred
    pub namespace: Namespace,

    /// Identifier of the affected document
    #[serde(rename = "documentId")]
    pub document_id: Bson,

    /// The decoded operation payload, retained so consumers may inspect
    /// non-id fields
    pub payload: Document,

    /// Position within a transactional batch; 0 for standalone records
    #[serde(rename = "txIdx")]
    pub tx_idx: u32,
}

impl ChangeEvent {
    /// Returns true if this is an insert.
    #[inline]
    #[must_use]
    pub fn is_insert(&self) -> bool {
        self.operation == OperationType::Insert
    }

    /// Returns true if this is an update.
    #[inline]
    #[must_use]
    pub fn is_update(&self) -> bool {
        self.operation == OperationType::Update
    }

    /// Returns true if this is a remove.
    #[inline]
    #[must_use]
    pub fn is_remove(&self) -> bool {
        self.operation == OperationType::Remove
    }

    /// Returns the database name.
    #[inline]
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.namespace.database
    }

    /// Returns the collection name.
    #[inline]
    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.namespace.collection
    }

    /// Returns the ordering key `(timestamp, tx_idx)` as a comparable
    /// tuple of integers.
    #[inline]
    #[must_use]
    pub fn ordering_key(&self) -> (u64, u32) {
        (pack_timestamp(self.timestamp), self.tx_idx)
    }
}

/// Packs an oplog timestamp into its 64-bit wire form: wall-clock seconds
/// in the upper half, the intra-second counter in the lower half.
#[must_use]
pub fn pack_timestamp(timestamp: Timestamp) -> u64 {
    (u64::from(timestamp.time) << 32) | u64::from(timestamp.increment)
}

/// Inverse of [`pack_timestamp`].
#[must_use]
pub fn unpack_timestamp(raw: u64) -> Timestamp {
    Timestamp {
        time: (raw >> 32) as u32,
        increment: raw as u32,
    }
}
