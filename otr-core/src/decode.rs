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

//! Oplog Record Decoder
//!
//! Turns one [`RawOplogEntry`] into the ordered list of [`ChangeEvent`]s it
//! represents. Plain inserts, updates, and removes decode to a single
//! event. Transactional batches (`applyOps` commands against `admin.$cmd`)
//! are unpacked recursively: every child write inherits the parent
//! command's timestamp and draws its `tx_idx` from a counter shared across
//! the whole batch, so `(timestamp, tx_idx)` totally orders siblings.
//!
//! Decoding is infallible at the record level — a payload that cannot be
//! parsed logs and yields nothing. Individual children of a batch can fail
//! (a write with no document id); such a failure is reported per child and
//! does not affect its siblings.

use crate::event::{ChangeEvent, Namespace, OperationType, RawOperation, RawOplogEntry};
use serde::Deserialize;
use thiserror::Error;
use tracing::error;

/// Namespace under which transactional commands are logged.
const ADMIN_COMMAND_NAMESPACE: &str = "admin.$cmd";

/// A write that decoded structurally but cannot be published.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The record carries no identifier for the affected document.
    #[error("oplog entry in {namespace} has no document id")]
    MissingDocumentId {
        /// Namespace of the offending record
        namespace: Namespace,
    },
}

/// Payload of an `applyOps` transaction command.
#[derive(Debug, Deserialize)]
struct TransactionPayload {
    #[serde(rename = "applyOps", default)]
    apply_ops: Vec<RawOplogEntry>,
}

/// Decodes one raw oplog record into its change events, in order.
///
/// Returns one `Result` per logical write: `Ok` for a publishable event,
/// `Err` for a write that was recognized but cannot be published. Records
/// that represent nothing publishable (no-ops, non-transactional commands,
/// unparseable transaction payloads) return an empty list.
#[must_use]
pub fn decode(entry: RawOplogEntry) -> Vec<Result<ChangeEvent, DecodeError>> {
    let mut tx_idx = 0;
    decode_entry(entry, &mut tx_idx)
}

/// Recursive decode step. The `tx_idx` counter is threaded by reference so
/// that every write in a transactional batch, however deeply nested, draws
/// the next consecutive index.
fn decode_entry(entry: RawOplogEntry, tx_idx: &mut u32) -> Vec<Result<ChangeEvent, DecodeError>> {
    let operation = match entry.operation {
        RawOperation::Insert => OperationType::Insert,
        RawOperation::Update => OperationType::Update,
        RawOperation::Remove => OperationType::Remove,
        RawOperation::Command => return decode_transaction(entry, tx_idx),
        RawOperation::Other => return Vec::new(),
    };

    let idx = *tx_idx;
    *tx_idx += 1;

    vec![build_event(entry, operation, idx)]
}

/// Expands an `applyOps` batch into the decoded children, in order.
fn decode_transaction(
    entry: RawOplogEntry,
    tx_idx: &mut u32,
) -> Vec<Result<ChangeEvent, DecodeError>> {
    if entry.namespace != ADMIN_COMMAND_NAMESPACE {
        return Vec::new();
    }

    let timestamp = entry.timestamp;
    let payload: TransactionPayload = match bson::from_document(entry.document) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "failed to parse transaction payload");
            return Vec::new();
        }
    };

    payload
        .apply_ops
        .into_iter()
        .flat_map(|mut child| {
            // Children carry the batch's commit timestamp, not whatever
            // timestamp the child entry itself recorded.
            child.timestamp = timestamp;
            decode_entry(child, tx_idx)
        })
        .collect()
}

fn build_event(
    entry: RawOplogEntry,
    operation: OperationType,
    tx_idx: u32,
) -> Result<ChangeEvent, DecodeError> {
    let namespace = Namespace::parse(&entry.namespace);

    // Updates name their target in `o2`; inserts and removes carry the
    // full document (or at least its `_id`) in `o`.
    let document_id = if operation == OperationType::Update {
        entry.update_target.and_then(|target| target.id)
    } else {
        entry.document.get("_id").cloned()
    };

    let Some(document_id) = document_id else {
        return Err(DecodeError::MissingDocumentId { namespace });
    };

    Ok(ChangeEvent {
        operation,
        timestamp: entry.timestamp,
        namespace,
        document_id,
        payload: entry.document,
        tx_idx,
    })
}
