//! Integration tests for the record decoder.
//!
//! These exercise the decode policy end to end: single writes,
//! transactional batches, timestamp inheritance, and the ordering key.

use bson::{doc, Bson, Document, Timestamp};
use otr_core::decode::{decode, DecodeError};
use otr_core::event::{pack_timestamp, OperationType, RawOperation, RawOplogEntry};

fn ts(time: u32, increment: u32) -> Timestamp {
    Timestamp { time, increment }
}

fn insert(timestamp: Timestamp, namespace: &str, document: Document) -> RawOplogEntry {
    RawOplogEntry {
        timestamp,
        operation: RawOperation::Insert,
        namespace: namespace.to_string(),
        document,
        update_target: None,
    }
}

fn raw(document: Document) -> RawOplogEntry {
    bson::from_document(document).unwrap()
}

#[test]
fn insert_emits_exactly_one_event() {
    let entry = raw(doc! {
        "ts": ts(100, 3),
        "h": -42_i64,
        "v": 2_i32,
        "op": "i",
        "ns": "app.users",
        "o": { "_id": 7, "name": "Ada" },
    });

    let events = decode(entry);
    assert_eq!(events.len(), 1);

    let event = events[0].as_ref().unwrap();
    assert_eq!(event.operation, OperationType::Insert);
    assert_eq!(event.timestamp, ts(100, 3));
    assert_eq!(event.namespace.database, "app");
    assert_eq!(event.namespace.collection, "users");
    assert_eq!(event.document_id, Bson::Int32(7));
    assert_eq!(event.payload.get_str("name").unwrap(), "Ada");
    assert_eq!(event.tx_idx, 0);
}

#[test]
fn remove_takes_id_from_document() {
    let entry = raw(doc! {
        "ts": ts(100, 4),
        "op": "d",
        "ns": "app.users",
        "o": { "_id": "u-9" },
    });

    let events = decode(entry);
    assert_eq!(events.len(), 1);

    let event = events[0].as_ref().unwrap();
    assert_eq!(event.operation, OperationType::Remove);
    assert_eq!(event.document_id, Bson::String("u-9".to_string()));
}

#[test]
fn update_takes_id_from_update_target() {
    // Partial updates carry no `_id` in the payload at all; the target id
    // lives in `o2`.
    let entry = raw(doc! {
        "ts": ts(100, 5),
        "op": "u",
        "ns": "app.users",
        "o": { "$set": { "name": "Grace" } },
        "o2": { "_id": 42 },
    });

    let events = decode(entry);
    assert_eq!(events.len(), 1);

    let event = events[0].as_ref().unwrap();
    assert_eq!(event.operation, OperationType::Update);
    assert_eq!(event.document_id, Bson::Int32(42));
    assert!(event.payload.get_document("$set").is_ok());
}

#[test]
fn update_without_target_id_is_an_error() {
    let entry = raw(doc! {
        "ts": ts(100, 6),
        "op": "u",
        "ns": "app.users",
        "o": { "$set": { "name": "Grace" } },
    });

    let events = decode(entry);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0],
        Err(DecodeError::MissingDocumentId {
            namespace: otr_core::event::Namespace::new("app", "users"),
        })
    );
}

#[test]
fn noop_and_unknown_operations_produce_nothing() {
    let noop = raw(doc! {
        "ts": ts(100, 7),
        "op": "n",
        "ns": "",
        "o": { "msg": "periodic noop" },
    });
    assert!(decode(noop).is_empty());

    let unknown = raw(doc! {
        "ts": ts(100, 8),
        "op": "xyz",
        "ns": "app.users",
        "o": { "_id": 1 },
    });
    assert!(decode(unknown).is_empty());
}

#[test]
fn command_outside_admin_namespace_produces_nothing() {
    let entry = raw(doc! {
        "ts": ts(100, 9),
        "op": "c",
        "ns": "app.$cmd",
        "o": {
            "applyOps": [
                { "op": "i", "ns": "app.users", "o": { "_id": 1 } },
            ],
        },
    });

    assert!(decode(entry).is_empty());
}

#[test]
fn transaction_children_inherit_timestamp_and_share_the_counter() {
    // Three inserts committed atomically; children record their own
    // (pre-commit) timestamps, which must be discarded.
    let entry = raw(doc! {
        "ts": ts(500, 2),
        "op": "c",
        "ns": "admin.$cmd",
        "o": {
            "applyOps": [
                { "ts": ts(499, 1), "op": "i", "ns": "db1.a", "o": { "_id": 1 } },
                { "ts": ts(499, 2), "op": "i", "ns": "db1.a", "o": { "_id": 2 } },
                { "op": "i", "ns": "db2.b", "o": { "_id": 3 } },
            ],
        },
    });

    let events: Vec<_> = decode(entry)
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    assert_eq!(events.len(), 3);
    for (idx, event) in events.iter().enumerate() {
        assert_eq!(event.timestamp, ts(500, 2));
        assert_eq!(event.tx_idx, idx as u32);
    }

    let databases: Vec<_> = events
        .iter()
        .map(|event| event.namespace.database.as_str())
        .collect();
    assert_eq!(databases, vec!["db1", "db1", "db2"]);
}

#[test]
fn nested_transactions_keep_one_running_counter() {
    let entry = raw(doc! {
        "ts": ts(600, 1),
        "op": "c",
        "ns": "admin.$cmd",
        "o": {
            "applyOps": [
                { "op": "i", "ns": "db.a", "o": { "_id": 1 } },
                {
                    "op": "c",
                    "ns": "admin.$cmd",
                    "o": {
                        "applyOps": [
                            { "op": "u", "ns": "db.b", "o": { "$set": { "x": 1 } }, "o2": { "_id": 2 } },
                        ],
                    },
                },
                { "op": "d", "ns": "db.c", "o": { "_id": 3 } },
            ],
        },
    });

    let events: Vec<_> = decode(entry)
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    assert_eq!(events.len(), 3);
    let indices: Vec<_> = events.iter().map(|event| event.tx_idx).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    for event in &events {
        assert_eq!(event.timestamp, ts(600, 1));
    }
}

#[test]
fn failed_child_still_consumes_a_counter_slot() {
    let entry = raw(doc! {
        "ts": ts(700, 1),
        "op": "c",
        "ns": "admin.$cmd",
        "o": {
            "applyOps": [
                { "op": "i", "ns": "db.a", "o": { "_id": 1 } },
                // No `o2` on an update: recognized but unpublishable.
                { "op": "u", "ns": "db.a", "o": { "$set": { "x": 1 } } },
                { "op": "i", "ns": "db.a", "o": { "_id": 3 } },
            ],
        },
    });

    let results = decode(entry);
    assert_eq!(results.len(), 3);

    assert_eq!(results[0].as_ref().unwrap().tx_idx, 0);
    assert!(results[1].is_err());
    assert_eq!(results[2].as_ref().unwrap().tx_idx, 2);
}

#[test]
fn ordering_key_strictly_increases_along_a_stream() {
    let records = vec![
        insert(ts(5, 0), "db.a", doc! { "_id": 1 }),
        raw(doc! {
            "ts": ts(6, 0),
            "op": "c",
            "ns": "admin.$cmd",
            "o": {
                "applyOps": [
                    { "op": "i", "ns": "db.a", "o": { "_id": 2 } },
                    { "op": "i", "ns": "db.b", "o": { "_id": 3 } },
                ],
            },
        }),
        insert(ts(6, 1), "db.a", doc! { "_id": 4 }),
        insert(ts(7, 0), "db.a", doc! { "_id": 5 }),
    ];

    let keys: Vec<(u64, u32)> = records
        .into_iter()
        .flat_map(decode)
        .map(|result| result.unwrap().ordering_key())
        .collect();

    assert_eq!(keys.len(), 5);
    for pair in keys.windows(2) {
        assert!(pair[0] < pair[1], "{:?} should precede {:?}", pair[0], pair[1]);
    }
}

#[test]
fn namespace_without_separator_has_empty_collection() {
    let entry = insert(ts(1, 0), "standalone", doc! { "_id": 1 });

    let events = decode(entry);
    let event = events[0].as_ref().unwrap();
    assert_eq!(event.namespace.database, "standalone");
    assert_eq!(event.namespace.collection, "");
}

#[test]
fn packed_timestamps_compare_like_their_components() {
    assert!(pack_timestamp(ts(5, 9)) < pack_timestamp(ts(6, 0)));
    assert!(pack_timestamp(ts(6, 0)) < pack_timestamp(ts(6, 1)));
}
