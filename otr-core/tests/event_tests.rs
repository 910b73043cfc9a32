//! Integration tests for the event module.

use bson::{doc, Bson, Timestamp};
use otr_core::event::{
    pack_timestamp, unpack_timestamp, ChangeEvent, Namespace, OperationType, RawOperation,
    RawOplogEntry,
};

#[test]
fn namespace_splits_at_first_dot() {
    let ns = Namespace::parse("d.c.more");
    assert_eq!(ns.database, "d");
    assert_eq!(ns.collection, "c.more");

    let ns = Namespace::parse("app.users");
    assert_eq!(ns.database, "app");
    assert_eq!(ns.collection, "users");
}

#[test]
fn namespace_without_dot_has_empty_collection() {
    let ns = Namespace::parse("d");
    assert_eq!(ns.database, "d");
    assert_eq!(ns.collection, "");
}

#[test]
fn namespace_display_matches_full_name() {
    let ns = Namespace::new("app", "users");
    assert_eq!(ns.full_name(), "app.users");
    assert_eq!(ns.to_string(), "app.users");
}

#[test]
fn operation_type_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&OperationType::Insert).unwrap(),
        r#""insert""#
    );
    assert_eq!(
        serde_json::to_string(&OperationType::Remove).unwrap(),
        r#""remove""#
    );
    assert_eq!(OperationType::Update.as_str(), "update");
}

#[test]
fn raw_operation_codes() {
    let entry: RawOplogEntry = bson::from_document(doc! {
        "ts": Timestamp { time: 1, increment: 0 },
        "op": "u",
        "ns": "app.users",
        "o": { "$set": { "x": 1 } },
        "o2": { "_id": 5 },
    })
    .unwrap();

    assert_eq!(entry.operation, RawOperation::Update);
    assert_eq!(entry.update_target.unwrap().id, Some(Bson::Int32(5)));
}

#[test]
fn unrecognized_raw_operation_maps_to_other() {
    let entry: RawOplogEntry = bson::from_document(doc! {
        "ts": Timestamp { time: 1, increment: 0 },
        "op": "n",
        "ns": "",
        "o": {},
    })
    .unwrap();

    assert_eq!(entry.operation, RawOperation::Other);
}

#[test]
fn raw_entry_ignores_extra_oplog_fields() {
    let entry: RawOplogEntry = bson::from_document(doc! {
        "ts": Timestamp { time: 9, increment: 9 },
        "t": 3_i64,
        "h": 0_i64,
        "v": 2_i32,
        "wall": bson::DateTime::now(),
        "op": "i",
        "ns": "app.users",
        "o": { "_id": 1 },
    })
    .unwrap();

    assert_eq!(entry.timestamp, Timestamp { time: 9, increment: 9 });
    assert_eq!(entry.operation, RawOperation::Insert);
}

#[test]
fn change_event_json_round_trip() {
    let original = ChangeEvent {
        operation: OperationType::Update,
        timestamp: Timestamp {
            time: 1_700_000_000,
            increment: 4,
        },
        namespace: Namespace::new("app", "users"),
        document_id: Bson::String("u-1".to_string()),
        payload: doc! { "$set": { "name": "Grace" } },
        tx_idx: 2,
    };

    let json = serde_json::to_string(&original).unwrap();
    assert!(json.contains(r#""documentId""#));
    assert!(json.contains(r#""txIdx""#));

    let restored: ChangeEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, original);
}

#[test]
fn packed_timestamp_round_trip() {
    let ts = Timestamp {
        time: 1_700_000_000,
        increment: 17,
    };

    assert_eq!(unpack_timestamp(pack_timestamp(ts)), ts);
    assert_eq!(pack_timestamp(ts), (1_700_000_000_u64 << 32) | 17);
}
