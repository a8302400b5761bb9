//! Tests for the JSON codec against the canonical positional layouts.

use serde_json::json;

use crate::codec::Error;
use crate::codec::JsonCodec;
use crate::codec::WireCodec;
use crate::message::Message;
use crate::message::NO_CALL_ID;
use crate::value::Value;

fn as_json(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap()
}

#[test]
fn test_request_layout() {
    let message = Message::Request {
        id: 0,
        method: "svc.fn".into(),
        callback_indices: vec![],
        args: vec![Value::Int(42), Value::Str("s".into())],
    };
    let raw = JsonCodec.serialize(&message).unwrap();
    assert_eq!(as_json(&raw), json!(["call", 0, "svc.fn", [], 42, "s"]));
}

#[test]
fn test_request_with_callback_index() {
    let message = Message::Request {
        id: 3,
        method: "svc.fn".into(),
        callback_indices: vec![2],
        args: vec![
            Value::Int(42),
            Value::Str("s".into()),
            Value::Str("token".into()),
        ],
    };
    let raw = JsonCodec.serialize(&message).unwrap();
    assert_eq!(as_json(&raw), json!(["call", 3, "svc.fn", [2], 42, "s", "token"]));
}

#[test]
fn test_reply_layouts() {
    let with_value = Message::Response { id: 0, outcome: Ok(Some(Value::Float(3.14))) };
    assert_eq!(
        as_json(&JsonCodec.serialize(&with_value).unwrap()),
        json!(["call-reply", 0, true, 3.14])
    );

    let void = Message::Response { id: 1, outcome: Ok(None) };
    assert_eq!(as_json(&JsonCodec.serialize(&void).unwrap()), json!(["call-reply", 1, true]));

    let exception = Message::Response { id: 2, outcome: Err(Value::Str("boom".into())) };
    assert_eq!(
        as_json(&JsonCodec.serialize(&exception).unwrap()),
        json!(["call-reply", 2, false, "boom"])
    );
}

#[test]
fn test_error_layout() {
    let message = Message::Error { id: NO_CALL_ID, reason: "Invalid callID: 100".into() };
    let raw = JsonCodec.serialize(&message).unwrap();
    assert_eq!(as_json(&raw), json!(["call-error", -1, "Invalid callID: 100"]));
}

#[test]
fn test_request_round_trip() {
    let message = Message::Request {
        id: 7,
        method: "calc.add".into(),
        callback_indices: vec![0, 2],
        args: vec![
            Value::Str("t1".into()),
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            Value::Str("t2".into()),
        ],
    };
    let raw = JsonCodec.serialize(&message).unwrap();
    assert_eq!(JsonCodec.deserialize(&raw).unwrap(), message);
}

#[test]
fn test_reply_round_trip_preserves_void() {
    let raw = JsonCodec.serialize(&Message::Response { id: 5, outcome: Ok(None) }).unwrap();
    match JsonCodec.deserialize(&raw).unwrap() {
        Message::Response { id: 5, outcome: Ok(None) } => {}
        other => panic!("Expected void reply, got {:?}", other),
    }
}

#[test]
fn test_record_round_trip() {
    let record = Value::Record(vec![
        ("name".into(), Value::Str("ada".into())),
        ("age".into(), Value::Int(36)),
    ]);
    let message = Message::Request {
        id: 0,
        method: "people.add".into(),
        callback_indices: vec![],
        args: vec![record.clone()],
    };
    let raw = JsonCodec.serialize(&message).unwrap();
    let Message::Request { args, .. } = JsonCodec.deserialize(&raw).unwrap() else {
        panic!("Expected request");
    };
    assert_eq!(args[0].field("name"), record.field("name"));
    assert_eq!(args[0].field("age"), record.field("age"));
}

#[test]
fn test_non_finite_floats_serialize_as_null() {
    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let message = Message::Request {
            id: 0,
            method: "m".into(),
            callback_indices: vec![],
            args: vec![Value::Float(bad)],
        };
        let raw = JsonCodec.serialize(&message).unwrap();
        assert_eq!(as_json(&raw), json!(["call", 0, "m", [], null]));
    }
}

#[test]
fn test_normalized_recurses_into_containers() {
    let value = Value::Record(vec![(
        "xs".into(),
        Value::List(vec![Value::Float(f64::NAN), Value::Float(1.5)]),
    )]);
    let normalized = value.normalized();
    let Some(Value::List(items)) = normalized.field("xs") else {
        panic!("Expected list field");
    };
    assert_eq!(items[0], Value::Null);
    assert_eq!(items[1], Value::Float(1.5));
}

#[test]
fn test_deserialize_rejects_garbage() {
    assert!(matches!(JsonCodec.deserialize("not json"), Err(Error::Malformed(_))));
    assert!(matches!(JsonCodec.deserialize("{\"a\":1}"), Err(Error::Malformed(_))));
    assert!(matches!(
        JsonCodec.deserialize("[\"call-oops\", 1, \"m\"]"),
        Err(Error::UnknownTag(_))
    ));
    assert!(matches!(
        JsonCodec.deserialize("[\"call\", \"not-an-id\"]"),
        Err(Error::BadElement { position: 1, .. })
    ));
}

#[test]
fn test_failed_reply_requires_reason() {
    assert!(matches!(
        JsonCodec.deserialize("[\"call-reply\", 4, false]"),
        Err(Error::BadElement { position: 3, .. })
    ));
}

#[test]
fn test_large_unsigned_survives() {
    let message = Message::Request {
        id: 0,
        method: "m".into(),
        callback_indices: vec![],
        args: vec![Value::UInt(u64::MAX)],
    };
    let raw = JsonCodec.serialize(&message).unwrap();
    let Message::Request { args, .. } = JsonCodec.deserialize(&raw).unwrap() else {
        panic!("Expected request");
    };
    assert_eq!(args[0], Value::UInt(u64::MAX));
}
