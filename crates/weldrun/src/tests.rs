//! Tests for the connection engine with mock transports.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use weldtype::FunctionSig;
use weldtype::NativeShape;
use weldtype::PrimitiveKind;
use weldtype::Schema;
use weldtype::TypeDescriptor;
use weldwire::JsonCodec;
use weldwire::Value;

use crate::bridge::Callback;
use crate::bridge::InvokeError;
use crate::connection::CallArg;
use crate::connection::Connection;
use crate::connection::Error;
use crate::handler::MethodHandler;
use crate::handler::ParamSpec;
use crate::mock_transport::RecordingTransport;
use crate::registry::CallError;

fn recording_connection() -> (Connection, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new());
    let connection = Connection::new(transport.clone(), Arc::new(JsonCodec));
    (connection, transport)
}

fn recording_connection_with_schema(schema: Schema) -> (Connection, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new());
    let connection = Connection::with_schema(transport.clone(), Arc::new(JsonCodec), schema);
    (connection, transport)
}

async fn sent_json(transport: &RecordingTransport) -> Vec<serde_json::Value> {
    transport
        .sent()
        .await
        .iter()
        .map(|frame| serde_json::from_str(frame).unwrap())
        .collect()
}

async fn wait_for_frames(transport: &RecordingTransport, count: usize) -> Vec<serde_json::Value> {
    for _ in 0..100 {
        let frames = sent_json(transport).await;
        if frames.len() >= count {
            return frames;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("Timed out waiting for {} frames", count);
}

#[tokio::test]
async fn test_call_ids_are_unique_and_increasing() {
    let (connection, transport) = recording_connection();
    for _ in 0..3 {
        connection.call("svc.fn", vec![]).await.unwrap();
    }
    let frames = sent_json(&transport).await;
    let ids: Vec<i64> = frames.iter().map(|f| f[1].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_schemaless_call_wire_shape() {
    let (connection, transport) = recording_connection();
    connection
        .call("svc.fn", vec![Value::Int(42).into(), Value::Str("s".into()).into()])
        .await
        .unwrap();
    let frames = sent_json(&transport).await;
    assert_eq!(frames[0], json!(["call", 0, "svc.fn", [], 42, "s"]));
}

#[tokio::test]
async fn test_callback_argument_becomes_token() {
    let (connection, transport) = recording_connection();
    let callback = Callback::new(|_args| Ok(None));
    connection
        .call(
            "svc.fn",
            vec![
                Value::Int(42).into(),
                Value::Str("s".into()).into(),
                CallArg::Callback(callback),
            ],
        )
        .await
        .unwrap();
    let frames = sent_json(&transport).await;
    assert_eq!(frames[0][0], json!("call"));
    assert_eq!(frames[0][3], json!([2]));
    assert_eq!(frames[0][4], json!(42));
    assert_eq!(frames[0][5], json!("s"));
    let token = frames[0][6].as_str().unwrap();
    assert!(Uuid::parse_str(token).is_ok());
}

#[tokio::test]
async fn test_same_callback_identity_reuses_token() {
    let (connection, transport) = recording_connection();
    let callback = Callback::new(|_args| Ok(None));
    let other = Callback::new(|_args| Ok(None));
    connection.call("m", vec![CallArg::Callback(callback.clone())]).await.unwrap();
    connection.call("m", vec![CallArg::Callback(callback)]).await.unwrap();
    connection.call("m", vec![CallArg::Callback(other)]).await.unwrap();

    let frames = sent_json(&transport).await;
    let tokens: Vec<&str> = frames.iter().map(|f| f[4].as_str().unwrap()).collect();
    assert_eq!(tokens[0], tokens[1]);
    assert_ne!(tokens[0], tokens[2]);
}

#[tokio::test]
async fn test_handler_reply_wire_shape() {
    let (connection, transport) = recording_connection();
    connection.register(
        "svc.fn",
        MethodHandler::new(
            vec![
                ParamSpec::Value(NativeShape::i32()),
                ParamSpec::Value(NativeShape::string()),
            ],
            |_context, _args| Ok(Some(Value::Float(3.14))),
        ),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",0,"svc.fn",[],42,"s"]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call-reply", 0, true, 3.14])]);
}

#[tokio::test]
async fn test_void_handler_reply_omits_result() {
    let (connection, transport) = recording_connection();
    connection.register("m", MethodHandler::untyped(|_context, _args| Ok(None)));
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",5,"m",[]]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call-reply", 5, true])]);
}

#[tokio::test]
async fn test_handler_exception_reply() {
    let (connection, transport) = recording_connection();
    connection.register(
        "m",
        MethodHandler::untyped(|_context, _args| Err("kaboom".to_string())),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",2,"m",[]]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call-reply", 2, false, "kaboom"])]);
}

#[tokio::test]
async fn test_argument_count_mismatch() {
    let (connection, transport) = recording_connection();
    connection.register(
        "svc.fn",
        MethodHandler::new(
            vec![
                ParamSpec::Value(NativeShape::i32()),
                ParamSpec::Value(NativeShape::string()),
            ],
            |_context, _args| Ok(None),
        ),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",0,"svc.fn",[],42]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(
        frames,
        vec![json!([
            "call-error",
            0,
            "Incorrect number of arguments for a method. Expected: 2. Received: 1"
        ])]
    );
}

#[tokio::test]
async fn test_unregistered_method() {
    let (connection, transport) = recording_connection();
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",0,"unknownFunc",[]]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call-error", 0, "Method unknownFunc is not registered"])]);
}

#[tokio::test]
async fn test_response_with_unknown_id() {
    let (connection, transport) = recording_connection();
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call-reply",100,true,1]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call-error", -1, "Invalid callID: 100"])]);
}

#[tokio::test]
async fn test_exception_with_unknown_id_is_only_logged() {
    let (connection, transport) = recording_connection();
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call-error",42,"late failure"]"#).await.unwrap();

    assert!(sent_json(&transport).await.is_empty());
}

#[tokio::test]
async fn test_exception_with_no_call_id_is_a_fault() {
    let (connection, _transport) = recording_connection();
    connection.mark_ready().await.unwrap();
    let result = connection.on_message(r#"["call-error",-1,"peer desynchronized"]"#).await;
    match result {
        Err(Error::Fault(reason)) => assert_eq!(reason, "peer desynchronized"),
        other => panic!("Expected Fault, got {:?}", other),
    }
}

#[tokio::test]
async fn test_response_settles_pending_call() {
    let (connection, _transport) = recording_connection();
    connection.mark_ready().await.unwrap();
    let handle = connection.call("svc.fn", vec![]).await.unwrap();
    assert_eq!(connection.outstanding_calls(), 1);

    connection.on_message(r#"["call-reply",0,true,7]"#).await.unwrap();
    assert_eq!(connection.outstanding_calls(), 0);
    assert_eq!(handle.outcome().await.unwrap(), Value::Int(7));
}

#[tokio::test]
async fn test_exception_response_fails_pending_call() {
    let (connection, _transport) = recording_connection();
    connection.mark_ready().await.unwrap();
    let handle = connection.call("svc.fn", vec![]).await.unwrap();
    connection.on_message(r#"["call-reply",0,false,"boom"]"#).await.unwrap();

    match handle.outcome().await {
        Err(CallError::Remote(reason)) => assert_eq!(reason, Value::Str("boom".into())),
        other => panic!("Expected Remote, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_for_known_id_fails_pending_call() {
    let (connection, _transport) = recording_connection();
    connection.mark_ready().await.unwrap();
    let handle = connection.call("svc.fn", vec![]).await.unwrap();
    connection.on_message(r#"["call-error",0,"bad arguments"]"#).await.unwrap();

    match handle.outcome().await {
        Err(CallError::Fault(reason)) => assert_eq!(reason, "bad arguments"),
        other => panic!("Expected Fault, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reregistering_replaces_handler() {
    let (connection, transport) = recording_connection();
    connection.register("m", MethodHandler::untyped(|_context, _args| Ok(Some(Value::Int(1)))));
    connection.register("m", MethodHandler::untyped(|_context, _args| Ok(Some(Value::Int(2)))));
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",0,"m",[]]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call-reply", 0, true, 2])]);
}

#[tokio::test]
async fn test_connection_is_injected_when_declared() {
    let (connection, transport) = recording_connection();
    connection.register(
        "m",
        MethodHandler::untyped(|context, _args| {
            Ok(Some(Value::Bool(context.connection.is_some())))
        })
        .with_connection(),
    );
    connection.register(
        "plain",
        MethodHandler::untyped(|context, _args| {
            Ok(Some(Value::Bool(context.connection.is_some())))
        }),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",0,"m",[]]"#).await.unwrap();
    connection.on_message(r#"["call",1,"plain",[]]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames[0], json!(["call-reply", 0, true, true]));
    assert_eq!(frames[1], json!(["call-reply", 1, true, false]));
}

#[tokio::test]
async fn test_forwarding_callable_issues_call_to_token() {
    let (connection, transport) = recording_connection();
    connection.register(
        "svc.cb",
        MethodHandler::new(
            vec![ParamSpec::Callable { arity: None, returns_value: false }],
            |_context, args| {
                let callable = args[0].callable().expect("expected callable");
                callable.invoke(vec![Value::Int(42)]).map_err(|e| e.to_string())?;
                Ok(None)
            },
        ),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",0,"svc.cb",[0],"T"]"#).await.unwrap();

    let frames = wait_for_frames(&transport, 2).await;
    assert!(frames.contains(&json!(["call-reply", 0, true])));
    assert!(frames.contains(&json!(["call", 0, "T", [], 42])));
}

#[tokio::test]
async fn test_forwarding_callable_with_return_value_is_unsupported() {
    let (connection, transport) = recording_connection();
    connection.register(
        "svc.cb",
        MethodHandler::new(
            vec![ParamSpec::Callable { arity: None, returns_value: true }],
            |_context, args| {
                let callable = args[0].callable().expect("expected callable");
                match callable.invoke(vec![]) {
                    Err(InvokeError::UnsupportedReturn) => Ok(Some(Value::Str("refused".into()))),
                    other => Err(format!("Expected UnsupportedReturn, got {:?}", other)),
                }
            },
        ),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",0,"svc.cb",[0],"T"]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call-reply", 0, true, "refused"])]);
}

#[tokio::test]
async fn test_arity_adapted_thunk_rejects_wrong_count() {
    let (connection, transport) = recording_connection();
    connection.register(
        "svc.cb",
        MethodHandler::new(
            vec![ParamSpec::Callable { arity: Some(2), returns_value: false }],
            |_context, args| {
                let callable = args[0].callable().expect("expected callable");
                match callable.invoke(vec![Value::Int(1)]) {
                    Err(InvokeError::ArityMismatch { expected: 2, received: 1 }) => {
                        Ok(Some(Value::Str("rejected".into())))
                    }
                    other => Err(format!("Expected ArityMismatch, got {:?}", other)),
                }
            },
        ),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",0,"svc.cb",[0],"T"]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call-reply", 0, true, "rejected"])]);
}

#[tokio::test]
async fn test_non_finite_floats_serialize_as_no_value() {
    let (connection, transport) = recording_connection();
    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        connection.call("m", vec![Value::Float(bad).into()]).await.unwrap();
    }
    let frames = sent_json(&transport).await;
    for (id, frame) in frames.iter().enumerate() {
        assert_eq!(*frame, json!(["call", id, "m", [], null]));
    }
}

#[tokio::test]
async fn test_messages_defer_until_ready_and_replay_in_order() {
    let (connection, transport) = recording_connection();
    let received = Arc::new(StdMutex::new(Vec::new()));
    let sink = received.clone();
    connection.register(
        "m",
        MethodHandler::untyped(move |_context, args| {
            let value = args[0].value().and_then(Value::as_i64).unwrap_or(-1);
            sink.lock().unwrap().push(value);
            Ok(None)
        }),
    );

    connection.on_message(r#"["call",0,"m",[],1]"#).await.unwrap();
    connection.on_message(r#"["call",1,"m",[],2]"#).await.unwrap();
    assert!(received.lock().unwrap().is_empty());
    assert!(sent_json(&transport).await.is_empty());

    connection.mark_ready().await.unwrap();
    assert_eq!(*received.lock().unwrap(), vec![1, 2]);

    connection.on_message(r#"["call",2,"m",[],3]"#).await.unwrap();
    assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_undeserializable_message_is_discarded() {
    let (connection, transport) = recording_connection();
    connection.on_message("this is not a frame").await.unwrap();
    connection.mark_ready().await.unwrap();
    assert!(sent_json(&transport).await.is_empty());
}

#[tokio::test]
async fn test_close_fails_all_outstanding_calls() {
    let (connection, _transport) = recording_connection();
    let first = connection.call("a", vec![]).await.unwrap();
    let second = connection.call("b", vec![]).await.unwrap();
    assert_eq!(connection.outstanding_calls(), 2);

    connection.close();
    assert!(matches!(first.outcome().await, Err(CallError::Closed)));
    assert!(matches!(second.outcome().await, Err(CallError::Closed)));
    assert_eq!(connection.outstanding_calls(), 0);
    assert!(matches!(connection.call("c", vec![]).await, Err(Error::Closed)));
}

fn arith_schema() -> Schema {
    let mut schema = Schema::new();
    schema.add_function(
        "svc",
        "add",
        FunctionSig::new(
            vec![
                TypeDescriptor::Primitive(PrimitiveKind::I32),
                TypeDescriptor::Primitive(PrimitiveKind::I32),
            ],
            Some(TypeDescriptor::Primitive(PrimitiveKind::I32)),
        ),
    );
    schema.add_function(
        "svc",
        "notify",
        FunctionSig::new(vec![TypeDescriptor::Primitive(PrimitiveKind::I32)], None),
    );
    schema
}

#[tokio::test]
async fn test_one_way_call_registers_no_pending_entry() {
    let (connection, transport) = recording_connection_with_schema(arith_schema());
    let handle = connection.call("svc.notify", vec![Value::Int(5).into()]).await.unwrap();
    assert!(handle.is_one_way());
    assert_eq!(connection.outstanding_calls(), 0);
    assert_eq!(handle.outcome().await.unwrap(), Value::Null);

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call", 0, "svc.notify", [], 5])]);
}

#[tokio::test]
async fn test_one_way_dispatch_sends_no_reply_and_swallows_errors() {
    let (connection, transport) = recording_connection_with_schema(arith_schema());
    let received = Arc::new(StdMutex::new(Vec::new()));
    let sink = received.clone();
    connection.register(
        "svc.notify",
        MethodHandler::new(vec![ParamSpec::Value(NativeShape::i32())], move |_context, args| {
            let value = args[0].value().and_then(Value::as_i64).unwrap_or(-1);
            sink.lock().unwrap().push(value);
            Err("ignored".to_string())
        }),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",9,"svc.notify",[],5]"#).await.unwrap();

    assert_eq!(*received.lock().unwrap(), vec![5]);
    assert!(sent_json(&transport).await.is_empty());
}

#[tokio::test]
async fn test_outbound_schema_validation() {
    let (connection, _transport) = recording_connection_with_schema(arith_schema());

    match connection.call("svc.add", vec![Value::Int(1).into()]).await {
        Err(Error::ArgumentCount { expected: 2, received: 1 }) => {}
        other => panic!("Expected ArgumentCount, got {:?}", other.map(|_| ())),
    }
    match connection
        .call("svc.add", vec![Value::Str("x".into()).into(), Value::Int(2).into()])
        .await
    {
        Err(Error::Type(_)) => {}
        other => panic!("Expected Type error, got {:?}", other.map(|_| ())),
    }
    match connection.call("svc.missing", vec![]).await {
        Err(Error::UnknownFunction { .. }) => {}
        other => panic!("Expected UnknownFunction, got {:?}", other.map(|_| ())),
    }
    // A service the schema does not know takes the schemaless path.
    connection.call("other.fn", vec![Value::Int(1).into()]).await.unwrap();
}

#[tokio::test]
async fn test_inbound_conversion_failure_reports_cast_error() {
    let (connection, transport) = recording_connection_with_schema(arith_schema());
    connection.register(
        "svc.add",
        MethodHandler::new(
            vec![
                ParamSpec::Value(NativeShape::i32()),
                ParamSpec::Value(NativeShape::i32()),
            ],
            |_context, _args| Ok(Some(Value::Int(0))),
        ),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",4,"svc.add",[],"x",2]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0][0], json!("call-error"));
    assert_eq!(frames[0][1], json!(4));
    let reason = frames[0][2].as_str().unwrap();
    assert!(reason.starts_with("Cannot cast"), "unexpected reason: {}", reason);
}

#[tokio::test]
async fn test_inbound_schema_conversion_produces_native_values() {
    let (connection, transport) = recording_connection_with_schema(arith_schema());
    connection.register(
        "svc.add",
        MethodHandler::new(
            vec![
                ParamSpec::Value(NativeShape::i32()),
                ParamSpec::Value(NativeShape::i32()),
            ],
            |_context, args| {
                let a = args[0].value().and_then(Value::as_i64).ok_or("bad arg 0")?;
                let b = args[1].value().and_then(Value::as_i64).ok_or("bad arg 1")?;
                Ok(Some(Value::Int(a + b)))
            },
        ),
    );
    connection.mark_ready().await.unwrap();
    connection.on_message(r#"["call",0,"svc.add",[],1,2]"#).await.unwrap();

    let frames = sent_json(&transport).await;
    assert_eq!(frames, vec![json!(["call-reply", 0, true, 3])]);
}

#[tokio::test]
async fn test_messages_after_close_are_ignored() {
    let (connection, transport) = recording_connection();
    connection.mark_ready().await.unwrap();
    connection.close();
    connection.on_message(r#"["call-reply",0,true,1]"#).await.unwrap();
    assert!(sent_json(&transport).await.is_empty());
}
