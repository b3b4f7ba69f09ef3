//! Wire-level scenarios: one real peer against a hand-driven remote.
//!
//! The test side speaks raw `Content-Length` frames through the shared
//! framing codec, which makes frame ordering, envelope bytes, and
//! duplicate/unsolicited responses directly observable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::time::timeout;

use duorpc_common::framing::{read_frame, write_frame, Encoding};
use duorpc_common::protocol::{Message, Request, CANCEL_REQUEST_METHOD};
use duorpc_common::DuorpcError;
use duorpc_peer::{
    CancellationSource, MethodEntry, MethodRegistry, ParamSpec, RpcPeer, ValueConverter,
};

struct Remote {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Remote {
    /// Reads and parses the peer's next outbound frame.
    async fn next_message(&mut self) -> Message {
        let body = timeout(Duration::from_secs(5), read_frame(&mut self.reader, &Encoding::utf8()))
            .await
            .expect("timed out waiting for a frame")
            .expect("frame read failed")
            .expect("stream closed before a frame arrived");
        Message::parse(&body).expect("peer emitted a malformed frame")
    }

    async fn next_request(&mut self) -> Request {
        match self.next_message().await {
            Message::Request(request) => request,
            other => panic!("expected a request frame, got {other:?}"),
        }
    }

    /// Reads the peer's next outbound frame as raw text.
    async fn next_raw(&mut self) -> String {
        timeout(Duration::from_secs(5), read_frame(&mut self.reader, &Encoding::utf8()))
            .await
            .expect("timed out waiting for a frame")
            .expect("frame read failed")
            .expect("stream closed before a frame arrived")
    }

    /// Sends one raw JSON value as a frame.
    async fn send(&mut self, value: &Value) {
        write_frame(&mut self.writer, &value.to_string(), &Encoding::utf8())
            .await
            .expect("frame write failed");
    }

    /// Asserts that the peer emits nothing for a little while.
    async fn expect_silence(&mut self) {
        let result = timeout(
            Duration::from_millis(200),
            read_frame(&mut self.reader, &Encoding::utf8()),
        )
        .await;
        assert!(result.is_err(), "expected no frame, got {result:?}");
    }
}

/// A full-duplex client peer plus the hand-driven remote end.
fn attach_with_remote(target: Option<MethodRegistry>) -> (RpcPeer, Remote) {
    let (peer_stream, remote_stream) = tokio::io::duplex(64 * 1024);
    let (peer_read, peer_write) = tokio::io::split(peer_stream);
    let (remote_read, remote_write) = tokio::io::split(remote_stream);

    let peer = RpcPeer::attach(Some(peer_write), Some(peer_read), target).unwrap();
    let remote = Remote {
        reader: BufReader::new(remote_read),
        writer: remote_write,
    };
    (peer, remote)
}

// ============================================================================
// Cancellation over the wire
// ============================================================================

#[tokio::test]
async fn test_cancel_notification_follows_the_request_frame() {
    let (peer, mut remote) = attach_with_remote(None);

    let source = CancellationSource::new();
    let token = source.token();
    let call = {
        let peer = peer.clone();
        tokio::spawn(async move {
            peer.invoke_with_cancellation::<Value, Value>("Slow", Some(&json!(["x"])), &token)
                .await
        })
    };

    // The request frame always precedes its cancellation.
    let request = remote.next_request().await;
    assert_eq!(request.method, "Slow");
    let id = request.id.clone().unwrap();

    source.cancel();
    let cancel = remote.next_request().await;
    assert_eq!(cancel.method, CANCEL_REQUEST_METHOD);
    assert!(cancel.is_notification());
    assert_eq!(cancel.params, Some(json!({ "id": id })));

    // Cancellation did not complete the call locally; the remote answer
    // does.
    let canceled_response = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": -32800, "message": "Request canceled", "data": {"stack": null, "code": null}},
    });
    remote.send(&canceled_response).await;

    match call.await.unwrap() {
        Err(DuorpcError::RemoteInvocation {
            remote_code: None,
            remote_stack: None,
            ..
        }) => {}
        other => panic!("expected a canceled RemoteInvocation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_may_answer_a_canceled_request_with_a_value() {
    let (peer, mut remote) = attach_with_remote(None);

    let source = CancellationSource::new();
    let token = source.token();
    let call = {
        let peer = peer.clone();
        tokio::spawn(async move {
            peer.invoke_with_cancellation::<Value, i64>("Compute", Some(&json!([21])), &token)
                .await
        })
    };

    let request = remote.next_request().await;
    let id = request.id.clone().unwrap();
    source.cancel();
    let _cancel = remote.next_request().await;

    // The server chose to finish anyway; the waiter gets the value.
    remote
        .send(&json!({"jsonrpc": "2.0", "id": id, "result": 42}))
        .await;
    assert_eq!(call.await.unwrap().unwrap(), 42);
}

#[tokio::test]
async fn test_precanceled_invoke_writes_nothing() {
    let (peer, mut remote) = attach_with_remote(None);

    let source = CancellationSource::new();
    let token = source.token();
    source.cancel();

    let result = peer
        .invoke_with_cancellation::<Value, Value>("Never", Some(&json!([])), &token)
        .await;
    assert!(matches!(result, Err(DuorpcError::Canceled)));

    remote.expect_silence().await;
}

#[tokio::test]
async fn test_inbound_cancellation_triggers_the_handler_token() {
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut registry = MethodRegistry::new();
    registry.register(
        MethodEntry::new(
            "AsyncMethodWithCancellation",
            vec![ParamSpec::required::<String>("arg")],
            move |inv| {
                let started_tx = started_tx.clone();
                async move {
                    let _ = started_tx.send(());
                    // Block until the injected token fires.
                    inv.cancellation().canceled().await;
                    Err(duorpc_peer::MethodError::canceled())
                }
            },
        )
        .with_cancellation(),
    );

    let (_peer, mut remote) = attach_with_remote(Some(registry));

    remote
        .send(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "AsyncMethodWithCancellation",
            "params": ["x"],
        }))
        .await;
    timeout(Duration::from_secs(5), started_rx.recv()).await.unwrap();

    remote
        .send(&json!({
            "jsonrpc": "2.0",
            "method": "$/cancelRequest",
            "params": {"id": 1},
        }))
        .await;

    // The canceled handler maps to the canceled error response with null
    // data fields.
    match remote.next_message().await {
        Message::Response(response) => {
            assert_eq!(response.id, json!(1));
            let error = response.error.expect("expected an error response");
            assert_eq!(error.code, -32800);
            assert_eq!(error.data, Some(json!({"stack": null, "code": null})));
        }
        other => panic!("expected a response frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_for_unknown_id_is_ignored() {
    let mut registry = MethodRegistry::new();
    registry.register(MethodEntry::new("Ping", vec![], |_inv| async {
        Ok(json!("pong"))
    }));
    let (_peer, mut remote) = attach_with_remote(Some(registry));

    remote
        .send(&json!({"jsonrpc": "2.0", "method": "$/cancelRequest", "params": {"id": 999}}))
        .await;

    // The peer is still healthy afterwards.
    remote
        .send(&json!({"jsonrpc": "2.0", "id": 2, "method": "Ping", "params": []}))
        .await;
    match remote.next_message().await {
        Message::Response(response) => assert_eq!(response.result, Some(json!("pong"))),
        other => panic!("expected a response frame, got {other:?}"),
    }
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn test_duplicate_responses_are_dropped() {
    let (peer, mut remote) = attach_with_remote(None);

    let call = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.invoke::<Value, i64>("One", Some(&json!([]))).await })
    };
    let id = remote.next_request().await.id.unwrap();

    remote.send(&json!({"jsonrpc": "2.0", "id": id, "result": 1})).await;
    remote.send(&json!({"jsonrpc": "2.0", "id": id, "result": 2})).await;

    // Only the first delivery reaches the waiter.
    assert_eq!(call.await.unwrap().unwrap(), 1);

    // The duplicate did not poison the peer.
    let call = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.invoke::<Value, i64>("Two", Some(&json!([]))).await })
    };
    let id = remote.next_request().await.id.unwrap();
    remote.send(&json!({"jsonrpc": "2.0", "id": id, "result": 3})).await;
    assert_eq!(call.await.unwrap().unwrap(), 3);
}

#[tokio::test]
async fn test_unsolicited_response_is_dropped() {
    let (peer, mut remote) = attach_with_remote(None);

    remote.send(&json!({"jsonrpc": "2.0", "id": 12345, "result": "stray"})).await;

    let call = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.invoke::<Value, String>("Hello", Some(&json!([]))).await })
    };
    let id = remote.next_request().await.id.unwrap();
    remote.send(&json!({"jsonrpc": "2.0", "id": id, "result": "world"})).await;
    assert_eq!(call.await.unwrap().unwrap(), "world");
}

#[tokio::test]
async fn test_responses_match_out_of_order() {
    let (peer, mut remote) = attach_with_remote(None);

    let first = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.invoke::<Value, String>("A", Some(&json!([]))).await })
    };
    let first_id = remote.next_request().await.id.unwrap();
    let second = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.invoke::<Value, String>("B", Some(&json!([]))).await })
    };
    let second_id = remote.next_request().await.id.unwrap();

    // Answer in reverse order.
    remote.send(&json!({"jsonrpc": "2.0", "id": second_id, "result": "b"})).await;
    remote.send(&json!({"jsonrpc": "2.0", "id": first_id, "result": "a"})).await;

    assert_eq!(second.await.unwrap().unwrap(), "b");
    assert_eq!(first.await.unwrap().unwrap(), "a");
}

// ============================================================================
// Envelope immunity
// ============================================================================

/// Uppercases strings on the way out, lowercases on the way in.
struct Shouty;

impl Shouty {
    fn walk(value: Value, upper: bool) -> Value {
        match value {
            Value::String(s) => Value::String(if upper { s.to_uppercase() } else { s.to_lowercase() }),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| Self::walk(v, upper)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter().map(|(k, v)| (k, Self::walk(v, upper))).collect(),
            ),
            other => other,
        }
    }
}

impl ValueConverter for Shouty {
    fn to_wire(&self, value: Value) -> Value {
        Self::walk(value, true)
    }
    fn from_wire(&self, value: Value) -> Value {
        Self::walk(value, false)
    }
}

#[tokio::test]
async fn test_converters_never_touch_the_envelope() {
    let (peer, mut remote) = attach_with_remote(None);
    peer.converters().install(Arc::new(Shouty));

    let call = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.invoke::<Value, String>("echo", Some(&json!(["abc"]))).await })
    };

    let raw = remote.next_raw().await;
    let frame: Value = serde_json::from_str(&raw).unwrap();
    // Parameters went through the converter; the envelope did not.
    assert_eq!(frame["method"], json!("echo"));
    assert_eq!(frame["jsonrpc"], json!("2.0"));
    assert!(frame["id"].is_number());
    assert_eq!(frame["params"], json!(["ABC"]));

    let id = frame["id"].clone();
    remote.send(&json!({"jsonrpc": "2.0", "id": id, "result": "ABC"})).await;

    // The inbound chain maps the wire value back.
    assert_eq!(call.await.unwrap().unwrap(), "abc");
}

// ============================================================================
// Disconnection
// ============================================================================

#[tokio::test]
async fn test_request_without_a_sending_stream_is_fatal() {
    let notified = Arc::new(AtomicBool::new(false));
    let invoked = Arc::new(AtomicBool::new(false));
    let (notified_tx, mut notified_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut registry = MethodRegistry::new();
    let notified_flag = notified.clone();
    registry.register(MethodEntry::new(
        "Heartbeat",
        vec![ParamSpec::required::<String>("tag")],
        move |_inv| {
            let notified_flag = notified_flag.clone();
            let notified_tx = notified_tx.clone();
            async move {
                notified_flag.store(true, Ordering::SeqCst);
                let _ = notified_tx.send(());
                Ok(Value::Null)
            }
        },
    ));
    let invoked_flag = invoked.clone();
    registry.register(MethodEntry::new("DoWork", vec![], move |_inv| {
        let invoked_flag = invoked_flag.clone();
        async move {
            invoked_flag.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }));

    let (peer_stream, remote_stream) = tokio::io::duplex(4096);
    let peer = RpcPeer::attach(
        Option::<DuplexStream>::None,
        Some(peer_stream),
        Some(registry),
    )
    .unwrap();

    let (disconnected_tx, disconnected_rx) = tokio::sync::oneshot::channel::<String>();
    let disconnected_tx = std::sync::Mutex::new(Some(disconnected_tx));
    peer.on_disconnected(move |reason| {
        if let Some(tx) = disconnected_tx.lock().unwrap().take() {
            let _ = tx.send(reason.to_string());
        }
    });

    let (_remote_read, mut remote_write) = tokio::io::split(remote_stream);

    // A notification is still deliverable without a sending stream.
    write_frame(
        &mut remote_write,
        &json!({"jsonrpc": "2.0", "method": "Heartbeat", "params": ["hi"]}).to_string(),
        &Encoding::utf8(),
    )
    .await
    .unwrap();

    // A request is not: the peer cannot fulfill its duty to respond.
    write_frame(
        &mut remote_write,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "DoWork", "params": []}).to_string(),
        &Encoding::utf8(),
    )
    .await
    .unwrap();

    let reason = timeout(Duration::from_secs(5), disconnected_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(!reason.is_empty());
    assert!(peer.is_disconnected());

    timeout(Duration::from_secs(5), notified_rx.recv()).await.unwrap();
    assert!(notified.load(Ordering::SeqCst));
    assert!(!invoked.load(Ordering::SeqCst), "the request handler must not run");
}

#[tokio::test]
async fn test_eof_fails_pending_calls_with_disconnected() {
    let (peer, mut remote) = attach_with_remote(None);

    let call = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.invoke::<Value, Value>("Stalled", Some(&json!([]))).await })
    };
    let _request = remote.next_request().await;

    // Closing the remote end is an end-of-stream disconnect.
    drop(remote);

    match call.await.unwrap() {
        Err(DuorpcError::Disconnected(description)) => assert!(!description.is_empty()),
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert!(peer.is_disconnected());

    // Fail-fast from now on.
    let result = peer.invoke::<Value, Value>("More", Some(&json!([]))).await;
    assert!(matches!(result, Err(DuorpcError::Disconnected(_))));
}

#[tokio::test]
async fn test_malformed_frame_is_fatal() {
    let mut registry = MethodRegistry::new();
    registry.register(MethodEntry::new("Ping", vec![], |_inv| async {
        Ok(json!("pong"))
    }));
    let (peer, mut remote) = attach_with_remote(Some(registry));

    write_frame(&mut remote.writer, "{not json", &Encoding::utf8())
        .await
        .unwrap();

    let (disconnected_tx, disconnected_rx) = tokio::sync::oneshot::channel::<String>();
    let disconnected_tx = std::sync::Mutex::new(Some(disconnected_tx));
    peer.on_disconnected(move |reason| {
        if let Some(tx) = disconnected_tx.lock().unwrap().take() {
            let _ = tx.send(reason.to_string());
        }
    });

    let reason = timeout(Duration::from_secs(5), disconnected_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(reason.contains("malformed"), "{reason}");
}
