//! The reader loop: routes inbound frames to the target or the
//! correlator.
//!
//! One logical reader task runs per peer. It never blocks on target
//! execution: matched requests are spawned onto the ambient executor and
//! their responses funnel back through the single writer, so inbound
//! requests execute in parallel while the loop keeps reading.
//!
//! Only framing, parse, and envelope-shape failures are fatal; target
//! failures become error responses (requests) or log lines
//! (notifications).

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, BufReader};

use duorpc_common::framing::read_frame;
use duorpc_common::protocol::{
    CancelParams, ErrorData, ErrorObject, Message, Request, Response, CANCEL_REQUEST_METHOD,
    INTERNAL_ERROR,
};
use duorpc_common::DuorpcError;

use crate::binder;
use crate::cancellation::{CancellationSource, CancellationToken};
use crate::peer::PeerInner;
use crate::registry::{Invocation, MethodError};

/// Key of an inbound request in the cancellation table: the canonical
/// JSON text of its id, so numeric and string ids never collide.
fn cancel_key(id: &Value) -> String {
    id.to_string()
}

pub(crate) async fn read_loop<R>(inner: Arc<PeerInner>, stream: R)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = BufReader::new(stream);
    let reason = loop {
        let encoding = inner.encoding();
        let body = match read_frame(&mut reader, &encoding).await {
            Ok(Some(body)) => body,
            Ok(None) => break "the remote endpoint closed the stream".to_string(),
            Err(e) => break format!("failed to read frame: {e}"),
        };
        match Message::parse(&body) {
            Ok(Message::Response(response)) => inner.complete_response(response),
            Ok(Message::Request(request)) if request.is_notification() => {
                handle_notification(&inner, request);
            }
            Ok(Message::Request(request)) => {
                if let Some(fatal) = handle_request(&inner, request) {
                    break fatal;
                }
            }
            Err(e) => break format!("malformed inbound message: {e}"),
        }
    };
    inner.disconnect(&reason);
}

/// Handles an inbound notification. Cancellations route to the inbound
/// cancellation table; everything else is invoked with the result
/// discarded. Failures never cross the wire.
fn handle_notification(inner: &Arc<PeerInner>, notification: Request) {
    if notification.method == CANCEL_REQUEST_METHOD {
        let params = notification.params.unwrap_or(Value::Null);
        match serde_json::from_value::<CancelParams>(params) {
            Ok(cancel) => inner.trigger_inbound_cancel(&cancel_key(&cancel.id)),
            Err(e) => tracing::debug!("ignoring malformed $/cancelRequest: {}", e),
        }
        return;
    }

    let Some(registry) = inner.registry.as_ref() else {
        tracing::debug!(
            "dropping notification {:?}: no target attached",
            notification.method
        );
        return;
    };
    let bound = binder::bind(
        registry,
        &inner.codec,
        &notification.method,
        notification.params.as_ref(),
    );
    let Some((entry, args)) = bound else {
        tracing::warn!(
            "no binding candidate for notification {:?}",
            notification.method
        );
        return;
    };

    let handler = entry.handler();
    let invocation = Invocation {
        args,
        codec: inner.codec.clone(),
        cancel: CancellationToken::none(),
    };
    let method = notification.method;
    tokio::spawn(async move {
        if let Err(error) = handler(invocation).await {
            tracing::warn!("notification handler {:?} failed: {}", method, error);
        }
    });
}

/// Handles an inbound request. Returns a fatal disconnect reason when the
/// peer cannot fulfill its duty to respond.
fn handle_request(inner: &Arc<PeerInner>, request: Request) -> Option<String> {
    // is_notification was checked by the caller.
    let id = request.id.clone().unwrap_or(Value::Null);

    if !inner.can_send {
        return Some(format!(
            "received request {:?} but no sending stream is attached to respond on",
            request.method
        ));
    }

    let Some(registry) = inner.registry.as_ref() else {
        inner.send_response(&Response::error(
            id,
            ErrorObject::method_not_found(DuorpcError::TargetNotSet.to_string()),
        ));
        return None;
    };

    let bound = binder::bind(registry, &inner.codec, &request.method, request.params.as_ref());
    let Some((entry, args)) = bound else {
        inner.send_response(&Response::error(
            id,
            ErrorObject::method_not_found(format!(
                "no method matching {:?} and its arguments",
                request.method
            )),
        ));
        return None;
    };

    // The cancellation entry is installed synchronously, before the next
    // frame is read, so a $/cancelRequest following this request can
    // always find it.
    let cancel = entry.accepts_cancellation().then(|| {
        let source = CancellationSource::new();
        let key = cancel_key(&id);
        inner.register_inbound_cancel(key.clone(), source.clone());
        (key, source)
    });
    let token = cancel
        .as_ref()
        .map(|(_, source)| source.token())
        .unwrap_or_else(CancellationToken::none);

    let handler = entry.handler();
    let invocation = Invocation {
        args,
        codec: inner.codec.clone(),
        cancel: token,
    };
    let cancel_entry = cancel.map(|(key, _)| key);
    let peer = inner.clone();
    tokio::spawn(async move {
        let outcome = handler(invocation).await;
        if let Some(key) = &cancel_entry {
            peer.remove_inbound_cancel(key);
        }
        let response = match outcome {
            Ok(value) => Response::success(id, peer.codec.apply_to_wire(value)),
            Err(error) if error.is_canceled() => Response::error(id, ErrorObject::canceled()),
            Err(error) => Response::error(id, invocation_error(&peer, error)),
        };
        peer.send_response(&response);
    });
    None
}

/// Builds the error response body for a failed target invocation: the
/// platform code and stack ride in `error.data` through the converter
/// chain, the outer code is the JSON-RPC internal-error code.
fn invocation_error(peer: &PeerInner, error: MethodError) -> ErrorObject {
    let data = ErrorData {
        stack: error.stack,
        code: error.code,
    };
    let data = serde_json::to_value(data)
        .map(|value| peer.codec.apply_to_wire(value))
        .unwrap_or(Value::Null);
    ErrorObject::new(INTERNAL_ERROR, error.message, Some(data))
}
