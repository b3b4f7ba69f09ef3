//! The peer facade and its disconnect lifecycle.
//!
//! [`RpcPeer`] is the public face of the library: one instance bound to a
//! sending and/or receiving byte stream. Reading starts eagerly at
//! attach; writes funnel through a single writer task fed by a FIFO
//! channel so frames never interleave and wire order matches the order
//! calls were accepted past id allocation.
//!
//! # Lifecycle
//!
//! Peer state moves monotonically through `Active → Disconnecting →
//! Disconnected`. Disconnection is triggered by a fatal frame error, end
//! of stream, a write failure, the inability to respond to an inbound
//! request, or an explicit [`RpcPeer::dispose`]. All pending outbound
//! calls then observe `Disconnected` with a description of the cause,
//! later outbound calls fail fast, and the disconnected event fires
//! exactly once. Handlers subscribed after the fact run synchronously at
//! subscription time. Disposal is idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use duorpc_common::framing::{write_frame, Encoding};
use duorpc_common::protocol::{Request, Response};
use duorpc_common::{DuorpcError, Result};

use crate::cancellation::{CancellationSource, CancellationToken};
use crate::convert::PayloadCodec;
use crate::correlator::{response_outcome, Correlator};
use crate::dispatcher;
use crate::registry::MethodRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PeerState {
    Active,
    Disconnecting,
    Disconnected,
}

type DisconnectHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Mutable peer state behind the single peer-level mutex. Critical
/// sections are table operations only; IO happens outside.
pub(crate) struct Shared {
    state: PeerState,
    disconnect_reason: Option<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    correlator: Correlator,
    inbound_cancels: HashMap<String, CancellationSource>,
    handlers: Vec<(u64, DisconnectHandler)>,
    next_handler_id: u64,
    encoding: Encoding,
}

fn disconnect_description(shared: &Shared) -> String {
    shared
        .disconnect_reason
        .clone()
        .unwrap_or_else(|| "the connection was closed".to_string())
}

pub(crate) struct PeerInner {
    pub(crate) shared: Mutex<Shared>,
    pub(crate) codec: Arc<PayloadCodec>,
    pub(crate) registry: Option<MethodRegistry>,
    pub(crate) can_send: bool,
    pub(crate) can_receive: bool,
}

impl PeerInner {
    pub(crate) fn encoding(&self) -> Encoding {
        self.shared.lock().unwrap().encoding.clone()
    }

    /// Hands a serialized frame body to the writer task. Fails once the
    /// peer has started disconnecting.
    fn enqueue(&self, body: String) -> Result<()> {
        let shared = self.shared.lock().unwrap();
        match &shared.outbound {
            Some(outbound) => outbound
                .send(body)
                .map_err(|_| DuorpcError::Disconnected(disconnect_description(&shared))),
            None => Err(DuorpcError::Disconnected(disconnect_description(&shared))),
        }
    }

    /// Emits a response frame; failures are swallowed because a peer that
    /// cannot write any more is already disconnecting.
    pub(crate) fn send_response(&self, response: &Response) {
        match serde_json::to_string(response) {
            Ok(body) => {
                let _ = self.enqueue(body);
            }
            Err(e) => tracing::error!("failed to serialize response: {}", e),
        }
    }

    /// Emits a `$/cancelRequest` notification for an outbound id. Always
    /// runs after the request frame itself was enqueued, so FIFO order
    /// puts the cancellation behind the request on the wire.
    pub(crate) fn send_cancel_notification(&self, id: u64) {
        let notification = Request::cancel(Value::from(id));
        match serde_json::to_string(&notification) {
            Ok(body) => {
                let _ = self.enqueue(body);
            }
            Err(e) => tracing::error!("failed to serialize cancel notification: {}", e),
        }
    }

    /// Routes an inbound response to its waiter. Unknown ids are dropped:
    /// the request may have been abandoned, or this is a duplicate
    /// response and the first delivery already consumed the slot.
    pub(crate) fn complete_response(&self, response: Response) {
        let slot = self.shared.lock().unwrap().correlator.take(&response.id);
        match slot {
            Some(slot) => {
                let _ = slot.send(response_outcome(response, &self.codec));
            }
            None => tracing::debug!("dropping response for unknown request id {}", response.id),
        }
    }

    pub(crate) fn register_inbound_cancel(&self, key: String, source: CancellationSource) {
        self.shared
            .lock()
            .unwrap()
            .inbound_cancels
            .insert(key, source);
    }

    pub(crate) fn remove_inbound_cancel(&self, key: &str) {
        self.shared.lock().unwrap().inbound_cancels.remove(key);
    }

    /// Triggers the cancellation source of an in-flight inbound request.
    /// Missing entries are silently ignored.
    pub(crate) fn trigger_inbound_cancel(&self, key: &str) {
        let source = self.shared.lock().unwrap().inbound_cancels.get(key).cloned();
        if let Some(source) = source {
            source.cancel();
        }
    }

    /// Moves the peer to `Disconnected`. Idempotent: only the first call
    /// records its reason, completes pending slots, and fires handlers.
    pub(crate) fn disconnect(&self, reason: &str) {
        let (handlers, slots, cancels) = {
            let mut shared = self.shared.lock().unwrap();
            if shared.state != PeerState::Active {
                return;
            }
            shared.state = PeerState::Disconnecting;
            shared.disconnect_reason = Some(reason.to_string());
            // Closing the channel lets the writer drain queued frames and
            // exit.
            shared.outbound = None;
            let slots = shared.correlator.drain();
            let cancels: Vec<CancellationSource> =
                shared.inbound_cancels.drain().map(|(_, s)| s).collect();
            let handlers: Vec<DisconnectHandler> =
                shared.handlers.drain(..).map(|(_, h)| h).collect();
            shared.state = PeerState::Disconnected;
            (handlers, slots, cancels)
        };

        tracing::debug!("peer disconnected: {}", reason);
        for source in cancels {
            source.cancel();
        }
        for slot in slots {
            let _ = slot.send(Err(DuorpcError::Disconnected(reason.to_string())));
        }
        for handler in handlers {
            handler(reason);
        }
    }
}

/// A bidirectional JSON-RPC 2.0 peer.
///
/// Cloning is cheap and clones share the connection; dropping the last
/// clone does not tear the connection down, [`RpcPeer::dispose`] does.
///
/// # Stream combinations
///
/// - both streams: full duplex (a client-only peer when no target is
///   attached; inbound requests are rejected)
/// - sending stream absent: inbound notifications only; receiving a
///   request is fatal (the peer cannot fulfill its duty to respond) and
///   local `invoke`/`notify` fail with invalid-operation
/// - receiving stream absent: outbound notifications only; `invoke`
///   fails with invalid-operation
/// - both absent: attach fails with invalid-argument
#[derive(Clone)]
pub struct RpcPeer {
    inner: Arc<PeerInner>,
}

impl RpcPeer {
    /// Attaches a new peer to the given streams and begins reading
    /// eagerly. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DuorpcError::InvalidArgument`] if both streams are
    /// absent.
    pub fn attach<W, R>(
        sending: Option<W>,
        receiving: Option<R>,
        target: Option<MethodRegistry>,
    ) -> Result<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        if sending.is_none() && receiving.is_none() {
            return Err(DuorpcError::InvalidArgument(
                "at least one of the sending and receiving streams must be supplied".to_string(),
            ));
        }

        let can_send = sending.is_some();
        let can_receive = receiving.is_some();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(PeerInner {
            shared: Mutex::new(Shared {
                state: PeerState::Active,
                disconnect_reason: None,
                outbound: can_send.then_some(outbound_tx),
                correlator: Correlator::new(),
                inbound_cancels: HashMap::new(),
                handlers: Vec::new(),
                next_handler_id: 1,
                encoding: Encoding::utf8(),
            }),
            codec: Arc::new(PayloadCodec::new()),
            registry: target,
            can_send,
            can_receive,
        });

        if let Some(stream) = sending {
            tokio::spawn(write_loop(Arc::downgrade(&inner), stream, outbound_rx));
        }
        if let Some(stream) = receiving {
            tokio::spawn(dispatcher::read_loop(inner.clone(), stream));
        }

        Ok(Self { inner })
    }

    /// Issues a request and awaits its response, deserializing the result
    /// through the converter chain.
    ///
    /// # Errors
    ///
    /// - [`DuorpcError::InvalidOperation`] without a sending and a
    ///   receiving stream
    /// - [`DuorpcError::RemoteMethodNotFound`] when the remote endpoint
    ///   has no binding candidate
    /// - [`DuorpcError::RemoteInvocation`] when the remote target failed
    ///   (or was canceled)
    /// - [`DuorpcError::Disconnected`] when the connection dies first
    pub async fn invoke<P, T>(&self, method: &str, params: Option<&P>) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.invoke_inner(method, params, None).await
    }

    /// Like [`RpcPeer::invoke`], with a cancellation token.
    ///
    /// A token canceled before any frame is written short-circuits with
    /// [`DuorpcError::Canceled`] and zero bytes sent. Canceling later
    /// emits a `$/cancelRequest` notification but leaves the call
    /// pending: whatever the remote side eventually answers (a value or
    /// a canceled error) completes it.
    pub async fn invoke_with_cancellation<P, T>(
        &self,
        method: &str,
        params: Option<&P>,
        token: &CancellationToken,
    ) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.invoke_inner(method, params, Some(token)).await
    }

    async fn invoke_inner<P, T>(
        &self,
        method: &str,
        params: Option<&P>,
        token: Option<&CancellationToken>,
    ) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        if !self.inner.can_send {
            return Err(DuorpcError::InvalidOperation(
                "this peer has no sending stream".to_string(),
            ));
        }
        if !self.inner.can_receive {
            return Err(DuorpcError::InvalidOperation(
                "this peer has no receiving stream, so a response could never arrive".to_string(),
            ));
        }
        let params = match params {
            Some(params) => Some(self.inner.codec.encode_params(params)?),
            None => None,
        };
        let value = self.invoke_raw(method, params, token).await?;
        self.inner.codec.decode(value)
    }

    async fn invoke_raw(
        &self,
        method: &str,
        params: Option<Value>,
        token: Option<&CancellationToken>,
    ) -> Result<Value> {
        if token.is_some_and(|t| t.is_canceled()) {
            return Err(DuorpcError::Canceled);
        }

        // Id allocation, slot installation, and frame enqueue happen
        // under one lock so wire order matches acceptance order.
        let (id, slot) = {
            let mut shared = self.inner.shared.lock().unwrap();
            if shared.state != PeerState::Active {
                return Err(DuorpcError::Disconnected(disconnect_description(&shared)));
            }
            let Some(outbound) = shared.outbound.clone() else {
                return Err(DuorpcError::Disconnected(disconnect_description(&shared)));
            };
            let (id, slot) = shared.correlator.register();
            let request = Request::new(method, params, Some(Value::from(id)));
            let body = match serde_json::to_string(&request) {
                Ok(body) => body,
                Err(e) => {
                    shared.correlator.forget(id);
                    return Err(e.into());
                }
            };
            if outbound.send(body).is_err() {
                shared.correlator.forget(id);
                return Err(DuorpcError::Disconnected(disconnect_description(&shared)));
            }
            (id, slot)
        };

        if let Some(token) = token {
            // The hook holds a weak handle: the correlator entry must not
            // keep the peer alive, and the peer must not keep every token
            // alive.
            let weak = Arc::downgrade(&self.inner);
            token.on_cancel(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.send_cancel_notification(id);
                }
            });
        }

        match slot.await {
            Ok(outcome) => outcome,
            Err(_) => Err(DuorpcError::Disconnected(
                "the connection closed before a response arrived".to_string(),
            )),
        }
    }

    /// Emits a notification. Completion means the frame was accepted by
    /// the single writer, in FIFO order with every other outbound frame.
    ///
    /// # Errors
    ///
    /// [`DuorpcError::InvalidOperation`] without a sending stream;
    /// [`DuorpcError::Disconnected`] once the peer is down.
    pub async fn notify<P>(&self, method: &str, params: Option<&P>) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        if !self.inner.can_send {
            return Err(DuorpcError::InvalidOperation(
                "this peer has no sending stream".to_string(),
            ));
        }
        let params = match params {
            Some(params) => Some(self.inner.codec.encode_params(params)?),
            None => None,
        };
        let notification = Request::notification(method, params);
        let body = serde_json::to_string(&notification)?;
        self.inner.enqueue(body)
    }

    /// Subscribes to the disconnected event. If the peer is already
    /// disconnected the handler runs synchronously, now. Returns a
    /// subscription id for [`RpcPeer::remove_disconnected`].
    pub fn on_disconnected(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> u64 {
        let handler: DisconnectHandler = Arc::new(handler);
        let (id, already_fired) = {
            let mut shared = self.inner.shared.lock().unwrap();
            let id = shared.next_handler_id;
            shared.next_handler_id += 1;
            if shared.state == PeerState::Disconnected {
                (id, Some(disconnect_description(&shared)))
            } else {
                shared.handlers.push((id, handler.clone()));
                (id, None)
            }
        };
        if let Some(reason) = already_fired {
            handler(&reason);
        }
        id
    }

    /// Unsubscribes a disconnect handler. Returns false if the id is
    /// unknown (or the event already fired and consumed the list).
    pub fn remove_disconnected(&self, id: u64) -> bool {
        let mut shared = self.inner.shared.lock().unwrap();
        let before = shared.handlers.len();
        shared.handlers.retain(|(handler_id, _)| *handler_id != id);
        shared.handlers.len() != before
    }

    /// The encoding used for outbound frames.
    pub fn encoding(&self) -> Encoding {
        self.inner.encoding()
    }

    /// Replaces the outbound encoding; effective from the next frame.
    ///
    /// # Errors
    ///
    /// Passing `None` is an invalid argument: a peer always has an
    /// encoding.
    pub fn set_encoding(&self, encoding: Option<Encoding>) -> Result<()> {
        match encoding {
            Some(encoding) => {
                self.inner.shared.lock().unwrap().encoding = encoding;
                Ok(())
            }
            None => Err(DuorpcError::InvalidArgument(
                "the peer encoding cannot be unset".to_string(),
            )),
        }
    }

    /// The shared converter registry of this peer.
    pub fn converters(&self) -> Arc<PayloadCodec> {
        self.inner.codec.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.shared.lock().unwrap().state == PeerState::Disconnected
    }

    /// Tears the peer down. Idempotent; pending calls complete with a
    /// disconnection failure and the disconnected event fires once.
    pub fn dispose(&self) {
        self.inner.disconnect("the peer was disposed locally");
    }
}

/// The single writer: drains the FIFO frame channel onto the sending
/// stream. Holds only a weak peer handle so an abandoned peer can drop.
async fn write_loop<W>(
    inner: Weak<PeerInner>,
    mut stream: W,
    mut frames: mpsc::UnboundedReceiver<String>,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    while let Some(body) = frames.recv().await {
        let encoding = inner
            .upgrade()
            .map(|peer| peer.encoding())
            .unwrap_or_default();
        if let Err(e) = write_frame(&mut stream, &body, &encoding).await {
            if let Some(peer) = inner.upgrade() {
                peer.disconnect(&format!("failed to write frame: {e}"));
            }
            break;
        }
    }
    let _ = stream.shutdown().await;
}
