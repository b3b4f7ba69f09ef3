//! Request/response correlation for outbound calls.
//!
//! The correlator owns the map from outbound request id to the oneshot
//! slot its caller awaits. Ids are monotonically increasing integers
//! scoped to one peer. A slot leaves the map exactly once: when the
//! matching response arrives, when the call is abandoned before its frame
//! is written, or when the peer disconnects and every pending slot is
//! completed with the disconnect failure. Responses for unknown ids are
//! dropped, which also makes duplicate responses a no-op.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use duorpc_common::protocol::{ErrorData, Response, METHOD_NOT_FOUND};
use duorpc_common::{DuorpcError, Result};

use crate::convert::PayloadCodec;

pub(crate) type ResponseSlot = oneshot::Sender<Result<Value>>;

/// The pending-call table of one peer. Guarded by the peer-level mutex;
/// nothing here performs IO.
pub(crate) struct Correlator {
    next_id: u64,
    pending: HashMap<u64, ResponseSlot>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocates the next request id and installs its completion slot.
    pub(crate) fn register(&mut self) -> (u64, oneshot::Receiver<Result<Value>>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        (id, rx)
    }

    /// Removes a slot installed by [`register`] before its frame was
    /// written (serialization or enqueue failure).
    pub(crate) fn forget(&mut self, id: u64) {
        self.pending.remove(&id);
    }

    /// Takes the slot for a response id. Non-numeric and unknown ids
    /// yield `None`; the caller drops such responses.
    pub(crate) fn take(&mut self, id: &Value) -> Option<ResponseSlot> {
        self.pending.remove(&id.as_u64()?)
    }

    /// Empties the table, returning every pending slot so the caller can
    /// complete them with a disconnect failure outside the lock.
    pub(crate) fn drain(&mut self) -> Vec<ResponseSlot> {
        self.pending.drain().map(|(_, slot)| slot).collect()
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Maps a received response to the outcome its waiter observes.
///
/// Error responses with code `-32601` become [`DuorpcError::RemoteMethodNotFound`];
/// every other error response becomes [`DuorpcError::RemoteInvocation`]
/// with `remote_code`/`remote_stack` lifted from `error.data` (converters
/// apply to the data payload before extraction).
pub(crate) fn response_outcome(response: Response, codec: &PayloadCodec) -> Result<Value> {
    match response.error {
        Some(error) => {
            if error.code == METHOD_NOT_FOUND {
                return Err(DuorpcError::RemoteMethodNotFound(error.message));
            }
            let data = error
                .data
                .map(|data| codec.apply_from_wire(data))
                .and_then(|data| serde_json::from_value::<ErrorData>(data).ok())
                .unwrap_or_default();
            Err(DuorpcError::RemoteInvocation {
                message: error.message,
                remote_code: data.code,
                remote_stack: data.stack,
            })
        }
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duorpc_common::protocol::ErrorObject;
    use serde_json::json;

    #[test]
    fn test_ids_are_monotone() {
        let mut correlator = Correlator::new();
        let (first, _rx1) = correlator.register();
        let (second, _rx2) = correlator.register();
        assert!(second > first);
        assert_eq!(correlator.pending_count(), 2);
    }

    #[test]
    fn test_take_is_at_most_once() {
        let mut correlator = Correlator::new();
        let (id, _rx) = correlator.register();

        assert!(correlator.take(&json!(id)).is_some());
        assert!(correlator.take(&json!(id)).is_none());
    }

    #[test]
    fn test_unknown_and_non_numeric_ids_are_dropped() {
        let mut correlator = Correlator::new();
        assert!(correlator.take(&json!(99)).is_none());
        assert!(correlator.take(&json!("99")).is_none());
        assert!(correlator.take(&Value::Null).is_none());
    }

    #[test]
    fn test_drain_empties_the_table() {
        let mut correlator = Correlator::new();
        let (_, _rx1) = correlator.register();
        let (_, _rx2) = correlator.register();

        let slots = correlator.drain();
        assert_eq!(slots.len(), 2);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_success_outcome() {
        let codec = PayloadCodec::new();
        let response = Response::success(json!(1), json!("ok"));
        assert_eq!(response_outcome(response, &codec).unwrap(), json!("ok"));

        // A null result is a success, not an absent one.
        let response = Response::success(json!(1), Value::Null);
        assert_eq!(response_outcome(response, &codec).unwrap(), Value::Null);
    }

    #[test]
    fn test_method_not_found_outcome() {
        let codec = PayloadCodec::new();
        let response = Response::error(json!(1), ErrorObject::method_not_found("no such method"));
        match response_outcome(response, &codec) {
            Err(DuorpcError::RemoteMethodNotFound(message)) => {
                assert_eq!(message, "no such method");
            }
            other => panic!("expected RemoteMethodNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_invocation_failure_carries_remote_details() {
        let codec = PayloadCodec::new();
        let error = ErrorObject::new(
            -32603,
            "boom",
            Some(json!({"stack": "at work()", "code": "13"})),
        );
        let response = Response::error(json!(1), error);
        match response_outcome(response, &codec) {
            Err(DuorpcError::RemoteInvocation {
                message,
                remote_code,
                remote_stack,
            }) => {
                assert_eq!(message, "boom");
                assert_eq!(remote_code.as_deref(), Some("13"));
                assert_eq!(remote_stack.as_deref(), Some("at work()"));
            }
            other => panic!("expected RemoteInvocation, got {other:?}"),
        }
    }

    #[test]
    fn test_canceled_response_has_null_remote_code() {
        let codec = PayloadCodec::new();
        let response = Response::error(json!(1), ErrorObject::canceled());
        match response_outcome(response, &codec) {
            Err(DuorpcError::RemoteInvocation { remote_code, remote_stack, .. }) => {
                assert_eq!(remote_code, None);
                assert_eq!(remote_stack, None);
            }
            other => panic!("expected RemoteInvocation, got {other:?}"),
        }
    }
}
