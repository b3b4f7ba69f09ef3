//! JSON-RPC 2.0 Envelope Types
//!
//! Every DuoRPC message is a JSON object with `jsonrpc: "2.0"` and exactly
//! one of the role shapes:
//!
//! - Request: `{"jsonrpc": "2.0", "id": ..., "method": "...", "params": ...}`
//! - Notification: as a request but without `id`; never answered
//! - Success response: `{"jsonrpc": "2.0", "id": ..., "result": ...}`
//! - Error response: `{"jsonrpc": "2.0", "id": ..., "error": {...}}`
//!
//! # Invariants
//!
//! - A response carries exactly one of `result`/`error`.
//! - A response `id` is carried bit-for-bit as received (ids stay
//!   [`Value`]s; numeric ids are never re-typed to strings).
//! - Unknown top-level fields are ignored; unknown fields inside `error`
//!   are preserved opaquely.
//! - `"params": null` and an absent `params` are distinct states and both
//!   survive a decode/encode round trip.
//!
//! # Error Codes
//!
//! Standard JSON-RPC 2.0 codes plus the request-canceled code used by the
//! `Content-Length`-framed protocol family:
//! - `-32700`: Parse error
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//! - `-32800`: Request canceled

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::error::{DuorpcError, Result};

/// The only protocol version this library speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of the cancellation notification.
pub const CANCEL_REQUEST_METHOD: &str = "$/cancelRequest";

// Standard JSON-RPC 2.0 error codes
/// Invalid JSON was received
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid Request object
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist / is not available
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameter(s)
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error
pub const INTERNAL_ERROR: i64 = -32603;
/// The request was canceled before the target produced a result
pub const REQUEST_CANCELED: i64 = -32800;

/// Deserializes a field so that an explicit `null` becomes
/// `Some(Value::Null)` while an absent field stays `None` (via
/// `#[serde(default)]`). Plain `Option<Value>` collapses the two.
fn nullable_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,
    /// Name of the method to invoke
    pub method: String,
    /// Parameter values: an array, an object, or `null`
    #[serde(default, deserialize_with = "nullable_value")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request identifier; absent for notifications
    #[serde(default, deserialize_with = "nullable_value")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,
    /// Result value on success; `Some(Value::Null)` is a valid result
    #[serde(default, deserialize_with = "nullable_value")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Identifier of the request being answered, carried verbatim
    pub id: Value,
}

/// The `error` member of an error response.
///
/// Fields beyond `code`/`message`/`data` are preserved opaquely in
/// `extra` so a received error survives inspection unmodified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code (standard codes are negative integers)
    pub code: i64,
    /// Short description of the error
    pub message: String,
    /// Additional data (optional); DuoRPC peers emit [`ErrorData`] here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `{stack, code}` payload DuoRPC peers place in `error.data`.
///
/// `code` is the stringified platform error code of the remote failure;
/// both fields are `null` for canceled requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorData {
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Parameters of a `$/cancelRequest` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelParams {
    /// Identifier of the request being canceled
    pub id: Value,
}

/// A decoded inbound message: either a request/notification or a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Request {
    /// Creates a new request (or notification, when `id` is `None`).
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Creates a notification (a request without an `id`).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::new(method, params, None)
    }

    /// Creates a `$/cancelRequest` notification naming `id`.
    pub fn cancel(id: Value) -> Self {
        let params = serde_json::json!({ "id": id });
        Self::notification(CANCEL_REQUEST_METHOD, Some(params))
    }

    /// Returns true if this request is a notification (no `id`).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl Response {
    /// Creates a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Creates an error response.
    pub fn error(id: Value, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

impl ErrorObject {
    /// Creates an error object with the given code and message.
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
            extra: Map::new(),
        }
    }

    /// Creates a method-not-found error (-32601).
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(METHOD_NOT_FOUND, message, None)
    }

    /// Creates a request-canceled error (-32800) with null `data` fields.
    pub fn canceled() -> Self {
        let data = serde_json::to_value(ErrorData::default()).unwrap_or(Value::Null);
        Self::new(REQUEST_CANCELED, "Request canceled", Some(data))
    }
}

impl Message {
    /// Parses a frame body into a validated envelope.
    ///
    /// # Errors
    ///
    /// Returns [`DuorpcError::Json`] if the body is not valid JSON and
    /// [`DuorpcError::Protocol`] if the decoded object violates the
    /// envelope invariants. Both are fatal to the connection.
    pub fn parse(body: &str) -> Result<Message> {
        let message: Message = serde_json::from_str(body)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Message::Request(request) => {
                if request.jsonrpc != JSONRPC_VERSION {
                    return Err(DuorpcError::Protocol(format!(
                        "unsupported jsonrpc version: {:?}",
                        request.jsonrpc
                    )));
                }
                if let Some(id) = &request.id {
                    if !(id.is_number() || id.is_string()) {
                        return Err(DuorpcError::Protocol(
                            "request id must be a non-null number or string".to_string(),
                        ));
                    }
                }
                if let Some(params) = &request.params {
                    if !(params.is_array() || params.is_object() || params.is_null()) {
                        return Err(DuorpcError::Protocol(
                            "params must be an array, an object, or null".to_string(),
                        ));
                    }
                }
            }
            Message::Response(response) => {
                if response.jsonrpc != JSONRPC_VERSION {
                    return Err(DuorpcError::Protocol(format!(
                        "unsupported jsonrpc version: {:?}",
                        response.jsonrpc
                    )));
                }
                if response.result.is_some() == response.error.is_some() {
                    return Err(DuorpcError::Protocol(
                        "a response must carry exactly one of result/error".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
