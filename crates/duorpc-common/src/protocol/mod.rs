//! DuoRPC Protocol Definitions
//!
//! This module defines the JSON-RPC 2.0 envelope types and the library
//! error type used throughout the system.
//!
//! # Protocol Types
//!
//! - **[`Request`]**: requests and notifications (a notification is a
//!   request without an `id`)
//! - **[`Response`]**: success or error responses, correlated by `id`
//! - **[`ErrorObject`]** / **[`ErrorData`]**: the error member of an error
//!   response and the `{stack, code}` payload it may carry
//! - **[`Message`]**: the untagged union decoded from an inbound frame
//!
//! # Error Handling
//!
//! [`DuorpcError`] is a closed taxonomy split into three domains: local
//! misuse (invalid argument/operation, missing target), remote resolution
//! (`RemoteMethodNotFound`), and remote execution (`RemoteInvocation` with
//! the remote code and stack). Framing and envelope-shape failures only
//! ever surface as disconnect causes.

pub mod envelope;
pub mod error;

pub use envelope::{
    CancelParams, ErrorData, ErrorObject, Message, Request, Response, CANCEL_REQUEST_METHOD,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND,
    PARSE_ERROR, REQUEST_CANCELED,
};
pub use error::{DuorpcError, Result};
