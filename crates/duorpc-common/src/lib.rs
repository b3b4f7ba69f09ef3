//! DuoRPC Common Types and Framing
//!
//! This crate provides the wire-level layer shared by every DuoRPC peer:
//! the JSON-RPC 2.0 envelope types and the `Content-Length` frame codec.
//!
//! # Overview
//!
//! DuoRPC is a bidirectional JSON-RPC 2.0 peer library. A single peer is
//! attached to a pair of byte streams and simultaneously serves inbound
//! requests and issues outbound ones. This crate contains everything that
//! touches the wire:
//!
//! - **Protocol Layer**: envelope types (request, notification, response,
//!   error object), standard error codes, and the library error type
//! - **Framing Layer**: `Content-Length`-delimited frames over async byte
//!   streams, with header parsing and encoding negotiation
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of UTF-8 JSON>
//! ```
//!
//! # Components
//!
//! - [`protocol`] - Envelope types, error codes, and [`DuorpcError`]
//! - [`framing`] - Frame reader/writer and the [`Encoding`] wrapper
//!
//! # Example
//!
//! ```
//! use duorpc_common::protocol::{Request, Message};
//! use serde_json::json;
//!
//! let request = Request::new("echo", Some(json!(["hi"])), Some(json!(1)));
//! let body = serde_json::to_string(&request).unwrap();
//! let parsed = Message::parse(&body).unwrap();
//! assert!(matches!(parsed, Message::Request(_)));
//! ```

pub mod framing;
pub mod protocol;

pub use framing::{Encoding, MAX_FRAME_SIZE};
pub use protocol::{DuorpcError, ErrorData, ErrorObject, Message, Request, Response, Result};
