//! DuoRPC Peer
//!
//! This crate provides [`RpcPeer`], a bidirectional JSON-RPC 2.0 peer
//! bound to a pair of byte streams. One peer simultaneously:
//!
//! - dispatches inbound requests and notifications to a registered
//!   [`MethodRegistry`] via name-based resolution, and
//! - issues outbound requests and notifications, correlating responses
//!   by identifier.
//!
//! # Overview
//!
//! The hard part of the peer is not the JSON grammar but the concurrent
//! duplex state machine: framing messages over a raw stream, multiplexing
//! many in-flight outbound calls, matching responses to their waiters,
//! propagating cancellation in both directions, resolving overloaded and
//! cancellation-aware methods from a table, and tearing everything down
//! cleanly when a stream fails.
//!
//! # Key Features
//!
//! - **Bidirectional**: one object is both client and server on the same
//!   stream pair; either side may be absent for half-duplex peers
//! - **Overload resolution**: multiple methods may share a name; binding
//!   picks the first candidate whose arguments deserialize
//! - **Async-suffix aliasing**: `FooAsync` is also reachable as `Foo`,
//!   with the exact name winning when both exist
//! - **Cancellation**: outbound cancellation emits `$/cancelRequest`
//!   frames; inbound ones trigger the token injected into the handler
//! - **Converter registry**: payload values run through an installable
//!   converter chain that can never touch the envelope
//!
//! # Usage
//!
//! ```no_run
//! use duorpc_peer::{MethodEntry, MethodRegistry, ParamSpec, RpcPeer};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> duorpc_common::Result<()> {
//!     let mut registry = MethodRegistry::new();
//!     registry.register(MethodEntry::new(
//!         "Greet",
//!         vec![ParamSpec::required::<String>("name")],
//!         |inv| async move {
//!             let name: String = inv.arg(0)?;
//!             Ok(json!(format!("hello, {name}")))
//!         },
//!     ));
//!
//!     let stream = tokio::io::duplex(4096).0;
//!     let (read_half, write_half) = tokio::io::split(stream);
//!     let peer = RpcPeer::attach(Some(write_half), Some(read_half), Some(registry))?;
//!
//!     let greeting: String = peer.invoke("Greet", Some(&json!(["world"]))).await?;
//!     println!("{greeting}");
//!     Ok(())
//! }
//! ```

pub mod binder;
pub mod cancellation;
pub mod convert;
pub mod correlator;
mod dispatcher;
pub mod peer;
pub mod registry;

pub use cancellation::{CancellationSource, CancellationToken};
pub use convert::{PayloadCodec, ValueConverter};
pub use peer::RpcPeer;
pub use registry::{Invocation, MethodEntry, MethodError, MethodRegistry, ParamSpec};

// Re-export the shared wire-level surface so consumers only need one crate.
pub use duorpc_common::{DuorpcError, Encoding, Result};
