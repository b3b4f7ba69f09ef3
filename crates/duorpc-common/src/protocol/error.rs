use thiserror::Error;

/// Library-level failure taxonomy for DuoRPC.
///
/// Three domains share this enum:
///
/// - **Local misuse** (`InvalidArgument`, `InvalidOperation`,
///   `TargetNotSet`): returned synchronously at the call site, never
///   crosses the wire.
/// - **Remote failures** (`RemoteMethodNotFound`, `RemoteInvocation`,
///   `Canceled`): reconstituted from a JSON-RPC error response on the
///   caller side of an outbound invoke.
/// - **Connection failures** (`Disconnected`, `Framing`, `Protocol`,
///   `Json`, `Io`): fatal to the connection; pending calls observe
///   `Disconnected` with a description of the cause.
#[derive(Error, Debug)]
pub enum DuorpcError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("No target is attached to this peer")]
    TargetNotSet,

    #[error("Remote method not found: {0}")]
    RemoteMethodNotFound(String),

    #[error("Remote invocation failed: {message}")]
    RemoteInvocation {
        /// Error message reported by the remote endpoint
        message: String,
        /// Stringified platform error code from `error.data.code`, if any
        remote_code: Option<String>,
        /// Remote stack trace from `error.data.stack`, if any
        remote_stack: Option<String>,
    },

    #[error("Request canceled")]
    Canceled,

    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DuorpcError>;
