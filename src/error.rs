//! Error types for wirerpc.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all wirerpc operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (option envelope and JSON codec).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized message, truncated stream, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer sent an option envelope with the wrong magic number.
    #[error("rpc server: invalid magic number {0:#x}")]
    InvalidMagicNumber(u32),

    /// The codec tag does not name a known codec.
    #[error("invalid codec type {0}")]
    UnknownCodec(String),

    /// Connection closed by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The client is closing or has shut down.
    #[error("connection is shut down")]
    Shutdown,

    /// Dial plus handshake did not finish within the connect timeout.
    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    /// A call did not complete within the caller's deadline.
    #[error("rpc client: call timeout: expect within {0:?}")]
    CallTimeout(Duration),

    /// Error string carried back in a response header.
    #[error("{0}")]
    Remote(String),

    /// The receive loop terminated; carries the triggering error.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// `service_method` has no `.` separator.
    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormedMethod(String),

    /// No service registered under this name.
    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    /// The service exists but has no such method.
    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    /// A service with this name is already registered.
    #[error("rpc: service already defined: {0}")]
    DuplicateService(String),

    /// A service or method name is not a valid exported identifier.
    #[error("rpc: {0} is not a valid name")]
    InvalidName(String),

    /// Two methods with the same name on one service.
    #[error("rpc: method {0} registered twice")]
    DuplicateMethod(String),

    /// A service was built without any method.
    #[error("rpc: type {0} has no exported methods of suitable type")]
    NoMethods(String),

    /// A method invocation outlived the negotiated handle timeout.
    #[error("rpc server: request handle timeout: expect within {0:?}")]
    HandleTimeout(Duration),

    /// A method invocation panicked.
    #[error("rpc server: method {0} panicked")]
    MethodPanicked(String),

    /// Error returned by a service method.
    #[error("{0}")]
    Application(String),
}

impl RpcError {
    /// Whether this is a read that ran out of bytes mid-message.
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, RpcError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
