//! Error types for client operations.

use thiserror::Error;

use strix_jsonrpc::{ErrorBody, RpcError};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// A correlated JSON-RPC error response.
    #[error("rpc error (code {}): {}", .0.code, .0.message)]
    Rpc(ErrorBody),

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A non-2xx HTTP response captured verbatim so a proxying server can
    /// forward exactly what it received.
    #[error("upstream response {status}")]
    Upstream {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },

    /// Wire-level protocol failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] RpcError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("url scheme not supported: {0}")]
    UrlNotSupported(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("{0} callback may be set only once")]
    CallbackAlreadySet(&'static str),
}

/// Failures at the connection layer. `ConnectFailed` and `Closed` are kept
/// apart so callers can decide whether a retrying connect makes sense.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("transport connect failed: {0}")]
    ConnectFailed(String),

    #[error("transport closed")]
    Closed,

    #[error("transport io error: {0}")]
    Io(String),
}

impl ClientError {
    /// Whether a reconnect attempt is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(TransportError::ConnectFailed(_))
                | ClientError::Transport(TransportError::Closed)
        )
    }

    /// The JSON-RPC error code, when one is attached.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            ClientError::Rpc(body) => Some(body.code),
            ClientError::Protocol(err) => Some(err.code()),
            _ => None,
        }
    }
}
