//! Error types for the toolwire protocol core.

use crate::protocol::{JsonRpcError, MessageError};

/// Result type for connection-level operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors surfaced by the framing layer.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// Reading or writing the pipe failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] MessageError),

    /// The peer kept sending garbage.
    #[error("Giving up after {0} consecutive malformed records")]
    TooManyMalformed(u32),
}

/// Errors that can occur while talking to a peer.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Transport-level failure.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// The peer answered with an error response.
    #[error("Remote error {code}: {message}")]
    Rpc {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No response arrived before the deadline.
    #[error("Request {method} timed out")]
    Timeout { method: String },

    /// Stream closed or process gone; terminal for the connection.
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    /// Tried to use tools before the handshake completed.
    #[error("Connection is not initialized")]
    NotInitialized,

    /// The tool ran but reported a failure in its result.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Handshake ran out of order.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Payload did not have the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Spawning or reaping the server process failed.
    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl McpError {
    /// Whether the connection is gone for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PeerUnavailable(_) | Self::Framing(_))
    }

    /// JSON-RPC error code carried by a remote error, if any.
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}
