// Connection lifecycle: initialize / initialized handshake

use crate::protocol::{Implementation, JsonRpcError};
use std::fmt;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing exchanged yet
    Uninitialized,
    /// `initialize` answered, waiting for `notifications/initialized`
    Initializing,
    /// Tools may be listed and called
    Ready,
    /// Stream ended; terminal
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("connection already initialized")]
    AlreadyInitialized,

    #[error("connection not initialized (state: {0})")]
    NotReady(ConnectionState),

    #[error("connection closed")]
    Closed,
}

impl From<HandshakeError> for JsonRpcError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::AlreadyInitialized => JsonRpcError::invalid_request("Already initialized"),
            HandshakeError::NotReady(_) | HandshakeError::Closed => JsonRpcError::not_initialized(),
        }
    }
}

/// Handshake state machine for one connection.
///
/// Only handshake events move the state; both peers keep their own copy.
#[derive(Debug)]
pub struct Handshake {
    state: ConnectionState,
    protocol_version: Option<String>,
    peer: Option<Implementation>,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Uninitialized,
            protocol_version: None,
            peer: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Negotiated protocol revision, once `initialize` went through
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Identity the other side announced
    pub fn peer(&self) -> Option<&Implementation> {
        self.peer.as_ref()
    }

    /// `initialize` exchanged: Uninitialized -> Initializing
    pub fn begin(&mut self, protocol_version: &str, peer: Implementation) -> Result<(), HandshakeError> {
        match self.state {
            ConnectionState::Uninitialized => {
                self.state = ConnectionState::Initializing;
                self.protocol_version = Some(protocol_version.to_string());
                self.peer = Some(peer);
                Ok(())
            }
            ConnectionState::Closed => Err(HandshakeError::Closed),
            ConnectionState::Initializing | ConnectionState::Ready => Err(HandshakeError::AlreadyInitialized),
        }
    }

    /// `notifications/initialized` seen: Initializing -> Ready
    pub fn complete(&mut self) -> Result<(), HandshakeError> {
        match self.state {
            ConnectionState::Initializing => {
                self.state = ConnectionState::Ready;
                Ok(())
            }
            ConnectionState::Closed => Err(HandshakeError::Closed),
            ConnectionState::Ready => Err(HandshakeError::AlreadyInitialized),
            ConnectionState::Uninitialized => Err(HandshakeError::NotReady(self.state)),
        }
    }

    /// Gate for tool discovery and tool calls
    pub fn ensure_ready(&self) -> Result<(), HandshakeError> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closed => Err(HandshakeError::Closed),
            state => Err(HandshakeError::NotReady(state)),
        }
    }

    /// Stream or process gone; from any state
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            tracing::debug!(from = %self.state, "Connection closed");
        }
        self.state = ConnectionState::Closed;
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}
