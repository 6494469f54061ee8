//! Server events and observable status.

use crate::registry::ConnectionId;
use std::net::SocketAddr;

/// Event emitted by the server.
///
/// Replaces platform callback shapes with a typed event stream: embedders
/// receive these over a channel and react however they like (UI updates,
/// logging, metrics).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The listener is bound and accepting connections.
    Started {
        /// The bound address.
        addr: SocketAddr,
    },

    /// A connection was accepted (handshake not yet attempted).
    ClientConnected {
        /// Assigned connection id.
        id: ConnectionId,
        /// Peer address.
        peer: SocketAddr,
    },

    /// A connection completed the upgrade handshake.
    HandshakeComplete {
        /// The promoted connection.
        id: ConnectionId,
    },

    /// A text message was decoded and forwarded to the sink.
    TextReceived {
        /// Source connection.
        id: ConnectionId,
        /// The decoded message.
        text: String,
    },

    /// A connection was removed (failure, protocol error, or close).
    ClientDisconnected {
        /// The removed connection.
        id: ConnectionId,
    },

    /// The server stopped accepting connections.
    Stopped,
}

/// Running state of the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServerState {
    /// Not started, or stopped.
    #[default]
    Stopped,
    /// Listening for connections.
    Running {
        /// The bound address.
        addr: SocketAddr,
    },
    /// Startup failed; the server instance is dead but the host process is
    /// unaffected.
    Failed {
        /// The bind error, rendered for display.
        message: String,
    },
}

impl ServerState {
    /// Whether the server is accepting connections.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Observable server status, published through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerStatus {
    /// Running state and last startup error.
    pub state: ServerState,

    /// Live connections, pending handshakes included.
    pub connected_clients: usize,

    /// Most recently decoded inbound text message.
    pub last_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_running() {
        assert!(!ServerState::Stopped.is_running());
        assert!(!ServerState::Failed {
            message: "bind: address in use".to_string()
        }
        .is_running());
        assert!(ServerState::Running {
            addr: "127.0.0.1:8080".parse().unwrap()
        }
        .is_running());
    }

    #[test]
    fn test_status_default() {
        let status = ServerStatus::default();
        assert_eq!(status.state, ServerState::Stopped);
        assert_eq!(status.connected_clients, 0);
        assert!(status.last_message.is_none());
    }
}
