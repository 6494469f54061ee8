//! Server error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Result type for server operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors that can occur while serving WebSocket clients.
#[derive(Debug, Error)]
pub enum WsError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {address}: {source}")]
    Bind {
        /// The address that failed to bind.
        address: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The listen address in the configuration did not parse.
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    /// The HTTP upgrade request was not a usable WebSocket handshake.
    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    /// A frame declared more payload than the buffer actually holds.
    #[error("frame too short: need {needed} bytes, have {available}")]
    FrameTooShort {
        /// Bytes the header and declared payload require.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// An inbound frame did not set the mask bit.
    #[error("inbound frame is not masked")]
    UnmaskedFrame,

    /// A declared payload length does not fit in addressable memory.
    #[error("declared payload length {0} exceeds addressable range")]
    PayloadTooLarge(u64),

    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ConfigRead {
        /// Path that failed to load.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO error on a connection.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
