//! Server configuration.

use crate::error::{WsError, WsResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub address: String,

    /// Listen port.
    pub port: u16,

    /// Maximum size of the HTTP upgrade request, in bytes.
    pub max_handshake_size: usize,

    /// Read buffer size for inbound frames, in bytes.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            max_handshake_size: 64 * 1024,
            read_buffer_size: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Get the socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured address/port do not form a valid
    /// socket address.
    pub fn socket_addr(&self) -> WsResult<SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .map_err(|_| WsError::InvalidAddress(format!("{}:{}", self.address, self.port)))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> WsResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| WsError::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(toml::from_str(&contents)?)
    }
}
