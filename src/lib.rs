//! # Rover Link
//!
//! A minimal, hand-rolled WebSocket server for robot telemetry and control.
//!
//! Rover Link terminates raw TCP connections, performs the RFC 6455 HTTP
//! upgrade handshake itself, and parses/builds binary WebSocket frames byte
//! by byte rather than delegating to a protocol library. Operator commands
//! arriving as text frames are forwarded verbatim to an injected
//! [`sink::CommandSink`] (typically a radio or BLE transport); telemetry and
//! video producers push outbound data through [`server::ServerHandle`]
//! broadcasts, which fan out to every handshake-complete client.
//!
//! ## Protocol subset
//!
//! - Inbound frames must be masked; only the text opcode is actioned.
//! - Outbound frames are unmasked; text (`0x1`) and binary (`0x2`) supported.
//! - No extensions, compression, ping/pong keep-alive, fragmentation
//!   reassembly, or TLS.
//!
//! ## Architecture
//!
//! All registry mutations and lifecycle transitions are serialized onto a
//! single actor task; per-connection I/O runs in spawned tasks that report
//! back through a channel. See [`server`] for details.

pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod registry;
pub mod server;
pub mod sink;

pub use config::ServerConfig;
pub use error::{WsError, WsResult};
pub use events::{ServerEvent, ServerState, ServerStatus};
pub use frame::{Decoded, OpCode};
pub use registry::ConnectionId;
pub use server::{ServerHandle, ServerStats, WsServer};
pub use sink::CommandSink;
