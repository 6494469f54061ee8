//! WebSocket server actor.
//!
//! One spawned actor task owns the listener, the connection registry, and
//! the observable status: every accept, handshake promotion, registry
//! mutation, and broadcast fan-out is handled on that single task, so the
//! registry needs no locks and handshake flags cannot race. Per-connection
//! I/O (handshake read, receive loop, frame writer) runs in spawned tasks
//! that talk to the actor exclusively through its op channel; external
//! producers (telemetry broadcasts, stop requests) are redispatched through
//! the same channel via [`ServerHandle`].
//!
//! Only one read is outstanding per connection, so frames decode strictly in
//! arrival order for that connection. A completion arriving for a connection
//! already removed from the registry is discarded.

use crate::config::ServerConfig;
use crate::error::WsError;
use crate::events::{ServerEvent, ServerState, ServerStatus};
use crate::frame::{self, Decoded};
use crate::handshake;
use crate::registry::{ConnectionId, FrameSender, Registry};
use crate::sink::CommandSink;

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Statistics for server operations.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections_total: AtomicU64,
    handshakes_completed: AtomicU64,
    messages_received: AtomicU64,
    frames_skipped: AtomicU64,
    broadcasts_sent: AtomicU64,
    send_failures: AtomicU64,
}

impl ServerStats {
    /// Total connections accepted.
    pub fn connections_total(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Handshakes completed.
    pub fn handshakes_completed(&self) -> u64 {
        self.handshakes_completed.load(Ordering::Relaxed)
    }

    /// Text messages decoded and forwarded to the sink.
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Inbound frames decoded but not actioned (non-text opcode or
    /// invalid UTF-8 payload).
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    /// Broadcasts dispatched.
    pub fn broadcasts_sent(&self) -> u64 {
        self.broadcasts_sent.load(Ordering::Relaxed)
    }

    /// Per-connection send failures during broadcast.
    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    fn handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    fn frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn broadcast_sent(&self) {
        self.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Operations delivered onto the actor task.
#[derive(Debug)]
enum Op {
    /// A connection finished its handshake; install its frame sender.
    Promoted {
        id: ConnectionId,
        frames: FrameSender,
    },
    /// A text message was decoded on a connection.
    Inbound { id: ConnectionId, text: String },
    /// A connection closed, failed, or violated the protocol.
    Closed { id: ConnectionId },
    /// Broadcast a text message to every complete connection.
    BroadcastText(String),
    /// Broadcast a binary payload to every complete connection.
    BroadcastBinary(Vec<u8>),
    /// Stop the server.
    Shutdown,
}

/// Hand-rolled WebSocket server.
///
/// Construct with a configuration and a downstream [`CommandSink`], then
/// call [`WsServer::start`] from within a tokio runtime.
pub struct WsServer {
    config: ServerConfig,
    sink: Arc<dyn CommandSink>,
}

impl WsServer {
    /// Create a server with the given configuration and downstream sink.
    pub fn new(config: ServerConfig, sink: Arc<dyn CommandSink>) -> Self {
        Self { config, sink }
    }

    /// Start the server actor.
    ///
    /// Infallible by design: a bind failure is reported as
    /// [`ServerState::Failed`] in the observable status followed by a
    /// [`ServerEvent::Stopped`], never as a synchronous error. Must be
    /// called from within a tokio runtime.
    pub fn start(self) -> (ServerHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ServerStatus::default());
        let stats = Arc::new(ServerStats::default());

        let actor = Actor {
            config: self.config,
            sink: self.sink,
            registry: Registry::new(),
            ops_tx: ops_tx.clone(),
            status_tx,
            events: events_tx,
            stats: Arc::clone(&stats),
            state: ServerState::Stopped,
            last_message: None,
        };
        tokio::spawn(actor.run(ops_rx));

        (
            ServerHandle {
                ops: ops_tx,
                status: status_rx,
                stats,
            },
            events_rx,
        )
    }
}

/// Handle for interacting with a running server.
///
/// Cheap to clone; all operations are redispatched onto the actor task and
/// are safe to call from any task or thread.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    ops: mpsc::UnboundedSender<Op>,
    status: watch::Receiver<ServerStatus>,
    stats: Arc<ServerStats>,
}

impl ServerHandle {
    /// Broadcast a text message to every handshake-complete client.
    pub fn broadcast_text(&self, text: impl Into<String>) {
        let _ = self.ops.send(Op::BroadcastText(text.into()));
    }

    /// Broadcast a binary payload to every handshake-complete client.
    pub fn broadcast_binary(&self, payload: Vec<u8>) {
        let _ = self.ops.send(Op::BroadcastBinary(payload));
    }

    /// Stop the server, dropping the listener and every connection.
    pub fn stop(&self) {
        let _ = self.ops.send(Op::Shutdown);
    }

    /// Snapshot of the current server status.
    pub fn status(&self) -> ServerStatus {
        self.status.borrow().clone()
    }

    /// Watch receiver for status changes.
    pub fn status_changes(&self) -> watch::Receiver<ServerStatus> {
        self.status.clone()
    }

    /// Whether the server is accepting connections.
    pub fn is_running(&self) -> bool {
        self.status.borrow().state.is_running()
    }

    /// Server statistics.
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }
}

/// The actor owning all server state.
struct Actor {
    config: ServerConfig,
    sink: Arc<dyn CommandSink>,
    registry: Registry,
    /// Cloned into every connection task.
    ops_tx: mpsc::UnboundedSender<Op>,
    status_tx: watch::Sender<ServerStatus>,
    events: mpsc::UnboundedSender<ServerEvent>,
    stats: Arc<ServerStats>,
    state: ServerState,
    last_message: Option<String>,
}

impl Actor {
    async fn run(mut self, mut ops_rx: mpsc::UnboundedReceiver<Op>) {
        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "failed to start server");
                self.state = ServerState::Failed {
                    message: e.to_string(),
                };
                self.publish_status();
                self.emit(ServerEvent::Stopped);
                return;
            },
        };

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer),
                    Err(e) => warn!(error = %e, "accept error"),
                },
                op = ops_rx.recv() => match op {
                    Some(Op::Shutdown) | None => break,
                    Some(op) => self.handle(op),
                },
            }
        }

        drop(listener);
        self.registry.clear();
        self.state = ServerState::Stopped;
        self.last_message = None;
        self.publish_status();
        self.emit(ServerEvent::Stopped);
        info!("server stopped");
    }

    async fn bind(&mut self) -> Result<TcpListener, WsError> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WsError::Bind {
                address: addr,
                source: e,
            })?;
        let bound = listener.local_addr().unwrap_or(addr);

        self.state = ServerState::Running { addr: bound };
        self.publish_status();
        self.emit(ServerEvent::Started { addr: bound });
        info!(addr = %bound, "WebSocket server listening");
        Ok(listener)
    }

    /// Register a freshly accepted connection and spawn its I/O task.
    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.registry.insert(peer);
        self.stats.connection_opened();
        self.publish_status();
        self.emit(ServerEvent::ClientConnected { id, peer });
        debug!(conn = %id, peer = %peer, "accepted connection");

        let task = tokio::spawn(run_connection(
            id,
            stream,
            self.config.max_handshake_size,
            self.config.read_buffer_size,
            self.ops_tx.clone(),
            Arc::clone(&self.stats),
        ));
        if !self.registry.attach_task(id, task.abort_handle()) {
            task.abort();
        }
    }

    fn handle(&mut self, op: Op) {
        match op {
            Op::Promoted { id, frames } => {
                if self.registry.promote(id, frames) {
                    self.stats.handshake_completed();
                    self.emit(ServerEvent::HandshakeComplete { id });
                    info!(conn = %id, "WebSocket handshake complete");
                } else {
                    debug!(conn = %id, "handshake completion for removed connection discarded");
                }
            },
            Op::Inbound { id, text } => {
                if !self.registry.contains(id) {
                    debug!(conn = %id, "message from removed connection discarded");
                    return;
                }
                self.stats.message_received();
                self.last_message = Some(text.clone());
                self.publish_status();
                self.sink.send(&text);
                self.emit(ServerEvent::TextReceived { id, text });
            },
            Op::Closed { id } => self.drop_connection(id),
            Op::BroadcastText(text) => {
                let frame = Bytes::from(frame::encode_text(&text));
                self.fan_out(frame);
            },
            Op::BroadcastBinary(payload) => {
                let frame = Bytes::from(frame::encode_binary(&payload));
                self.fan_out(frame);
            },
            Op::Shutdown => unreachable!("handled in run loop"),
        }
    }

    /// Send one encoded frame to every handshake-complete connection.
    ///
    /// A failed send means that connection's writer task is gone; the
    /// connection is removed without disturbing delivery to the others.
    fn fan_out(&mut self, frame: Bytes) {
        self.stats.broadcast_sent();

        let mut stale = Vec::new();
        for (id, frames) in self.registry.complete() {
            if frames.send(frame.clone()).is_err() {
                stale.push(id);
            }
        }

        for id in stale {
            self.stats.send_failed();
            warn!(conn = %id, "broadcast send failed, dropping connection");
            self.drop_connection(id);
        }
    }

    /// Remove a connection. Safe to call repeatedly; only the first removal
    /// mutates the registry.
    fn drop_connection(&mut self, id: ConnectionId) {
        let (Some(peer), Some(reached)) = (self.registry.peer(id), self.registry.state(id))
        else {
            // Already removed; the reader, writer, and broadcast paths can
            // all report the same close.
            return;
        };
        self.registry.remove(id);
        self.publish_status();
        self.emit(ServerEvent::ClientDisconnected { id });
        debug!(conn = %id, peer = %peer, state = ?reached, "connection removed");
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(ServerStatus {
            state: self.state.clone(),
            connected_clients: self.registry.len(),
            last_message: self.last_message.clone(),
        });
    }

    fn emit(&self, event: ServerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// Per-connection task: handshake, then the receive loop.
///
/// Every exit path reports `Op::Closed`; the actor's idempotent removal
/// absorbs the overlap with broadcast-failure removal.
async fn run_connection(
    id: ConnectionId,
    mut stream: TcpStream,
    max_handshake_size: usize,
    read_buffer_size: usize,
    ops: mpsc::UnboundedSender<Op>,
    stats: Arc<ServerStats>,
) {
    let mut buf = vec![0u8; max_handshake_size];
    let request_len = match stream.read(&mut buf).await {
        Ok(n) if n > 0 => n,
        _ => {
            let _ = ops.send(Op::Closed { id });
            return;
        },
    };

    let key = match handshake::extract_key(&buf[..request_len]) {
        Ok(key) => key,
        Err(e) => {
            // Dropped without a response by design
            warn!(conn = %id, error = %e, "rejecting connection");
            let _ = ops.send(Op::Closed { id });
            return;
        },
    };

    if let Err(e) = stream.write_all(&handshake::response(&key)).await {
        debug!(conn = %id, error = %e, "failed to write handshake response");
        let _ = ops.send(Op::Closed { id });
        return;
    }

    let (mut reader, writer) = stream.into_split();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_frames(id, writer, frames_rx));

    if ops.send(Op::Promoted { id, frames: frames_tx }).is_err() {
        return;
    }

    let mut buf = vec![0u8; read_buffer_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => match frame::decode(&buf[..n]) {
                Ok(Decoded::Text(text)) => {
                    if ops.send(Op::Inbound { id, text }).is_err() {
                        return;
                    }
                },
                Ok(Decoded::Skipped) => stats.frame_skipped(),
                Err(e) => {
                    warn!(conn = %id, error = %e, "protocol error, abandoning connection");
                    break;
                },
            },
            Err(e) => {
                debug!(conn = %id, error = %e, "read error");
                break;
            },
        }
    }

    let _ = ops.send(Op::Closed { id });
}

/// Writer task: exclusively owns the write half, drains encoded frames.
///
/// Ends when the registry drops the frame sender or a write fails; dropping
/// the write half closes the peer's view of the stream.
async fn write_frames(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!(conn = %id, error = %e, "write failed");
            break;
        }
    }
}
