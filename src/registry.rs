//! Connection registry and lifecycle state.
//!
//! The registry is owned by the server actor and mutated only on that task,
//! so it needs no interior locking. It is the sole authority on which
//! connections are eligible for broadcast.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Channel carrying encoded frames to a connection's writer task.
pub type FrameSender = mpsc::UnboundedSender<Bytes>;

/// Identity of one client connection, assigned at accept time.
///
/// Ids increase monotonically and are never reused within a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handshake progress for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Accepted, upgrade response not yet written.
    Pending,
    /// Upgrade response written; eligible for broadcast.
    Complete,
}

/// Registry entry for one live connection.
#[derive(Debug)]
struct Entry {
    peer: SocketAddr,
    state: HandshakeState,
    /// Present once the handshake completes. The writer task it feeds owns
    /// the write half of the transport exclusively.
    frames: Option<FrameSender>,
    /// Handle to the connection's I/O task, installed right after spawn.
    task: Option<AbortHandle>,
}

impl Entry {
    /// Cancel the connection's I/O task. No-op if the task already finished.
    fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Tracks every live connection and its handshake state.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<ConnectionId, Entry>,
    next_id: u64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly accepted connection in the pending state and assign
    /// its id.
    pub fn insert(&mut self, peer: SocketAddr) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                peer,
                state: HandshakeState::Pending,
                frames: None,
                task: None,
            },
        );
        id
    }

    /// Attach the connection's I/O task handle so removal can cancel it.
    ///
    /// Returns `false` if the connection was already removed; the caller
    /// should then abort the task itself.
    pub fn attach_task(&mut self, id: ConnectionId, task: AbortHandle) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.task = Some(task);
                true
            },
            None => false,
        }
    }

    /// Mark a connection handshake-complete and install its frame sender.
    ///
    /// Returns `false` if the connection was already removed; the completion
    /// is then simply discarded. The pending→complete transition happens at
    /// most once; a repeat promotion leaves the entry unchanged.
    pub fn promote(&mut self, id: ConnectionId, frames: FrameSender) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                if entry.state == HandshakeState::Pending {
                    entry.state = HandshakeState::Complete;
                    entry.frames = Some(frames);
                }
                true
            },
            None => false,
        }
    }

    /// Remove a connection. Idempotent: only the first removal has effect.
    ///
    /// Cancels the connection's I/O task and drops its frame sender, which
    /// ends the writer task and closes the transport.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                entry.cancel();
                true
            },
            None => false,
        }
    }

    /// Whether the connection is still present.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Handshake state of a connection, if present.
    pub fn state(&self, id: ConnectionId) -> Option<HandshakeState> {
        self.entries.get(&id).map(|e| e.state)
    }

    /// Peer address of a connection, if present.
    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.entries.get(&id).map(|e| e.peer)
    }

    /// Number of live connections, pending ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no connections.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over handshake-complete connections and their frame senders.
    pub fn complete(&self) -> impl Iterator<Item = (ConnectionId, &FrameSender)> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| entry.frames.as_ref().map(|frames| (*id, frames)))
    }

    /// Drop every connection, cancelling their I/O tasks.
    pub fn clear(&mut self) {
        for entry in self.entries.values() {
            entry.cancel();
        }
        self.entries.clear();
    }
}
