//! Downstream command sink capability.

use tokio::sync::mpsc;

/// Consumer of decoded inbound text messages.
///
/// The server holds the sink as an injected capability and invokes it once
/// per successfully decoded text frame; the sink never holds a reference
/// back to the server. A typical implementation forwards commands to a radio
/// or BLE transport.
///
/// Delivery is fire-and-forget: the sink must not block the caller.
pub trait CommandSink: Send + Sync {
    /// Deliver one decoded text command.
    fn send(&self, command: &str);
}

/// Forward commands into an unbounded channel.
impl CommandSink for mpsc::UnboundedSender<String> {
    fn send(&self, command: &str) {
        // Receiver gone means the downstream transport shut down first;
        // commands are dropped, matching the transport's own semantics.
        let _ = mpsc::UnboundedSender::send(self, command.to_string());
    }
}

/// Sink that discards every command.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl CommandSink for NullSink {
    fn send(&self, _command: &str) {}
}
