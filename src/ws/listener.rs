use super::message::PayloadType;
use crate::base::neterror::{ErrorCategory, NetError};
use bytes::Bytes;
use tokio::sync::mpsc;

/// Receives inbound events of one WebSocket session.
///
/// Called from the session's reader task, never concurrently with itself.
/// `on_failure` is the last call a listener ever receives.
pub trait WebSocketListener: Send + Sync + 'static {
    fn on_message(&self, payload_type: PayloadType, payload: Bytes);

    /// The peer sent a close frame. Code 0 means the frame had no payload.
    fn on_close(&self, code: u16, reason: &str);

    fn on_failure(&self, error: &NetError);
}

/// Owned copy of a listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketEvent {
    Message(PayloadType, Bytes),
    Close(u16, String),
    Failure { category: ErrorCategory, message: String },
}

/// Listener that forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<WebSocketEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WebSocketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl WebSocketListener for ChannelListener {
    fn on_message(&self, payload_type: PayloadType, payload: Bytes) {
        let _ = self.tx.send(WebSocketEvent::Message(payload_type, payload));
    }

    fn on_close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(WebSocketEvent::Close(code, reason.to_string()));
    }

    fn on_failure(&self, error: &NetError) {
        let _ = self.tx.send(WebSocketEvent::Failure {
            category: error.category(),
            message: error.to_string(),
        });
    }
}
