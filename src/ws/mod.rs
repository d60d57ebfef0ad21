//! WebSocket client support.
//!
//! A [`WebSocket`] upgrades a pooled HTTP/1.1 connection, takes exclusive
//! ownership of the socket that served the handshake and then speaks RFC 6455
//! frames over it directly: a background reader task delivers inbound
//! messages to a [`WebSocketListener`] while the caller sends.
//!
//! # Example
//! ```ignore
//! use chromews::ws::{PayloadType, WebSocketBuilder};
//!
//! let mut ws = WebSocketBuilder::new().url("wss://echo.example.com/chat")?.build()?;
//! let response = ws.connect(listener).await?;
//! ws.send_message(PayloadType::Text, "Hello").await?;
//! ws.close().await?;
//! ```

mod connection;
pub mod frame;
pub mod handshake;
mod listener;
pub mod logging;
mod message;
pub mod reader;
pub mod writer;

pub use connection::{WebSocket, WebSocketBuilder, DEFAULT_MAX_MESSAGE_SIZE};
pub use listener::{ChannelListener, WebSocketEvent, WebSocketListener};
pub use message::{CloseCode, CloseFrame, PayloadType};
pub use writer::MessageSink;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::{Arc, Mutex};

/// Randomness shared by the handshake nonce and the frame mask keys.
pub type SharedRandom = Arc<Mutex<dyn RngCore + Send>>;

/// A [`SharedRandom`] seeded from the operating system.
pub fn entropy_random() -> SharedRandom {
    Arc::new(Mutex::new(StdRng::from_entropy()))
}

pub(crate) fn fill_random(random: &SharedRandom, dest: &mut [u8]) {
    let mut rng = random.lock().unwrap_or_else(|e| e.into_inner());
    rng.fill_bytes(dest);
}
