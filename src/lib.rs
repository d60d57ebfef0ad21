//! # chromews
//!
//! A Chromium-inspired WebSocket client for Rust.
//!
//! `chromews` performs the HTTP/1.1 upgrade handshake on a connection checked
//! out of a shared socket pool, takes exclusive ownership of that connection
//! and then drives RFC 6455 framed I/O over the raw socket: a background
//! reader task delivers inbound messages to a listener while the caller sends.
//!
//! ## Features
//!
//! - **Connection Pooling**: 6 connections per host limit (Chromium-compatible)
//! - **Ownership Transfer**: atomic claim of the socket that served the upgrade
//! - **TLS**: BoringSSL for `wss://`
//! - **Framing**: masking, fragmentation, ping/pong and close handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chromews::ws::{ChannelListener, PayloadType, WebSocketBuilder};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chromews::base::neterror::NetError> {
//!     let (listener, mut events) = ChannelListener::new();
//!     let mut ws = WebSocketBuilder::new().url("wss://echo.example.com/")?.build()?;
//!     let response = ws.connect(Arc::new(listener)).await?;
//!     println!("Status: {}", response.status());
//!
//!     ws.send_message(PayloadType::Text, "hello").await?;
//!     println!("{:?}", events.recv().await);
//!     ws.close().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Core types and error definitions
//! - [`http`] - Upgrade request execution and responses
//! - [`socket`] - Connection pooling, ownership and TLS sockets
//! - [`ws`] - Handshake, frame codec and the WebSocket session

pub mod base;
pub mod http;
pub mod socket;
pub mod ws;
