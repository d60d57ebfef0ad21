//! Socket and connection management.
//!
//! Provides connection pooling and socket handling mirroring Chromium's `net/socket/`:
//! - [`pool`]: Connection pooling (6 per host, 256 total)
//! - [`connectjob`]: DNS → TCP → TLS connection flow
//! - [`connection`]: Ownership-tracked handle to a checked-out socket
//! - [`tls`]: TLS configuration with BoringSSL

pub mod client;
pub mod connection;
pub mod connectjob;
pub mod pool;
pub mod stream;
pub mod tls;
