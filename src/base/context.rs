//! Error context helpers for socket setup.
//!
//! `ConnectJob` resolves and dials hosts on behalf of WebSocket handshakes;
//! a bare `io::Error` from that path loses which host failed. These helpers
//! attach it while converting into [`NetError`].

use crate::base::neterror::NetError;
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Attach the host and port being dialed.
    ///
    /// ```ignore
    /// let stream = TcpStream::connect(addr).await.connection_context("example.com", 443)?;
    /// // Error: "Connection to example.com:443 failed: connection refused"
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// Attach the domain being resolved.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(host = %host, port, error = %e, "connect failed");
            NetError::connection_failed_to(host, port, e)
        })
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(domain = %domain, error = %e, "DNS resolution failed");
            NetError::dns_failed(domain, e)
        })
    }
}
