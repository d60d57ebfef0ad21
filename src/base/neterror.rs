use std::io;
use thiserror::Error;

/// Coarse classification of a [`NetError`].
///
/// Callers that only need to know whether a failure was their own mistake,
/// a misbehaving peer or a broken transport can match on this instead of the
/// individual Chromium codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input from the caller (wrong method, wrong scheme).
    InvalidArgument,
    /// Operation invoked from the wrong session or connection state.
    IllegalState,
    /// The peer violated the WebSocket handshake or framing rules.
    ProtocolViolation,
    /// Any I/O, socket, TLS or HTTP engine failure.
    TransportFailure,
}

#[derive(Debug, Error)]
pub enum NetError {
    // Caller Errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    IllegalState(&'static str),
    #[error("Operation aborted")]
    Aborted,

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Failed to resolve {domain}: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: io::Error,
    },
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Preconnect max socket limit")]
    PreconnectMaxSocketLimit,
    #[error("Message too big")]
    MsgTooBig,
    #[error("WebSocket protocol error: {0}")]
    WsProtocolError(String),

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Socket closed by remote")]
    SocketRemoteClosed,
    #[error("Data received unexpectedly on idle socket")]
    DataReceivedUnexpectedly,
    #[error("Invalid HTTP response")]
    InvalidHttpResponse,
    #[error("HTTP body error")]
    HttpBodyError,

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    /// Shorthand for a handshake or framing violation.
    pub fn protocol(detail: impl Into<String>) -> Self {
        NetError::WsProtocolError(detail.into())
    }

    pub fn connection_failed_to(host: &str, port: u16, source: io::Error) -> Self {
        NetError::ConnectionFailedTo { host: host.to_string(), port, source }
    }

    pub fn dns_failed(domain: &str, source: io::Error) -> Self {
        NetError::NameNotResolvedFor { domain: domain.to_string(), source }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            NetError::InvalidArgument(_) => ErrorCategory::InvalidArgument,
            NetError::IllegalState(_) => ErrorCategory::IllegalState,
            NetError::WsProtocolError(_) => ErrorCategory::ProtocolViolation,
            _ => ErrorCategory::TransportFailure,
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed | NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved | NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::PreconnectMaxSocketLimit => -133,
            NetError::MsgTooBig => -142,
            NetError::WsProtocolError(_) => -145,
            NetError::InvalidUrl => -300,
            NetError::InvalidHttpResponse => -370,
            NetError::SocketRemoteClosed => -901,
            NetError::DataReceivedUnexpectedly => -902,
            // Chromium has no codes for caller errors; keep them in the
            // custom range used for crate-specific failures.
            NetError::InvalidArgument(_) => -10001,
            NetError::IllegalState(_) => -10002,
            NetError::HttpBodyError => -10003,
            NetError::Io(_) => -2,
            NetError::Aborted => -3,
            NetError::Unknown(code) => *code,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -133 => NetError::PreconnectMaxSocketLimit,
            -142 => NetError::MsgTooBig,
            -300 => NetError::InvalidUrl,
            -370 => NetError::InvalidHttpResponse,
            -901 => NetError::SocketRemoteClosed,
            -902 => NetError::DataReceivedUnexpectedly,
            -10003 => NetError::HttpBodyError,
            _ => NetError::Unknown(code),
        }
    }
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
                NetError::ConnectionAborted
            }
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::NotConnected => NetError::SocketNotConnected,
            io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            _ => NetError::Io(e),
        }
    }
}
