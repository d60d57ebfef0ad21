use crate::socket::stream::StreamSocket;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Result of a non-blocking liveness probe on a TCP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Connected with nothing waiting to be read.
    Idle,
    /// Connected, but the peer already sent bytes nobody asked for.
    Readable,
    /// FIN, RST or any other socket error.
    Closed,
}

impl Liveness {
    /// Peek at the socket without consuming anything.
    pub fn probe(stream: &TcpStream) -> Self {
        if stream.peer_addr().is_err() {
            return Liveness::Closed;
        }

        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match stream.poll_peek(&mut cx, &mut buf) {
            Poll::Pending => Liveness::Idle,
            Poll::Ready(Ok(0)) => Liveness::Closed,
            Poll::Ready(Ok(_)) => Liveness::Readable,
            Poll::Ready(Err(ref e)) if e.kind() == io::ErrorKind::WouldBlock => Liveness::Idle,
            Poll::Ready(Err(_)) => Liveness::Closed,
        }
    }
}

/// Represents a connected socket (TCP or SSL).
/// Mimics net::StreamSocket.
#[derive(Debug)]
pub enum SocketType {
    Tcp(TcpStream),
    Ssl(tokio_boring::SslStream<TcpStream>),
}

impl SocketType {
    fn tcp(&self) -> &TcpStream {
        match self {
            SocketType::Tcp(s) => s,
            SocketType::Ssl(s) => s.get_ref(),
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, SocketType::Ssl(_))
    }
}

impl StreamSocket for SocketType {
    fn is_connected(&self) -> bool {
        Liveness::probe(self.tcp()) != Liveness::Closed
    }

    fn is_connected_and_idle(&self) -> bool {
        // Buffered TLS records are invisible to a TCP peek; a pending record
        // shows up as Readable, which is the conservative answer.
        Liveness::probe(self.tcp()) == Liveness::Idle
    }
}

impl AsyncRead for SocketType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketType {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_flush(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
