//! Byte-level tracing decorators for the upgraded socket.
//!
//! Both wrappers forward every call unchanged and emit a `trace!` event
//! with the byte count and a short hex preview of what crossed the wire.

use std::fmt::Write as _;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const PREVIEW_BYTES: usize = 32;

fn hex_preview(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW_BYTES)];
    let mut out = String::with_capacity(shown.len() * 3 + 3);
    for (i, byte) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    if bytes.len() > PREVIEW_BYTES {
        out.push_str(" ..");
    }
    out
}

/// Inbound pass-through.
#[derive(Debug)]
pub struct LoggingSource<R> {
    inner: R,
}

impl<R> LoggingSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LoggingSource<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        match &result {
            Poll::Ready(Ok(())) => {
                let read = &buf.filled()[before..];
                if read.is_empty() {
                    tracing::trace!("<< eof");
                } else {
                    tracing::trace!(bytes = read.len(), data = %hex_preview(read), "<< read");
                }
            }
            Poll::Ready(Err(e)) => tracing::trace!(error = %e, "<< read failed"),
            Poll::Pending => {}
        }
        result
    }
}

/// Outbound pass-through.
#[derive(Debug)]
pub struct LoggingSink<W> {
    inner: W,
}

impl<W> LoggingSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for LoggingSink<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);
        match &result {
            Poll::Ready(Ok(n)) => {
                tracing::trace!(bytes = *n, data = %hex_preview(&buf[..*n]), ">> write");
            }
            Poll::Ready(Err(e)) => tracing::trace!(error = %e, ">> write failed"),
            Poll::Pending => {}
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        tracing::trace!(">> shutdown");
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
