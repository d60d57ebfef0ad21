//! Inbound frame reader and the session's read loop.

use super::frame::{apply_mask, FrameHeader, OpCode, Role, MAX_CONTROL_PAYLOAD};
use super::listener::WebSocketListener;
use super::message::{CloseFrame, PayloadType};
use super::writer::WriterSlot;
use crate::base::neterror::NetError;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Notify;

/// Reads frames from one source and dispatches them to a listener.
///
/// Control frames that need an answer (ping, close) are answered through
/// the shared writer slot, unless the local side already closed it.
pub struct FrameReader<R, W> {
    role: Role,
    source: R,
    listener: Arc<dyn WebSocketListener>,
    control: WriterSlot<W>,
    max_message_size: usize,
    message: BytesMut,
}

impl<R, W> FrameReader<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(role: Role, source: R, listener: Arc<dyn WebSocketListener>, control: WriterSlot<W>) -> Self {
        Self {
            role,
            source,
            listener,
            control,
            max_message_size: super::DEFAULT_MAX_MESSAGE_SIZE,
            message: BytesMut::new(),
        }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn listener(&self) -> &Arc<dyn WebSocketListener> {
        &self.listener
    }

    pub fn into_source(self) -> R {
        self.source
    }

    /// Process one complete data message or one standalone control frame.
    ///
    /// Control frames interleaved with the fragments of a data message are
    /// handled as they arrive and do not end the call.
    pub async fn read_message(&mut self) -> Result<(), NetError> {
        self.message.clear();
        let mut message_type: Option<PayloadType> = None;

        loop {
            let header = FrameHeader::read(&mut self.source, self.role).await?;

            if header.opcode.is_control() {
                self.read_control(header).await?;
                if message_type.is_none() {
                    return Ok(());
                }
                continue;
            }

            message_type = match (header.opcode, message_type) {
                (OpCode::Continuation, Some(t)) => Some(t),
                (OpCode::Continuation, None) => {
                    return Err(NetError::protocol("Unexpected continuation frame"));
                }
                (_, Some(_)) => return Err(NetError::protocol("Expected continuation frame")),
                (OpCode::Text, None) => Some(PayloadType::Text),
                (_, None) => Some(PayloadType::Binary),
            };

            let total = (self.message.len() as u64).saturating_add(header.payload_len);
            if total > self.max_message_size as u64 {
                tracing::debug!(total, max = self.max_message_size, "inbound message too large");
                return Err(NetError::MsgTooBig);
            }
            let start = self.message.len();
            self.message.resize(total as usize, 0);
            self.source.read_exact(&mut self.message[start..]).await?;
            if let Some(mask) = header.mask {
                apply_mask(&mut self.message[start..], mask);
            }

            if header.fin {
                let Some(payload_type) = message_type else {
                    return Err(NetError::protocol("Unexpected continuation frame"));
                };
                return self.deliver(payload_type);
            }
        }
    }

    fn deliver(&mut self, payload_type: PayloadType) -> Result<(), NetError> {
        if payload_type == PayloadType::Text && std::str::from_utf8(&self.message).is_err() {
            return Err(NetError::protocol("Text message is not valid UTF-8"));
        }
        let payload = self.message.split().freeze();
        tracing::trace!(?payload_type, len = payload.len(), "message received");
        self.listener.on_message(payload_type, payload);
        Ok(())
    }

    async fn read_control(&mut self, header: FrameHeader) -> Result<(), NetError> {
        let mut payload = [0u8; MAX_CONTROL_PAYLOAD];
        let payload = &mut payload[..header.payload_len as usize];
        self.source.read_exact(payload).await?;
        if let Some(mask) = header.mask {
            apply_mask(payload, mask);
        }

        match header.opcode {
            OpCode::Ping => {
                let mut slot = self.control.lock().await;
                match slot.as_mut() {
                    Some(writer) if !writer.is_close_sent() => writer.write_pong(payload).await?,
                    _ => tracing::trace!("ping after local close, not answered"),
                }
            }
            OpCode::Pong => tracing::trace!(len = payload.len(), "pong received"),
            OpCode::Close => {
                let frame = CloseFrame::parse(payload)?;
                tracing::debug!(code = frame.code.0, reason = %frame.reason, "close frame received");
                self.listener.on_close(frame.code.0, &frame.reason);

                let mut slot = self.control.lock().await;
                if let Some(writer) = slot.as_mut() {
                    if !writer.is_close_sent() {
                        writer.write_close(frame.code.0, &frame.reason).await?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Drives a [`FrameReader`] until its first failure.
///
/// The loop does not stop on a received close frame. Its only exits are a
/// read error or an explicit [`stop`](Self::stop_handle) request, which
/// abandons any frame in progress and ends the loop with
/// [`NetError::Aborted`]. Either way the failure is reported to the listener
/// exactly once before [`run`](Self::run) returns.
pub struct ReaderLoop<R, W> {
    reader: FrameReader<R, W>,
    stop: Arc<Notify>,
}

impl<R, W> ReaderLoop<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: FrameReader<R, W>) -> Self {
        Self { reader, stop: Arc::new(Notify::new()) }
    }

    /// Handle that stops the loop. A `notify_one` sent before the loop
    /// reaches its next read is not lost.
    pub fn stop_handle(&self) -> Arc<Notify> {
        self.stop.clone()
    }

    /// Returns the source and the error that ended the loop.
    pub async fn run(mut self) -> (R, NetError) {
        let mut delivered = 0u64;
        let error = loop {
            let result = tokio::select! {
                biased;
                () = self.stop.notified() => Err(NetError::Aborted),
                result = self.reader.read_message() => result,
            };
            match result {
                Ok(()) => delivered += 1,
                Err(e) => break e,
            }
        };
        tracing::debug!(error = %error, delivered, "reader loop stopped");
        self.reader.listener().on_failure(&error);
        (self.reader.into_source(), error)
    }
}
