//! Outbound frame writer.

use super::frame::{apply_mask, FrameHeader, OpCode, Role, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE};
use super::message::{CloseCode, CloseFrame, PayloadType};
use super::{fill_random, SharedRandom};
use crate::base::neterror::NetError;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// The writer shared between the session (data frames) and the reader task
/// (pong and close echo). `None` once the session has closed its side.
pub type WriterSlot<W> = Arc<Mutex<Option<FrameWriter<W>>>>;

/// Writes frames to one sink.
///
/// In the client role every frame is masked with a fresh key drawn from the
/// shared random source. Each frame is written and flushed as a unit.
pub struct FrameWriter<W> {
    role: Role,
    sink: W,
    random: SharedRandom,
    frame: BytesMut,
    streaming: bool,
    close_sent: bool,
}

impl<W> std::fmt::Debug for FrameWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("role", &self.role)
            .field("streaming", &self.streaming)
            .field("close_sent", &self.close_sent)
            .finish()
    }
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(role: Role, sink: W, random: SharedRandom) -> Self {
        Self { role, sink, random, frame: BytesMut::new(), streaming: false, close_sent: false }
    }

    pub fn is_close_sent(&self) -> bool {
        self.close_sent
    }

    /// Whether a [`MessageSink`] is currently open on this writer.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Send a complete message as a single final frame.
    pub async fn send_message(&mut self, payload_type: PayloadType, payload: &[u8]) -> Result<(), NetError> {
        if self.streaming {
            return Err(NetError::IllegalState("Another message writer is active"));
        }
        self.write_frame(true, payload_type.opcode(), payload).await
    }

    /// Send a close frame. Code 0 sends an empty payload.
    pub async fn write_close(&mut self, code: u16, reason: &str) -> Result<(), NetError> {
        let payload = CloseFrame::new(CloseCode(code), reason).encode()?;
        self.write_frame(true, OpCode::Close, &payload).await?;
        self.close_sent = true;
        tracing::debug!(code, reason, "close frame sent");
        Ok(())
    }

    pub async fn write_ping(&mut self, payload: &[u8]) -> Result<(), NetError> {
        self.write_control(OpCode::Ping, payload).await
    }

    pub async fn write_pong(&mut self, payload: &[u8]) -> Result<(), NetError> {
        self.write_control(OpCode::Pong, payload).await
    }

    /// Give up the writer and return the sink, flushed or not.
    pub fn into_sink(self) -> W {
        self.sink
    }

    fn begin_stream(&mut self) -> Result<(), NetError> {
        if self.streaming {
            return Err(NetError::IllegalState("Another message writer is active"));
        }
        self.streaming = true;
        Ok(())
    }

    async fn write_fragment(&mut self, opcode: OpCode, payload: &[u8], fin: bool) -> Result<(), NetError> {
        let result = self.write_frame(fin, opcode, payload).await;
        if fin {
            self.streaming = false;
        }
        result
    }

    async fn write_control(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), NetError> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(NetError::InvalidArgument(format!(
                "Control payload must be at most {MAX_CONTROL_PAYLOAD} bytes"
            )));
        }
        self.write_frame(true, opcode, payload).await
    }

    async fn write_frame(&mut self, fin: bool, opcode: OpCode, payload: &[u8]) -> Result<(), NetError> {
        if self.close_sent {
            return Err(NetError::IllegalState("Closed"));
        }

        let mask = self.role.masks_outgoing().then(|| {
            let mut key = [0u8; 4];
            fill_random(&self.random, &mut key);
            key
        });
        let header = FrameHeader::new(fin, opcode, mask, payload.len() as u64);
        let mut head = [0u8; MAX_HEAD_SIZE];
        let head_len = header.encode(&mut head);

        self.frame.clear();
        self.frame.reserve(head_len + payload.len());
        self.frame.extend_from_slice(&head[..head_len]);
        self.frame.extend_from_slice(payload);
        if let Some(mask) = mask {
            apply_mask(&mut self.frame[head_len..], mask);
        }

        self.sink.write_all(&self.frame).await?;
        self.sink.flush().await?;
        tracing::trace!(?opcode, fin, len = payload.len(), "frame written");
        Ok(())
    }
}

/// Streaming writer for one message.
///
/// Bytes written are buffered; each [`flush`](Self::flush) emits them as one
/// non-final fragment (possibly empty) and [`close`](Self::close) emits the
/// final frame. Only an explicit `close` completes the message: dropping an
/// unfinished sink leaves the writer busy and later sends fail.
pub struct MessageSink<W> {
    slot: WriterSlot<W>,
    payload_type: PayloadType,
    buffer: BytesMut,
    started: bool,
}

impl<W: AsyncWrite + Unpin + Send> MessageSink<W> {
    /// Reserve the writer for a new streamed message.
    pub async fn open(slot: WriterSlot<W>, payload_type: PayloadType) -> Result<Self, NetError> {
        {
            let mut guard = slot.lock().await;
            let writer = guard.as_mut().ok_or(NetError::IllegalState("Closed"))?;
            writer.begin_stream()?;
        }
        Ok(Self { slot, payload_type, buffer: BytesMut::new(), started: false })
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Append payload bytes to the pending fragment.
    pub fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Emit the buffered bytes as a non-final fragment.
    pub async fn flush(&mut self) -> Result<(), NetError> {
        self.emit(false).await
    }

    /// Emit the remaining bytes as the final frame and release the writer.
    pub async fn close(mut self) -> Result<(), NetError> {
        self.emit(true).await
    }

    async fn emit(&mut self, fin: bool) -> Result<(), NetError> {
        let opcode = if self.started { OpCode::Continuation } else { self.payload_type.opcode() };
        let mut guard = self.slot.lock().await;
        let writer = guard.as_mut().ok_or(NetError::IllegalState("Closed"))?;
        writer.write_fragment(opcode, &self.buffer, fin).await?;
        self.started = true;
        self.buffer.clear();
        Ok(())
    }
}
