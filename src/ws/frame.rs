//! RFC 6455 frame header codec and payload masking.
//!
//! Frame layout:
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! ```

use crate::base::neterror::NetError;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest possible header: 2 fixed bytes, 8 length bytes, 4 mask bytes.
pub const MAX_HEAD_SIZE: usize = 14;

/// Control frames carry at most this many payload bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

const FIN_BIT: u8 = 0b1000_0000;
const RSV_BITS: u8 = 0b0111_0000;
const OPCODE_BITS: u8 = 0b0000_1111;
const MASK_BIT: u8 = 0b1000_0000;
const LEN_BITS: u8 = 0b0111_1111;

/// Which end of the connection a codec speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Client-to-server frames are always masked.
    pub fn masks_outgoing(self) -> bool {
        self == Role::Client
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = NetError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(NetError::protocol(format!("Unknown opcode: {other:#x}"))),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(opcode: OpCode) -> Self {
        match opcode {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Decoded frame header. The payload follows it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload_len: u64) -> Self {
        Self { fin, opcode, mask, payload_len }
    }

    /// Serialize into `head`, returning the number of bytes used.
    pub fn encode(&self, head: &mut [u8; MAX_HEAD_SIZE]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let mut size = if self.payload_len < 126 {
            head[1] = self.payload_len as u8;
            2
        } else if self.payload_len <= u64::from(u16::MAX) {
            head[1] = 126;
            head[2..4].copy_from_slice(&(self.payload_len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&self.payload_len.to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= MASK_BIT;
            head[size..size + 4].copy_from_slice(&mask);
            size += 4;
        }
        size
    }

    /// Read and validate one header from `src`.
    ///
    /// `role` is the role of the reading side; it decides which masking
    /// direction is legal.
    pub async fn read<R>(src: &mut R, role: Role) -> Result<Self, NetError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut fixed = [0u8; 2];
        src.read_exact(&mut fixed).await?;

        if fixed[0] & RSV_BITS != 0 {
            return Err(NetError::protocol("Reserved bits must be 0"));
        }
        let fin = fixed[0] & FIN_BIT != 0;
        let opcode = OpCode::try_from(fixed[0] & OPCODE_BITS)?;
        let masked = fixed[1] & MASK_BIT != 0;

        let payload_len = match fixed[1] & LEN_BITS {
            126 => u64::from(src.read_u16().await?),
            127 => {
                let len = src.read_u64().await?;
                if len >> 63 != 0 {
                    return Err(NetError::protocol("Frame length has the high bit set"));
                }
                len
            }
            n => u64::from(n),
        };

        let mask = if masked {
            let mut key = [0u8; 4];
            src.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        let header = Self { fin, opcode, mask, payload_len };
        header.validate(role)?;
        Ok(header)
    }

    /// Structural checks that do not depend on the payload.
    pub fn validate(&self, role: Role) -> Result<(), NetError> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(NetError::protocol("Control frames must be final"));
            }
            if self.payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(NetError::protocol("Control frame must be less than 125B"));
            }
        }
        match (role, self.mask.is_some()) {
            (Role::Client, true) => Err(NetError::protocol("Server-sent frames must not be masked")),
            (Role::Server, false) => Err(NetError::protocol("Client-sent frames must be masked")),
            _ => Ok(()),
        }
    }
}

/// XOR `buf` with the 4-byte masking key. Masking twice restores the input.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        chunk[0] ^= mask[0];
        chunk[1] ^= mask[1];
        chunk[2] ^= mask[2];
        chunk[3] ^= mask[3];
    }
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(header: FrameHeader) -> Vec<u8> {
        let mut head = [0u8; MAX_HEAD_SIZE];
        let size = header.encode(&mut head);
        head[..size].to_vec()
    }

    #[test]
    fn test_encode_small_unmasked_text() {
        let head = encode(FrameHeader::new(true, OpCode::Text, None, 5));
        assert_eq!(head, [0x81, 0x05]);
    }

    #[test]
    fn test_encode_extended_lengths() {
        let head = encode(FrameHeader::new(true, OpCode::Binary, None, 256));
        assert_eq!(head, [0x82, 126, 0x01, 0x00]);

        let head = encode(FrameHeader::new(false, OpCode::Binary, None, 65536));
        assert_eq!(head, [0x02, 127, 0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_encode_masked_header() {
        let head = encode(FrameHeader::new(true, OpCode::Text, Some([0x37, 0xfa, 0x21, 0x3d]), 5));
        assert_eq!(head, [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d]);
    }

    #[test]
    fn test_mask_matches_rfc_example() {
        // RFC 6455 section 5.7, masked "Hello".
        let mut payload = *b"Hello";
        apply_mask(&mut payload, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(payload, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);

        apply_mask(&mut payload, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(&payload, b"Hello");
    }

    #[tokio::test]
    async fn test_read_unmasked_server_frame() {
        let mut wire: &[u8] = &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o'];
        let header = FrameHeader::read(&mut wire, Role::Client).await.unwrap();
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.payload_len, 5);
        assert_eq!(wire, b"Hello");
    }

    #[tokio::test]
    async fn test_read_16bit_length() {
        let mut wire: &[u8] = &[0x02, 126, 0x01, 0x00];
        let header = FrameHeader::read(&mut wire, Role::Client).await.unwrap();
        assert!(!header.fin);
        assert_eq!(header.payload_len, 256);
    }

    #[tokio::test]
    async fn test_client_rejects_masked_frame() {
        let mut wire: &[u8] = &[0x81, 0x85, 1, 2, 3, 4];
        let err = FrameHeader::read(&mut wire, Role::Client).await.unwrap_err();
        assert!(matches!(err, NetError::WsProtocolError(_)));
    }

    #[tokio::test]
    async fn test_server_requires_masked_frame() {
        let mut wire: &[u8] = &[0x81, 0x05];
        assert!(FrameHeader::read(&mut wire, Role::Server).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_reserved_bits_and_unknown_opcode() {
        let mut wire: &[u8] = &[0xC1, 0x00];
        assert!(matches!(
            FrameHeader::read(&mut wire, Role::Client).await,
            Err(NetError::WsProtocolError(_))
        ));

        let mut wire: &[u8] = &[0x83, 0x00];
        assert!(matches!(
            FrameHeader::read(&mut wire, Role::Client).await,
            Err(NetError::WsProtocolError(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_control_frames() {
        // Fragmented ping.
        let mut wire: &[u8] = &[0x09, 0x00];
        assert!(FrameHeader::read(&mut wire, Role::Client).await.is_err());

        // 126-byte close.
        let mut wire: &[u8] = &[0x88, 126, 0x00, 126];
        assert!(FrameHeader::read(&mut wire, Role::Client).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_header_is_connection_closed() {
        let mut wire: &[u8] = &[0x81];
        assert!(matches!(
            FrameHeader::read(&mut wire, Role::Client).await,
            Err(NetError::ConnectionClosed)
        ));
    }
}
