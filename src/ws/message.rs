//! WebSocket message types.

use super::frame::OpCode;
use crate::base::neterror::NetError;
use bytes::{BufMut, Bytes, BytesMut};

/// How the payload of a data message is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// UTF-8 text
    Text,
    /// Opaque bytes
    Binary,
}

impl PayloadType {
    /// Opcode of the first frame of a message of this type.
    pub fn opcode(self) -> OpCode {
        match self {
            PayloadType::Text => OpCode::Text,
            PayloadType::Binary => OpCode::Binary,
        }
    }
}

/// WebSocket close codes (RFC 6455).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// No code on the wire: the close frame has an empty payload.
    pub const NONE: Self = Self(0);
    /// Normal closure
    pub const NORMAL: Self = Self(1000);
    /// Server going down
    pub const GOING_AWAY: Self = Self(1001);
    /// Protocol error
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// Unsupported data type
    pub const UNSUPPORTED: Self = Self(1003);
    /// Invalid payload data
    pub const INVALID_PAYLOAD: Self = Self(1007);
    /// Policy violation
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// Message too big
    pub const MESSAGE_TOO_BIG: Self = Self(1009);
    /// Extension required
    pub const EXTENSION_REQUIRED: Self = Self(1010);
    /// Internal server error
    pub const INTERNAL_ERROR: Self = Self(1011);

    /// Whether the code may appear in a close frame.
    ///
    /// 1004-1006 and 1015 are reserved for local use and never sent.
    pub fn is_sendable(self) -> bool {
        match self.0 {
            0 => true,
            1000..=1003 | 1007..=1011 => true,
            3000..=4999 => true,
            _ => false,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

/// Close frame data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code; [`CloseCode::NONE`] when the payload was empty.
    pub code: CloseCode,
    /// Close reason (possibly empty UTF-8 string)
    pub reason: String,
}

impl CloseFrame {
    /// Largest reason that still fits a control frame next to the code.
    pub const MAX_REASON_LEN: usize = 123;

    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }

    /// Encode as a close-frame payload. Code 0 encodes to nothing.
    pub fn encode(&self) -> Result<Bytes, NetError> {
        if self.code == CloseCode::NONE {
            if !self.reason.is_empty() {
                return Err(NetError::InvalidArgument("Close reason requires a close code".into()));
            }
            return Ok(Bytes::new());
        }
        if !self.code.is_sendable() {
            return Err(NetError::InvalidArgument(format!("Invalid close code: {}", self.code.0)));
        }
        if self.reason.len() > Self::MAX_REASON_LEN {
            return Err(NetError::InvalidArgument(format!(
                "Close reason must be at most {} bytes",
                Self::MAX_REASON_LEN
            )));
        }

        let mut payload = BytesMut::with_capacity(2 + self.reason.len());
        payload.put_u16(self.code.0);
        payload.put_slice(self.reason.as_bytes());
        Ok(payload.freeze())
    }

    /// Parse a received close-frame payload.
    pub fn parse(payload: &[u8]) -> Result<Self, NetError> {
        match payload {
            [] => Ok(Self::new(CloseCode::NONE, "")),
            [_] => Err(NetError::protocol("Malformed close payload length of 1")),
            [hi, lo, reason @ ..] => {
                let code = CloseCode(u16::from_be_bytes([*hi, *lo]));
                if code == CloseCode::NONE || !code.is_sendable() {
                    return Err(NetError::protocol(format!("Invalid close code: {}", code.0)));
                }
                let reason = std::str::from_utf8(reason)
                    .map_err(|_| NetError::protocol("Close reason is not valid UTF-8"))?;
                Ok(Self::new(code, reason))
            }
        }
    }
}
