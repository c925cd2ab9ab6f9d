use bytes::Bytes;

use crate::websocket::WsError;

/// Frame opcode, the low four bits of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Close, ping and pong.
    pub const fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }

    pub fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(WsError::protocol(format!("reserved opcode {other:#x}"))),
        }
    }
}

/// A single WebSocket frame, already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// The masking key the frame arrived with, if any. Outgoing frames are never masked.
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(fin: bool, opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self { fin, opcode, mask: None, payload: payload.into() }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Binary, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Pong, payload)
    }

    /// A close frame carrying `code`, or an empty one.
    pub fn close(code: Option<u16>) -> Self {
        let payload = match code {
            Some(code) => Bytes::copy_from_slice(&code.to_be_bytes()),
            None => Bytes::new(),
        };
        Self::new(true, Opcode::Close, payload)
    }

    /// The status code of a close frame: its first two payload bytes.
    pub fn close_code(&self) -> Option<u16> {
        match self.payload.as_ref() {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }
}
