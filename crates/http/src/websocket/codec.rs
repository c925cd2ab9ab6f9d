//! Frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! The decoder keeps its position between calls, so a frame may arrive split at any byte.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::ensure;
use crate::websocket::{Frame, Opcode, WsError};

const MAX_CONTROL_PAYLOAD: u64 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    /// Waiting for the 2 or 8 byte extended length.
    ExtendedLength(usize),
    MaskKey,
    Payload,
}

#[derive(Debug, Clone, Copy)]
struct FrameHead {
    fin: bool,
    opcode: Opcode,
    masked: bool,
    len: u64,
    mask: Option<[u8; 4]>,
}

impl Default for FrameHead {
    fn default() -> Self {
        Self { fin: true, opcode: Opcode::Continuation, masked: false, len: 0, mask: None }
    }
}

/// Decodes client frames. Masked and unmasked frames are both accepted.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    head: FrameHead,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self { state: State::Head, head: FrameHead::default(), max_frame_len }
    }

    fn after_length(&mut self) -> Result<State, WsError> {
        let len = self.head.len;
        ensure!(len <= self.max_frame_len as u64, WsError::FrameTooLarge { len, max_len: self.max_frame_len });
        Ok(if self.head.masked { State::MaskKey } else { State::Payload })
    }

    fn step(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        match self.state {
            State::Head => {
                if src.len() < 2 {
                    return Ok(None);
                }
                let first = src.get_u8();
                let second = src.get_u8();

                ensure!(first & 0x70 == 0, WsError::protocol("reserved bits set"));
                let opcode = Opcode::from_u8(first & 0x0F)?;
                let fin = first & 0x80 != 0;
                let short_len = second & 0x7F;

                if opcode.is_control() {
                    ensure!(fin, WsError::protocol("fragmented control frame"));
                    ensure!(
                        u64::from(short_len) <= MAX_CONTROL_PAYLOAD,
                        WsError::protocol("control frame payload longer than 125 bytes")
                    );
                }

                self.head = FrameHead { fin, opcode, masked: second & 0x80 != 0, len: u64::from(short_len), mask: None };
                self.state = match short_len {
                    126 => State::ExtendedLength(2),
                    127 => State::ExtendedLength(8),
                    _ => self.after_length()?,
                };
                self.step(src)
            }
            State::ExtendedLength(width) => {
                if src.len() < width {
                    return Ok(None);
                }
                let len = if width == 2 { u64::from(src.get_u16()) } else { src.get_u64() };
                ensure!(len >> 63 == 0, WsError::protocol("most significant bit of 64 bit length set"));

                self.head.len = len;
                self.state = self.after_length()?;
                self.step(src)
            }
            State::MaskKey => {
                if src.len() < 4 {
                    return Ok(None);
                }
                let mut mask = [0u8; 4];
                src.copy_to_slice(&mut mask);

                self.head.mask = Some(mask);
                self.state = State::Payload;
                self.step(src)
            }
            State::Payload => {
                // bounded by max_frame_len in after_length
                let len = self.head.len as usize;
                if src.len() < len {
                    src.reserve(len - src.len());
                    return Ok(None);
                }

                let mut payload = src.split_to(len);
                if let Some(mask) = self.head.mask {
                    apply_mask(&mut payload, mask);
                }

                let head = std::mem::take(&mut self.head);
                self.state = State::Head;
                Ok(Some(Frame { fin: head.fin, opcode: head.opcode, mask: head.mask, payload: payload.freeze() }))
            }
        }
    }

    /// True when no part of a frame has been consumed yet.
    pub fn is_idle(&self) -> bool {
        self.state == State::Head
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.step(src)
    }

    /// A connection closed inside a frame ends the stream like a clean close.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.step(buf)? {
            return Ok(Some(frame));
        }

        if !buf.is_empty() || !self.is_idle() {
            warn!(buffered = buf.len(), state = ?self.state, "connection closed inside a frame");
            buf.clear();
            self.state = State::Head;
        }
        Ok(None)
    }
}

pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Encodes server frames, unmasked, with the shortest length form.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameEncoder;

impl Encoder<Frame> for FrameEncoder {
    type Error = WsError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = frame.payload.len();
        dst.reserve(len + 10);

        let fin = if frame.fin { 0x80 } else { 0 };
        dst.put_u8(fin | frame.opcode as u8);

        match len {
            0..=125 => dst.put_u8(len as u8),
            126..=0xFFFF => {
                dst.put_u8(126);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(127);
                dst.put_u64(len as u64);
            }
        }

        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
