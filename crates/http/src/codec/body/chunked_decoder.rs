//! Decoder for `Transfer-Encoding: chunked` request bodies.
//!
//! The decoder is deliberately lenient about delimiters, as a compatibility policy for clients
//! that do not emit exact CRLFs:
//!
//! - size line: hex digits accumulate until the first non-hex byte, then everything up to and
//!   including the next `\n` is skipped. This absorbs `\r\n`, chunk extensions and stray bytes
//!   such as `X\rY\n`. A size line without any digit counts as size 0.
//! - chunk terminator: after the chunk data, at most two non-hex bytes are consumed, stopping
//!   early after a `\n`. A hex digit is never consumed here, it starts the next size line.
//! - last chunk: a zero size ends the body at once; trailer fields are not read.
//!
//! Only an overflowing chunk size is an error.

use crate::protocol::{ParseError, PayloadItem};
use ChunkedState::*;
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::io::ErrorKind;
use std::task::Poll;
use tokio_util::codec::Decoder;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining_size: 0 }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Reading hex digits of the chunk size
    Size,
    /// Skipping the rest of the size line up to `\n`
    SizeSkip,
    /// Reading chunk data
    Body,
    /// Consuming the bytes after chunk data, the value is how many were consumed so far
    Terminator(u8),
    /// The zero-size chunk was seen
    End,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                trace!("finished reading chunked data");
                return Ok(Some(PayloadItem::Eof));
            }

            if src.is_empty() {
                return Ok(None);
            }

            let mut buf = None;

            self.state = match self.state.step(src, &mut self.remaining_size, &mut buf) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(new_state)) => new_state,
                Poll::Ready(Err(e)) => return Err(ParseError::io(e)),
            };

            if let Some(bytes) = buf {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }
}

macro_rules! try_next_byte {
    ($src:ident) => {{
        if $src.len() > 0 {
            $src.get_u8()
        } else {
            return Poll::Pending;
        }
    }};
}

impl ChunkedState {
    fn step(&self, src: &mut BytesMut, remaining_size: &mut u64, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, io::Error>> {
        match self {
            Size => ChunkedState::read_size(src, remaining_size),
            SizeSkip => ChunkedState::skip_size_line(src, *remaining_size),
            Body => ChunkedState::read_body(src, remaining_size, buf),
            Terminator(consumed) => ChunkedState::read_terminator(src, *consumed),
            End => Poll::Ready(Ok(End)),
        }
    }

    fn read_size(src: &mut BytesMut, size_per_chunk: &mut u64) -> Poll<Result<ChunkedState, io::Error>> {
        let b = try_next_byte!(src);
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b + 10 - b'a',
            b'A'..=b'F' => b + 10 - b'A',
            b'\n' => return Poll::Ready(Ok(ChunkedState::after_size_line(*size_per_chunk))),
            _ => return Poll::Ready(Ok(SizeSkip)),
        };

        match size_per_chunk.checked_mul(16).and_then(|size| size.checked_add(u64::from(digit))) {
            Some(size) => {
                *size_per_chunk = size;
                Poll::Ready(Ok(Size))
            }
            None => Poll::Ready(Err(io::Error::new(ErrorKind::InvalidInput, "invalid overflow chunked length"))),
        }
    }

    fn skip_size_line(src: &mut BytesMut, size_per_chunk: u64) -> Poll<Result<ChunkedState, io::Error>> {
        match src.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                src.advance(pos + 1);
                Poll::Ready(Ok(ChunkedState::after_size_line(size_per_chunk)))
            }
            None => {
                src.clear();
                Poll::Pending
            }
        }
    }

    fn after_size_line(size_per_chunk: u64) -> ChunkedState {
        if size_per_chunk == 0 { End } else { Body }
    }

    fn read_body(src: &mut BytesMut, size_per_chunk: &mut u64, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, io::Error>> {
        if src.is_empty() {
            return Poll::Ready(Ok(Body));
        }

        // cap remaining bytes at the max capacity of usize
        let remaining = usize::try_from(*size_per_chunk).unwrap_or(usize::MAX);
        let read_size = std::cmp::min(remaining, src.len());

        *size_per_chunk -= read_size as u64;
        *buf = Some(src.split_to(read_size).freeze());

        if *size_per_chunk > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(Terminator(0))) }
    }

    fn read_terminator(src: &mut BytesMut, consumed: u8) -> Poll<Result<ChunkedState, io::Error>> {
        let Some(&b) = src.first() else {
            return Poll::Pending;
        };

        if b.is_ascii_hexdigit() {
            return Poll::Ready(Ok(Size));
        }

        src.advance(1);
        if b == b'\n' || consumed >= 1 { Poll::Ready(Ok(Size)) } else { Poll::Ready(Ok(Terminator(consumed + 1))) }
    }
}
