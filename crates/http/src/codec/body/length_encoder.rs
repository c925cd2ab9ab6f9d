use crate::protocol::{PayloadItem, SendError};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

/// Writes a body announced with `Content-Length`, never more than `length` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    length: u64,
    eof: bool,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { length, eof: false }
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(mut bytes) => {
                let remaining = bytes.remaining() as u64;
                if remaining > self.length {
                    warn!(extra = remaining - self.length, "response body longer than its content-length, truncated");
                }

                let mut budget = usize::try_from(self.length).unwrap_or(usize::MAX).min(bytes.remaining());
                self.length -= budget as u64;
                while budget > 0 {
                    let chunk = bytes.chunk();
                    let len = chunk.len().min(budget);
                    dst.extend_from_slice(&chunk[..len]);
                    bytes.advance(len);
                    budget -= len;
                }
                Ok(())
            }
            PayloadItem::Eof => {
                if self.length > 0 {
                    warn!(missing = self.length, "response body ended before its content-length");
                }
                self.eof = true;
                Ok(())
            }
        }
    }
}
