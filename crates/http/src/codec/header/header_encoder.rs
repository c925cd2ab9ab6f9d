//! Response head serialization.
//!
//! Writes the status line and headers, adding `Content-Length` or `Transfer-Encoding: chunked`
//! from the [`PayloadSize`]. `http::HeaderName` is always lowercase, so names are written in
//! canonical casing (`Content-Length`, `Sec-WebSocket-Accept`) the way clients conventionally
//! expect to see them.

use crate::protocol::{PayloadSize, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};

use http::{HeaderName, HeaderValue, Version, header};
use std::io;
use std::io::{ErrorKind, Write};
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 1024;

#[derive(Debug, Default)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut header, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        match header.version() {
            Version::HTTP_11 => {
                let status = header.status();
                write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or("Unknown"))?;
            }
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        }

        // 1xx responses carry no body and no framing headers
        if !header.status().is_informational() {
            let headers = header.headers_mut();
            match payload_size {
                PayloadSize::Length(n) => {
                    headers.remove(header::TRANSFER_ENCODING);
                    headers.insert(header::CONTENT_LENGTH, n.into());
                }
                PayloadSize::Chunked => {
                    const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");
                    headers.remove(header::CONTENT_LENGTH);
                    headers.insert(header::TRANSFER_ENCODING, CHUNKED);
                }
                PayloadSize::Empty => {
                    const ZERO_VALUE: HeaderValue = HeaderValue::from_static("0");
                    headers.remove(header::TRANSFER_ENCODING);
                    headers.insert(header::CONTENT_LENGTH, ZERO_VALUE);
                }
            }
        }

        for (header_name, header_value) in header.headers() {
            put_canonical_name(dst, header_name);
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Writes `name` with every dash-separated word capitalized; the `Sec-WebSocket-*` family keeps
/// its irregular spelling.
fn put_canonical_name(dst: &mut BytesMut, name: &HeaderName) {
    const WEBSOCKET_PREFIX: &str = "sec-websocket-";

    let name = name.as_str();
    let rest = if let Some(rest) = name.strip_prefix(WEBSOCKET_PREFIX) {
        dst.put_slice(b"Sec-WebSocket-");
        rest
    } else {
        name
    };

    let mut upper = true;
    for &b in rest.as_bytes() {
        dst.put_u8(if upper { b.to_ascii_uppercase() } else { b });
        upper = b == b'-';
    }
}

/// `io::Write` over a `BytesMut` so `write!` can format straight into the output buffer.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
