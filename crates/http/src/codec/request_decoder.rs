//! Streaming request decoder.
//!
//! Yields the request head first, then the body as a sequence of [`PayloadItem`]s terminated by
//! [`PayloadItem::Eof`]. The body framing comes from the head: `Content-Length`, chunked, or none.

use crate::codec::body::PayloadDecoder;
use crate::codec::header::{HeaderDecoder, HeaderLimits};
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::debug;

/// Decodes one request head and its body.
///
/// `payload_decoder` is `None` while the head is being parsed and `Some` while the body is.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_limits(limits: HeaderLimits) -> Self {
        Self { header_decoder: HeaderDecoder::new(limits), payload_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }

    /// The peer closed its side. A body cut short ends with `Eof`, a head cut short ends the
    /// stream without an error.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(buf)? {
            return Ok(Some(message));
        }

        if self.payload_decoder.take().is_some() {
            debug!(remaining = buf.len(), "connection closed before the body was complete");
            buf.clear();
            return Ok(Some(Message::Payload(PayloadItem::Eof)));
        }

        if !buf.is_empty() {
            debug!(remaining = buf.len(), "connection closed before the request head was complete");
            buf.clear();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use indoc::indoc;

    #[test]
    fn head_then_body() {
        let str = indoc! {r#"
        POST /cgi/post HTTP/1.1
        Content-Length: 5

        hello"#};

        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::new();

        let Some(Message::Header((header, payload_size))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expect header");
        };
        assert_eq!(header.method(), Method::POST);
        assert_eq!(payload_size, PayloadSize::Length(5));

        let Some(Message::Payload(PayloadItem::Chunk(bytes))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expect chunk");
        };
        assert_eq!(bytes, Bytes::from_static(b"hello"));

        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(Message::Payload(PayloadItem::Eof))));
    }

    #[test]
    fn truncated_body_ends_with_eof() {
        let mut buf = BytesMut::from("POST /cgi/post HTTP/1.1\r\nContent-Length: 20\r\n\r\nhel");
        let mut decoder = RequestDecoder::new();

        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(Message::Header(_))));
        assert!(matches!(decoder.decode_eof(&mut buf).unwrap(), Some(Message::Payload(PayloadItem::Chunk(_)))));
        assert!(matches!(decoder.decode_eof(&mut buf).unwrap(), Some(Message::Payload(PayloadItem::Eof))));
        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn truncated_head_is_silent() {
        let mut buf = BytesMut::from("GET /simple HTTP/1.1\r\nHost: loc");
        let mut decoder = RequestDecoder::new();

        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }
}
