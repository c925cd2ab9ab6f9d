//! Request line and header block decoding.
//!
//! Parsing is delegated to `httparse`, which is re-run over the whole buffered prefix each time
//! more bytes arrive, so a header split across any number of reads decodes the same as one that
//! arrives at once. Once complete, the recorded byte ranges of every header are turned into an
//! `http::Request<()>` without copying, the request target is checked against the length limits
//! and the body framing is chosen from `Transfer-Encoding` / `Content-Length`.
//!
//! Failures are reported as [`ParseError`]s whose [`status`](ParseError::status) is what the
//! client gets back: a malformed request line or `Content-Length` is a 400, a version other than
//! `HTTP/1.1` a 505, an oversized path, query or header block a 414.

use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Method, Request, Uri, Version};
use httparse::{Error, Status};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;

use crate::protocol::{ParseError, PayloadSize, RawHeaderNames, RequestHeader};

/// Maximum number of headers allowed in a request
const MAX_HEADER_NUM: usize = 64;

/// Size limits applied while decoding a request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLimits {
    /// Request line plus headers, including the blank line.
    pub max_header_bytes: usize,
    /// Path part of the request target, up to the first `?`.
    pub max_path_len: usize,
    /// Query part of the request target, after the first `?`.
    pub max_query_len: usize,
}

impl Default for HeaderLimits {
    fn default() -> Self {
        Self { max_header_bytes: 8 * 1024, max_path_len: 1024, max_query_len: 1024 }
    }
}

/// Decoder for the request head, producing the header and the framing of the body that follows.
#[derive(Debug, Clone, Default)]
pub struct HeaderDecoder {
    limits: HeaderLimits,
}

impl HeaderDecoder {
    pub fn new(limits: HeaderLimits) -> Self {
        Self { limits }
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let max_header_bytes = self.limits.max_header_bytes;

        let mut req = httparse::Request::new(&mut []);
        let mut headers: [MaybeUninit<httparse::Header<'_>>; MAX_HEADER_NUM] = [const { MaybeUninit::uninit() }; MAX_HEADER_NUM];

        let parsed_result = req.parse_with_uninit_headers(src, &mut headers).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            Error::Version | Error::NewLine => request_line_error(&src[..], e),
            Error::Token | Error::Status => ParseError::invalid_request_line(e),
            e => ParseError::invalid_header(e),
        });

        let body_offset = match parsed_result? {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= max_header_bytes, ParseError::too_large_header(src.len(), max_header_bytes));
                return Ok(None);
            }
        };

        trace!(header_size = body_offset, "parsed request header");
        ensure!(body_offset <= max_header_bytes, ParseError::too_large_header(body_offset, max_header_bytes));

        // only HTTP/1.1 is served, 1.0 included
        ensure!(req.version == Some(1), ParseError::InvalidVersion(req.version));

        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_e| ParseError::InvalidMethod)?;

        let target = req.path.ok_or_else(|| ParseError::invalid_uri("missing request target"))?;
        self.check_target_len(target)?;
        let uri = parse_target(target)?;

        let header_count = req.headers.len();
        let mut header_index = [EMPTY_HEADER_INDEX; MAX_HEADER_NUM];
        HeaderIndex::record(src, req.headers, &mut header_index);

        let header_bytes = src.split_to(body_offset).freeze();

        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = Version::HTTP_11;

        let headers = request.headers_mut();
        headers.reserve(header_count);
        let mut raw_names = Vec::with_capacity(header_count);
        for index in &header_index[..header_count] {
            let raw_name = header_bytes.slice(index.name.0..index.name.1);
            let name = HeaderName::from_bytes(&raw_name).map_err(ParseError::invalid_header)?;
            let value =
                HeaderValue::from_maybe_shared(header_bytes.slice(index.value.0..index.value.1)).map_err(ParseError::invalid_header)?;

            headers.append(name, value);
            raw_names.push(raw_name);
        }
        request.extensions_mut().insert(RawHeaderNames(raw_names));

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;

        Ok(Some((header, payload_size)))
    }
}

impl HeaderDecoder {
    fn check_target_len(&self, target: &str) -> Result<(), ParseError> {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        ensure!(path.len() <= self.limits.max_path_len, ParseError::too_long_uri("path", path.len(), self.limits.max_path_len));
        ensure!(
            query.len() <= self.limits.max_query_len,
            ParseError::too_long_uri("query", query.len(), self.limits.max_query_len)
        );
        Ok(())
    }
}

/// Bytes escaped when a request target has to be repaired: everything outside the unreserved and
/// sub-delimiter sets, keeping `%` so existing escapes survive.
const TARGET_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@')
    .remove(b'/')
    .remove(b'?')
    .remove(b'%');

/// Parses the request target, escaping bytes `http::Uri` refuses (such as `"` or `{`) when the
/// plain parse fails. The escapes are undone when query parameters are decoded.
fn parse_target(target: &str) -> Result<Uri, ParseError> {
    if let Ok(uri) = Uri::try_from(target) {
        return Ok(uri);
    }

    let escaped = utf8_percent_encode(target, TARGET_ESCAPES).to_string();
    trace!(target, escaped = %escaped, "escaped request target");
    Uri::try_from(escaped).map_err(ParseError::invalid_uri)
}

/// Classifies an httparse failure inside the request line.
///
/// httparse stops at the first byte past `HTTP/1.x`, so `HTTP/1.10` looks like a broken line
/// ending. A line of exactly three space-separated tokens whose last one is not `HTTP/1.1` is a
/// version problem; anything else, a trailing space included, is a malformed request line.
fn request_line_error(buf: &[u8], e: Error) -> ParseError {
    let line = match buf.iter().position(|&b| b == b'\n') {
        Some(end) => &buf[..end],
        None => buf,
    };
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let mut tokens = line.split(|&b| b == b' ');
    match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
        (Some(method), Some(target), Some(version), None)
            if !method.is_empty() && !target.is_empty() && !version.is_empty() && version != b"HTTP/1.1".as_slice() =>
        {
            ParseError::InvalidVersion(None)
        }
        _ => ParseError::invalid_request_line(e),
    }
}

/// Byte ranges of one header's name and value inside the header block.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

const EMPTY_HEADER_INDEX: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

impl HeaderIndex {
    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, indices) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            let name_end = name_start + header.name.len();
            indices.name = (name_start, name_end);
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            let value_end = value_start + header.value.len();
            indices.value = (value_start, value_end);
        }
    }
}

/// Chooses the body framing.
///
/// `Content-Length` must be a plain non-negative integer whenever it is present, for every method.
/// `Transfer-Encoding: chunked` wins over `Content-Length` when a client sends both.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let headers = header.headers();

    let content_length = headers.get(http::header::CONTENT_LENGTH).map(parse_content_length).transpose()?;

    if is_chunked(headers.get(http::header::TRANSFER_ENCODING)) {
        return Ok(PayloadSize::new_chunked());
    }

    match content_length {
        None | Some(0) => Ok(PayloadSize::new_empty()),
        Some(length) => Ok(PayloadSize::new_length(length)),
    }
}

fn parse_content_length(value: &HeaderValue) -> Result<u64, ParseError> {
    let digits = value.as_bytes().trim_ascii();
    ensure!(
        !digits.is_empty() && digits.iter().all(u8::is_ascii_digit),
        ParseError::invalid_content_length(format!("value {:?} is not a non-negative integer", value))
    );

    // all ascii digits, so this is valid utf8
    let digits = std::str::from_utf8(digits).map_err(ParseError::invalid_content_length)?;
    digits.parse::<u64>().map_err(|e| ParseError::invalid_content_length(format!("value {digits} overflow: {e}")))
}

/// Whether `chunked` is the final coding of the `Transfer-Encoding` header.
fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    if let Some(value) = header_value {
        if let Some(bytes) = value.as_bytes().rsplit(|b| *b == b',').next() {
            return bytes.trim_ascii().eq_ignore_ascii_case(CHUNKED);
        }
    }
    false
}
