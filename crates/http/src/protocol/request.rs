//! HTTP request header handling.
//!
//! [`RequestHeader`] wraps `http::Request<()>` and adds the few things the server needs on top
//! of it: query parameter decoding and access to header names as the client spelled them.

use std::fmt;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

use crate::protocol::query::{QueryParameter, parse_query};

/// The parsed request line and header block of one request.
///
/// Once the decoder hands it out it is never mutated again; the body travels separately as a
/// [`ReqBody`](crate::protocol::body::ReqBody).
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

/// Header names in arrival order, exactly as the client wrote them.
///
/// `http::HeaderName` normalizes to lowercase, so the decoder stores the original spelling in the
/// request extensions. The connection logs it at trace level; handlers that need the client's
/// casing read it through [`RequestHeader::raw_header_names`].
#[derive(Debug, Clone, Default)]
pub struct RawHeaderNames(pub(crate) Vec<Bytes>);

/// Comma-separated names, with invalid UTF-8 replaced.
impl fmt::Display for RawHeaderNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&String::from_utf8_lossy(name))?;
        }
        Ok(())
    }
}

impl RawHeaderNames {
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(|name| &name[..])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body, producing the `Request<T>` handed to handlers.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// The raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.inner.uri().query()
    }

    /// Query parameters decoded in order of appearance; empty when there is no query.
    pub fn query_params(&self) -> Vec<QueryParameter> {
        self.query().map(parse_query).unwrap_or_default()
    }

    /// Header names with their original casing, when the request came off the wire.
    pub fn raw_header_names(&self) -> Option<&RawHeaderNames> {
        self.inner.extensions().get::<RawHeaderNames>()
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}
