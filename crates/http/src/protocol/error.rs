use std::io;

use http::StatusCode;
use thiserror::Error;

use crate::websocket::WsError;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("websocket error: {source}")]
    WebSocketError {
        #[from]
        source: WsError,
    },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("{part} length {len} exceed the limit {max_len}")]
    TooLongUri { part: &'static str, len: usize, max_len: usize },

    #[error("invalid request line: {reason}")]
    InvalidRequestLine { reason: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri: {reason}")]
    InvalidUri { reason: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn too_long_uri(part: &'static str, len: usize, max_len: usize) -> Self {
        Self::TooLongUri { part, len, max_len }
    }

    pub fn invalid_request_line<S: ToString>(str: S) -> Self {
        Self::InvalidRequestLine { reason: str.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_uri<S: ToString>(str: S) -> Self {
        Self::InvalidUri { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// The status code the client receives when a request fails with this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::TooLargeHeader { .. } | ParseError::TooLongUri { .. } => StatusCode::URI_TOO_LONG,
            ParseError::InvalidVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            ParseError::TooManyHeaders { .. }
            | ParseError::InvalidRequestLine { .. }
            | ParseError::InvalidHeader { .. }
            | ParseError::InvalidMethod
            | ParseError::InvalidUri { .. }
            | ParseError::InvalidContentLength { .. }
            | ParseError::InvalidBody { .. }
            | ParseError::Io { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
