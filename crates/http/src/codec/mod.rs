//! HTTP/1.1 wire codecs.
//!
//! - [`RequestDecoder`]: request head through [`header`], then the body through [`body`]
//! - [`ResponseEncoder`]: response head through [`header`], then the body through [`body`]
//!
//! Both plug into `tokio_util::codec::{FramedRead, FramedWrite}`, so a connection reads
//! [`Message`](crate::protocol::Message)s and writes them back without touching raw bytes.
//!
//! ```no_run
//! use strand_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from("GET /cgi/simple HTTP/1.1\r\n\r\n");
//! let message = decoder.decode(&mut buffer);
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use header::HeaderLimits;
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
