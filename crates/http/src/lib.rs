//! Core of the strand server: HTTP/1.1 request decoding and response encoding, the per
//! connection workflow and WebSocket support.
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! use http::{Request, Response};
//! use http_body_util::{BodyExt, Full};
//! use bytes::Bytes;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//! use strand_http::connection::HttpConnection;
//! use strand_http::handler::make_handler;
//! use strand_http::protocol::body::ReqBody;
//!
//! #[tokio::main]
//! async fn main() {
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(hello));
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = Arc::clone(&handler);
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             let connection = HttpConnection::new(reader, writer);
//!             if let Err(e) = connection.process(handler).await {
//!                 info!(cause = %e, "connection finished with error");
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello(request: Request<ReqBody>) -> Result<Response<Full<Bytes>>, Box<dyn Error + Send + Sync>> {
//!     let body = request.into_body().collect().await?.to_bytes();
//!     Ok(Response::new(Full::new(body)))
//! }
//! ```
//!
//! # Modules
//!
//! - [`codec`]: request decoder and response encoder for `tokio_util` framing
//! - [`protocol`]: request, response and payload types, errors
//! - [`connection`]: [`connection::HttpConnection`], one request or one WebSocket session per
//!   connection
//! - [`handler`]: the [`handler::Handler`] trait application code implements
//! - [`websocket`]: handshake, frame codec, sessions and the relay registry

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod websocket;

mod utils;
pub(crate) use utils::ensure;
