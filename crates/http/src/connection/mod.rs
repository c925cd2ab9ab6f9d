//! Connection lifecycle.
//!
//! [`HttpConnection`] serves exactly one request per connection: it reads the head, streams the
//! body to the handler while the handler runs, writes the response with `Connection: close` and
//! closes. An upgrade request instead turns the connection into a WebSocket session that lasts
//! until either side closes.

mod config;
mod http_connection;

pub use config::ConnectionConfig;
pub use http_connection::HttpConnection;
