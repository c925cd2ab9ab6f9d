use std::time::Duration;

use crate::codec::HeaderLimits;
use crate::websocket::DEFAULT_MAX_FRAME_LEN;

/// Limits and timeouts of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Longest accepted path, excluding the query. Longer ones get a 414.
    pub max_path_len: usize,
    /// Longest accepted query string. Longer ones get a 414.
    pub max_query_len: usize,
    /// Largest request head. A head still incomplete past this size gets a 414.
    pub max_header_bytes: usize,
    /// Largest accepted WebSocket frame payload.
    pub max_frame_len: usize,
    /// How long a request body may stall before it is treated as ended. `None` waits forever.
    pub body_read_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let limits = HeaderLimits::default();
        Self {
            max_path_len: limits.max_path_len,
            max_query_len: limits.max_query_len,
            max_header_bytes: limits.max_header_bytes,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            body_read_timeout: None,
        }
    }
}

impl ConnectionConfig {
    pub fn header_limits(&self) -> HeaderLimits {
        HeaderLimits {
            max_header_bytes: self.max_header_bytes,
            max_path_len: self.max_path_len,
            max_query_len: self.max_query_len,
        }
    }

    pub fn with_body_read_timeout(mut self, timeout: Duration) -> Self {
        self.body_read_timeout = Some(timeout);
        self
    }
}
