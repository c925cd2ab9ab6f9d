use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("websocket protocol error: {reason}")]
    Protocol { reason: String },

    #[error("frame payload of {len} bytes exceed the limit {max_len}")]
    FrameTooLarge { len: u64, max_len: usize },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl WsError {
    pub fn protocol<S: ToString>(str: S) -> Self {
        Self::Protocol { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
