//! WebSocket support: the opening handshake, frame codec, a socket over the upgraded connection
//! and the session loops that run on it.
//!
//! An upgraded connection keeps the `FramedRead` / `FramedWrite` pair of the HTTP connection,
//! only the codecs are swapped, so bytes the client sent right after the handshake are not lost.

mod codec;
mod error;
mod frame;
pub mod handshake;
pub mod relay;
pub mod session;
mod socket;

pub use codec::{FrameDecoder, FrameEncoder};
pub use error::WsError;
pub use frame::{Frame, Opcode};
pub use relay::{RelayRegistry, Side};
pub use socket::WebSocket;

/// Frames with a larger payload are rejected.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
