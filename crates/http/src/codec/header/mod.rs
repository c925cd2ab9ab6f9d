//! Request head decoding and response head encoding.
//!
//! - [`HeaderDecoder`]: request line and headers via `httparse`, with [`HeaderLimits`] on the
//!   header block, path and query sizes
//! - [`HeaderEncoder`]: status line and headers, adding the body framing headers

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_decoder::HeaderLimits;
pub use header_encoder::HeaderEncoder;
