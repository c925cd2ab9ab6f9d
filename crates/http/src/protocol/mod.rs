//! Protocol types shared by the codecs, the connection and the handlers.
//!
//! - [`Message`], [`PayloadItem`] and [`PayloadSize`], the units the codecs exchange
//! - [`RequestHeader`]: a parsed request line and header block
//! - [`ResponseHead`]: a response without its body
//! - [`query`]: query string decoding into [`QueryParameter`]s
//! - [`body`]: [`ReqBody`](body::ReqBody), the streaming request body handed to handlers
//! - error types: [`HttpError`], [`ParseError`] (each maps to a status code) and [`SendError`]

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RawHeaderNames;
pub use request::RequestHeader;

mod response;
pub(crate) use response::mark_close;
pub use response::ResponseHead;

pub mod query;
pub use query::QueryParameter;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
