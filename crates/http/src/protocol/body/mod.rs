//! Request body streaming.
//!
//! The connection creates a [`ReqBody`] / [`ReqBodySender`] pair per request. The body goes to
//! the handler, the sender is polled next to the handler future and reads payload items from the
//! connection only when the body asks for them. Whatever the handler leaves unread is drained with
//! [`ReqBodySender::skip_body`] before the connection is closed.

mod req_body;

pub use req_body::ReqBody;
pub use req_body::ReqBodySender;
