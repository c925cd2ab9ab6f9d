use http::{HeaderValue, Response, StatusCode, header};

/// The head of a response: status and headers with the body left out.
pub type ResponseHead = Response<()>;

/// Marks a response as the last one on its connection.
pub(crate) fn mark_close(head: &mut ResponseHead) {
    const CLOSE: HeaderValue = HeaderValue::from_static("close");
    if head.status() != StatusCode::SWITCHING_PROTOCOLS {
        head.headers_mut().insert(header::CONNECTION, CLOSE);
    }
}
