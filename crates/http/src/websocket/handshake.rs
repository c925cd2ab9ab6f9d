//! Server side of the opening handshake.
//!
//! ```text
//! GET /ws-echo HTTP/1.1
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//!
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use base64::Engine;
use http::{HeaderValue, Method, Response, StatusCode, header};
use sha1::{Digest, Sha1};

use crate::protocol::{RequestHeader, ResponseHead};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A `GET` whose `Connection` header lists `upgrade` and whose `Upgrade` header is `websocket`.
pub fn is_upgrade_request(header: &RequestHeader) -> bool {
    if header.method() != Method::GET {
        return false;
    }

    let headers = header.headers();
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get_all(header::UPGRADE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("websocket"));

    connection_upgrade && upgrade_websocket
}

/// `base64(sha1(key + GUID))`
pub fn accept_key(client_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key);
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// The `101 Switching Protocols` head answering `header`.
///
/// `Sec-WebSocket-Accept` is only present when the request carried a `Sec-WebSocket-Key`.
pub fn accept_response(header: &RequestHeader) -> ResponseHead {
    let mut response = Response::new(());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));

    if let Some(key) = header.headers().get(header::SEC_WEBSOCKET_KEY) {
        let accept = accept_key(key.as_bytes().trim_ascii());
        // base64 output is always a valid header value
        if let Ok(value) = HeaderValue::from_str(&accept) {
            headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn request(method: Method, headers: &[(&str, &str)]) -> RequestHeader {
        let mut builder = Request::builder().method(method).uri("/ws-echo");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into()
    }

    #[test]
    fn accept_key_vectors() {
        assert_eq!(accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(accept_key(b"I3XUDuX0KVcV9WZaunih6g=="), "AHbBmP6erNg7nxW8CJ+V7AHhT3Y=");
    }

    #[test]
    fn detect_upgrade() {
        assert!(is_upgrade_request(&request(Method::GET, &[("Connection", "Upgrade"), ("Upgrade", "websocket")])));
        assert!(is_upgrade_request(&request(Method::GET, &[("Connection", "keep-alive, upgrade"), ("Upgrade", "WebSocket")])));
        assert!(!is_upgrade_request(&request(Method::POST, &[("Connection", "Upgrade"), ("Upgrade", "websocket")])));
        assert!(!is_upgrade_request(&request(Method::GET, &[("Upgrade", "websocket")])));
        assert!(!is_upgrade_request(&request(Method::GET, &[("Connection", "Upgrade"), ("Upgrade", "h2c")])));
    }

    #[test]
    fn response_with_key() {
        let header = request(
            Method::GET,
            &[("Connection", "Upgrade"), ("Upgrade", "websocket"), ("Sec-WebSocket-Key", "I3XUDuX0KVcV9WZaunih6g==")],
        );
        let response = accept_response(&header);

        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(response.headers()[header::UPGRADE], "websocket");
        assert_eq!(response.headers()[header::CONNECTION], "Upgrade");
        assert_eq!(response.headers()[header::SEC_WEBSOCKET_ACCEPT], "AHbBmP6erNg7nxW8CJ+V7AHhT3Y=");
    }

    #[test]
    fn response_without_key() {
        let header = request(Method::GET, &[("Connection", "Upgrade"), ("Upgrade", "websocket")]);
        let response = accept_response(&header);

        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert!(response.headers().get(header::SEC_WEBSOCKET_ACCEPT).is_none());
    }
}
