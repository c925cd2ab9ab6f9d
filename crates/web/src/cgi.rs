//! The CGI-style scripts behind the plain HTTP routes, and the default route table.
//!
//! A script writes its output as a list of pieces; the route's [`Endpoint`] decides whether the
//! pieces go out as one `Content-Length` body or as one chunk each.

use bytes::Bytes;
use http_body_util::BodyExt;
use strand_http::protocol::body::ReqBody;
use strand_http::protocol::{ParseError, RequestHeader};
use strand_http::websocket::Side;
use tracing::debug;

use crate::router::{Endpoint, Router, RouterBuildError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Simple,
    Stream,
    Query,
    Post,
}

const SIMPLE_RESPONSE: &str = "This is a response from 'cgi_simple'";
const STREAM_RESPONSE: &str = "This is a response from 'cgi_stream'";
const QUERY_PREAMBLE: &str = "This is a response from 'cgi_query'\r\nThe parameters were:\r\n";
const POST_PREAMBLE: &str = "This is a response from 'cgi_post'\r\nYou posted: \"";

/// Runs `script` on a request and returns what it wrote.
pub async fn run(script: Script, header: &RequestHeader, body: ReqBody) -> Result<Vec<Bytes>, ParseError> {
    let output = match script {
        Script::Simple => vec![Bytes::from_static(SIMPLE_RESPONSE.as_bytes())],
        Script::Stream => vec![Bytes::from_static(STREAM_RESPONSE.as_bytes())],
        Script::Query => {
            let mut output = vec![Bytes::from_static(QUERY_PREAMBLE.as_bytes())];
            output.extend(header.query_params().iter().map(|param| Bytes::from(format!("{param}\r\n"))));
            output
        }
        Script::Post => {
            let posted = body.collect().await?.to_bytes();
            debug!(size = posted.len(), "post data received");
            vec![Bytes::from_static(POST_PREAMBLE.as_bytes()), posted, Bytes::from_static(b"\"\r\n")]
        }
    };
    Ok(output)
}

/// The routes the server binary serves.
pub fn routes() -> Result<Router, RouterBuildError> {
    Router::builder()
        .get("/simple", Endpoint::Fixed(Script::Simple))
        .get("/stream", Endpoint::Stream(Script::Stream))
        .get("/wildcard/{*rest}", Endpoint::Fixed(Script::Simple))
        .get("/query", Endpoint::Stream(Script::Query))
        .post("/post", Endpoint::Stream(Script::Post))
        .get("/ws-echo", Endpoint::Echo)
        .get("/ws-in", Endpoint::Relay(Side::In))
        .get("/ws-out", Endpoint::Relay(Side::Out))
        .get("/ws-time", Endpoint::Ticker)
        .build()
}
