//! The interface between a connection and application code.
//!
//! A connection hands each request to [`Handler::call`]. A WebSocket upgrade request is first
//! checked with [`Handler::check_upgrade`]; when accepted the connection answers the handshake
//! and passes the socket to [`Handler::upgrade`].

use std::error::Error;
use std::future::Future;

use async_trait::async_trait;
use http::{Request, Response, StatusCode};
use http_body::Body;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::RequestHeader;
use crate::protocol::body::ReqBody;
use crate::websocket::{WebSocket, WsError};

#[async_trait]
pub trait Handler: Send + Sync {
    type RespBody: Body;
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error>;

    /// Whether an upgrade to `header`'s target is accepted, or the status to refuse it with.
    fn check_upgrade(&self, header: &RequestHeader) -> Result<(), StatusCode> {
        let _ = header;
        Err(StatusCode::NOT_FOUND)
    }

    /// Runs the WebSocket session of an accepted upgrade. The connection ends when this returns.
    async fn upgrade<R, W>(&self, header: RequestHeader, socket: WebSocket<R, W>) -> Result<(), WsError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let _ = (header, socket);
        Ok(())
    }
}

/// A [`Handler`] built from an async function; it refuses every upgrade.
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<RespBody, Err, F, Fut> Handler for HandlerFn<F>
where
    RespBody: Body,
    F: Fn(Request<ReqBody>) -> Fut + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Fut: Future<Output = Result<Response<RespBody>, Err>> + Send,
{
    type RespBody = RespBody;
    type Error = Err;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
        (self.f)(req).await
    }
}

pub fn make_handler<F, RespBody, Err, Ret>(f: F) -> HandlerFn<F>
where
    RespBody: Body,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Ret: Future<Output = Result<Response<RespBody>, Err>>,
    F: Fn(Request<ReqBody>) -> Ret,
{
    HandlerFn { f }
}
