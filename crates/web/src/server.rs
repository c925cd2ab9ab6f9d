use std::error::Error;
use std::io::{self, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{Request, Response, StatusCode, header};
use strand_http::connection::{ConnectionConfig, HttpConnection};
use strand_http::handler::Handler;
use strand_http::protocol::RequestHeader;
use strand_http::protocol::body::ReqBody;
use strand_http::websocket::{RelayRegistry, WebSocket, WsError, relay, session};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::ResponseBody;
use crate::cgi;
use crate::router::{Endpoint, RouteResult, Router};

const TICKER_PERIOD: Duration = Duration::from_secs(1);

pub struct ServerBuilder {
    router: Option<Router>,
    address: Option<io::Result<Vec<SocketAddr>>>,
    config: ConnectionConfig,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { router: None, address: None, config: ConnectionConfig::default() }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(Iterator::collect));
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let router = self.router.ok_or(ServerBuildError::MissingRouter)?;
        let address = self.address.ok_or(ServerBuildError::MissingAddress)??;
        if address.is_empty() {
            return Err(ServerBuildError::MissingAddress);
        }
        Ok(Server { router, address, config: self.config, relays: Arc::new(RelayRegistry::new()) })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder").field("address", &self.address).field("config", &self.config).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Server {
    router: Router,
    address: Vec<SocketAddr>,
    config: ConnectionConfig,
    relays: Arc<RelayRegistry>,
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("router must be set")]
    MissingRouter,
    #[error("address must be set")]
    MissingAddress,
    #[error("invalid address: {source}")]
    InvalidAddress {
        #[from]
        source: io::Error,
    },
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(self.address.as_slice()).await
    }

    /// Binds, announces the port on standard output and serves until the process ends.
    pub async fn start(self) -> io::Result<()> {
        let tcp_listener = self.bind().await?;
        let port = tcp_listener.local_addr()?.port();

        {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "Listening on port {port}")?;
            stdout.flush()?;
        }

        info!(port, "start listening");
        self.serve(tcp_listener).await;
        Ok(())
    }

    /// Accepts connections on `tcp_listener` forever, one task per connection.
    pub async fn serve(self, tcp_listener: TcpListener) {
        let handler = Arc::new(self);
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let handler = Arc::clone(&handler);
            let config = handler.config;

            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::with_config(reader, writer, config);
                match connection.process(handler).await {
                    Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
                    Err(e) => info!(%remote_addr, cause = %e, "connection shutdown with error"),
                }
            });
        }
    }
}

fn text_response(status: StatusCode, text: &'static str) -> Result<Response<ResponseBody>, http::Error> {
    Response::builder().status(status).header(header::CONTENT_TYPE, mime::TEXT_PLAIN.as_ref()).body(ResponseBody::from(text))
}

#[async_trait]
impl Handler for Server {
    type RespBody = ResponseBody;
    type Error = Box<dyn Error + Send + Sync>;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
        let (parts, body) = req.into_parts();
        let header = RequestHeader::from(parts);

        let endpoint = match self.router.at(header.method(), header.uri().path()) {
            RouteResult::Found(endpoint) => endpoint,
            RouteResult::MethodNotAllowed => return Ok(text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\r\n")?),
            RouteResult::NotFound => return Ok(text_response(StatusCode::NOT_FOUND, "Not found\r\n")?),
        };

        let body = match endpoint {
            Endpoint::Fixed(script) => ResponseBody::once(cgi::run(script, &header, body).await?.concat().into()),
            Endpoint::Stream(script) => ResponseBody::chunks(cgi::run(script, &header, body).await?),
            Endpoint::Echo | Endpoint::Relay(_) | Endpoint::Ticker => {
                return Ok(text_response(StatusCode::BAD_REQUEST, "WebSocket upgrade required\r\n")?);
            }
        };

        let response = Response::builder().status(StatusCode::OK).header(header::CONTENT_TYPE, mime::TEXT_PLAIN.as_ref()).body(body)?;
        Ok(response)
    }

    fn check_upgrade(&self, header: &RequestHeader) -> Result<(), StatusCode> {
        match self.router.at(header.method(), header.uri().path()) {
            RouteResult::Found(endpoint) if endpoint.is_websocket() => Ok(()),
            RouteResult::Found(_) | RouteResult::MethodNotAllowed => Err(StatusCode::METHOD_NOT_ALLOWED),
            RouteResult::NotFound => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn upgrade<R, W>(&self, header: RequestHeader, mut socket: WebSocket<R, W>) -> Result<(), WsError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let path = header.uri().path();
        match self.router.at(header.method(), path) {
            RouteResult::Found(Endpoint::Echo) => session::echo(&mut socket).await,
            RouteResult::Found(Endpoint::Relay(side)) => {
                let channel = relay::channel_name(path).map_or_else(|| path.to_string(), |(name, _)| name);
                session::relay(&mut socket, &self.relays, &channel, side).await
            }
            RouteResult::Found(Endpoint::Ticker) => session::ticker(&mut socket, TICKER_PERIOD).await,
            _ => Ok(()),
        }
    }
}
