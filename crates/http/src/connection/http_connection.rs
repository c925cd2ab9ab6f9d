use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::header::EXPECT;
use http::{Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::connection::ConnectionConfig;
use crate::handler::Handler;
use crate::protocol::body::ReqBody;
use crate::protocol::{HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseHead, SendError, mark_close};
use crate::websocket::{FrameDecoder, FrameEncoder, WebSocket, handshake};

/// How long unread request bytes are drained after the response, before the socket is dropped.
const LINGER_TIMEOUT: Duration = Duration::from_millis(100);

/// One client connection, serving a single request.
///
/// The reader and writer halves are driven through `FramedRead` / `FramedWrite`, so the request
/// may arrive in any number of reads and the response is written as it is produced.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    config: ConnectionConfig,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, ConnectionConfig::default())
    }

    pub fn with_config(reader: R, writer: W, config: ConnectionConfig) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::with_limits(config.header_limits()), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            config,
        }
    }

    /// Reads one request and answers it, or runs the WebSocket session it asks for.
    ///
    /// A malformed request is answered with its error status before the error is returned. A
    /// peer that closes before sending a complete head gets no response and is not an error.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        R: Send + 'static,
        W: Send + 'static,
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        let result = match self.framed_read.next().await {
            Some(Ok(Message::Header((header, _payload_size)))) => {
                if let Some(names) = header.raw_header_names() {
                    trace!(method = %header.method(), path = header.uri().path(), headers = %names, "received request header");
                }
                if handshake::is_upgrade_request(&header) {
                    return self.do_upgrade(header, &handler).await;
                }
                self.do_process(header, &handler).await
            }

            Some(Ok(Message::Payload(_))) => {
                error!("receive body before request header");
                match self.send_error(StatusCode::BAD_REQUEST).await {
                    Ok(()) => Err(ParseError::invalid_body("need header while receive body").into()),
                    Err(e) => Err(e),
                }
            }

            Some(Err(e)) => {
                warn!(cause = %e, status = %e.status(), "can't parse request");
                match self.send_error(e.status()).await {
                    Ok(()) => Err(e.into()),
                    Err(send_error) => Err(send_error),
                }
            }

            None => {
                debug!("connection closed before a complete request");
                Ok(())
            }
        };

        self.shutdown().await;
        result
    }

    async fn do_upgrade<H>(mut self, header: RequestHeader, handler: &Arc<H>) -> Result<(), HttpError>
    where
        R: Send + 'static,
        W: Send + 'static,
        H: Handler,
    {
        if let Err(status) = handler.check_upgrade(&header) {
            info!(path = header.uri().path(), %status, "refuse websocket upgrade");
            let result = self.send_error(status).await;
            self.shutdown().await;
            return result;
        }

        let head = handshake::accept_response(&header);
        self.framed_write.send(Message::<_, Bytes>::Header((head, PayloadSize::Empty))).await?;

        // bytes already buffered behind the handshake belong to the first frames
        let max_frame_len = self.config.max_frame_len;
        let framed_read = self.framed_read.map_decoder(|_| FrameDecoder::new(max_frame_len));
        let framed_write = self.framed_write.map_encoder(|_| FrameEncoder);
        let socket = WebSocket::from_framed(framed_read, framed_write);

        let path = header.uri().path().to_string();
        info!(path, "websocket session started");
        let result = handler.upgrade(header, socket).await;
        match &result {
            Ok(()) => info!(path, "websocket session ended"),
            Err(e) => warn!(path, cause = %e, "websocket session ended with error"),
        }
        result.map_err(HttpError::from)
    }

    async fn do_process<H>(&mut self, header: RequestHeader, handler: &Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        if let Some(value) = header.headers().get(EXPECT) {
            if value.as_bytes().eq_ignore_ascii_case(b"100-continue") {
                let writer = self.framed_write.get_mut();
                writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
                writer.flush().await.map_err(SendError::io)?;
                debug!("receive expect request header, sent continue response");
            }
        }

        let (req_body, mut body_sender) = ReqBody::body_channel(&mut self.framed_read, self.config.body_read_timeout);

        let request = header.body(req_body);

        // the handler may wait for body bytes that only the body sender reads from the socket, so
        // both are driven together until the handler is done
        let response_result = {
            tokio::pin! {
                let request_handle_future = handler.call(request);
                let body_sender_future = body_sender.send_body();
            }

            let mut body_done = false;
            loop {
                select! {
                    biased;
                    response = &mut request_handle_future => break response,
                    body_result = &mut body_sender_future, if !body_done => {
                        body_done = true;
                        if let Err(e) = body_result {
                            warn!(cause = %e, "failed to read request body");
                        }
                    }
                }
            }
        };

        // the handler may not have read the whole body
        body_sender.skip_body().await;

        self.send_response(response_result).await
    }

    async fn send_response<T, E>(&mut self, response_result: Result<Response<T>, E>) -> Result<(), HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        match response_result {
            Ok(response) => self.do_send_response(response).await,
            Err(e) => {
                let e: Box<dyn Error + Send + Sync> = e.into();
                error!(cause = %e, "handle request error");
                self.send_error(StatusCode::INTERNAL_SERVER_ERROR).await
            }
        }
    }

    async fn send_error(&mut self, status: StatusCode) -> Result<(), HttpError> {
        let mut response = Response::new(Empty::<Bytes>::new());
        *response.status_mut() = status;
        self.do_send_response(response).await
    }

    async fn do_send_response<T>(&mut self, response: Response<T>) -> Result<(), HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
    {
        let (header_parts, mut body) = response.into_parts();

        let mut head = ResponseHead::from_parts(header_parts, ());
        mark_close(&mut head);
        let payload_size = PayloadSize::from(body.size_hint());

        // fed, not sent: the head goes out together with the first chunk
        self.framed_write.feed(Message::<_, T::Data>::Header((head, payload_size))).await?;

        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    // trailers are not written
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    self.framed_write.send(Message::Payload(PayloadItem::Chunk(data))).await?;
                }
                Some(Err(e)) => return Err(SendError::invalid_body(format!("resolve response body error: {e}")).into()),
                None => {
                    self.framed_write.send(Message::Payload(PayloadItem::<T::Data>::Eof)).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Closes the write side, then drains what the client still sends for a short while so the
    /// close is not turned into a reset by unread bytes.
    async fn shutdown(mut self) {
        if let Err(e) = self.framed_write.get_mut().shutdown().await {
            debug!(cause = %e, "failed to shutdown connection");
            return;
        }

        let reader = self.framed_read.get_mut();
        let mut discard = [0u8; 1024];
        let drain = async {
            while let Ok(n) = reader.read(&mut discard).await {
                if n == 0 {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use crate::websocket::{WsError, session};
    use async_trait::async_trait;
    use http::Request;
    use http_body_util::Full;
    use indoc::indoc;
    use std::convert::Infallible;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex};
    use tokio::task::JoinHandle;

    async fn echo_body(request: Request<ReqBody>) -> Result<Response<Full<Bytes>>, Box<dyn Error + Send + Sync>> {
        let path = request.uri().path().to_string();
        let body = request.into_body().collect().await?.to_bytes();
        let text = format!("{path}:{}", std::str::from_utf8(&body)?);
        Ok(Response::new(Full::new(Bytes::from(text))))
    }

    async fn failing(_request: Request<ReqBody>) -> Result<Response<Full<Bytes>>, Box<dyn Error + Send + Sync>> {
        Err("handler failed".into())
    }

    fn serve<H>(handler: H, config: ConnectionConfig) -> (DuplexStream, JoinHandle<Result<(), HttpError>>)
    where
        H: Handler + 'static,
        H::Error: Send,
        H::RespBody: Body<Data = Bytes> + Unpin + Send,
        <H::RespBody as Body>::Error: Display + Send,
    {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) = tokio::io::split(server);
        let connection = HttpConnection::with_config(reader, writer, config);
        let handle = tokio::spawn(connection.process(Arc::new(handler)));
        (client, handle)
    }

    async fn read_response(client: &mut DuplexStream) -> String {
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    #[tokio::test]
    async fn fixed_length_body() {
        let (mut client, handle) = serve(make_handler(echo_body), ConnectionConfig::default());

        let request = indoc! {"
        POST /post HTTP/1.1
        Host: localhost
        Content-Length: 5

        hello"};
        client.write_all(request.as_bytes()).await.unwrap();

        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.contains("Content-Length: 11\r\n"));
        assert!(response.ends_with("\r\n\r\n/post:hello"));

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn chunked_body_split_across_writes() {
        let (mut client, handle) = serve(make_handler(echo_body), ConnectionConfig::default());

        let request = "POST /post HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\ntest\r\n3\r\nabc\r\n0\r\n\r\n";
        for piece in request.as_bytes().chunks(3) {
            client.write_all(piece).await.unwrap();
            client.flush().await.unwrap();
        }

        let response = read_response(&mut client).await;
        assert!(response.ends_with("\r\n\r\n/post:testabc"));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unsupported_version() {
        let (mut client, handle) = serve(make_handler(echo_body), ConnectionConfig::default());

        client.write_all(b"GET /simple HTTP/1.0\r\nHost: localhost\r\n\r\n").await.unwrap();

        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"));
        assert!(response.contains("Content-Length: 0\r\n"));
        assert!(matches!(handle.await.unwrap(), Err(HttpError::RequestError { .. })));
    }

    #[tokio::test]
    async fn invalid_content_length() {
        let (mut client, handle) = serve(make_handler(echo_body), ConnectionConfig::default());

        client.write_all(b"GET /simple HTTP/1.1\r\nContent-Length: 1x\r\n\r\n").await.unwrap();

        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn handler_error_is_500() {
        let (mut client, handle) = serve(make_handler(failing), ConnectionConfig::default());

        client.write_all(b"GET /simple HTTP/1.1\r\n\r\n").await.unwrap();

        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn early_close_is_silent() {
        let (mut client, handle) = serve(make_handler(echo_body), ConnectionConfig::default());

        client.write_all(b"GET /simple HTTP/1.1\r\nHost: loc").await.unwrap();
        drop(client);

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn truncated_body_still_handled() {
        let (mut client, handle) = serve(make_handler(echo_body), ConnectionConfig::default());

        client.write_all(b"POST /post HTTP/1.1\r\nContent-Length: 20\r\n\r\nhel").await.unwrap();
        client.shutdown().await.unwrap();

        let response = read_response(&mut client).await;
        assert!(response.ends_with("\r\n\r\n/post:hel"));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stalled_body_times_out() {
        let config = ConnectionConfig::default().with_body_read_timeout(Duration::from_millis(20));
        let (mut client, handle) = serve(make_handler(echo_body), config);

        client.write_all(b"POST /post HTTP/1.1\r\nContent-Length: 20\r\n\r\nhel").await.unwrap();

        let response = read_response(&mut client).await;
        assert!(response.ends_with("\r\n\r\n/post:hel"));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn expect_continue() {
        let (mut client, handle) = serve(make_handler(echo_body), ConnectionConfig::default());

        client.write_all(b"POST /post HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\n").await.unwrap();
        let mut interim = [0u8; 25];
        client.read_exact(&mut interim).await.unwrap();
        assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

        client.write_all(b"ok").await.unwrap();
        let response = read_response(&mut client).await;
        assert!(response.ends_with("/post:ok"));
        handle.await.unwrap().unwrap();
    }

    struct WsEcho;

    #[async_trait]
    impl Handler for WsEcho {
        type RespBody = Full<Bytes>;
        type Error = Infallible;

        async fn call(&self, _req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
            Ok(Response::new(Full::new(Bytes::from_static(b"plain"))))
        }

        fn check_upgrade(&self, header: &RequestHeader) -> Result<(), StatusCode> {
            match header.uri().path() {
                "/ws-echo" => Ok(()),
                "/simple" => Err(StatusCode::METHOD_NOT_ALLOWED),
                _ => Err(StatusCode::NOT_FOUND),
            }
        }

        async fn upgrade<R, W>(&self, _header: RequestHeader, mut socket: WebSocket<R, W>) -> Result<(), WsError>
        where
            R: AsyncRead + Unpin + Send + 'static,
            W: AsyncWrite + Unpin + Send + 'static,
        {
            session::echo(&mut socket).await
        }
    }

    async fn read_head(client: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(client.read_u8().await.unwrap());
        }
        String::from_utf8(head).unwrap()
    }

    #[tokio::test]
    async fn websocket_upgrade_keeps_early_frames() {
        let (mut client, handle) = serve(WsEcho, ConnectionConfig::default());

        let mut request = indoc! {"
        GET /ws-echo HTTP/1.1
        Connection: Upgrade
        Upgrade: websocket
        Sec-WebSocket-Key: I3XUDuX0KVcV9WZaunih6g==

        "}
        .as_bytes()
        .to_vec();
        // a frame in the same write as the handshake
        request.extend_from_slice(&[0x81, 0x05, b'A', b'B', b'C', b'D', b'E']);
        client.write_all(&request).await.unwrap();

        let head = read_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: AHbBmP6erNg7nxW8CJ+V7AHhT3Y=\r\n"));
        assert!(!head.contains("Content-Length"));

        let mut echoed = [0u8; 7];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, [0x81, 0x05, b'A', b'B', b'C', b'D', b'E']);

        client.write_all(&[0x88, 0x02, 0x03, 0xE8]).await.unwrap();
        let mut close = [0u8; 4];
        client.read_exact(&mut close).await.unwrap();
        assert_eq!(close, [0x88, 0x02, 0x03, 0xE8]);

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn websocket_upgrade_refused() {
        let (mut client, handle) = serve(WsEcho, ConnectionConfig::default());

        client.write_all(b"GET /simple HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n").await.unwrap();

        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        handle.await.unwrap().unwrap();
    }
}
