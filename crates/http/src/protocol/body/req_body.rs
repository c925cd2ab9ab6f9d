use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;

use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, Stream, StreamExt};

use http_body::{Body, Frame};
use tracing::{error, info, warn};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

type RequestMessage = Message<(RequestHeader, PayloadSize)>;

/// The request body as seen by a handler.
///
/// Every poll that needs data sends a oneshot sender through `signal`; the [`ReqBodySender`]
/// running next to the handler answers it with the next payload item read from the connection.
/// Nothing is read from the socket until the handler asks for it.
#[derive(Debug)]
pub struct ReqBody {
    signal: mpsc::Sender<oneshot::Sender<PayloadItem>>,
    receiving: Option<oneshot::Receiver<PayloadItem>>,
}

impl ReqBody {
    fn new(signal: mpsc::Sender<oneshot::Sender<PayloadItem>>) -> Self {
        Self { signal, receiving: None }
    }

    /// Creates the handler-facing body and the connection-facing sender over `payload_stream`.
    ///
    /// With a `read_timeout`, a body that stalls for longer than that ends early with whatever
    /// arrived so far.
    pub fn body_channel<S>(payload_stream: &mut S, read_timeout: Option<Duration>) -> (ReqBody, ReqBodySender<'_, S>)
    where
        S: Stream + Unpin,
    {
        let (tx, receiver) = mpsc::channel(16);

        let req_body = ReqBody::new(tx);

        let body_sender = ReqBodySender { payload_stream, receiver, read_timeout, eof: false };

        (req_body, body_sender)
    }
}

/// Reads payload items from the connection on behalf of a [`ReqBody`].
pub struct ReqBodySender<'conn, S>
where
    S: Stream + Unpin,
{
    payload_stream: &'conn mut S,
    receiver: mpsc::Receiver<oneshot::Sender<PayloadItem>>,
    read_timeout: Option<Duration>,
    eof: bool,
}

impl<S> ReqBodySender<'_, S>
where
    S: Stream<Item = Result<RequestMessage, ParseError>> + Unpin,
{
    /// Answers body requests until the payload ends or fails.
    ///
    /// Once this returns, later requests from the body observe the end of the stream (or a
    /// cancellation after an error) instead of waiting forever.
    pub async fn send_body(&mut self) -> Result<(), ParseError> {
        let result = self.do_send_body().await;
        self.receiver.close();
        while let Ok(Some(sender)) = self.receiver.try_next() {
            if self.eof {
                let _ = sender.send(PayloadItem::Eof);
            }
        }
        result
    }

    async fn do_send_body(&mut self) -> Result<(), ParseError> {
        while !self.eof {
            let Some(sender) = self.receiver.next().await else {
                return Ok(());
            };

            let payload_item = self.read_payload().await?;
            if payload_item.is_eof() {
                self.eof = true;
            }
            // the handler may have dropped its body in the meantime
            let _ = sender.send(payload_item);
        }
        Ok(())
    }

    /// Drains whatever the handler did not read so the socket holds no unread request bytes when
    /// it is closed.
    pub async fn skip_body(&mut self) {
        let mut size: usize = 0;
        while !self.eof {
            match self.read_payload().await {
                Ok(PayloadItem::Chunk(bytes)) => size += bytes.len(),
                Ok(PayloadItem::Eof) => self.eof = true,
                Err(e) => {
                    warn!(cause = %e, "failed to skip request body");
                    break;
                }
            }
        }
        if size > 0 {
            info!(size = size, "skip request body");
        }
    }

    async fn read_payload(&mut self) -> Result<PayloadItem, ParseError> {
        let next = match self.read_timeout {
            None => self.payload_stream.next().await,
            Some(read_timeout) => match tokio::time::timeout(read_timeout, self.payload_stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(timeout_ms = read_timeout.as_millis(), "request body stalled, using the bytes received so far");
                    return Ok(PayloadItem::Eof);
                }
            },
        };

        match next {
            Some(Ok(Message::Payload(payload_item))) => Ok(payload_item),
            Some(Ok(Message::Header(_))) => {
                error!("received header from receive body phase");
                Err(ParseError::invalid_body("received header from receive body phase"))
            }
            Some(Err(e)) => Err(e),
            // the decoder already turned a premature close into Eof, so this is a stream that
            // was polled past its end
            None => Ok(PayloadItem::Eof),
        }
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        loop {
            if let Some(oneshot_receiver) = &mut self.receiving {
                let received = ready!(oneshot_receiver.poll_unpin(cx));
                self.receiving.take();
                return match received {
                    Ok(PayloadItem::Chunk(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Ok(PayloadItem::Eof) => Poll::Ready(None),
                    Err(_) => Poll::Ready(Some(Err(ParseError::invalid_body("parse body canceled")))),
                };
            }

            match ready!(self.signal.poll_ready(cx)) {
                Ok(()) => {
                    let (tx, rx) = oneshot::channel();
                    match self.signal.start_send(tx) {
                        Ok(()) => self.receiving = Some(rx),
                        Err(e) => return Poll::Ready(Some(Err(ParseError::invalid_body(e)))),
                    }
                }
                Err(e) => return Poll::Ready(Some(Err(ParseError::invalid_body(e)))),
            }
        }
    }
}
