use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::websocket::{Frame, FrameDecoder, FrameEncoder, WsError};

/// An upgraded connection speaking WebSocket frames.
pub struct WebSocket<R, W> {
    framed_read: FramedRead<R, FrameDecoder>,
    framed_write: FramedWrite<W, FrameEncoder>,
}

impl<R, W> WebSocket<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, max_frame_len: usize) -> Self {
        Self {
            framed_read: FramedRead::new(reader, FrameDecoder::new(max_frame_len)),
            framed_write: FramedWrite::new(writer, FrameEncoder),
        }
    }

    /// Wraps the halves of a connection whose read buffer may already hold frame bytes.
    pub fn from_framed(framed_read: FramedRead<R, FrameDecoder>, framed_write: FramedWrite<W, FrameEncoder>) -> Self {
        Self { framed_read, framed_write }
    }

    /// The next frame, or `None` once the peer has closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Frame>, WsError> {
        self.framed_read.next().await.transpose()
    }

    pub async fn send(&mut self, frame: Frame) -> Result<(), WsError> {
        self.framed_write.send(frame).await
    }
}
