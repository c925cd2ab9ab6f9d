//! Session loops run on an upgraded connection. Each one returns when the peer closes, after
//! answering a close frame, or on the first protocol error.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::OptionFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::websocket::relay::{InboundLink, RELAY_CHANNEL_CAPACITY};
use crate::websocket::{Frame, Opcode, RelayRegistry, Side, WebSocket, WsError};

enum Flow {
    Continue,
    Closed,
}

/// Answers a ping with a pong and a close with a close carrying the peer's status code.
async fn answer_control<R, W>(socket: &mut WebSocket<R, W>, frame: &Frame) -> Result<Flow, WsError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match frame.opcode {
        Opcode::Ping => {
            socket.send(Frame::pong(frame.payload.clone())).await?;
            Ok(Flow::Continue)
        }
        Opcode::Close => {
            let code = frame.close_code();
            debug!(?code, "peer sent close");
            socket.send(Frame::close(code)).await?;
            Ok(Flow::Closed)
        }
        _ => Ok(Flow::Continue),
    }
}

/// Sends every data frame back unchanged.
pub async fn echo<R, W>(socket: &mut WebSocket<R, W>) -> Result<(), WsError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = socket.recv().await? {
        if frame.is_control() {
            if let Flow::Closed = answer_control(socket, &frame).await? {
                break;
            }
            continue;
        }

        socket.send(Frame::new(frame.fin, frame.opcode, frame.payload)).await?;
    }
    Ok(())
}

pub async fn relay<R, W>(socket: &mut WebSocket<R, W>, registry: &RelayRegistry, channel: &str, side: Side) -> Result<(), WsError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match side {
        Side::In => relay_in(socket, registry, channel).await,
        Side::Out => relay_out(socket, registry, channel).await,
    }
}

/// Forwards data frames to the out side of `channel`, holding them until it shows up.
async fn relay_in<R, W>(socket: &mut WebSocket<R, W>, registry: &RelayRegistry, channel: &str) -> Result<(), WsError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut partner, mut waiting) = match registry.join_inbound(channel) {
        InboundLink::Paired(sender) => (Some(sender), None),
        InboundLink::Waiting(receiver) => (None, Some(receiver)),
    };
    let mut pending: VecDeque<Frame> = VecDeque::new();

    loop {
        select! {
            Some(paired) = OptionFuture::from(waiting.as_mut()) => {
                waiting = None;
                match paired {
                    Ok(sender) => {
                        for frame in pending.drain(..) {
                            if sender.send(frame).await.is_err() {
                                break;
                            }
                        }
                        partner = Some(sender);
                    }
                    Err(_) => {
                        debug!(channel, "replaced by a newer in side");
                        pending.clear();
                    }
                }
            }

            received = socket.recv() => {
                let Some(frame) = received? else {
                    break;
                };

                if frame.is_control() {
                    if let Flow::Closed = answer_control(socket, &frame).await? {
                        break;
                    }
                    continue;
                }

                match &partner {
                    Some(sender) => {
                        if sender.send(frame).await.is_err() {
                            info!(channel, "relay out side left, no longer forwarding");
                            partner = None;
                        }
                    }
                    None if waiting.is_some() => {
                        if pending.len() < RELAY_CHANNEL_CAPACITY {
                            pending.push_back(frame);
                        } else {
                            warn!(channel, "relay not paired yet, frame dropped");
                        }
                    }
                    None => {}
                }
            }
        }
    }
    Ok(())
}

/// Writes the frames the in side forwards. Data frames sent by this peer are ignored.
async fn relay_out<R, W>(socket: &mut WebSocket<R, W>, registry: &RelayRegistry, channel: &str) -> Result<(), WsError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut forwarded: mpsc::Receiver<Frame> = registry.join_outbound(channel);
    let mut forwarding = true;

    loop {
        select! {
            next = forwarded.recv(), if forwarding => match next {
                Some(frame) => socket.send(frame).await?,
                None => {
                    info!(channel, "relay in side left, no longer forwarding");
                    forwarding = false;
                }
            },

            received = socket.recv() => {
                let Some(frame) = received? else {
                    break;
                };
                if let Flow::Closed = answer_control(socket, &frame).await? {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Sends the current UNIX time as a text frame every `period`.
pub async fn ticker<R, W>(socket: &mut WebSocket<R, W>, period: Duration) -> Result<(), WsError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut interval = tokio::time::interval(period);

    loop {
        select! {
            _ = interval.tick() => {
                let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
                socket.send(Frame::text(now.to_string())).await?;
            }

            received = socket.recv() => {
                let Some(frame) = received? else {
                    break;
                };
                if let Flow::Closed = answer_control(socket, &frame).await? {
                    break;
                }
            }
        }
    }
    Ok(())
}
