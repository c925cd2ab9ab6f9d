//! Pairing of relay connections.
//!
//! A connection to `<name>-in` and one to `<name>-out` form a pair on channel `<name>`. Whichever
//! side arrives first waits in the registry; the second one completes the rendezvous and takes
//! the entry out. Frames then flow in → out through an mpsc channel owned by the out side.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::websocket::Frame;

/// Frames buffered between the two sides of a pair.
pub const RELAY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    In,
    Out,
}

/// Splits `/ws-in` into `("/ws", Side::In)`. Paths without a side suffix are not relay paths.
pub fn channel_name(path: &str) -> Option<(String, Side)> {
    if let Some(name) = path.strip_suffix("-in") {
        return Some((name.to_string(), Side::In));
    }
    path.strip_suffix("-out").map(|name| (name.to_string(), Side::Out))
}

#[derive(Debug)]
enum Waiting {
    /// An in side waiting to be handed the out side's sender.
    Inbound(oneshot::Sender<mpsc::Sender<Frame>>),
    /// An out side whose sender is waiting to be picked up.
    Outbound(mpsc::Sender<Frame>),
}

impl Waiting {
    fn is_stale(&self) -> bool {
        match self {
            Waiting::Inbound(sender) => sender.is_closed(),
            Waiting::Outbound(sender) => sender.is_closed(),
        }
    }
}

/// What an in side gets when it joins a channel.
#[derive(Debug)]
pub enum InboundLink {
    /// The out side was already waiting.
    Paired(mpsc::Sender<Frame>),
    /// Resolves once an out side joins. Fails if a newer in side took over the channel.
    Waiting(oneshot::Receiver<mpsc::Sender<Frame>>),
}

/// At most one pending connection per channel.
#[derive(Debug, Default)]
pub struct RelayRegistry {
    channels: Mutex<HashMap<String, Waiting>>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn join_inbound(&self, channel: &str) -> InboundLink {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut channels);

        if let Some(Waiting::Outbound(sender)) = channels.remove(channel) {
            info!(channel, "relay paired, out side was waiting");
            return InboundLink::Paired(sender);
        }

        let (tx, rx) = oneshot::channel();
        if channels.insert(channel.to_string(), Waiting::Inbound(tx)).is_some() {
            debug!(channel, "replaced pending in side");
        }
        InboundLink::Waiting(rx)
    }

    /// Returns the receiving end the in side will forward to, now or once it arrives.
    pub fn join_outbound(&self, channel: &str) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);

        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut channels);

        let tx = match channels.remove(channel) {
            Some(Waiting::Inbound(waiting)) => match waiting.send(tx) {
                Ok(()) => {
                    info!(channel, "relay paired, in side was waiting");
                    return rx;
                }
                Err(tx) => tx,
            },
            Some(Waiting::Outbound(_)) => {
                debug!(channel, "replaced pending out side");
                tx
            }
            None => tx,
        };

        channels.insert(channel.to_string(), Waiting::Outbound(tx));
        rx
    }

    /// Number of channels with a pending connection.
    pub fn pending(&self) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut channels);
        channels.len()
    }
}

/// Drops entries whose connection has gone away.
fn prune(channels: &mut HashMap<String, Waiting>) {
    channels.retain(|_, waiting| !waiting.is_stale());
}
