// Copyright (c) 2024 Botho Foundation

//! Command handle and subscription types for the overlay.
//!
//! The swarm runs on its own task; everything else talks to it through a
//! cloneable [`GossipHandle`]. The [`Gossip`] trait is the seam the node
//! core is written against, so rotation and peering logic can be exercised
//! with an in-memory overlay in tests.

use crate::error::{GossipError, GossipResult};
use async_trait::async_trait;
use libp2p::{gossipsub::MessageId, Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};

/// A message received on a subscribed topic.
#[derive(Debug, Clone)]
pub struct GossipMessage {
    /// Content-derived message id.
    pub id: MessageId,

    /// The peer the message was forwarded by.
    pub propagation_source: PeerId,

    /// Message payload.
    pub data: Vec<u8>,
}

/// Outcome of validating a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Valid; forward to mesh peers.
    Accept,
    /// Invalid; penalize the propagation source.
    Reject,
    /// Not actionable; do not forward, do not penalize.
    Ignore,
}

/// Connection state of a remote peer, as far as the overlay knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectedness {
    /// An open connection exists.
    Connected,

    /// No connection, no reason to believe dialing would fail.
    NotConnected,

    /// The most recent dial attempt failed.
    Unreachable,
}

/// An active subscription to one topic.
///
/// Messages arrive through [`Subscription::next`]; `None` means the
/// subscription was cancelled or the overlay shut down, and the reader
/// should exit.
pub struct Subscription {
    pub(crate) topic: String,
    pub(crate) rx: mpsc::Receiver<GossipMessage>,
}

impl Subscription {
    /// Wrap a delivery channel as a subscription. This is how alternative
    /// [`Gossip`] implementations (in-memory overlays for tests) hand out
    /// subscriptions.
    pub fn new(topic: String, rx: mpsc::Receiver<GossipMessage>) -> Self {
        Self { topic, rx }
    }

    /// The topic this subscription reads from.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message.
    pub async fn next(&mut self) -> Option<GossipMessage> {
        self.rx.recv().await
    }
}

/// Commands sent from handles to the swarm task.
pub(crate) enum Command {
    Subscribe {
        topic: String,
        reply: oneshot::Sender<GossipResult<Subscription>>,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<GossipResult<()>>,
    },
    TopicPeers {
        topic: String,
        reply: oneshot::Sender<usize>,
    },
    Connectedness {
        peer: PeerId,
        reply: oneshot::Sender<Connectedness>,
    },
    Dial {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<GossipResult<()>>,
    },
    PeerCount {
        reply: oneshot::Sender<usize>,
    },
    Report {
        id: MessageId,
        propagation_source: PeerId,
        validation: Validation,
    },
    Shutdown,
}

/// The overlay surface the node core is written against.
#[async_trait]
pub trait Gossip: Clone + Send + Sync + 'static {
    /// The local peer identity.
    fn local_peer_id(&self) -> PeerId;

    /// Subscribe to a topic and start receiving its messages.
    async fn subscribe(&self, topic: &str) -> GossipResult<Subscription>;

    /// Cancel the subscription to a topic. Pending readers observe `None`.
    async fn unsubscribe(&self, topic: &str) -> GossipResult<()>;

    /// Publish a payload to a topic.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> GossipResult<()>;

    /// Number of known peers subscribed to a topic.
    async fn topic_peers(&self, topic: &str) -> GossipResult<usize>;

    /// Connection state of a remote peer.
    async fn connectedness(&self, peer: &PeerId) -> GossipResult<Connectedness>;

    /// Open an outbound connection to a peer at the given addresses,
    /// resolving once the connection is established or failed.
    async fn dial(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> GossipResult<()>;

    /// Total connected peer count.
    async fn peer_count(&self) -> GossipResult<usize>;

    /// Report the validation outcome for a received message.
    async fn report(&self, message: &GossipMessage, validation: Validation);
}

/// Cloneable handle to the swarm task.
#[derive(Clone)]
pub struct GossipHandle {
    pub(crate) local_peer_id: PeerId,
    pub(crate) tx: mpsc::Sender<Command>,
}

impl GossipHandle {
    /// Ask the swarm task to shut down. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    async fn send(&self, command: Command) -> GossipResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| GossipError::ChannelClosed)
    }

    async fn response<T>(&self, response: oneshot::Receiver<T>) -> GossipResult<T> {
        response.await.map_err(|_| GossipError::ChannelClosed)
    }
}

#[async_trait]
impl Gossip for GossipHandle {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn subscribe(&self, topic: &str) -> GossipResult<Subscription> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Subscribe {
            topic: topic.to_string(),
            reply,
        })
        .await?;
        self.response(response).await?
    }

    async fn unsubscribe(&self, topic: &str) -> GossipResult<()> {
        self.send(Command::Unsubscribe {
            topic: topic.to_string(),
        })
        .await
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> GossipResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Publish {
            topic: topic.to_string(),
            data,
            reply,
        })
        .await?;
        self.response(response).await?
    }

    async fn topic_peers(&self, topic: &str) -> GossipResult<usize> {
        let (reply, response) = oneshot::channel();
        self.send(Command::TopicPeers {
            topic: topic.to_string(),
            reply,
        })
        .await?;
        self.response(response).await
    }

    async fn connectedness(&self, peer: &PeerId) -> GossipResult<Connectedness> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Connectedness { peer: *peer, reply }).await?;
        self.response(response).await
    }

    async fn dial(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> GossipResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Dial { peer, addrs, reply }).await?;
        self.response(response).await?
    }

    async fn peer_count(&self) -> GossipResult<usize> {
        let (reply, response) = oneshot::channel();
        self.send(Command::PeerCount { reply }).await?;
        self.response(response).await
    }

    async fn report(&self, message: &GossipMessage, validation: Validation) {
        let _ = self
            .tx
            .send(Command::Report {
                id: message.id.clone(),
                propagation_source: message.propagation_source,
                validation,
            })
            .await;
    }
}
