// Copyright (c) 2024 Botho Foundation

//! The swarm task: owns the libp2p swarm and serves handle commands.
//!
//! One task per node drives the swarm. Subscriptions are delivered through
//! per-topic channels; dropping the sending side (on unsubscribe or
//! shutdown) is what terminates reader tasks, so cancellation cascades
//! without any extra signalling.

use crate::{
    behaviour::{DasBehaviour, DasBehaviourEvent},
    config::OverlayConfig,
    error::{GossipError, GossipResult},
    handle::{Command, Connectedness, GossipHandle, GossipMessage, Subscription, Validation},
};
use futures::StreamExt;
use libp2p::{
    core::upgrade,
    gossipsub::{self, IdentTopic, MessageAcceptance, TopicHash},
    identify, noise, plaintext,
    swarm::{dial_opts::DialOpts, DialError, SwarmEvent},
    tcp, upnp, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder, Transport,
};
use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// How long to wait for the listener to come up during start.
const LISTEN_TIMEOUT: Duration = Duration::from_secs(10);

/// The overlay service. Created once per node, consumed by [`start`].
///
/// [`start`]: GossipService::start
pub struct GossipService {
    keypair: libp2p::identity::Keypair,
    config: OverlayConfig,
}

impl GossipService {
    /// Create the service with a fresh ed25519 identity.
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            keypair: libp2p::identity::Keypair::generate_ed25519(),
            config,
        }
    }

    /// The local peer id, stable from construction.
    pub fn local_peer_id(&self) -> PeerId {
        PeerId::from(self.keypair.public())
    }

    /// Bind the listener and spawn the swarm task.
    ///
    /// Returns the command handle and the bound listen addresses.
    pub async fn start(
        self,
        ip: IpAddr,
        port: u16,
    ) -> GossipResult<(GossipHandle, Vec<Multiaddr>)> {
        let local_peer_id = self.local_peer_id();
        let config = self.config.clone();
        let mut swarm = self.build_swarm()?;

        let listen_addr: Multiaddr = match ip {
            IpAddr::V4(ip) => format!("/ip4/{ip}/tcp/{port}"),
            IpAddr::V6(ip) => format!("/ip6/{ip}/tcp/{port}"),
        }
        .parse()
        .map_err(|e: libp2p::multiaddr::Error| GossipError::Listen(e.to_string()))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| GossipError::Listen(e.to_string()))?;

        // Surface bind failures from start instead of the background task.
        let listen_addrs = tokio::time::timeout(LISTEN_TIMEOUT, async {
            loop {
                match swarm.select_next_some().await {
                    SwarmEvent::NewListenAddr { address, .. } => {
                        debug!(%address, "listening");
                        break Ok(vec![address]);
                    }
                    SwarmEvent::ListenerError { error, .. } => {
                        break Err(GossipError::Listen(error.to_string()));
                    }
                    _ => trace!("event before listener ready"),
                }
            }
        })
        .await
        .map_err(|_| GossipError::Listen("timed out waiting for listener".into()))??;

        let (tx, command_rx) = mpsc::channel(config.command_buffer);
        let task = SwarmTask {
            swarm,
            config,
            command_rx,
            subscriptions: HashMap::new(),
            unreachable: HashSet::new(),
            pending_dials: HashMap::new(),
        };
        tokio::spawn(task.run());

        Ok((GossipHandle { local_peer_id, tx }, listen_addrs))
    }

    fn build_swarm(self) -> GossipResult<Swarm<DasBehaviour>> {
        let config = self.config.clone();
        let idle = config.idle_connection_timeout;
        let swarm = if config.disable_transport_security {
            SwarmBuilder::with_existing_identity(self.keypair)
                .with_tokio()
                .with_other_transport(|key| {
                    tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
                        .upgrade(upgrade::Version::V1)
                        .authenticate(plaintext::Config::new(key))
                        .multiplex(yamux::Config::default())
                })
                .map_err(|e| GossipError::Libp2p(e.to_string()))?
                .with_behaviour(|key| {
                    DasBehaviour::new(key, &config)
                        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                })
                .map_err(|e| GossipError::Libp2p(e.to_string()))?
                .with_swarm_config(|c| c.with_idle_connection_timeout(idle))
                .build()
        } else {
            SwarmBuilder::with_existing_identity(self.keypair)
                .with_tokio()
                .with_tcp(
                    tcp::Config::default().nodelay(true),
                    noise::Config::new,
                    yamux::Config::default,
                )
                .map_err(|e| GossipError::Libp2p(e.to_string()))?
                .with_behaviour(|key| {
                    DasBehaviour::new(key, &config)
                        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                })
                .map_err(|e| GossipError::Libp2p(e.to_string()))?
                .with_swarm_config(|c| c.with_idle_connection_timeout(idle))
                .build()
        };
        Ok(swarm)
    }
}

struct SwarmTask {
    swarm: Swarm<DasBehaviour>,
    config: OverlayConfig,
    command_rx: mpsc::Receiver<Command>,
    subscriptions: HashMap<TopicHash, mpsc::Sender<GossipMessage>>,
    unreachable: HashSet<PeerId>,
    pending_dials: HashMap<PeerId, Vec<oneshot::Sender<GossipResult<()>>>>,
}

impl SwarmTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }
        debug!("overlay swarm task stopping");
        // Dropping the delivery senders terminates all reader tasks.
        self.subscriptions.clear();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe { topic, reply } => {
                let _ = reply.send(self.subscribe(topic));
            }
            Command::Unsubscribe { topic } => {
                let ident = IdentTopic::new(topic);
                let _ = self.swarm.behaviour_mut().gossipsub.unsubscribe(&ident);
                self.subscriptions.remove(&ident.hash());
            }
            Command::Publish { topic, data, reply } => {
                let _ = reply.send(self.publish(topic, data));
            }
            Command::TopicPeers { topic, reply } => {
                let hash = IdentTopic::new(topic).hash();
                let count = self
                    .swarm
                    .behaviour()
                    .gossipsub
                    .all_peers()
                    .filter(|(_, topics)| topics.contains(&&hash))
                    .count();
                let _ = reply.send(count);
            }
            Command::Connectedness { peer, reply } => {
                let state = if self.swarm.is_connected(&peer) {
                    Connectedness::Connected
                } else if self.unreachable.contains(&peer) {
                    Connectedness::Unreachable
                } else {
                    Connectedness::NotConnected
                };
                let _ = reply.send(state);
            }
            Command::Dial { peer, addrs, reply } => self.dial(peer, addrs, reply),
            Command::PeerCount { reply } => {
                let _ = reply.send(self.swarm.connected_peers().count());
            }
            Command::Report {
                id,
                propagation_source,
                validation,
            } => {
                let acceptance = match validation {
                    Validation::Accept => MessageAcceptance::Accept,
                    Validation::Reject => MessageAcceptance::Reject,
                    Validation::Ignore => MessageAcceptance::Ignore,
                };
                let _ = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .report_message_validation_result(&id, &propagation_source, acceptance);
            }
            // Handled by the select loop.
            Command::Shutdown => {}
        }
    }

    fn subscribe(&mut self, topic: String) -> GossipResult<Subscription> {
        let ident = IdentTopic::new(topic.clone());
        if self.subscriptions.contains_key(&ident.hash()) {
            return Err(GossipError::AlreadySubscribed(topic));
        }
        self.swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&ident)
            .map_err(|e| GossipError::Subscribe {
                topic: topic.clone(),
                reason: format!("{e:?}"),
            })?;
        let (tx, rx) = mpsc::channel(self.config.subscription_buffer);
        self.subscriptions.insert(ident.hash(), tx);
        Ok(Subscription { topic, rx })
    }

    fn publish(&mut self, topic: String, data: Vec<u8>) -> GossipResult<()> {
        let ident = IdentTopic::new(topic.clone());
        match self.swarm.behaviour_mut().gossipsub.publish(ident, data) {
            Ok(_) => Ok(()),
            Err(gossipsub::PublishError::InsufficientPeers) => Err(GossipError::NoPeers(topic)),
            Err(e) => Err(GossipError::Publish {
                topic,
                reason: format!("{e:?}"),
            }),
        }
    }

    fn dial(&mut self, peer: PeerId, addrs: Vec<Multiaddr>, reply: oneshot::Sender<GossipResult<()>>) {
        if self.swarm.is_connected(&peer) {
            let _ = reply.send(Ok(()));
            return;
        }
        let opts = DialOpts::peer_id(peer).addresses(addrs).build();
        self.pending_dials.entry(peer).or_default().push(reply);
        match self.swarm.dial(opts) {
            Ok(()) => {}
            // A dial to this peer is already in flight; its outcome will
            // resolve our reply too.
            Err(DialError::DialPeerConditionFalse(_)) => {}
            Err(e) => self.resolve_dials(&peer, Err(e.to_string())),
        }
    }

    fn resolve_dials(&mut self, peer: &PeerId, outcome: Result<(), String>) {
        let Some(replies) = self.pending_dials.remove(peer) else {
            return;
        };
        for reply in replies {
            let _ = reply.send(match &outcome {
                Ok(()) => Ok(()),
                Err(reason) => Err(GossipError::Dial {
                    peer: peer.to_string(),
                    reason: reason.clone(),
                }),
            });
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<DasBehaviourEvent>) {
        match event {
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                trace!(%peer_id, "connection established");
                self.unreachable.remove(&peer_id);
                self.resolve_dials(&peer_id, Ok(()));
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                trace!(%peer_id, ?cause, "connection closed");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                if let Some(peer) = peer_id {
                    debug!(%peer, %error, "outgoing connection failed");
                    self.unreachable.insert(peer);
                    self.resolve_dials(&peer, Err(error.to_string()));
                }
            }
            SwarmEvent::Behaviour(DasBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message_id,
                message,
            })) => self.deliver(propagation_source, message_id, message),
            SwarmEvent::Behaviour(DasBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                ..
            })) => {
                trace!(%peer_id, "identify received");
            }
            SwarmEvent::Behaviour(DasBehaviourEvent::Upnp(event)) => {
                if let upnp::Event::GatewayNotFound = event {
                    warn!("no UPnP gateway found");
                } else {
                    debug!(?event, "upnp");
                }
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                debug!(%address, "listening");
            }
            _ => {}
        }
    }

    fn deliver(
        &mut self,
        propagation_source: PeerId,
        id: gossipsub::MessageId,
        message: gossipsub::Message,
    ) {
        let Some(tx) = self.subscriptions.get(&message.topic) else {
            // Topic we already left; do not hold up gossipsub's cache.
            let _ = self
                .swarm
                .behaviour_mut()
                .gossipsub
                .report_message_validation_result(&id, &propagation_source, MessageAcceptance::Ignore);
            return;
        };
        let delivery = GossipMessage {
            id,
            propagation_source,
            data: message.data,
        };
        match tx.try_send(delivery) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(topic = %message.topic, "subscription buffer full, dropping message");
                let _ = self.swarm.behaviour_mut().gossipsub.report_message_validation_result(
                    &msg.id,
                    &propagation_source,
                    MessageAcceptance::Ignore,
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let ident = IdentTopic::new(message.topic.as_str().to_string());
                let _ = self.swarm.behaviour_mut().gossipsub.unsubscribe(&ident);
                self.subscriptions.remove(&message.topic);
            }
        }
    }
}
