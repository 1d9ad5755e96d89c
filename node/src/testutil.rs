// Copyright (c) 2024 Botho Foundation

//! In-memory overlay and fixtures for exercising the event-loop logic
//! without sockets.

use crate::{
    config::{Config, ExpandedConfig},
    discovery::{Discovery, MockDiscovery},
    node::{EventLoop, LoopState},
    peering::DIAL_QUEUE_CAPACITY,
    shuffling::shard_committee_shuffling,
    types::{Slot, VerticalIndex},
};
use async_trait::async_trait;
use das_gossip::{
    message_id, Connectedness, Gossip, GossipError, GossipMessage, GossipResult, Multiaddr,
    PeerId, Subscription, Validation,
};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};
use tokio::sync::mpsc;

/// The default config, shrunk to a validator registry that shuffles fast in
/// debug builds. Derived parameters (1024 sample subnets, 16+4 indices) are
/// unchanged.
pub(crate) fn test_config() -> Config {
    Config {
        validator_count: 2048,
        ..Default::default()
    }
}

/// Wait out detached tasks spawned by the code under test.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Build an event loop over a mock overlay and a fresh discovery registry.
pub(crate) fn make_event_loop(config: Config) -> (EventLoop<MockGossip>, Arc<MockDiscovery>) {
    let conf = Arc::new(config.expand().expect("test config must be valid"));
    let (shard_to_vals, _) = shard_committee_shuffling(&conf, 0);
    let disc = Arc::new(MockDiscovery::default());
    let (dial_tx, dial_rx) = mpsc::channel(DIAL_QUEUE_CAPACITY);
    let node = EventLoop {
        conf,
        gossip: MockGossip::new(),
        disc: disc.clone() as Arc<dyn Discovery>,
        validators: Arc::new(RwLock::new(BTreeSet::new())),
        shard_to_vals: Arc::new(shard_to_vals),
        slow_indices: HashMap::new(),
        fast_indices: HashMap::new(),
        dial_tx,
        dial_rx,
        state: LoopState::Init,
    };
    (node, disc)
}

/// Register a random peer whose predicted slow set covers `subnet` at
/// `slot`.
pub(crate) fn plant_backbone_peer(
    conf: &ExpandedConfig,
    disc: &Arc<MockDiscovery>,
    subnet: VerticalIndex,
    slot: Slot,
) -> PeerId {
    loop {
        let peer = PeerId::random();
        let predicted = conf.das_slow_subnet_indices(&peer.to_bytes(), slot, conf.slow_indices);
        if predicted.contains(&subnet) {
            let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().expect("static multiaddr");
            disc.register(peer, vec![addr]);
            return peer;
        }
    }
}

#[derive(Default)]
struct MockState {
    senders: HashMap<String, mpsc::Sender<GossipMessage>>,
    subscribes: usize,
    unsubscribed: Vec<String>,
    topic_peers: HashMap<String, usize>,
    connected: HashSet<PeerId>,
    unreachable: HashSet<PeerId>,
    published: Vec<(String, Vec<u8>)>,
    dialed: Vec<PeerId>,
    reports: Vec<Validation>,
    fail_subscribes: bool,
}

/// A [`Gossip`] implementation backed by plain maps.
///
/// Subscriptions are real channels, so reader tasks behave exactly as with
/// the libp2p overlay; everything else records calls for assertions.
#[derive(Clone)]
pub(crate) struct MockGossip {
    local: PeerId,
    state: Arc<Mutex<MockState>>,
}

impl MockGossip {
    pub(crate) fn new() -> Self {
        Self {
            local: PeerId::random(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock overlay lock poisoned")
    }

    pub(crate) fn subscribe_count(&self) -> usize {
        self.lock().subscribes
    }

    pub(crate) fn unsubscribe_count(&self) -> usize {
        self.lock().unsubscribed.len()
    }

    pub(crate) fn unsubscribed_topics(&self) -> Vec<String> {
        self.lock().unsubscribed.clone()
    }

    pub(crate) fn topic_subscribed(&self, topic: &str) -> bool {
        self.lock().senders.contains_key(topic)
    }

    pub(crate) fn subscribed_topics(&self) -> Vec<String> {
        self.lock().senders.keys().cloned().collect()
    }

    pub(crate) fn set_topic_peers(&self, topic: &str, count: usize) {
        self.lock().topic_peers.insert(topic.to_string(), count);
    }

    pub(crate) fn set_connected(&self, peer: PeerId) {
        self.lock().connected.insert(peer);
    }

    pub(crate) fn set_unreachable(&self, peer: PeerId) {
        self.lock().unreachable.insert(peer);
    }

    pub(crate) fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().published.clone()
    }

    pub(crate) fn reports(&self) -> Vec<Validation> {
        self.lock().reports.clone()
    }

    pub(crate) fn fail_all_subscribes(&self, fail: bool) {
        self.lock().fail_subscribes = fail;
    }

    /// Push a message into a subscribed topic's delivery channel.
    pub(crate) fn inject(&self, topic: &str, data: Vec<u8>) {
        let sender = self
            .lock()
            .senders
            .get(topic)
            .cloned()
            .expect("inject on a topic without a subscription");
        let message = GossipMessage {
            id: message_id(&data),
            propagation_source: PeerId::random(),
            data,
        };
        sender.try_send(message).expect("mock delivery buffer full");
    }
}

#[async_trait]
impl Gossip for MockGossip {
    fn local_peer_id(&self) -> PeerId {
        self.local
    }

    async fn subscribe(&self, topic: &str) -> GossipResult<Subscription> {
        let mut state = self.lock();
        if state.fail_subscribes {
            return Err(GossipError::Subscribe {
                topic: topic.to_string(),
                reason: "mock subscribe failure".to_string(),
            });
        }
        if state.senders.contains_key(topic) {
            return Err(GossipError::AlreadySubscribed(topic.to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        state.senders.insert(topic.to_string(), tx);
        state.subscribes += 1;
        Ok(Subscription::new(topic.to_string(), rx))
    }

    async fn unsubscribe(&self, topic: &str) -> GossipResult<()> {
        let mut state = self.lock();
        state.senders.remove(topic);
        state.unsubscribed.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> GossipResult<()> {
        self.lock().published.push((topic.to_string(), data));
        Ok(())
    }

    async fn topic_peers(&self, topic: &str) -> GossipResult<usize> {
        Ok(self.lock().topic_peers.get(topic).copied().unwrap_or(0))
    }

    async fn connectedness(&self, peer: &PeerId) -> GossipResult<Connectedness> {
        let state = self.lock();
        if state.connected.contains(peer) {
            Ok(Connectedness::Connected)
        } else if state.unreachable.contains(peer) {
            Ok(Connectedness::Unreachable)
        } else {
            Ok(Connectedness::NotConnected)
        }
    }

    async fn dial(&self, peer: PeerId, _addrs: Vec<Multiaddr>) -> GossipResult<()> {
        self.lock().dialed.push(peer);
        Ok(())
    }

    async fn peer_count(&self) -> GossipResult<usize> {
        Ok(self.lock().connected.len())
    }

    async fn report(&self, _message: &GossipMessage, validation: Validation) {
        self.lock().reports.push(validation);
    }
}
