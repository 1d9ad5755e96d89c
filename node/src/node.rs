// Copyright (c) 2024 Botho Foundation

//! The node: public API and the slot-scheduled event loop.
//!
//! One task owns all membership state and the dial queue. It multiplexes
//! over the kill channel, the slot ticker, the work ticker (two thirds into
//! each slot), and dial-queue pops, and never blocks on I/O itself: dials,
//! publishes, and subscription reads all run on detached tasks.
//!
//! Lifecycle: `Init -> PreGenesis -> Active -> Stopping`. The only
//! transitions are time-driven (genesis passing) and kill-driven
//! (shutdown); stopping cancels every subscription and closes the overlay.

use crate::{
    config::{Config, ExpandedConfig},
    discovery::Discovery,
    error::{NodeError, NodeResult},
    handlers,
    membership::{SubnetFastInfo, SubnetInfo},
    peering::{DIAL_QUEUE_CAPACITY, DIAL_TIMEOUT},
    shuffling::shard_committee_shuffling,
    types::{Shard, Slot, ValidatorIndex, VerticalIndex},
};
use das_gossip::{Gossip, GossipHandle, GossipService, Multiaddr, OverlayConfig, PeerId};
use std::{
    collections::{BTreeSet, HashMap},
    net::IpAddr,
    sync::{Arc, RwLock},
    time::{Duration, SystemTime},
};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

/// Where the event loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopState {
    /// Constructed, no tick observed yet.
    Init,
    /// Ticking, but genesis is still ahead.
    PreGenesis,
    /// Genesis passed; rotations and proposals run.
    Active,
    /// Kill received; tearing down.
    Stopping,
}

/// The event-loop task state. Owns the membership maps and the dial queue;
/// nothing else mutates them.
pub(crate) struct EventLoop<G: Gossip> {
    pub(crate) conf: Arc<ExpandedConfig>,
    pub(crate) gossip: G,
    pub(crate) disc: Arc<dyn Discovery>,
    pub(crate) validators: Arc<RwLock<BTreeSet<ValidatorIndex>>>,
    pub(crate) shard_to_vals: Arc<Vec<Vec<ValidatorIndex>>>,
    pub(crate) slow_indices: HashMap<VerticalIndex, SubnetInfo>,
    pub(crate) fast_indices: HashMap<VerticalIndex, SubnetFastInfo>,
    pub(crate) dial_tx: mpsc::Sender<PeerId>,
    pub(crate) dial_rx: mpsc::Receiver<PeerId>,
    pub(crate) state: LoopState,
}

impl<G: Gossip> EventLoop<G> {
    pub(crate) async fn run(mut self, mut kill_rx: mpsc::Receiver<()>) {
        let work_offset = self.conf.slot_duration() * 2 / 3;
        let work_offset_secs = work_offset.as_secs_f64();
        let mut slot_ticker = self.conf.ticker_with_offset(Duration::ZERO);
        let mut work_ticker = self.conf.ticker_with_offset(work_offset);
        info!(genesis_time = self.conf.genesis_time, "event loop running");

        loop {
            tokio::select! {
                _ = kill_rx.recv() => {
                    info!("stopping work, goodbye!");
                    self.state = LoopState::Stopping;
                    break;
                }
                _ = slot_ticker.tick() => {
                    let (slot, pre_genesis) =
                        self.conf.slot_with_offset(SystemTime::now(), 0.0);
                    if pre_genesis {
                        self.pre_genesis_tick(slot).await;
                    } else {
                        self.slot_tick(slot).await;
                    }
                }
                _ = work_ticker.tick() => {
                    let (slot, pre_genesis) =
                        self.conf.slot_with_offset(SystemTime::now(), work_offset_secs);
                    if !pre_genesis {
                        self.schedule_proposals_maybe(slot);
                    }
                }
                Some(peer) = self.dial_rx.recv() => {
                    self.spawn_dial(peer);
                }
            }
        }

        self.shutdown().await;
    }

    async fn pre_genesis_tick(&mut self, remaining: Slot) {
        if self.state == LoopState::Init {
            self.state = LoopState::PreGenesis;
        }
        // Count down every 10 slots, and every slot near the end.
        if remaining.0 % 10 == 0 || remaining.0 < 10 {
            info!(
                genesis_time = self.conf.genesis_time,
                slots = remaining.0,
                "genesis countdown..."
            );
        }
        // Start building out backbone connectivity before the first slot.
        if remaining.0 % 4 == 0 {
            self.peers_update(Slot(0)).await;
        }
    }

    async fn slot_tick(&mut self, slot: Slot) {
        if self.state != LoopState::Active {
            info!(%slot, "genesis reached, active");
            self.state = LoopState::Active;
        }
        debug!(%slot, "slot event");
        self.rotate_slow(slot).await;
        self.rotate_fast(slot).await;
        self.peers_update(slot).await;
    }

    fn spawn_dial(&self, peer: PeerId) {
        let gossip = self.gossip.clone();
        let disc = self.disc.clone();
        tokio::spawn(async move {
            let addrs = disc.addrs(&peer);
            if addrs.is_empty() {
                debug!(%peer, "no known addresses to dial");
                return;
            }
            match timeout(DIAL_TIMEOUT, gossip.dial(peer, addrs)).await {
                Ok(Ok(())) => debug!(%peer, "connected"),
                Ok(Err(e)) => debug!(%peer, error = %e, "dial failed"),
                Err(_) => warn!(%peer, "dial timed out"),
            }
        });
    }

    async fn shutdown(&mut self) {
        let slow: Vec<(VerticalIndex, SubnetInfo)> = self.slow_indices.drain().collect();
        let fast: Vec<(VerticalIndex, SubnetFastInfo)> = self.fast_indices.drain().collect();
        let entries = slow
            .into_iter()
            .chain(fast.into_iter().map(|(subnet, info)| (subnet, info.sub)));
        for (subnet, info) in entries {
            self.cancel_subnet(subnet).await;
            // Readers observe the cancelled delivery channel and finish.
            let _ = info.task.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn try_pop_dial(&mut self) -> Option<PeerId> {
        self.dial_rx.try_recv().ok()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("peer_id", &self.peer_id).finish_non_exhaustive()
    }
}

/// A DAS node: overlay, membership engine, peering, and proposal engine
/// behind a small handle-style API.
pub struct Node {
    conf: Arc<ExpandedConfig>,
    disc: Arc<dyn Discovery>,
    validators: Arc<RwLock<BTreeSet<ValidatorIndex>>>,
    shard_to_vals: Arc<Vec<Vec<ValidatorIndex>>>,
    val_to_shard: Arc<Vec<Shard>>,
    peer_id: PeerId,
    service: Option<GossipService>,
    handle: Option<GossipHandle>,
    listen_addrs: Vec<Multiaddr>,
    reader_tasks: Vec<JoinHandle<()>>,
    kill_tx: Option<mpsc::Sender<()>>,
    loop_task: Option<JoinHandle<()>>,
}

impl Node {
    /// Validate the configuration and set up node state. No I/O happens
    /// until [`Node::start`].
    pub fn new(config: Config, disc: Arc<dyn Discovery>) -> NodeResult<Self> {
        let conf = Arc::new(config.expand()?);
        let (shard_to_vals, val_to_shard) = shard_committee_shuffling(&conf, 0);

        let overlay = OverlayConfig {
            enable_nat: conf.enable_nat,
            disable_transport_security: conf.disable_transport_security,
            ..Default::default()
        };
        let service = GossipService::new(overlay);
        let peer_id = service.local_peer_id();

        Ok(Self {
            conf,
            disc,
            validators: Arc::new(RwLock::new(BTreeSet::new())),
            shard_to_vals: Arc::new(shard_to_vals),
            val_to_shard: Arc::new(val_to_shard),
            peer_id,
            service: Some(service),
            handle: None,
            listen_addrs: Vec::new(),
            reader_tasks: Vec::new(),
            kill_tx: None,
            loop_task: None,
        })
    }

    /// Add validators operated by this process. May be called while the
    /// node runs; proposal scheduling picks the change up on its next tick.
    pub fn register_validators(&self, indices: &[ValidatorIndex]) {
        let mut local = self
            .validators
            .write()
            .expect("validator set lock poisoned");
        local.extend(indices.iter().copied());
    }

    /// The registered validators, ascending.
    pub fn list_validators(&self) -> Vec<ValidatorIndex> {
        let local = self.validators.read().expect("validator set lock poisoned");
        let mut out = Vec::with_capacity(local.len());
        out.extend(local.iter().copied());
        out
    }

    /// Bind the listener, join the initial topics, and start the event
    /// loop.
    pub async fn start(&mut self, ip: IpAddr, port: u16) -> NodeResult<()> {
        let service = self.service.take().ok_or(NodeError::AlreadyStarted)?;
        let (handle, listen_addrs) = service.start(ip, port).await?;
        self.listen_addrs = listen_addrs;

        // The global header feed is read by everyone.
        let headers_sub = handle.subscribe(&self.conf.headers_topic()).await?;
        self.reader_tasks
            .push(handlers::spawn_headers_reader(handle.clone(), headers_sub));

        // Horizontal subnets for the shards our validators sit on. The
        // committee shuffling is fixed, so this is a one-time setup.
        let shards: BTreeSet<Shard> = {
            let local = self.validators.read().expect("validator set lock poisoned");
            local
                .iter()
                .map(|val| self.val_to_shard[*val as usize])
                .collect()
        };
        info!(shards = ?shards.iter().map(|s| s.0).collect::<Vec<_>>(), "validating on shards");
        for shard in shards {
            match handle.subscribe(&self.conf.horz_topic(shard)).await {
                Ok(sub) => self.reader_tasks.push(handlers::spawn_horizontal_reader(
                    handle.clone(),
                    shard,
                    sub,
                )),
                Err(e) => warn!(%shard, error = %e, "failed to subscribe to shard subnet"),
            }
        }

        let (dial_tx, dial_rx) = mpsc::channel(DIAL_QUEUE_CAPACITY);
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let event_loop = EventLoop {
            conf: self.conf.clone(),
            gossip: handle.clone(),
            disc: self.disc.clone(),
            validators: self.validators.clone(),
            shard_to_vals: self.shard_to_vals.clone(),
            slow_indices: HashMap::new(),
            fast_indices: HashMap::new(),
            dial_tx,
            dial_rx,
            state: LoopState::Init,
        };
        self.loop_task = Some(tokio::spawn(event_loop.run(kill_rx)));
        self.kill_tx = Some(kill_tx);
        self.handle = Some(handle);

        info!(peer_id = %self.peer_id, addrs = ?self.listen_addrs, "node started");
        Ok(())
    }

    /// Connected peer count.
    pub async fn stats(&self) -> NodeResult<usize> {
        let handle = self.handle.as_ref().ok_or(NodeError::NotStarted)?;
        Ok(handle.peer_count().await?)
    }

    /// The local peer id and listen addresses, for discovery registration.
    pub fn disc_info(&self) -> (PeerId, Vec<Multiaddr>) {
        (self.peer_id, self.listen_addrs.clone())
    }

    /// Stop the event loop, cancel subscriptions, and close the overlay.
    /// Idempotent.
    pub async fn close(&mut self) -> NodeResult<()> {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(()).await;
        }
        if let Some(loop_task) = self.loop_task.take() {
            let _ = loop_task.await;
        }
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ConfigError, discovery::MockDiscovery, testutil};

    #[test]
    fn test_startup_gate_rejects_bad_config() {
        let config = Config {
            fast_indices: 10,
            slow_indices: 10,
            max_samples_per_shard_block: 15,
            shard_count: 1,
            validator_count: 64,
            ..Default::default()
        };
        let err = Node::new(config, Arc::new(MockDiscovery::default())).unwrap_err();
        match err {
            NodeError::Config(ConfigError::SubnetBudget { fast, slow, subnets }) => {
                assert_eq!((fast, slow, subnets), (10, 10, 15));
            }
            other => panic!("expected a config error, got {other}"),
        }
    }

    #[test]
    fn test_register_and_list_validators() {
        let node = Node::new(testutil::test_config(), Arc::new(MockDiscovery::default()))
            .unwrap();
        assert!(node.list_validators().is_empty());

        node.register_validators(&[5, 3, 9]);
        node.register_validators(&[3, 11]);
        // Sorted, deduplicated, and free of phantom zero entries.
        assert_eq!(node.list_validators(), vec![3, 5, 9, 11]);
    }

    #[tokio::test]
    async fn test_event_loop_rotates_and_shuts_down_cleanly() {
        let config = Config {
            seconds_per_slot: 1,
            ..testutil::test_config()
        };
        let (node, _disc) = testutil::make_event_loop(config);
        let gossip = node.gossip.clone();

        let (kill_tx, kill_rx) = mpsc::channel(1);
        let task = tokio::spawn(node.run(kill_rx));

        // Let at least one slot tick fire (genesis_time 0 means active).
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(gossip.subscribe_count() >= 10);

        kill_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("event loop must stop on kill")
            .unwrap();

        // Every live subscription was cancelled on the way out.
        assert!(gossip.subscribed_topics().is_empty());
    }

    #[tokio::test]
    async fn test_pre_genesis_loop_does_not_rotate() {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let config = Config {
            seconds_per_slot: 1,
            genesis_time: now + 1000,
            ..testutil::test_config()
        };
        let (node, _disc) = testutil::make_event_loop(config);
        let gossip = node.gossip.clone();

        let (kill_tx, kill_rx) = mpsc::channel(1);
        let task = tokio::spawn(node.run(kill_rx));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(gossip.subscribe_count(), 0);

        kill_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("event loop must stop on kill")
            .unwrap();
    }
}
