// Copyright (c) 2024 Botho Foundation

//! The discovery oracle.
//!
//! The core only needs two answers from discovery: addresses for a peer id,
//! and, for a set of wanted subnets, which known peers are predicted (via
//! the deterministic slow-set derivation) to be subscribed there. A real
//! deployment would back this with a DHT or ENR crawl; tests and the local
//! harness use [`MockDiscovery`], a shared in-memory registry.

use crate::{
    config::ExpandedConfig,
    types::{Slot, VerticalIndex},
};
use das_gossip::{Multiaddr, PeerId};
use std::{
    collections::{BTreeSet, HashMap},
    sync::RwLock,
};

/// Address lookup and backbone prediction.
pub trait Discovery: Send + Sync {
    /// Known addresses of a peer. Empty when the peer is unknown.
    fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr>;

    /// For each queried subnet, the peers predicted to have it in their
    /// slow set at `slot`.
    fn find_public(
        &self,
        conf: &ExpandedConfig,
        slot: Slot,
        query: &BTreeSet<VerticalIndex>,
    ) -> HashMap<VerticalIndex, Vec<PeerId>>;
}

/// In-memory discovery registry shared by every node of a local network.
#[derive(Default)]
pub struct MockDiscovery {
    peers: RwLock<HashMap<PeerId, Vec<Multiaddr>>>,
}

impl MockDiscovery {
    /// Add (or replace) a peer and its addresses.
    pub fn register(&self, peer: PeerId, addrs: Vec<Multiaddr>) {
        self.peers
            .write()
            .expect("discovery registry lock poisoned")
            .insert(peer, addrs);
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers
            .read()
            .expect("discovery registry lock poisoned")
            .len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Discovery for MockDiscovery {
    fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.peers
            .read()
            .expect("discovery registry lock poisoned")
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }

    fn find_public(
        &self,
        conf: &ExpandedConfig,
        slot: Slot,
        query: &BTreeSet<VerticalIndex>,
    ) -> HashMap<VerticalIndex, Vec<PeerId>> {
        let peers = self.peers.read().expect("discovery registry lock poisoned");
        let mut candidates: HashMap<VerticalIndex, Vec<PeerId>> = HashMap::new();
        for peer in peers.keys() {
            let remote = conf.das_slow_subnet_indices(&peer.to_bytes(), slot, conf.slow_indices);
            for subnet in remote {
                if query.contains(&subnet) {
                    candidates.entry(subnet).or_default().push(*peer);
                }
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_addrs_lookup() {
        let disc = MockDiscovery::default();
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/9000".parse().unwrap();
        disc.register(peer, vec![addr.clone()]);

        assert_eq!(disc.addrs(&peer), vec![addr]);
        assert!(disc.addrs(&PeerId::random()).is_empty());
    }

    #[test]
    fn test_find_public_matches_prediction() {
        let conf = Config::default().expand().unwrap();
        let disc = MockDiscovery::default();
        let mut peers = Vec::new();
        for _ in 0..8 {
            let peer = PeerId::random();
            disc.register(peer, vec![]);
            peers.push(peer);
        }

        let slot = Slot(5);
        let query: BTreeSet<VerticalIndex> =
            (0..conf.sample_subnets).map(VerticalIndex).collect();
        let backbone = disc.find_public(&conf, slot, &query);

        for peer in &peers {
            let predicted = conf.das_slow_subnet_indices(&peer.to_bytes(), slot, conf.slow_indices);
            for subnet in predicted {
                assert!(backbone
                    .get(&subnet)
                    .is_some_and(|found| found.contains(peer)));
            }
        }
    }

    #[test]
    fn test_find_public_respects_query() {
        let conf = Config::default().expand().unwrap();
        let disc = MockDiscovery::default();
        disc.register(PeerId::random(), vec![]);

        let backbone = disc.find_public(&conf, Slot(0), &BTreeSet::new());
        assert!(backbone.is_empty());
    }
}
