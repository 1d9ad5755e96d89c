// Copyright (c) 2024 Botho Foundation

//! Per-subnet peer maintenance.
//!
//! Once per slot the event loop checks every subscribed vertical subnet
//! against the target peer count and, for the ones running short, asks
//! discovery for backbone candidates (peers whose predicted slow set covers
//! the subnet). Candidates are queued on a small dial queue that the event
//! loop drains into individual dial tasks; the queue never blocks and
//! overflow is dropped, so a slow dialer cannot stall the loop.

use crate::{node::EventLoop, types::Slot, types::VerticalIndex};
use das_gossip::{Connectedness, Gossip};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

/// Capacity of the dial queue. Enqueue attempts beyond this are dropped.
pub(crate) const DIAL_QUEUE_CAPACITY: usize = 30;

/// Deadline for a single outbound dial.
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

impl<G: Gossip> EventLoop<G> {
    /// Top up peers on every subscribed subnet that is below target.
    pub(crate) async fn peers_update(&mut self, slot: Slot) {
        let target = self.conf.target_peers_per_das_sub;
        let active: BTreeSet<VerticalIndex> = self
            .slow_indices
            .keys()
            .chain(self.fast_indices.keys())
            .copied()
            .collect();

        let mut peer_counts: HashMap<VerticalIndex, u64> = HashMap::new();
        let mut want = BTreeSet::new();
        for subnet in active {
            match self.gossip.topic_peers(&self.conf.vert_topic(subnet)).await {
                Ok(count) => {
                    if (count as u64) < target {
                        peer_counts.insert(subnet, count as u64);
                        want.insert(subnet);
                    }
                }
                Err(e) => warn!(%subnet, error = %e, "failed to count topic peers"),
            }
        }
        if want.is_empty() {
            return;
        }

        let backbone = self.disc.find_public(&self.conf, slot, &want);
        let self_id = self.gossip.local_peer_id();
        for subnet in &want {
            let current = peer_counts[subnet];
            let Some(candidates) = backbone.get(subnet) else {
                warn!(%subnet, topic_peers = current, "backbone has no candidates for subnet");
                continue;
            };

            let mut dials = 0u64;
            for peer in candidates {
                if *peer == self_id {
                    continue;
                }
                if current + dials >= target {
                    break;
                }
                match self.gossip.connectedness(peer).await {
                    Ok(Connectedness::Connected) | Ok(Connectedness::Unreachable) => continue,
                    Ok(Connectedness::NotConnected) => {
                        // Non-blocking: a full queue drops the candidate.
                        if self.dial_tx.try_send(*peer).is_ok() {
                            dials += 1;
                        }
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "connectedness query failed"),
                }
            }
            if current + dials < target {
                debug!(
                    %subnet,
                    topic_peers = current,
                    dials,
                    "not enough backbone peers to reach target"
                );
            }
        }
    }
}
