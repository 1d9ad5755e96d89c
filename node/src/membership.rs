// Copyright (c) 2024 Botho Foundation

//! Per-slot rotation of the slow and fast vertical subnet sets.
//!
//! Both rotations run once per slot from the event loop, slow before fast.
//! The slow set is the deterministic public membership from
//! [`crate::sampling`]; the fast set is locally random and private. A
//! subnet never appears in both maps: when the slow set wants a subnet that
//! is currently held as a fast entry, the entry moves over and keeps its
//! live subscription.

use crate::{
    handlers,
    node::EventLoop,
    types::{Slot, VerticalIndex},
};
use das_gossip::{Gossip, GossipResult};
use rand::{rngs::OsRng, Rng};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How far ahead `rotate_slow` looks to keep a subnet it is about to want
/// again, avoiding a quick leave/rejoin.
const SLOW_LOOKAHEAD_SLOTS: u64 = 32;

/// A live subnet subscription.
pub struct SubnetInfo {
    /// Slot the subscription was opened at.
    pub subscribed_at: Slot,
    /// The reader task draining the subscription. It exits on its own when
    /// the subscription is cancelled.
    pub task: JoinHandle<()>,
}

/// A fast-set subscription: a [`SubnetInfo`] with a rotation deadline.
pub struct SubnetFastInfo {
    /// The subscription.
    pub sub: SubnetInfo,
    /// The entry is replaced at the first rotation at or after this slot.
    pub expiry: Slot,
}

impl<G: Gossip> EventLoop<G> {
    /// Open a subscription on a vertical subnet and spawn its reader.
    pub(crate) async fn open_subnet(
        &self,
        subnet: VerticalIndex,
        slot: Slot,
    ) -> GossipResult<SubnetInfo> {
        let sub = self.gossip.subscribe(&self.conf.vert_topic(subnet)).await?;
        let task = handlers::spawn_vertical_reader(self.gossip.clone(), self.conf.clone(), subnet, sub);
        Ok(SubnetInfo {
            subscribed_at: slot,
            task,
        })
    }

    /// Cancel the subscription on a vertical subnet. The reader ends once
    /// the overlay drops its delivery channel.
    pub(crate) async fn cancel_subnet(&self, subnet: VerticalIndex) {
        if let Err(e) = self.gossip.unsubscribe(&self.conf.vert_topic(subnet)).await {
            warn!(%subnet, error = %e, "failed to cancel subnet subscription");
        }
    }

    /// Bring the slow map in line with the deterministic membership for
    /// `slot`. Handles skipped slots: membership is a function of the slot,
    /// not of how many rotations ran before.
    pub(crate) async fn rotate_slow(&mut self, slot: Slot) {
        let self_id = self.gossip.local_peer_id().to_bytes();
        let want = self
            .conf
            .das_slow_subnet_indices(&self_id, slot, self.conf.slow_indices);
        let want_future = self.conf.das_slow_subnet_indices(
            &self_id,
            Slot(slot.0 + SLOW_LOOKAHEAD_SLOTS),
            self.conf.slow_indices,
        );

        // Cancel topics we left, unless we are about to want them again.
        let stale: Vec<VerticalIndex> = self
            .slow_indices
            .keys()
            .copied()
            .filter(|subnet| !want.contains(subnet) && !want_future.contains(subnet))
            .collect();
        for subnet in stale {
            if let Some(info) = self.slow_indices.remove(&subnet) {
                debug!(%subnet, %slot, subscribed_at = %info.subscribed_at, "leaving slow subnet");
                self.cancel_subnet(subnet).await;
            }
        }

        // Join what is newly wanted. Not everything rotates all the time.
        for subnet in want {
            if self.slow_indices.contains_key(&subnet) {
                continue;
            }
            // Sometimes we are already subscribed privately; move the entry
            // over and keep the subscription running.
            if let Some(fast) = self.fast_indices.remove(&subnet) {
                debug!(%subnet, %slot, "moving fast subnet to slow set");
                self.slow_indices.insert(subnet, fast.sub);
                continue;
            }
            match self.open_subnet(subnet, slot).await {
                Ok(info) => {
                    debug!(%subnet, %slot, "joined slow subnet");
                    self.slow_indices.insert(subnet, info);
                }
                Err(e) => {
                    warn!(%subnet, error = %e, "failed to subscribe to slow subnet");
                }
            }
        }
    }

    /// Expire due fast entries and refill the fast map with uniformly
    /// random subnets not already held, reusing the subscriptions of
    /// just-expired entries when they are drawn again.
    pub(crate) async fn rotate_fast(&mut self, slot: Slot) {
        let mut old: HashMap<VerticalIndex, SubnetFastInfo> = HashMap::new();
        let expired: Vec<VerticalIndex> = self
            .fast_indices
            .iter()
            .filter(|(_, info)| info.expiry.0 <= slot.0)
            .map(|(subnet, _)| *subnet)
            .collect();
        for subnet in expired {
            if let Some(info) = self.fast_indices.remove(&subnet) {
                old.insert(subnet, info);
            }
        }

        while (self.fast_indices.len() as u64) < self.conf.fast_indices {
            // Everything is already held; no draw can succeed.
            let held = self.slow_indices.len() + self.fast_indices.len();
            if held as u64 >= self.sample_subnets() {
                break;
            }
            let subnet = VerticalIndex(OsRng.gen_range(0..self.sample_subnets()));
            if self.slow_indices.contains_key(&subnet) || self.fast_indices.contains_key(&subnet) {
                continue;
            }
            let expiry = self.fresh_fast_expiry(slot);
            if let Some(mut prev) = old.remove(&subnet) {
                debug!(%subnet, %slot, %expiry, "re-drew expiring fast subnet");
                prev.expiry = expiry;
                self.fast_indices.insert(subnet, prev);
                continue;
            }
            match self.open_subnet(subnet, slot).await {
                Ok(info) => {
                    debug!(%subnet, %slot, %expiry, "joined fast subnet");
                    self.fast_indices
                        .insert(subnet, SubnetFastInfo { sub: info, expiry });
                }
                Err(e) => {
                    // Retry on the next slot tick rather than spinning here.
                    warn!(%subnet, error = %e, "failed to subscribe to fast subnet");
                    break;
                }
            }
        }

        // Whatever expired and was not re-drawn is gone for real.
        for (subnet, _) in old {
            debug!(%subnet, %slot, "leaving fast subnet");
            self.cancel_subnet(subnet).await;
        }
    }

    fn sample_subnets(&self) -> u64 {
        self.conf.sample_subnets
    }

    fn fresh_fast_expiry(&self, slot: Slot) -> Slot {
        Slot(slot.0 + 1 + OsRng.gen_range(0..self.conf.slots_per_fast_rotation_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, testutil};

    fn check_invariants(node: &EventLoop<testutil::MockGossip>, slot: Slot) {
        // Slow set bounded by the configured size (absent lookahead holds).
        assert!(node.slow_indices.len() as u64 <= node.conf.slow_indices);
        // Fast set is exactly full after a rotation.
        assert_eq!(node.fast_indices.len() as u64, node.conf.fast_indices);
        // Disjoint maps.
        for subnet in node.fast_indices.keys() {
            assert!(!node.slow_indices.contains_key(subnet));
        }
        // Live expiries only.
        for info in node.fast_indices.values() {
            assert!(info.expiry.0 > slot.0);
        }
    }

    #[tokio::test]
    async fn test_rotation_invariants_hold_across_slots() {
        let (mut node, _disc) = testutil::make_event_loop(testutil::test_config());
        for slot in 0..100u64 {
            let slot = Slot(slot);
            node.rotate_slow(slot).await;
            node.rotate_fast(slot).await;
            check_invariants(&node, slot);
        }
    }

    #[tokio::test]
    async fn test_rotate_slow_is_idempotent() {
        let (mut node, _disc) = testutil::make_event_loop(testutil::test_config());
        node.rotate_slow(Slot(10)).await;
        let first: Vec<VerticalIndex> = {
            let mut keys: Vec<_> = node.slow_indices.keys().copied().collect();
            keys.sort_unstable();
            keys
        };
        let calls_after_first = node.gossip.subscribe_count();

        node.rotate_slow(Slot(10)).await;
        let mut second: Vec<_> = node.slow_indices.keys().copied().collect();
        second.sort_unstable();

        assert_eq!(first, second);
        assert_eq!(node.gossip.subscribe_count(), calls_after_first);
        assert_eq!(node.gossip.unsubscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_slow_subnets_are_not_churned() {
        // The index stagger means at most one slow entry can cross its
        // rotation boundary between two consecutive slots; everything in
        // the overlap must keep its subscription untouched.
        let (mut node, _disc) = testutil::make_event_loop(testutil::test_config());
        let self_id = node.gossip.local_peer_id().to_bytes();
        node.rotate_slow(Slot(100)).await;

        let want_next =
            node.conf
                .das_slow_subnet_indices(&self_id, Slot(101), node.conf.slow_indices);
        let overlap: Vec<VerticalIndex> = node
            .slow_indices
            .keys()
            .copied()
            .filter(|subnet| want_next.contains(subnet))
            .collect();
        assert!(!overlap.is_empty());

        node.rotate_slow(Slot(101)).await;
        for subnet in overlap {
            let topic = node.conf.vert_topic(subnet);
            assert!(node.slow_indices.contains_key(&subnet));
            assert!(node.gossip.topic_subscribed(&topic));
            assert!(!node.gossip.unsubscribed_topics().contains(&topic));
        }
    }

    #[tokio::test]
    async fn test_wanted_fast_subnet_moves_to_slow() {
        let (mut node, _disc) = testutil::make_event_loop(testutil::test_config());
        let self_id = node.gossip.local_peer_id().to_bytes();
        let want = node
            .conf
            .das_slow_subnet_indices(&self_id, Slot(0), node.conf.slow_indices);
        let target = *want.iter().next().unwrap();

        // Plant the wanted subnet as a fast entry first.
        let info = node.open_subnet(target, Slot(0)).await.unwrap();
        node.fast_indices.insert(
            target,
            SubnetFastInfo {
                sub: info,
                expiry: Slot(1000),
            },
        );
        let subscribes = node.gossip.subscribe_count();

        node.rotate_slow(Slot(0)).await;
        assert!(node.slow_indices.contains_key(&target));
        assert!(!node.fast_indices.contains_key(&target));
        // The move reused the live subscription: only the other wanted
        // subnets opened new ones.
        assert!(node.gossip.topic_subscribed(&node.conf.vert_topic(target)));
        assert_eq!(node.gossip.subscribe_count(), subscribes + want.len() - 1);
    }

    #[tokio::test]
    async fn test_expired_fast_entries_are_replaced() {
        let (mut node, _disc) = testutil::make_event_loop(testutil::test_config());
        node.rotate_fast(Slot(0)).await;
        check_invariants(&node, Slot(0));

        // Jump far enough that every entry has expired.
        let horizon = Slot(node.conf.slots_per_fast_rotation_max + 1);
        node.rotate_fast(horizon).await;
        check_invariants(&node, horizon);
    }

    #[tokio::test]
    async fn test_redraw_reuses_expired_subscriptions() {
        // With every subnet permanently in the fast set, a full expiry must
        // be followed by wholesale reuse: no unsubscribes, no new
        // subscriptions.
        let config = Config {
            fast_indices: 4,
            slow_indices: 0,
            max_samples_per_shard_block: 4,
            shard_count: 1,
            ..testutil::test_config()
        };
        let (mut node, _disc) = testutil::make_event_loop(config);
        node.rotate_fast(Slot(0)).await;
        assert_eq!(node.fast_indices.len(), 4);
        let subscribes = node.gossip.subscribe_count();

        let horizon = Slot(node.conf.slots_per_fast_rotation_max + 1);
        node.rotate_fast(horizon).await;
        assert_eq!(node.fast_indices.len(), 4);
        assert_eq!(node.gossip.subscribe_count(), subscribes);
        assert_eq!(node.gossip.unsubscribe_count(), 0);
        for info in node.fast_indices.values() {
            assert!(info.expiry.0 > horizon.0);
        }
    }

    #[tokio::test]
    async fn test_subscription_failure_skips_slot() {
        let (mut node, _disc) = testutil::make_event_loop(testutil::test_config());
        node.gossip.fail_all_subscribes(true);
        node.rotate_slow(Slot(0)).await;
        node.rotate_fast(Slot(0)).await;
        assert!(node.slow_indices.is_empty());
        assert!(node.fast_indices.is_empty());

        // Next slot, with the overlay healthy again, rotation recovers.
        node.gossip.fail_all_subscribes(false);
        node.rotate_slow(Slot(1)).await;
        node.rotate_fast(Slot(1)).await;
        check_invariants(&node, Slot(1));
    }
}
