// Copyright (c) 2024 Botho Foundation

//! Shard block proposal.
//!
//! At the work tick (two thirds into each slot) the event loop picks one
//! proposer per shard. For every proposer this process controls, a detached
//! task builds a block with deterministic mock data, and publishes the
//! header globally, the block on the shard's horizontal subnet, and each
//! erasure-coded sample on its vertical subnet. There is no beacon chain:
//! the proposer is a seeded committee lookup, good enough to exercise the
//! network.

use crate::{
    config::ExpandedConfig,
    node::EventLoop,
    shuffling::permute_index,
    types::{
        Shard, ShardBlock, ShardBlockDataChunk, ShardBlockHeader, Signature, SignedShardBlock,
        SignedShardBlockHeader, Slot, ValidatorIndex, VerticalIndex,
    },
};
use das_gossip::{Gossip, GossipError};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One proposer per shard for `slot`, drawn from each shard's committee.
pub(crate) fn compute_shard_proposers(
    conf: &ExpandedConfig,
    shard_to_vals: &[Vec<ValidatorIndex>],
    slot: Slot,
) -> Vec<ValidatorIndex> {
    let mut out = Vec::with_capacity(conf.shard_count as usize);
    for shard in 0..conf.shard_count {
        let mut hasher = Sha256::new();
        hasher.update(slot.0.to_le_bytes());
        hasher.update(shard.to_le_bytes());
        let seed: [u8; 32] = hasher.finalize().into();

        // Any committee member will do; a shuffle lookup of position 0 gives
        // a seeded uniform pick without real proposer weighting.
        let committee = &shard_to_vals[shard as usize];
        let pick = permute_index(conf.shuffle_round_count, 0, committee.len() as u64, &seed);
        out.push(committee[pick as usize]);
    }
    out
}

/// Deterministic stand-in block body for `(slot, shard)`.
pub(crate) fn mock_block_body(conf: &ExpandedConfig, slot: Slot, shard: Shard) -> Vec<u8> {
    let mut body = vec![0u8; conf.max_data_size as usize];
    let mut rng = StdRng::seed_from_u64(slot.0 * conf.shard_count + shard.0);
    rng.fill_bytes(&mut body);
    body
}

impl<G: Gossip> EventLoop<G> {
    /// Spawn a proposal task for every shard whose proposer at `slot` is
    /// registered locally.
    pub(crate) fn schedule_proposals_maybe(&self, slot: Slot) {
        let proposers = compute_shard_proposers(&self.conf, &self.shard_to_vals, slot);
        let local = self
            .validators
            .read()
            .expect("validator set lock poisoned");
        for (shard, proposer) in proposers.into_iter().enumerate() {
            if !local.contains(&proposer) {
                continue;
            }
            let shard = Shard(shard as u64);
            info!(%slot, %shard, proposer, "proposing shard block");
            let conf = self.conf.clone();
            let gossip = self.gossip.clone();
            tokio::spawn(async move {
                execute_shard_block_proposal(conf, gossip, slot, shard, proposer).await;
            });
        }
    }
}

async fn publish_with_deadline<G: Gossip>(
    gossip: &G,
    topic: String,
    data: Vec<u8>,
    deadline: Duration,
    what: &str,
) {
    match timeout(deadline, gossip.publish(&topic, data)).await {
        Ok(Ok(())) => {}
        // Normal on small nets while the mesh is still forming.
        Ok(Err(GossipError::NoPeers(_))) => debug!(topic = %topic, "no peers to publish {what} to"),
        Ok(Err(e)) => warn!(topic = %topic, error = %e, "failed to publish {what}"),
        Err(_) => warn!(topic = %topic, "publishing {what} timed out"),
    }
}

/// Build and publish the block for one local proposer.
pub(crate) async fn execute_shard_block_proposal<G: Gossip>(
    conf: Arc<ExpandedConfig>,
    gossip: G,
    slot: Slot,
    shard: Shard,
    proposer: ValidatorIndex,
) {
    let body = mock_block_body(&conf, slot, shard);
    // Roots and signatures stay zero: commitments and signing are not part
    // of the prototype.
    let block = SignedShardBlock {
        message: ShardBlock {
            shard_parent_root: Default::default(),
            beacon_parent_root: Default::default(),
            slot,
            shard,
            proposer_index: proposer,
            body: body.clone(),
        },
        signature: Signature::default(),
    };
    let header = SignedShardBlockHeader {
        message: ShardBlockHeader {
            shard_parent_root: Default::default(),
            beacon_parent_root: Default::default(),
            slot,
            shard,
            proposer_index: proposer,
            body_root: Default::default(),
        },
        signature: Signature::default(),
    };

    let deadline = conf.slot_duration() * 2 / 3;

    publish_with_deadline(
        &gossip,
        conf.headers_topic(),
        header.to_ssz_bytes(),
        deadline,
        "header",
    )
    .await;

    publish_with_deadline(
        &gossip,
        conf.horz_topic(shard),
        block.to_ssz_bytes(),
        deadline,
        "block",
    )
    .await;

    let samples = match das_coding::make_samples(
        &body,
        conf.points_per_sample as usize,
        conf.max_data_size as usize,
    ) {
        Ok(samples) => samples,
        Err(e) => {
            warn!(%slot, %shard, error = %e, "proposer failed to make samples");
            return;
        }
    };

    for (i, sample) in samples.into_iter().enumerate() {
        let subnet =
            VerticalIndex(shard.0 * conf.max_samples_per_shard_block + i as u64);
        let topic = conf.vert_topic(subnet);
        let chunk = ShardBlockDataChunk(sample).to_ssz_bytes();
        let gossip = gossip.clone();
        tokio::spawn(async move {
            publish_with_deadline(&gossip, topic, chunk, deadline, "sample").await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, testutil};
    use std::collections::HashSet;

    fn make_small_config() -> Config {
        Config {
            shard_count: 4,
            validator_count: 64,
            max_samples_per_shard_block: 4,
            points_per_sample: 4,
            seconds_per_slot: 12,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_proposer_selection_is_deterministic() {
        let (node, _disc) = testutil::make_event_loop(make_small_config());
        let a = compute_shard_proposers(&node.conf, &node.shard_to_vals, Slot(7));
        let b = compute_shard_proposers(&node.conf, &node.shard_to_vals, Slot(7));
        assert_eq!(a, b);
        assert_eq!(a, vec![4, 31, 36, 63]);

        // Each proposer belongs to its shard's committee.
        for (shard, proposer) in a.iter().enumerate() {
            assert!(node.shard_to_vals[shard].contains(proposer));
        }

        // Shard 3 at slot 7 is stable no matter how often it is recomputed.
        let again = compute_shard_proposers(&node.conf, &node.shard_to_vals, Slot(7));
        assert_eq!(a[3], again[3]);

        // A different slot moves at least one proposer (committees are
        // dozens strong, identical draws across all shards would mean a
        // broken seed).
        let other = compute_shard_proposers(&node.conf, &node.shard_to_vals, Slot(8));
        assert_ne!(a, other);
    }

    #[tokio::test]
    async fn test_mock_body_is_deterministic() {
        let (node, _disc) = testutil::make_event_loop(make_small_config());
        let a = mock_block_body(&node.conf, Slot(3), Shard(1));
        let b = mock_block_body(&node.conf, Slot(3), Shard(1));
        assert_eq!(a, b);
        assert_eq!(a.len() as u64, node.conf.max_data_size);
        assert_ne!(a, mock_block_body(&node.conf, Slot(3), Shard(2)));
    }

    #[tokio::test]
    async fn test_proposal_publishes_header_block_and_samples() {
        let (node, _disc) = testutil::make_event_loop(make_small_config());
        let shard = Shard(2);
        execute_shard_block_proposal(node.conf.clone(), node.gossip.clone(), Slot(5), shard, 17)
            .await;
        // Sample publishes run on detached tasks.
        testutil::settle().await;

        let published = node.gossip.published();
        let topics: HashSet<String> = published.iter().map(|(t, _)| t.clone()).collect();
        assert!(topics.contains(&node.conf.headers_topic()));
        assert!(topics.contains(&node.conf.horz_topic(shard)));

        // Sample i of shard 2 lands on vertical subnet 2 * 4 + i.
        for i in 0..node.conf.max_samples_per_shard_block {
            let subnet = VerticalIndex(shard.0 * node.conf.max_samples_per_shard_block + i);
            assert!(topics.contains(&node.conf.vert_topic(subnet)));
        }
        // And nothing lands outside the shard's sample range.
        for subnet in 0..node.conf.sample_subnets {
            let topic = node.conf.vert_topic(VerticalIndex(subnet));
            let in_range = subnet / node.conf.max_samples_per_shard_block == shard.0;
            assert_eq!(topics.contains(&topic), in_range, "subnet {subnet}");
        }

        // The published header decodes and matches the proposal.
        let header_bytes = &published
            .iter()
            .find(|(t, _)| *t == node.conf.headers_topic())
            .unwrap()
            .1;
        let header = SignedShardBlockHeader::from_ssz_bytes(header_bytes).unwrap();
        assert_eq!(header.message.slot, Slot(5));
        assert_eq!(header.message.shard, shard);
        assert_eq!(header.message.proposer_index, 17);

        // Samples have the exact wire size.
        for (topic, data) in &published {
            if topic.contains("das_vert_") {
                assert_eq!(data.len(), node.conf.chunk_bytes());
            }
        }
    }

    #[tokio::test]
    async fn test_only_local_proposers_schedule_work() {
        let (node, _disc) = testutil::make_event_loop(make_small_config());
        // No local validators: nothing may be published.
        node.schedule_proposals_maybe(Slot(9));
        testutil::settle().await;
        assert!(node.gossip.published().is_empty());

        // Register every validator: all four shards propose.
        {
            let mut local = node.validators.write().unwrap();
            local.extend(0..node.conf.validator_count);
        }
        node.schedule_proposals_maybe(Slot(9));
        testutil::settle().await;

        let published = node.gossip.published();
        let headers = published
            .iter()
            .filter(|(t, _)| *t == node.conf.headers_topic())
            .count();
        assert_eq!(headers, 4);
    }
}
