// Copyright (c) 2024 Botho Foundation

//! Per-subscription reader loops.
//!
//! Every subscription gets a detached reader task that drains messages,
//! validates them, and reports the outcome back to gossipsub (the overlay
//! holds messages from forwarding until validated). Readers exit when
//! their subscription is cancelled or the overlay shuts down; there is no
//! separate stop signal.
//!
//! Validation is structural only. Commitment checks belong to the
//! [`crate::types::DasMessage`] path, which the prototype does not emit
//! yet.

use crate::{
    config::ExpandedConfig,
    types::{Shard, ShardBlockDataChunk, SignedShardBlock, SignedShardBlockHeader, VerticalIndex},
};
use das_gossip::{Gossip, Subscription, Validation};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Reader for a vertical sample subnet: accepts exactly-sized chunks.
pub(crate) fn spawn_vertical_reader<G: Gossip>(
    gossip: G,
    conf: Arc<ExpandedConfig>,
    subnet: VerticalIndex,
    mut sub: Subscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let chunk_bytes = conf.chunk_bytes();
        while let Some(msg) = sub.next().await {
            let validation = match ShardBlockDataChunk::from_ssz_bytes(&msg.data, chunk_bytes) {
                Ok(_) => {
                    debug!(
                        %subnet,
                        from = %msg.propagation_source,
                        length = msg.data.len(),
                        "received sample"
                    );
                    Validation::Accept
                }
                Err(e) => {
                    warn!(%subnet, from = %msg.propagation_source, error = %e, "bad sample chunk");
                    Validation::Reject
                }
            };
            gossip.report(&msg, validation).await;
        }
        trace!(%subnet, "vertical reader finished");
    })
}

/// Reader for a horizontal shard subnet: accepts decodable shard blocks.
pub(crate) fn spawn_horizontal_reader<G: Gossip>(
    gossip: G,
    shard: Shard,
    mut sub: Subscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            let validation = match SignedShardBlock::from_ssz_bytes(&msg.data) {
                Ok(block) => {
                    debug!(
                        %shard,
                        from = %msg.propagation_source,
                        slot = %block.message.slot,
                        proposer = block.message.proposer_index,
                        body_len = block.message.body.len(),
                        "received shard block"
                    );
                    Validation::Accept
                }
                Err(e) => {
                    warn!(%shard, from = %msg.propagation_source, error = %e, "bad shard block");
                    Validation::Reject
                }
            };
            gossip.report(&msg, validation).await;
        }
        trace!(%shard, "horizontal reader finished");
    })
}

/// Reader for the global shard-headers topic: accepts decodable headers.
pub(crate) fn spawn_headers_reader<G: Gossip>(gossip: G, mut sub: Subscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            let validation = match SignedShardBlockHeader::from_ssz_bytes(&msg.data) {
                Ok(header) => {
                    debug!(
                        from = %msg.propagation_source,
                        slot = %header.message.slot,
                        shard = %header.message.shard,
                        proposer = header.message.proposer_index,
                        "received shard header"
                    );
                    Validation::Accept
                }
                Err(e) => {
                    warn!(from = %msg.propagation_source, error = %e, "bad shard header");
                    Validation::Reject
                }
            };
            gossip.report(&msg, validation).await;
        }
        trace!("headers reader finished");
    })
}
