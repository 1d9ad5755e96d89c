// Copyright (c) 2024 Botho Foundation

//! A data availability sampling (DAS) node prototype.
//!
//! Each node joins a gossip overlay where erasure-coded shard block data
//! fans out across many small "vertical" subnets, one per sample index. A
//! light participant gains statistical confidence that a block is available
//! by sampling a few random subnets; this crate implements the node that
//! makes such a network function:
//!
//! - **Subnet membership**: every slot the node maintains two vertical
//!   subnet sets: a *slow* set, deterministic from its peer id and
//!   therefore publicly predictable (the network's discoverable backbone),
//!   and a *fast* set, locally random and private, for unpredictable
//!   sampling. Both rotate on staggered schedules.
//! - **Sampling pipeline** ([`das_coding`]): block bytes become scalar
//!   field points, are doubled by an FFT-based Reed-Solomon extension in
//!   bit-reversed order, and split into fixed-size samples, one vertical
//!   subnet each.
//! - **Peering**: a per-slot controller tops up peers on every subscribed
//!   subnet from the predicted backbone, through a bounded dial queue.
//! - **Proposals**: when a locally registered validator is a shard's
//!   proposer, the node builds a (mock) block and publishes its header,
//!   body, and samples.
//!
//! The gossip overlay itself lives in [`das_gossip`]; discovery is an
//! oracle trait ([`Discovery`]) with an in-memory implementation
//! ([`MockDiscovery`]) for tests and local networks.
//!
//! # Usage
//!
//! ```ignore
//! use das_node::{Config, MockDiscovery, Node};
//! use std::sync::Arc;
//!
//! let disc = Arc::new(MockDiscovery::default());
//! let mut node = Node::new(Config::default(), disc.clone())?;
//! node.register_validators(&[0, 1, 2]);
//! node.start("0.0.0.0".parse()?, 9000).await?;
//!
//! let (peer_id, addrs) = node.disc_info();
//! disc.register(peer_id, addrs);
//! // ... let it run ...
//! node.close().await?;
//! ```

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod sampling;
pub mod shuffling;
pub mod types;

mod handlers;
mod membership;
mod node;
mod peering;
mod proposal;

#[cfg(test)]
mod testutil;

pub use config::{Config, ConfigError, ExpandedConfig};
pub use discovery::{Discovery, MockDiscovery};
pub use error::{NodeError, NodeResult};
pub use node::Node;
pub use types::{
    DasMessage, Root, Shard, ShardBlock, ShardBlockDataChunk, ShardBlockHeader, Signature,
    SignedShardBlock, SignedShardBlockHeader, Slot, SszError, ValidatorIndex, VerticalIndex,
};
