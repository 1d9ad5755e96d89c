// Copyright (c) 2024 Botho Foundation

//! libp2p gossipsub overlay for the DAS node.
//!
//! This crate wraps a libp2p swarm in a single background task and exposes
//! the small surface the node core needs:
//!
//! - **Subscriptions**: per-topic message streams with explicit cancellation
//! - **Publishing**: fire a payload at any topic, subscribed or not
//! - **Peering**: topic peer counts, connectedness queries, outbound dials
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       swarm task                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────┐   │
//! │  │  gossipsub   │  │   identify   │  │  upnp (toggle)  │   │
//! │  └──────────────┘  └──────────────┘  └─────────────────┘   │
//! └───────▲──────────────────────────────────────┬─────────────┘
//!         │ Command (mpsc)                       │ GossipMessage
//!   ┌─────┴───────┐                      ┌───────▼────────┐
//!   │ GossipHandle│ (Clone)              │  Subscription  │
//!   └─────────────┘                      └────────────────┘
//! ```
//!
//! The wire policy follows the DAS prototype: strict no-signing gossipsub
//! (anonymous mode) with a content-derived message id, so identical samples
//! dedupe no matter who published them.
//!
//! The [`Gossip`] trait abstracts the handle so the node's rotation and
//! peering logic can run against an in-memory overlay in tests.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod behaviour;
pub mod config;
pub mod error;
pub mod handle;
pub mod service;

pub use behaviour::{message_id, DasBehaviour, PROTOCOL_VERSION};
pub use config::OverlayConfig;
pub use error::{GossipError, GossipResult};
pub use handle::{Connectedness, Gossip, GossipHandle, GossipMessage, Subscription, Validation};
pub use service::GossipService;

// Re-exported so downstream crates name peers and addresses without a direct
// libp2p dependency on every call site.
pub use libp2p::{Multiaddr, PeerId};
