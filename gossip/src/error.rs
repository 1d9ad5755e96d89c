// Copyright (c) 2024 Botho Foundation

//! Error types for the gossip overlay.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur in the gossip overlay.
#[derive(Debug, Display, Error)]
pub enum GossipError {
    /// libp2p error: {0}
    Libp2p(String),

    /// failed to subscribe to {topic}: {reason}
    Subscribe {
        /// Topic name.
        topic: String,
        /// Underlying failure.
        reason: String,
    },

    /// already subscribed to {0}
    AlreadySubscribed(String),

    /// failed to publish to {topic}: {reason}
    Publish {
        /// Topic name.
        topic: String,
        /// Underlying failure.
        reason: String,
    },

    /// no peers on topic {0}
    NoPeers(String),

    /// dial of {peer} failed: {reason}
    Dial {
        /// Target peer.
        peer: String,
        /// Underlying failure.
        reason: String,
    },

    /// overlay service has shut down
    ChannelClosed,

    /// transport listen failed: {0}
    Listen(String),
}

/// Result type for gossip operations.
pub type GossipResult<T> = Result<T, GossipError>;
