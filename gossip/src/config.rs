// Copyright (c) 2024 Botho Foundation

//! Configuration for the gossip overlay.

use std::time::Duration;

/// Configuration for the overlay swarm.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Open a UPnP port mapping on the gateway.
    pub enable_nat: bool,

    /// Use an unencrypted transport. Test networks only.
    pub disable_transport_security: bool,

    /// Close connections with no active streams after this long.
    pub idle_connection_timeout: Duration,

    /// Gossipsub mesh heartbeat interval.
    pub heartbeat_interval: Duration,

    /// Largest message accepted on any topic. Sized for a full shard block
    /// plus framing.
    pub max_transmit_size: usize,

    /// Buffered messages per subscription before the overlay drops new ones.
    pub subscription_buffer: usize,

    /// Buffered commands between handles and the swarm task.
    pub command_buffer: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enable_nat: false,
            disable_transport_security: false,
            idle_connection_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(1),
            max_transmit_size: (1 << 20) + 1024,
            subscription_buffer: 64,
            command_buffer: 256,
        }
    }
}
