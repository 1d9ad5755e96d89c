// Copyright (c) 2024 Botho Foundation

//! libp2p network behaviour for the DAS overlay.
//!
//! Gossipsub carries every topic (shard headers, horizontal shard blocks,
//! vertical sample subnets) under a strict no-signing policy: message
//! identity is content-derived, so identical samples dedupe regardless of
//! publisher.

use crate::{config::OverlayConfig, error::GossipError};
use base64::Engine;
use libp2p::{
    gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode},
    identify,
    identity::Keypair,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour},
    upnp,
};
use sha2::{Digest, Sha256};

/// Protocol version advertised over identify.
pub const PROTOCOL_VERSION: &str = "/eth2/das/0.1.0";

/// Content-derived message id: `base64_url(SHA256(payload)[0..20])`.
pub fn message_id(payload: &[u8]) -> MessageId {
    let digest = Sha256::digest(payload);
    MessageId::from(base64::engine::general_purpose::URL_SAFE.encode(&digest[..20]))
}

/// Combined network behaviour for the overlay.
#[derive(NetworkBehaviour)]
pub struct DasBehaviour {
    /// Gossipsub for all DAS topics.
    pub gossipsub: gossipsub::Behaviour,

    /// Identify, for address exchange with connected peers.
    pub identify: identify::Behaviour,

    /// Optional UPnP port mapping.
    pub upnp: Toggle<upnp::tokio::Behaviour>,
}

impl DasBehaviour {
    /// Create the behaviour for a local identity.
    pub fn new(keypair: &Keypair, config: &OverlayConfig) -> Result<Self, GossipError> {
        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(config.heartbeat_interval)
            .validation_mode(ValidationMode::Anonymous)
            .validate_messages()
            .max_transmit_size(config.max_transmit_size)
            .message_id_fn(|msg: &gossipsub::Message| message_id(&msg.data))
            .build()
            .map_err(|e| GossipError::Libp2p(e.to_string()))?;

        let gossipsub = gossipsub::Behaviour::new(MessageAuthenticity::Anonymous, gossipsub_config)
            .map_err(|e| GossipError::Libp2p(e.to_string()))?;

        let identify = identify::Behaviour::new(identify::Config::new(
            PROTOCOL_VERSION.to_string(),
            keypair.public(),
        ));

        let upnp = Toggle::from(config.enable_nat.then(upnp::tokio::Behaviour::default));

        Ok(Self {
            gossipsub,
            identify,
            upnp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_is_content_derived() {
        // base64_url of the first 20 bytes of SHA256("hello world").
        let digest = Sha256::digest(b"hello world");
        let expected = base64::engine::general_purpose::URL_SAFE.encode(&digest[..20]);
        assert_eq!(message_id(b"hello world"), MessageId::from(expected));
        assert_eq!(message_id(b"hello world"), message_id(b"hello world"));
        assert_ne!(message_id(b"hello world"), message_id(b"hello worle"));
    }

    #[test]
    fn test_behaviour_construction() {
        let keypair = Keypair::generate_ed25519();
        let behaviour = DasBehaviour::new(&keypair, &OverlayConfig::default()).unwrap();
        assert!(!behaviour.upnp.is_enabled());
    }
}
