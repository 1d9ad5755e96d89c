// Copyright (c) 2024 Botho Foundation

//! Deterministic slow-set membership.
//!
//! Every peer's slow vertical-subnet set is a pure function of its peer id,
//! the slot, and the configuration, so any node can predict any other
//! node's slow set and use the union of them as a discoverable backbone.
//! The derivation is byte-exact across implementations:
//!
//! - a per-peer seed separates peers,
//! - a per-peer slot offset spreads rotation boundaries between peers,
//! - a per-index slot offset staggers an individual peer's entries, so at
//!   most one entry is near its rotation boundary at a time.

use crate::{
    config::ExpandedConfig,
    types::{Slot, VerticalIndex},
};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Domain separator for the per-peer seed.
const DAS_DOMAIN: &[u8] = b"das domain";

/// The seed all of a peer's slow-set choices derive from:
/// `SHA256("das domain" || peer_id_bytes)`.
pub fn das_slow_peer_seed(peer: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DAS_DOMAIN);
    hasher.update(peer);
    hasher.finalize().into()
}

fn u64_from_le_prefix(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

impl ExpandedConfig {
    /// Per-peer slot offset, so honest peers do not all rotate their slow
    /// entries in the same slot.
    pub fn das_slow_peer_slot_offset(&self, peer_seed: &[u8; 32]) -> Slot {
        Slot(u64_from_le_prefix(peer_seed) % self.slots_per_slow_rotation)
    }

    /// Per-index slot offset: entry `i` waits `i * slot_offset_per_slow_index`
    /// slots behind entry 0.
    pub fn das_slow_index_slot_offset(&self, i: u64) -> Slot {
        Slot((i * self.slot_offset_per_slow_index) % self.slots_per_slow_rotation)
    }

    /// The subnet entry `i` maps to at an (offset-adjusted) slot.
    pub fn das_slow_subnet_index(&self, peer_seed: &[u8; 32], slot: Slot, i: u64) -> VerticalIndex {
        let window = slot.0 / self.slots_per_slow_rotation;
        let mut hasher = Sha256::new();
        hasher.update(peer_seed);
        hasher.update(i.to_le_bytes());
        hasher.update(window.to_le_bytes());
        let digest = hasher.finalize();
        VerticalIndex(u64_from_le_prefix(&digest) % self.sample_subnets)
    }

    /// The full slow set of `peer` at `slot`, for a peer advertising `count`
    /// slow entries.
    ///
    /// Duplicates collapse, so the result may be smaller than `count`. This
    /// is also used to describe remote peers, from nothing but their peer id
    /// and advertised entry count.
    pub fn das_slow_subnet_indices(
        &self,
        peer: &[u8],
        slot: Slot,
        count: u64,
    ) -> BTreeSet<VerticalIndex> {
        let peer_seed = das_slow_peer_seed(peer);
        let peer_offset = self.das_slow_peer_slot_offset(&peer_seed);
        let mut out = BTreeSet::new();
        for i in 0..count {
            let effective = Slot(slot.0 + peer_offset.0 + self.das_slow_index_slot_offset(i).0);
            out.insert(self.das_slow_subnet_index(&peer_seed, effective, i));
        }
        out
    }
}
