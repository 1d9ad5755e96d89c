// Copyright (c) 2024 Botho Foundation

//! Swap-or-not shuffling and shard committee assignment.
//!
//! There is no beacon chain in this prototype; committees come from
//! shuffling the full validator registry once at startup with a fixed seed
//! and splitting it into contiguous per-shard ranges.

use crate::{
    config::ExpandedConfig,
    types::{Shard, ValidatorIndex},
};
use sha2::{Digest, Sha256};

fn round_pivot(seed: &[u8; 32], round: u8) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update([round]);
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

fn round_source(seed: &[u8; 32], round: u8, block: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update([round]);
    hasher.update(block.to_le_bytes());
    hasher.finalize().into()
}

fn source_bit(source: &[u8; 32], position: u64) -> u8 {
    let byte = source[((position % 256) / 8) as usize];
    (byte >> (position % 8)) & 1
}

/// Where `index` lands after `rounds` of the swap-or-not shuffle of a list
/// of `list_size` elements.
pub fn permute_index(rounds: u8, mut index: u64, list_size: u64, seed: &[u8; 32]) -> u64 {
    debug_assert!(index < list_size);
    if list_size <= 1 {
        return index;
    }
    for round in 0..rounds {
        let pivot = round_pivot(seed, round) % list_size;
        let flip = (pivot + list_size - index) % list_size;
        let position = index.max(flip);
        let source = round_source(seed, round, (position / 256) as u32);
        if source_bit(&source, position) == 1 {
            index = flip;
        }
    }
    index
}

/// Shuffle a whole list in place, consistently with [`permute_index`]: the
/// element at `i` ends up at `permute_index(rounds, i, len, seed)`.
///
/// One source hash covers 256 positions, so this is far cheaper than
/// walking [`permute_index`] per element.
pub fn shuffle_list(rounds: u8, list: &mut [ValidatorIndex], seed: &[u8; 32]) {
    let n = list.len() as u64;
    if n <= 1 {
        return;
    }
    let blocks = (n / 256) + 1;
    let mut old = list.to_vec();
    for round in 0..rounds {
        let pivot = round_pivot(seed, round) % n;
        let sources: Vec<[u8; 32]> = (0..blocks)
            .map(|block| round_source(seed, round, block as u32))
            .collect();
        old.copy_from_slice(list);
        for i in 0..n {
            let flip = (pivot + n - i) % n;
            let position = i.max(flip);
            let source = &sources[(position / 256) as usize];
            if source_bit(source, position) == 1 {
                list[i as usize] = old[flip as usize];
            }
        }
    }
}

/// Committee assignment for every shard, and its inverse.
///
/// Shuffles `[0, validator_count)` with a seed derived from `seed_num` and
/// partitions the result into `shard_count` contiguous ranges of near-equal
/// size.
pub fn shard_committee_shuffling(
    conf: &ExpandedConfig,
    seed_num: u64,
) -> (Vec<Vec<ValidatorIndex>>, Vec<Shard>) {
    let mut hasher = Sha256::new();
    hasher.update(seed_num.to_le_bytes());
    let seed: [u8; 32] = hasher.finalize().into();

    let mut shuffled: Vec<ValidatorIndex> = (0..conf.validator_count).collect();
    shuffle_list(conf.shuffle_round_count, &mut shuffled, &seed);

    let mut shard_to_vals = Vec::with_capacity(conf.shard_count as usize);
    let mut val_to_shard = vec![Shard(0); conf.validator_count as usize];
    for shard in 0..conf.shard_count {
        let start = (conf.validator_count * shard / conf.shard_count) as usize;
        let end = (conf.validator_count * (shard + 1) / conf.shard_count) as usize;
        let committee = shuffled[start..end].to_vec();
        for val in &committee {
            val_to_shard[*val as usize] = Shard(shard);
        }
        shard_to_vals.push(committee);
    }
    (shard_to_vals, val_to_shard)
}
