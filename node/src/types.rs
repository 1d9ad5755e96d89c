// Copyright (c) 2024 Botho Foundation

//! Core scalar and wire types.
//!
//! Wire containers implement hand-written `to_ssz_bytes`/`from_ssz_bytes`
//! following SSZ container layout (fixed fields in order, 4-byte offsets for
//! variable fields, heap appended). The surface is small enough that a codec
//! dependency would outweigh the few dozen lines it saves.

use displaydoc::Display;
use std::fmt;
use thiserror::Error;

/// An integer-indexed time epoch of `seconds_per_slot` seconds since
/// genesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(pub u64);

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Index of a vertical (sample) subnet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VerticalIndex(pub u64);

impl fmt::Display for VerticalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Index of a shard (and of its horizontal subnet).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Shard(pub u64);

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Index of a validator in the global registry.
pub type ValidatorIndex = u64;

/// A 32-byte root.
pub type Root = [u8; 32];

/// Length of a [`Root`] in bytes.
pub const ROOT_BYTES: usize = 32;

/// Length of a BLS signature in bytes.
pub const SIGNATURE_BYTES: usize = 96;

/// Length of a KZG-style proof in bytes.
pub const PROOF_BYTES: usize = 48;

/// Upper bound on a shard block body, as a SSZ byte list limit.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// SSZ size of a [`SignedShardBlockHeader`].
pub const SIGNED_HEADER_SSZ_BYTES: usize = 2 * ROOT_BYTES + 3 * 8 + ROOT_BYTES + SIGNATURE_BYTES;

/// A BLS signature stand-in. Zeroed in this prototype; signing is out of
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_BYTES]);

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_BYTES])
    }
}

/// Errors produced by the hand-written SSZ codecs.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum SszError {
    /// wrong length: got {got} bytes, expected {expected}
    BadLength {
        /// Received length.
        got: usize,
        /// Expected length.
        expected: usize,
    },

    /// truncated input: got {got} bytes, need at least {need}
    Truncated {
        /// Received length.
        got: usize,
        /// Minimum length.
        need: usize,
    },

    /// invalid offset {offset} in buffer of {len} bytes
    BadOffset {
        /// Decoded offset.
        offset: usize,
        /// Buffer length.
        len: usize,
    },

    /// byte list of {got} bytes exceeds limit {limit}
    ListTooLong {
        /// Received length.
        got: usize,
        /// List limit.
        limit: usize,
    },
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_root(buf: &[u8], at: usize) -> Root {
    let mut raw = [0u8; ROOT_BYTES];
    raw.copy_from_slice(&buf[at..at + ROOT_BYTES]);
    raw
}

/// A shard block: header fields plus the full body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardBlock {
    /// Root of the previous block on the same shard.
    pub shard_parent_root: Root,
    /// Root of the anchoring beacon block.
    pub beacon_parent_root: Root,
    /// Slot this block proposes for.
    pub slot: Slot,
    /// Shard this block belongs to.
    pub shard: Shard,
    /// The proposing validator.
    pub proposer_index: ValidatorIndex,
    /// Opaque block data, at most [`MAX_BODY_BYTES`].
    pub body: Vec<u8>,
}

/// Fixed-size prefix of a serialized [`ShardBlock`]: two roots, three u64
/// fields, and the body offset.
const BLOCK_FIXED_BYTES: usize = 2 * ROOT_BYTES + 3 * 8 + 4;

impl ShardBlock {
    fn write_ssz(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.shard_parent_root);
        out.extend_from_slice(&self.beacon_parent_root);
        out.extend_from_slice(&self.slot.0.to_le_bytes());
        out.extend_from_slice(&self.shard.0.to_le_bytes());
        out.extend_from_slice(&self.proposer_index.to_le_bytes());
        out.extend_from_slice(&(BLOCK_FIXED_BYTES as u32).to_le_bytes());
        out.extend_from_slice(&self.body);
    }

    /// Serialize as an SSZ container.
    pub fn to_ssz_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOCK_FIXED_BYTES + self.body.len());
        self.write_ssz(&mut out);
        out
    }

    /// Deserialize from SSZ bytes.
    pub fn from_ssz_bytes(buf: &[u8]) -> Result<Self, SszError> {
        if buf.len() < BLOCK_FIXED_BYTES {
            return Err(SszError::Truncated {
                got: buf.len(),
                need: BLOCK_FIXED_BYTES,
            });
        }
        let offset = read_u32(buf, 2 * ROOT_BYTES + 3 * 8) as usize;
        if offset != BLOCK_FIXED_BYTES {
            return Err(SszError::BadOffset {
                offset,
                len: buf.len(),
            });
        }
        let body = buf[offset..].to_vec();
        if body.len() > MAX_BODY_BYTES {
            return Err(SszError::ListTooLong {
                got: body.len(),
                limit: MAX_BODY_BYTES,
            });
        }
        Ok(Self {
            shard_parent_root: read_root(buf, 0),
            beacon_parent_root: read_root(buf, ROOT_BYTES),
            slot: Slot(read_u64(buf, 2 * ROOT_BYTES)),
            shard: Shard(read_u64(buf, 2 * ROOT_BYTES + 8)),
            proposer_index: read_u64(buf, 2 * ROOT_BYTES + 16),
            body,
        })
    }
}

/// A shard block with its (zeroed) proposer signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedShardBlock {
    /// The block.
    pub message: ShardBlock,
    /// Proposer signature stand-in.
    pub signature: Signature,
}

impl SignedShardBlock {
    /// Serialize as an SSZ container.
    pub fn to_ssz_bytes(&self) -> Vec<u8> {
        let message_offset = 4 + SIGNATURE_BYTES;
        let mut out = Vec::with_capacity(message_offset + BLOCK_FIXED_BYTES);
        out.extend_from_slice(&(message_offset as u32).to_le_bytes());
        out.extend_from_slice(&self.signature.0);
        self.message.write_ssz(&mut out);
        out
    }

    /// Deserialize from SSZ bytes.
    pub fn from_ssz_bytes(buf: &[u8]) -> Result<Self, SszError> {
        let fixed = 4 + SIGNATURE_BYTES;
        if buf.len() < fixed {
            return Err(SszError::Truncated {
                got: buf.len(),
                need: fixed,
            });
        }
        let offset = read_u32(buf, 0) as usize;
        if offset != fixed || offset > buf.len() {
            return Err(SszError::BadOffset {
                offset,
                len: buf.len(),
            });
        }
        let mut signature = Signature::default();
        signature.0.copy_from_slice(&buf[4..4 + SIGNATURE_BYTES]);
        Ok(Self {
            message: ShardBlock::from_ssz_bytes(&buf[offset..])?,
            signature,
        })
    }
}

/// The header of a shard block: the block with its body replaced by the
/// body root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardBlockHeader {
    /// Root of the previous block on the same shard.
    pub shard_parent_root: Root,
    /// Root of the anchoring beacon block.
    pub beacon_parent_root: Root,
    /// Slot this block proposes for.
    pub slot: Slot,
    /// Shard this block belongs to.
    pub shard: Shard,
    /// The proposing validator.
    pub proposer_index: ValidatorIndex,
    /// Root of the block body.
    pub body_root: Root,
}

/// A shard block header with its (zeroed) proposer signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignedShardBlockHeader {
    /// The header.
    pub message: ShardBlockHeader,
    /// Proposer signature stand-in.
    pub signature: Signature,
}

impl SignedShardBlockHeader {
    /// Serialize as a fixed-size SSZ container of
    /// [`SIGNED_HEADER_SSZ_BYTES`] bytes.
    pub fn to_ssz_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SIGNED_HEADER_SSZ_BYTES);
        out.extend_from_slice(&self.message.shard_parent_root);
        out.extend_from_slice(&self.message.beacon_parent_root);
        out.extend_from_slice(&self.message.slot.0.to_le_bytes());
        out.extend_from_slice(&self.message.shard.0.to_le_bytes());
        out.extend_from_slice(&self.message.proposer_index.to_le_bytes());
        out.extend_from_slice(&self.message.body_root);
        out.extend_from_slice(&self.signature.0);
        out
    }

    /// Deserialize from SSZ bytes.
    pub fn from_ssz_bytes(buf: &[u8]) -> Result<Self, SszError> {
        if buf.len() != SIGNED_HEADER_SSZ_BYTES {
            return Err(SszError::BadLength {
                got: buf.len(),
                expected: SIGNED_HEADER_SSZ_BYTES,
            });
        }
        let mut signature = Signature::default();
        signature
            .0
            .copy_from_slice(&buf[SIGNED_HEADER_SSZ_BYTES - SIGNATURE_BYTES..]);
        Ok(Self {
            message: ShardBlockHeader {
                shard_parent_root: read_root(buf, 0),
                beacon_parent_root: read_root(buf, ROOT_BYTES),
                slot: Slot(read_u64(buf, 2 * ROOT_BYTES)),
                shard: Shard(read_u64(buf, 2 * ROOT_BYTES + 8)),
                proposer_index: read_u64(buf, 2 * ROOT_BYTES + 16),
                body_root: read_root(buf, 2 * ROOT_BYTES + 24),
            },
            signature,
        })
    }
}

/// One sample on a vertical subnet: `points_per_sample * 32` raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardBlockDataChunk(pub Vec<u8>);

impl ShardBlockDataChunk {
    /// Serialize: chunks travel as raw bytes.
    pub fn to_ssz_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    /// Deserialize, checking the expected chunk size.
    pub fn from_ssz_bytes(buf: &[u8], expected_len: usize) -> Result<Self, SszError> {
        if buf.len() != expected_len {
            return Err(SszError::BadLength {
                got: buf.len(),
                expected: expected_len,
            });
        }
        Ok(Self(buf.to_vec()))
    }
}

/// A sample annotated with its position and commitment proof.
///
/// Defined for the full protocol, where vertical subnets carry the proof
/// that a chunk belongs to the header's commitment. The prototype publishes
/// bare [`ShardBlockDataChunk`]s.
// TODO: emit this from the proposal path once commitments are computed, and
// verify the proof in the vertical-subnet validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DasMessage {
    /// Slot of the block the chunk belongs to.
    pub slot: Slot,
    /// The sample bytes.
    pub chunk: ShardBlockDataChunk,
    /// Vertical subnet the chunk is addressed to.
    pub index: VerticalIndex,
    /// Proof that the chunk is part of the header commitment.
    pub kate_proof: [u8; PROOF_BYTES],
}

/// Fixed-size prefix of a serialized [`DasMessage`]: slot, chunk offset,
/// index, proof.
const DAS_MESSAGE_FIXED_BYTES: usize = 8 + 4 + 8 + PROOF_BYTES;

impl DasMessage {
    /// Serialize as an SSZ container.
    pub fn to_ssz_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DAS_MESSAGE_FIXED_BYTES + self.chunk.0.len());
        out.extend_from_slice(&self.slot.0.to_le_bytes());
        out.extend_from_slice(&(DAS_MESSAGE_FIXED_BYTES as u32).to_le_bytes());
        out.extend_from_slice(&self.index.0.to_le_bytes());
        out.extend_from_slice(&self.kate_proof);
        out.extend_from_slice(&self.chunk.0);
        out
    }

    /// Deserialize from SSZ bytes.
    pub fn from_ssz_bytes(buf: &[u8]) -> Result<Self, SszError> {
        if buf.len() < DAS_MESSAGE_FIXED_BYTES {
            return Err(SszError::Truncated {
                got: buf.len(),
                need: DAS_MESSAGE_FIXED_BYTES,
            });
        }
        let offset = read_u32(buf, 8) as usize;
        if offset != DAS_MESSAGE_FIXED_BYTES {
            return Err(SszError::BadOffset {
                offset,
                len: buf.len(),
            });
        }
        let mut kate_proof = [0u8; PROOF_BYTES];
        kate_proof.copy_from_slice(&buf[20..20 + PROOF_BYTES]);
        Ok(Self {
            slot: Slot(read_u64(buf, 0)),
            chunk: ShardBlockDataChunk(buf[offset..].to_vec()),
            index: VerticalIndex(read_u64(buf, 12)),
            kate_proof,
        })
    }
}
