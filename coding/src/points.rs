// Copyright (c) 2024 Botho Foundation

//! Byte/point conversion and bit-reversal ordering.

use ark_bls12_381::Fr;
use ark_ff::{BigInteger, PrimeField};

/// A single data point: an element of the BLS12-381 scalar field.
pub type Point = Fr;

/// Number of input bytes packed into one point. Only the lower 31 bytes are
/// used so that every byte pattern is canonical in the field.
pub const POINT_BYTES: usize = 31;

/// Wire size of one point: 32 bytes, little-endian, top byte zero for data
/// points.
pub const SERIALIZED_POINT_BYTES: usize = 32;

/// Interpret up to [`POINT_BYTES`] little-endian bytes as a field element.
///
/// Short windows (the clipped end of the input) are zero-padded.
pub fn point_from_data(window: &[u8]) -> Point {
    debug_assert!(window.len() <= POINT_BYTES);
    let mut buf = [0u8; POINT_BYTES];
    buf[..window.len()].copy_from_slice(window);
    Fr::from_le_bytes_mod_order(&buf)
}

/// Serialize a point as 32 little-endian bytes.
pub fn point_to_bytes(point: &Point) -> [u8; SERIALIZED_POINT_BYTES] {
    let raw = point.into_bigint().to_bytes_le();
    let mut out = [0u8; SERIALIZED_POINT_BYTES];
    out[..raw.len()].copy_from_slice(&raw);
    out
}

/// The bit-reversal permutation of `[0, width)`, where `width` is a power of
/// two. `out[i]` is `i` with its `log2(width)` bits reversed.
pub fn bit_reversal_permutation(width: u64) -> Vec<u64> {
    let mut order = vec![0u64; width as usize];
    fill_reverse_bit_order(&mut order);
    order
}

fn fill_reverse_bit_order(out: &mut [u64]) {
    if out.is_empty() {
        return;
    }
    if out.len() == 1 {
        out[0] = 0;
        return;
    }
    let half = out.len() >> 1;
    fill_reverse_bit_order(&mut out[..half]);
    // double the numbers in the first half, then the second half is the same
    // plus one
    for i in 0..half {
        out[i] <<= 1;
    }
    for i in 0..half {
        out[half + i] = out[i] + 1;
    }
}
