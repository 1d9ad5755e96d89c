// Copyright (c) 2024 Botho Foundation

//! Erasure-coded sample construction for data availability sampling.
//!
//! A shard block body is reinterpreted as a vector of scalar field elements
//! ("points"), doubled with a Reed-Solomon extension over an FFT domain, and
//! split into fixed-size samples that fan out across the vertical subnets.
//! The layout is chosen so that *any* half of the extended samples suffices
//! to reconstruct the original data:
//!
//! 1. Input bytes are consumed in 31-byte windows so that every byte pattern
//!    fits in the field, and written into a zero-padded power-of-two array in
//!    bit-reversed order.
//! 2. The array is extended to twice its length with the unique polynomial
//!    extension consistent with the original half's evaluations.
//! 3. Original and extension points are interleaved (even/odd positions) and
//!    cut into samples of `points_per_sample` points, 32 bytes each on the
//!    wire.
//!
//! Reconstruction from a partial set of samples is out of scope here;
//! receivers only collect.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

mod error;
mod extension;
mod points;
mod samples;

pub use error::CodingError;
pub use extension::{das_fft_extension, extend_points};
pub use points::{
    bit_reversal_permutation, point_from_data, point_to_bytes, Point, POINT_BYTES,
    SERIALIZED_POINT_BYTES,
};
pub use samples::{data_to_extended_points, make_samples};
