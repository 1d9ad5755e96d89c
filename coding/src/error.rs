// Copyright (c) 2024 Botho Foundation

//! Error types for sample construction.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur while encoding block data into samples.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum CodingError {
    /// data is too large: {len} bytes, expected no more than {max}
    TooLarge {
        /// Input length in bytes.
        len: usize,
        /// Permitted maximum in bytes.
        max: usize,
    },

    /// bad data-points count {points}, expected it to be divisible by sample size {points_per_sample}
    BadSize {
        /// Number of extended points produced.
        points: usize,
        /// Points carried by a single sample.
        points_per_sample: usize,
    },

    /// points_per_sample must be non-zero
    EmptySample,

    /// no FFT domain of size {0}
    NoDomain(usize),
}
