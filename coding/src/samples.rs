// Copyright (c) 2024 Botho Foundation

//! Block data to wire samples.

use crate::{
    error::CodingError,
    extension::extend_points,
    points::{bit_reversal_permutation, point_from_data, point_to_bytes, Point, POINT_BYTES},
};
use ark_ff::Zero;

/// Convert `input` into its extended point vector.
///
/// The input is cut into 31-byte points, placed into a zero-padded
/// power-of-two array in bit-reversed order, and doubled with the polynomial
/// extension. The returned vector has `2 * next_power_of_two(ceil(len / 31))`
/// entries; original points sit at even positions.
pub fn data_to_extended_points(
    input: &[u8],
    max_data_size: usize,
) -> Result<Vec<Point>, CodingError> {
    if input.len() > max_data_size {
        return Err(CodingError::TooLarge {
            len: input.len(),
            max: max_data_size,
        });
    }

    let input_points = input.len().div_ceil(POINT_BYTES);
    let padded_len = input_points.next_power_of_two();

    let order = bit_reversal_permutation(padded_len as u64);
    let mut points = vec![Point::zero(); padded_len];
    for (i, window) in input.chunks(POINT_BYTES).enumerate() {
        points[order[i] as usize] = point_from_data(window);
    }

    extend_points(&points)
}

/// Encode `input` into wire samples of `points_per_sample` points each.
///
/// Every sample serializes as `points_per_sample * 32` bytes. Fails with
/// [`CodingError::BadSize`] when the extended point count is not divisible
/// by the sample size.
pub fn make_samples(
    input: &[u8],
    points_per_sample: usize,
    max_data_size: usize,
) -> Result<Vec<Vec<u8>>, CodingError> {
    if points_per_sample == 0 {
        return Err(CodingError::EmptySample);
    }
    let extended = data_to_extended_points(input, max_data_size)?;
    if extended.len() % points_per_sample != 0 {
        return Err(CodingError::BadSize {
            points: extended.len(),
            points_per_sample,
        });
    }

    let samples = extended
        .chunks(points_per_sample)
        .map(|chunk| {
            let mut sample = Vec::with_capacity(chunk.len() * 32);
            for point in chunk {
                sample.extend_from_slice(&point_to_bytes(point));
            }
            sample
        })
        .collect();
    Ok(samples)
}
