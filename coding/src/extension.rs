// Copyright (c) 2024 Botho Foundation

//! The Reed-Solomon extension over the scalar-field FFT domain.

use crate::{error::CodingError, points::Point};
use ark_ff::Field;
use ark_poly::{EvaluationDomain, Radix2EvaluationDomain};

/// Replace `values` in place with the extension of the polynomial they
/// determine.
///
/// On input, `values[i]` is read as the evaluation of some polynomial `P`
/// (of degree below `values.len()`) at the even position `2i` of the FFT
/// domain of size `2 * values.len()`. On output, `values[i]` holds the
/// evaluation of the same `P` at odd position `2i + 1`. The input length
/// must be a power of two.
pub fn das_fft_extension(values: &mut [Point]) -> Result<(), CodingError> {
    let n = values.len();
    let half: Radix2EvaluationDomain<Point> =
        Radix2EvaluationDomain::new(n).ok_or(CodingError::NoDomain(n))?;
    let full: Radix2EvaluationDomain<Point> =
        Radix2EvaluationDomain::new(2 * n).ok_or(CodingError::NoDomain(2 * n))?;

    // Recover coefficients from the even evaluations, then re-evaluate at the
    // odd positions: P(w^(2i+1)) = Q(v^i) where Q(x) = P(w*x) has coefficients
    // c_j * w^j.
    let mut coeffs = half.ifft(values);
    let w = full.group_gen();
    let mut power = Point::ONE;
    for c in coeffs.iter_mut() {
        *c *= power;
        power *= w;
    }
    let odd = half.fft(&coeffs);
    values.copy_from_slice(&odd);
    Ok(())
}

/// Double `points` with its polynomial extension, interleaving original
/// points at even output positions and extension points at odd positions.
pub fn extend_points(points: &[Point]) -> Result<Vec<Point>, CodingError> {
    let mut extension = points.to_vec();
    das_fft_extension(&mut extension)?;

    let mut extended = Vec::with_capacity(2 * points.len());
    for (orig, ext) in points.iter().zip(extension.iter()) {
        extended.push(*orig);
        extended.push(*ext);
    }
    Ok(extended)
}
