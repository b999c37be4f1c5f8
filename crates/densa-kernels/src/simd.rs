//! 8-lane SIMD primitives
//!
//! Slices are processed in `f32x8` chunks with a scalar tail, so results can
//! differ from a naive left fold in the last bits.

use densa_core::Scalar;
use wide::f32x8;

const LANES: usize = 8;

#[inline]
fn load(chunk: &[Scalar]) -> f32x8 {
    let mut lanes = [0.0; LANES];
    lanes.copy_from_slice(chunk);
    f32x8::new(lanes)
}

/// Dot product of two equally long slices
#[inline]
pub fn dot(a: &[Scalar], b: &[Scalar]) -> Scalar {
    debug_assert_eq!(a.len(), b.len());
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let tail: Scalar = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(x, y)| x * y)
        .sum();

    let mut acc = f32x8::splat(0.0);
    for (x, y) in a_chunks.zip(b_chunks) {
        acc += load(x) * load(y);
    }
    acc.reduce_add() + tail
}

/// Sum of a slice
#[inline]
pub fn sum(values: &[Scalar]) -> Scalar {
    let chunks = values.chunks_exact(LANES);
    let tail: Scalar = chunks.remainder().iter().sum();

    let mut acc = f32x8::splat(0.0);
    for chunk in chunks {
        acc += load(chunk);
    }
    acc.reduce_add() + tail
}

/// Sum of squared differences
#[inline]
pub fn squared_distance(a: &[Scalar], b: &[Scalar]) -> Scalar {
    debug_assert_eq!(a.len(), b.len());
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let tail: Scalar = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();

    let mut acc = f32x8::splat(0.0);
    for (x, y) in a_chunks.zip(b_chunks) {
        let diff = load(x) - load(y);
        acc += diff * diff;
    }
    acc.reduce_add() + tail
}
