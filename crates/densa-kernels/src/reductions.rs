//! Single-pass reductions and distance metrics over scalar slices
//!
//! Large inputs are split into fixed-size blocks that are reduced in
//! parallel and then combined.

use densa_core::Scalar;

use crate::simd;

#[cfg(feature = "parallel")]
const BLOCK: usize = 4_096;

/// Smallest and largest element with their first positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMax {
    pub min: Scalar,
    pub min_index: usize,
    pub max: Scalar,
    pub max_index: usize,
}

/// Distance between two equally long vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DistanceMetric {
    /// sqrt(Σ (a - b)^2)
    Euclidean,
    /// Σ (a - b)^2
    SquaredEuclidean,
    /// Σ |a - b|
    Manhattan,
    /// 1 - a·b / (|a| |b|)
    Cosine,
}

/// Sum of all elements
pub fn sum(values: &[Scalar], threshold: usize) -> Scalar {
    #[cfg(feature = "parallel")]
    {
        if crate::parallel::should_parallelize(values.len(), threshold) {
            use scirs2_core::parallel_ops::*;
            return values.par_chunks(BLOCK).map(simd::sum).sum();
        }
    }
    let _ = threshold;
    simd::sum(values)
}

/// Mean of all elements; NaN when empty
pub fn average(values: &[Scalar], threshold: usize) -> Scalar {
    sum(values, threshold) / values.len() as Scalar
}

/// Σ |x|
pub fn l1_norm(values: &[Scalar]) -> Scalar {
    values.iter().map(|x| x.abs()).sum()
}

/// sqrt(Σ x^2)
pub fn l2_norm(values: &[Scalar]) -> Scalar {
    simd::dot(values, values).sqrt()
}

/// Minimum and maximum with index; `None` for an empty slice.
///
/// Ties keep the first position.
pub fn min_max(values: &[Scalar]) -> Option<MinMax> {
    let (&first, rest) = values.split_first()?;
    let mut result = MinMax {
        min: first,
        min_index: 0,
        max: first,
        max_index: 0,
    };
    for (i, &x) in rest.iter().enumerate() {
        if x < result.min {
            result.min = x;
            result.min_index = i + 1;
        }
        if x > result.max {
            result.max = x;
            result.max_index = i + 1;
        }
    }
    Some(result)
}

/// Population standard deviation.
///
/// Pass `mean` when it is already known to skip the first pass.
pub fn std_dev(values: &[Scalar], mean: Option<Scalar>, threshold: usize) -> Scalar {
    if values.is_empty() {
        return 0.0;
    }
    let mean = mean.unwrap_or_else(|| average(values, threshold));
    let squares: Scalar = values.iter().map(|x| (x - mean) * (x - mean)).sum();
    (squares / values.len() as Scalar).sqrt()
}

/// Σ a_i * b_i
pub fn dot(a: &[Scalar], b: &[Scalar]) -> Scalar {
    simd::dot(a, b)
}

impl DistanceMetric {
    pub fn distance(self, a: &[Scalar], b: &[Scalar]) -> Scalar {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::Euclidean => simd::squared_distance(a, b).sqrt(),
            DistanceMetric::SquaredEuclidean => simd::squared_distance(a, b),
            DistanceMetric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            DistanceMetric::Cosine => {
                let norms = l2_norm(a) * l2_norm(b);
                if norms == 0.0 {
                    1.0
                } else {
                    1.0 - simd::dot(a, b) / norms
                }
            }
        }
    }
}
