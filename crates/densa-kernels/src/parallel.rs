//! Threshold-gated data-parallel loops
//!
//! Each helper runs serially below `threshold` elements and fans out over
//! the rayon pool re-exported by `scirs2_core::parallel_ops` at or above it.
//! Without the `parallel` feature everything runs serially.

use densa_core::Scalar;

/// Whether `len` elements should be processed in parallel
#[inline]
pub fn should_parallelize(len: usize, threshold: usize) -> bool {
    cfg!(feature = "parallel") && len >= threshold
}

/// `output[i] = f(input[i])`
pub fn map_into<F>(input: &[Scalar], output: &mut [Scalar], threshold: usize, f: F)
where
    F: Fn(Scalar) -> Scalar + Send + Sync,
{
    debug_assert_eq!(input.len(), output.len());

    #[cfg(feature = "parallel")]
    {
        if should_parallelize(output.len(), threshold) {
            use scirs2_core::parallel_ops::*;
            tracing::trace!(len = output.len(), "parallel map");
            output
                .par_iter_mut()
                .zip(input.par_iter())
                .for_each(|(out, &x)| *out = f(x));
            return;
        }
    }

    let _ = threshold;
    for (out, &x) in output.iter_mut().zip(input) {
        *out = f(x);
    }
}

/// `output[i] = f(a[i], b[i])`
pub fn zip_into<F>(a: &[Scalar], b: &[Scalar], output: &mut [Scalar], threshold: usize, f: F)
where
    F: Fn(Scalar, Scalar) -> Scalar + Send + Sync,
{
    debug_assert_eq!(a.len(), output.len());
    debug_assert_eq!(b.len(), output.len());

    #[cfg(feature = "parallel")]
    {
        if should_parallelize(output.len(), threshold) {
            use scirs2_core::parallel_ops::*;
            tracing::trace!(len = output.len(), "parallel zip");
            output
                .par_iter_mut()
                .zip(a.par_iter().zip(b.par_iter()))
                .for_each(|(out, (&x, &y))| *out = f(x, y));
            return;
        }
    }

    let _ = threshold;
    for ((out, &x), &y) in output.iter_mut().zip(a).zip(b) {
        *out = f(x, y);
    }
}

/// `data[i] = f(data[i])`
pub fn map_in_place<F>(data: &mut [Scalar], threshold: usize, f: F)
where
    F: Fn(Scalar) -> Scalar + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if should_parallelize(data.len(), threshold) {
            use scirs2_core::parallel_ops::*;
            data.par_iter_mut().for_each(|x| *x = f(*x));
            return;
        }
    }

    let _ = threshold;
    for x in data.iter_mut() {
        *x = f(*x);
    }
}

/// `data[i] = f(data[i], other[i])`
pub fn zip_in_place<F>(data: &mut [Scalar], other: &[Scalar], threshold: usize, f: F)
where
    F: Fn(Scalar, Scalar) -> Scalar + Send + Sync,
{
    debug_assert_eq!(data.len(), other.len());

    #[cfg(feature = "parallel")]
    {
        if should_parallelize(data.len(), threshold) {
            use scirs2_core::parallel_ops::*;
            data.par_iter_mut()
                .zip(other.par_iter())
                .for_each(|(x, &y)| *x = f(*x, y));
            return;
        }
    }

    let _ = threshold;
    for (x, &y) in data.iter_mut().zip(other) {
        *x = f(*x, y);
    }
}

/// `output[i] = f(i)`
pub fn fill_indexed<F>(output: &mut [Scalar], threshold: usize, f: F)
where
    F: Fn(usize) -> Scalar + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if should_parallelize(output.len(), threshold) {
            use scirs2_core::parallel_ops::*;
            output
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, out)| *out = f(i));
            return;
        }
    }

    let _ = threshold;
    for (i, out) in output.iter_mut().enumerate() {
        *out = f(i);
    }
}

/// Run `f(index, chunk)` over consecutive `chunk_len` blocks of `output`.
///
/// Parallel when the whole buffer reaches `threshold`.
pub fn for_each_chunk<F>(output: &mut [Scalar], chunk_len: usize, threshold: usize, f: F)
where
    F: Fn(usize, &mut [Scalar]) + Send + Sync,
{
    if chunk_len == 0 {
        return;
    }

    #[cfg(feature = "parallel")]
    {
        if should_parallelize(output.len(), threshold) {
            use scirs2_core::parallel_ops::*;
            output
                .par_chunks_mut(chunk_len)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk));
            return;
        }
    }

    let _ = threshold;
    for (i, chunk) in output.chunks_mut(chunk_len).enumerate() {
        f(i, chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_and_parallel_agree() {
        let input: Vec<Scalar> = (0..1_000).map(|x| x as Scalar).collect();
        let mut serial = vec![0.0; input.len()];
        let mut parallel = vec![0.0; input.len()];

        map_into(&input, &mut serial, usize::MAX, |x| x * 2.0 + 1.0);
        map_into(&input, &mut parallel, 1, |x| x * 2.0 + 1.0);
        assert_eq!(serial, parallel);

        zip_into(&input, &serial, &mut parallel, 1, |a, b| b - a);
        assert_eq!(parallel[10], 11.0);
    }

    #[test]
    fn test_in_place_helpers() {
        let mut data = vec![1.0, 2.0, 3.0];
        map_in_place(&mut data, 1, |x| x * x);
        assert_eq!(data, vec![1.0, 4.0, 9.0]);

        zip_in_place(&mut data, &[1.0, 1.0, 1.0], usize::MAX, |x, y| x - y);
        assert_eq!(data, vec![0.0, 3.0, 8.0]);
    }

    #[test]
    fn test_fill_indexed_and_chunks() {
        let mut data = vec![0.0; 6];
        fill_indexed(&mut data, 1, |i| i as Scalar);
        assert_eq!(data, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        for_each_chunk(&mut data, 2, 1, |i, chunk| chunk.fill(i as Scalar));
        assert_eq!(data, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_threshold_gate() {
        assert!(!should_parallelize(9, 10));
        assert_eq!(should_parallelize(10, 10), cfg!(feature = "parallel"));
    }
}
