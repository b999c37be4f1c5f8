//! Convolution primitives over column-major 3D buffers
//!
//! A 3D buffer of shape `(rows, columns, depth)` stores element
//! `(y, x, d)` at `d * rows * columns + x * rows + y`: rows run along `y`,
//! columns along `x`.
//!
//! A filter window is `width x height` and moves `x_stride` / `y_stride`
//! steps between placements. Placements are enumerated with `x` in the outer
//! loop and `y` in the inner loop, so placement `p = x_index * out_rows +
//! y_index`. Inside a window, position `(fx, fy)` has the flattened offset
//! `fx * height + fy`, which is what max pooling records and what
//! [`FilterGeometry::decode_offset`] undoes.

use densa_core::{Result, Scalar, TensorError};

use crate::parallel::{for_each_chunk, should_parallelize};

/// Filter window size and stride
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterGeometry {
    pub width: usize,
    pub height: usize,
    pub x_stride: usize,
    pub y_stride: usize,
}

impl FilterGeometry {
    pub fn new(width: usize, height: usize, x_stride: usize, y_stride: usize) -> Self {
        Self {
            width,
            height,
            x_stride,
            y_stride,
        }
    }

    /// Square window with the same stride on both axes
    pub fn square(size: usize, stride: usize) -> Self {
        Self::new(size, size, stride, stride)
    }

    /// Elements in one window of one channel
    pub fn filter_size(&self) -> usize {
        self.width * self.height
    }

    /// `(out_rows, out_columns)` for an input of `rows x columns`
    pub fn output_size(&self, rows: usize, columns: usize) -> Result<(usize, usize)> {
        if self.width == 0 || self.height == 0 || self.x_stride == 0 || self.y_stride == 0 {
            return Err(TensorError::shape_mismatch(
                "filter_geometry",
                vec![1, 1, 1, 1],
                vec![self.height, self.width, self.y_stride, self.x_stride],
            ));
        }
        if rows < self.height || columns < self.width {
            return Err(TensorError::shape_mismatch(
                "filter_geometry",
                vec![self.height, self.width],
                vec![rows, columns],
            ));
        }
        Ok((
            (rows - self.height) / self.y_stride + 1,
            (columns - self.width) / self.x_stride + 1,
        ))
    }

    /// Top-left `(offset_x, offset_y)` of every placement, `x` outer, `y` inner
    pub fn placements(&self, rows: usize, columns: usize) -> Result<Vec<(usize, usize)>> {
        let (out_rows, out_columns) = self.output_size(rows, columns)?;
        let mut placements = Vec::with_capacity(out_rows * out_columns);
        for x in 0..out_columns {
            for y in 0..out_rows {
                placements.push((x * self.x_stride, y * self.y_stride));
            }
        }
        Ok(placements)
    }

    /// `(fx, fy)` for a flattened in-window offset
    #[inline]
    pub fn decode_offset(&self, offset: usize) -> (usize, usize) {
        (offset / self.height, offset % self.height)
    }
}

fn check_len(operation: &str, expected: &[usize], actual: usize) -> Result<()> {
    if expected.iter().product::<usize>() != actual {
        return Err(TensorError::shape_mismatch(operation, expected.to_vec(), vec![actual]));
    }
    Ok(())
}

/// Unfold every receptive field into one row.
///
/// `output` is a column-major `placements x (filter_size * depth)` matrix.
/// Column `d * filter_size + fx * height + fy` holds channel `d` at window
/// position `(fx, fy)`, so channel blocks are contiguous.
pub fn im2col_into(
    source: &[Scalar],
    rows: usize,
    columns: usize,
    depth: usize,
    geometry: FilterGeometry,
    output: &mut [Scalar],
    threshold: usize,
) -> Result<()> {
    check_len("im2col", &[rows, columns, depth], source.len())?;
    let placements = geometry.placements(rows, columns)?;
    let filter_size = geometry.filter_size();
    check_len("im2col", &[placements.len(), filter_size, depth], output.len())?;

    let slice = rows * columns;
    for_each_chunk(output, placements.len(), threshold, |j, column| {
        let (d, within) = (j / filter_size, j % filter_size);
        let (fx, fy) = geometry.decode_offset(within);
        let base = d * slice;
        for (cell, &(ox, oy)) in column.iter_mut().zip(&placements) {
            *cell = source[base + (ox + fx) * rows + (oy + fy)];
        }
    });
    Ok(())
}

/// Window maxima of every channel.
///
/// `output` is `(out_rows, out_columns, depth)`. When `indices` is given it
/// receives the in-window offset of each maximum (first one on ties) as a
/// scalar, same shape as `output`.
#[allow(clippy::too_many_arguments)]
pub fn max_pool_into(
    source: &[Scalar],
    rows: usize,
    columns: usize,
    depth: usize,
    geometry: FilterGeometry,
    output: &mut [Scalar],
    indices: Option<&mut [Scalar]>,
    threshold: usize,
) -> Result<()> {
    check_len("max_pool", &[rows, columns, depth], source.len())?;
    let (out_rows, out_columns) = geometry.output_size(rows, columns)?;
    check_len("max_pool", &[out_rows, out_columns, depth], output.len())?;

    let out_slice = out_rows * out_columns;
    let pool_slice = |d: usize, out: &mut [Scalar], mut idx: Option<&mut [Scalar]>| {
        let channel = &source[d * rows * columns..(d + 1) * rows * columns];
        for x in 0..out_columns {
            for y in 0..out_rows {
                let (ox, oy) = (x * geometry.x_stride, y * geometry.y_stride);
                let mut best = channel[ox * rows + oy];
                let mut best_offset = 0;
                for fx in 0..geometry.width {
                    for fy in 0..geometry.height {
                        let value = channel[(ox + fx) * rows + (oy + fy)];
                        if value > best {
                            best = value;
                            best_offset = fx * geometry.height + fy;
                        }
                    }
                }
                let target = x * out_rows + y;
                out[target] = best;
                if let Some(idx) = idx.as_deref_mut() {
                    idx[target] = best_offset as Scalar;
                }
            }
        }
    };

    match indices {
        None => for_each_chunk(output, out_slice, threshold, |d, out| pool_slice(d, out, None)),
        Some(indices) => {
            check_len("max_pool", &[out_rows, out_columns, depth], indices.len())?;
            if should_parallelize(output.len(), threshold) {
                #[cfg(feature = "parallel")]
                {
                    use scirs2_core::parallel_ops::*;
                    output
                        .par_chunks_mut(out_slice)
                        .zip(indices.par_chunks_mut(out_slice))
                        .enumerate()
                        .for_each(|(d, (out, idx))| pool_slice(d, out, Some(idx)));
                    return Ok(());
                }
            }
            for (d, (out, idx)) in output
                .chunks_mut(out_slice)
                .zip(indices.chunks_mut(out_slice))
                .enumerate()
            {
                pool_slice(d, out, Some(idx));
            }
        }
    }
    Ok(())
}

/// Route pooled gradients back to the recorded maxima.
///
/// `error` and `indices` are `(error_rows, error_columns, depth)` and must
/// match the pooled size of `(rows, columns)`. Each gradient is assigned to
/// the source position its index decodes to; every other cell is zero.
#[allow(clippy::too_many_arguments)]
pub fn reverse_max_pool_into(
    error: &[Scalar],
    indices: &[Scalar],
    error_rows: usize,
    error_columns: usize,
    depth: usize,
    geometry: FilterGeometry,
    output: &mut [Scalar],
    rows: usize,
    columns: usize,
    threshold: usize,
) -> Result<()> {
    let (expected_rows, expected_columns) = geometry.output_size(rows, columns)?;
    if (expected_rows, expected_columns) != (error_rows, error_columns) {
        return Err(TensorError::shape_mismatch(
            "reverse_max_pool",
            vec![expected_rows, expected_columns],
            vec![error_rows, error_columns],
        ));
    }
    check_len("reverse_max_pool", &[error_rows, error_columns, depth], error.len())?;
    check_len("reverse_max_pool", &[error_rows, error_columns, depth], indices.len())?;
    check_len("reverse_max_pool", &[rows, columns, depth], output.len())?;

    let error_slice = error_rows * error_columns;
    for_each_chunk(output, rows * columns, threshold, |d, out| {
        out.fill(0.0);
        let gradients = &error[d * error_slice..(d + 1) * error_slice];
        let offsets = &indices[d * error_slice..(d + 1) * error_slice];
        for x in 0..error_columns {
            for y in 0..error_rows {
                let source = x * error_rows + y;
                let (fx, fy) = geometry.decode_offset(offsets[source] as usize);
                let row = y * geometry.y_stride + fy;
                let column = x * geometry.x_stride + fx;
                if row < rows && column < columns {
                    out[column * rows + row] = gradients[source];
                }
            }
        }
    });
    Ok(())
}

/// Scatter convolution errors back through mirrored filters.
///
/// * `error`: `(error_rows, error_columns, filter_count)`, one channel per filter
/// * `filters`: column-major `(filter_size * depth) x filter_count`
/// * `output`: `(rows, columns, depth)`
///
/// For every placement inside the output and every filter `k`, the error at
/// the placement's grid position is multiplied by the filter mirrored in both
/// axes and accumulated into the window. Placements beyond the error grid
/// contribute nothing.
#[allow(clippy::too_many_arguments)]
pub fn reverse_im2col_into(
    error: &[Scalar],
    filters: &[Scalar],
    error_rows: usize,
    error_columns: usize,
    filter_count: usize,
    geometry: FilterGeometry,
    output: &mut [Scalar],
    rows: usize,
    columns: usize,
    depth: usize,
    threshold: usize,
) -> Result<()> {
    check_len("reverse_im2col", &[error_rows, error_columns, filter_count], error.len())?;
    let filter_size = geometry.filter_size();
    check_len("reverse_im2col", &[filter_size * depth, filter_count], filters.len())?;
    check_len("reverse_im2col", &[rows, columns, depth], output.len())?;
    let placements = geometry.placements(rows, columns)?;

    let error_slice = error_rows * error_columns;
    let filter_rows = filter_size * depth;
    let (width, height) = (geometry.width, geometry.height);

    for_each_chunk(output, rows * columns, threshold, |z, out| {
        out.fill(0.0);
        for k in 0..filter_count {
            let start = k * filter_rows + z * filter_size;
            let filter = &filters[start..start + filter_size];
            let errors = &error[k * error_slice..(k + 1) * error_slice];
            for &(ox, oy) in &placements {
                let (error_x, error_y) = (ox / geometry.x_stride, oy / geometry.y_stride);
                if error_x >= error_columns || error_y >= error_rows {
                    continue;
                }
                let e = errors[error_x * error_rows + error_y];
                for fx in 0..width {
                    for fy in 0..height {
                        let weight = filter[(width - fx - 1) * height + (height - fy - 1)];
                        out[(ox + fx) * rows + (oy + fy)] += weight * e;
                    }
                }
            }
        }
    });
    Ok(())
}

/// Surround every channel with a zero border of `padding` cells.
///
/// `output` is `(rows + 2p, columns + 2p, depth)`.
pub fn add_padding_into(
    source: &[Scalar],
    rows: usize,
    columns: usize,
    depth: usize,
    padding: usize,
    output: &mut [Scalar],
) -> Result<()> {
    check_len("add_padding", &[rows, columns, depth], source.len())?;
    let (padded_rows, padded_columns) = (rows + 2 * padding, columns + 2 * padding);
    check_len("add_padding", &[padded_rows, padded_columns, depth], output.len())?;

    output.fill(0.0);
    for d in 0..depth {
        for c in 0..columns {
            let from = d * rows * columns + c * rows;
            let to = d * padded_rows * padded_columns + (c + padding) * padded_rows + padding;
            output[to..to + rows].copy_from_slice(&source[from..from + rows]);
        }
    }
    Ok(())
}

/// Strip a border of `padding` cells from every channel.
///
/// `output` is `(rows - 2p, columns - 2p, depth)`.
pub fn remove_padding_into(
    source: &[Scalar],
    rows: usize,
    columns: usize,
    depth: usize,
    padding: usize,
    output: &mut [Scalar],
) -> Result<()> {
    check_len("remove_padding", &[rows, columns, depth], source.len())?;
    if rows < 2 * padding || columns < 2 * padding {
        return Err(TensorError::shape_mismatch(
            "remove_padding",
            vec![2 * padding, 2 * padding],
            vec![rows, columns],
        ));
    }
    let (inner_rows, inner_columns) = (rows - 2 * padding, columns - 2 * padding);
    check_len("remove_padding", &[inner_rows, inner_columns, depth], output.len())?;

    for d in 0..depth {
        for c in 0..inner_columns {
            let from = d * rows * columns + (c + padding) * rows + padding;
            let to = d * inner_rows * inner_columns + c * inner_rows;
            output[to..to + inner_rows].copy_from_slice(&source[from..from + inner_rows]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Column-major (rows, columns, depth) buffer with value = f(y, x, d)
    fn tensor(
        rows: usize,
        columns: usize,
        depth: usize,
        f: impl Fn(usize, usize, usize) -> Scalar,
    ) -> Vec<Scalar> {
        let mut values = vec![0.0; rows * columns * depth];
        for d in 0..depth {
            for x in 0..columns {
                for y in 0..rows {
                    values[d * rows * columns + x * rows + y] = f(y, x, d);
                }
            }
        }
        values
    }

    #[test]
    fn test_output_size_and_placements() {
        let geometry = FilterGeometry::new(2, 2, 1, 1);
        assert_eq!(geometry.output_size(3, 4).unwrap(), (2, 3));
        let placements = geometry.placements(3, 4).unwrap();
        assert_eq!(placements.len(), 6);
        // x outer, y inner
        assert_eq!(&placements[..3], &[(0, 0), (0, 1), (1, 0)]);

        assert!(FilterGeometry::square(5, 1).output_size(4, 4).is_err());
        assert!(FilterGeometry::square(2, 0).output_size(4, 4).is_err());
        assert_eq!(FilterGeometry::new(3, 2, 1, 1).decode_offset(5), (2, 1));
    }

    #[test]
    fn test_im2col_layout() {
        // 3x3 single channel, value = 10 * y + x
        let source = tensor(3, 3, 1, |y, x, _| (10 * y + x) as Scalar);
        let geometry = FilterGeometry::square(2, 1);
        let mut output = vec![0.0; 4 * 4];
        im2col_into(&source, 3, 3, 1, geometry, &mut output, usize::MAX).unwrap();

        // row p of the column-major (4 x 4) result
        let row = |p: usize| -> Vec<Scalar> { (0..4).map(|j| output[j * 4 + p]).collect() };
        // placement 0 at (x=0, y=0): window offsets fx*2+fy -> (0,0),(0,1),(1,0),(1,1)
        assert_eq!(row(0), vec![0.0, 10.0, 1.0, 11.0]);
        // placement 1 at (x=0, y=1)
        assert_eq!(row(1), vec![10.0, 20.0, 11.0, 21.0]);
        // placement 2 at (x=1, y=0)
        assert_eq!(row(2), vec![1.0, 11.0, 2.0, 12.0]);
    }

    #[test]
    fn test_im2col_channel_blocks() {
        let source = tensor(2, 2, 2, |y, x, d| (100 * d + 10 * y + x) as Scalar);
        let mut output = vec![0.0; 8];
        im2col_into(&source, 2, 2, 2, FilterGeometry::square(2, 1), &mut output, 1).unwrap();
        assert_eq!(output, vec![0.0, 10.0, 1.0, 11.0, 100.0, 110.0, 101.0, 111.0]);
    }

    #[test]
    fn test_max_pool_with_indices() {
        let source = tensor(4, 4, 1, |y, x, _| (y * 4 + x) as Scalar);
        let geometry = FilterGeometry::square(2, 2);
        let mut output = vec![0.0; 4];
        let mut indices = vec![0.0; 4];
        let saved = Some(indices.as_mut_slice());
        max_pool_into(&source, 4, 4, 1, geometry, &mut output, saved, usize::MAX).unwrap();

        // maxima at bottom-right of each window: (fx=1, fy=1) -> offset 3
        assert_eq!(output, vec![5.0, 13.0, 7.0, 15.0]);
        assert_eq!(indices, vec![3.0; 4]);
    }

    #[test]
    fn test_max_pool_ties_keep_first() {
        let source = vec![1.0; 4];
        let mut output = vec![0.0; 1];
        let mut indices = vec![9.0; 1];
        let geometry = FilterGeometry::square(2, 2);
        max_pool_into(&source, 2, 2, 1, geometry, &mut output, Some(&mut indices), 1).unwrap();
        assert_eq!(output, vec![1.0]);
        assert_eq!(indices, vec![0.0]);
    }

    #[test]
    fn test_reverse_max_pool_scatters_to_argmax() {
        let source = tensor(4, 4, 2, |y, x, d| ((y * 7 + x * 3 + d * 5) % 11) as Scalar);
        let geometry = FilterGeometry::square(2, 2);
        let mut pooled = vec![0.0; 8];
        let mut indices = vec![0.0; 8];
        let saved = Some(indices.as_mut_slice());
        max_pool_into(&source, 4, 4, 2, geometry, &mut pooled, saved, usize::MAX).unwrap();

        let mut restored = vec![-1.0; 32];
        reverse_max_pool_into(&pooled, &indices, 2, 2, 2, geometry, &mut restored, 4, 4, usize::MAX)
            .unwrap();

        let mut hits = 0;
        for (value, original) in restored.iter().zip(&source) {
            if *value != 0.0 {
                assert_eq!(value, original);
                hits += 1;
            }
        }
        assert!(hits <= 8);
        assert_eq!(restored.iter().sum::<Scalar>(), pooled.iter().sum::<Scalar>());
    }

    #[test]
    fn test_reverse_max_pool_rejects_wrong_grid() {
        let mut output = vec![0.0; 16];
        let geometry = FilterGeometry::square(2, 2);
        let result =
            reverse_max_pool_into(&[0.0; 9], &[0.0; 9], 3, 3, 1, geometry, &mut output, 4, 4, 1);
        assert!(matches!(result, Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_reverse_im2col_single_placement() {
        // 2x2 input, 2x2 filter, one placement, one filter
        let filters = vec![1.0, 2.0, 3.0, 4.0];
        let error = vec![2.0];
        let mut output = vec![0.0; 4];
        let geometry = FilterGeometry::square(2, 1);
        reverse_im2col_into(&error, &filters, 1, 1, 1, geometry, &mut output, 2, 2, 1, 1).unwrap();
        // mirrored: out(fx, fy) = filter[(1 - fx) * 2 + (1 - fy)] * e
        assert_eq!(output, vec![8.0, 6.0, 4.0, 2.0]);
    }

    #[test]
    fn test_reverse_im2col_accumulates_overlaps() {
        // 1x3 strip, 1x2 filter (width 2, height 1), stride 1: two placements overlap at x = 1
        let geometry = FilterGeometry::new(2, 1, 1, 1);
        let filters = vec![1.0, 1.0];
        let error = vec![1.0, 1.0];
        let mut output = vec![0.0; 3];
        reverse_im2col_into(&error, &filters, 1, 2, 1, geometry, &mut output, 1, 3, 1, usize::MAX)
            .unwrap();
        assert_eq!(output, vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_padding_roundtrip() {
        let source = vec![1.0; 4];
        let mut padded = vec![9.0; 16];
        add_padding_into(&source, 2, 2, 1, 1, &mut padded).unwrap();
        assert_eq!(
            padded,
            vec![
                0.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 1.0, 0.0, //
                0.0, 1.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 0.0,
            ]
        );

        let mut restored = vec![0.0; 4];
        remove_padding_into(&padded, 4, 4, 1, 1, &mut restored).unwrap();
        assert_eq!(restored, source);
        assert!(remove_padding_into(&source, 2, 2, 1, 2, &mut []).is_err());
    }
}
