//! Cache-oblivious matrix transpose
//!
//! The index range is bisected along its longer side until both sides fit in
//! `block`, then the leaf is copied directly. Memory traffic stays local at
//! every cache level without tuning for a particular cache size.

use densa_core::Scalar;

/// Transpose a column-major `rows x columns` matrix into `output`
/// (column-major `columns x rows`).
pub fn transpose_into(
    source: &[Scalar],
    rows: usize,
    columns: usize,
    output: &mut [Scalar],
    block: usize,
) {
    debug_assert_eq!(source.len(), rows * columns);
    debug_assert_eq!(output.len(), rows * columns);
    let block = block.max(1);
    transpose_range(source, rows, columns, output, 0..rows, 0..columns, block);
}

fn transpose_range(
    source: &[Scalar],
    rows: usize,
    columns: usize,
    output: &mut [Scalar],
    row_range: std::ops::Range<usize>,
    column_range: std::ops::Range<usize>,
    block: usize,
) {
    let height = row_range.len();
    let width = column_range.len();

    if height <= block && width <= block {
        for c in column_range {
            for r in row_range.clone() {
                output[r * columns + c] = source[c * rows + r];
            }
        }
    } else if height >= width {
        let mid = row_range.start + height / 2;
        let (upper, lower) = (row_range.start..mid, mid..row_range.end);
        transpose_range(source, rows, columns, output, upper, column_range.clone(), block);
        transpose_range(source, rows, columns, output, lower, column_range, block);
    } else {
        let mid = column_range.start + width / 2;
        let (left, right) = (column_range.start..mid, mid..column_range.end);
        transpose_range(source, rows, columns, output, row_range.clone(), left, block);
        transpose_range(source, rows, columns, output, row_range, right, block);
    }
}
