//! Dense matrix multiply over column-major buffers
//!
//! Both operands are arranged so that every output cell is a dot product of
//! two contiguous runs of `inner` elements:
//!
//! - the left operand as its transpose, so row `i` of `A` is contiguous
//! - the right operand as is, so column `j` of `B` is contiguous
//!
//! Each dot product runs in 8-lane SIMD chunks (see [`crate::simd::dot`]).

use densa_core::Scalar;

use crate::parallel::for_each_chunk;
use crate::simd;

/// `C = A · B` given `A` transposed.
///
/// * `lhs_rows`: `A^T` in column-major order, i.e. the `rows` rows of `A`
///   stored one after another, each `inner` long
/// * `rhs_columns`: `B` in column-major order, `columns` columns each `inner` long
/// * `output`: `C`, column-major `rows x columns`
///
/// Output columns are computed in parallel when `rows * columns` reaches
/// `threshold`.
pub fn multiply_transposed_into(
    lhs_rows: &[Scalar],
    rhs_columns: &[Scalar],
    rows: usize,
    inner: usize,
    columns: usize,
    output: &mut [Scalar],
    threshold: usize,
) {
    debug_assert_eq!(lhs_rows.len(), rows * inner);
    debug_assert_eq!(rhs_columns.len(), inner * columns);
    debug_assert_eq!(output.len(), rows * columns);

    if inner == 0 {
        output.fill(0.0);
        return;
    }

    for_each_chunk(output, rows, threshold, |j, column| {
        let b = &rhs_columns[j * inner..(j + 1) * inner];
        for (i, cell) in column.iter_mut().enumerate() {
            *cell = simd::dot(&lhs_rows[i * inner..(i + 1) * inner], b);
        }
    });
}
