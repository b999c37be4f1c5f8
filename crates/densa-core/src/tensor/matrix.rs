use std::fmt;

use super::{check_index, check_segment_size, ShapedTensor, Vector};
use crate::context::TensorContext;
use crate::error::{Result, TensorError};
use crate::scope::Lease;
use crate::segment::{Scalar, Segment};

/// Rank-2 tensor in column-major storage
pub struct Matrix {
    lease: Lease,
    rows: usize,
    columns: usize,
}

impl Matrix {
    pub(crate) fn from_segment_unchecked(
        segment: Segment,
        rows: usize,
        columns: usize,
        context: &TensorContext,
    ) -> Self {
        debug_assert_eq!(segment.size(), rows * columns);
        Self {
            lease: Lease::acquire(segment, context),
            rows,
            columns,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.columns]
    }

    /// Storage offset of `(row, column)`
    #[inline]
    pub fn offset(&self, row: usize, column: usize) -> usize {
        column * self.rows + row
    }

    pub fn get(&self, row: usize, column: usize) -> Result<Scalar> {
        check_index(&[row, column], &self.shape())?;
        self.segment().get(self.offset(row, column))
    }

    pub fn set(&self, row: usize, column: usize, value: Scalar) -> Result<()> {
        check_index(&[row, column], &self.shape())?;
        self.segment().set(self.offset(row, column), value)
    }

    /// Row `index` as an aliasing strided vector
    pub fn row(&self, index: usize) -> Result<Vector> {
        check_index(&[index], &[self.rows])?;
        let view = self.segment().view(index, self.rows, self.columns)?;
        Ok(Vector::from_segment_unchecked(view, self.context()))
    }

    /// Column `index` as an aliasing contiguous vector
    pub fn column(&self, index: usize) -> Result<Vector> {
        check_index(&[index], &[self.columns])?;
        let view = self.segment().view(index * self.rows, 1, self.rows)?;
        Ok(Vector::from_segment_unchecked(view, self.context()))
    }

    pub fn all_rows(&self) -> Result<Vec<Vector>> {
        (0..self.rows).map(|i| self.row(i)).collect()
    }

    pub fn all_columns(&self) -> Result<Vec<Vector>> {
        (0..self.columns).map(|i| self.column(i)).collect()
    }

    /// Rows `[0, row)` and `[row, rows)` as two new matrices
    pub fn split_at_row(&self, row: usize) -> Result<(Matrix, Matrix)> {
        if row > self.rows {
            return Err(TensorError::index_out_of_range(&[row], &[self.rows]));
        }
        let top = self.rows_to_matrix(0..row)?;
        let bottom = self.rows_to_matrix(row..self.rows)?;
        Ok((top, bottom))
    }

    /// Columns `[0, column)` and `[column, columns)`; both alias this matrix
    pub fn split_at_column(&self, column: usize) -> Result<(Matrix, Matrix)> {
        if column > self.columns {
            return Err(TensorError::index_out_of_range(&[column], &[self.columns]));
        }
        let left = self.segment().view(0, 1, column * self.rows)?;
        let right = self
            .segment()
            .view(column * self.rows, 1, (self.columns - column) * self.rows)?;
        Ok((
            Matrix::from_segment_unchecked(left, self.rows, column, self.context()),
            Matrix::from_segment_unchecked(right, self.rows, self.columns - column, self.context()),
        ))
    }

    /// `self` stacked on top of `other`
    pub fn concat_rows(&self, other: &Matrix) -> Result<Matrix> {
        if self.columns != other.columns {
            return Err(TensorError::shape_mismatch(
                "concat_rows",
                vec![self.columns],
                vec![other.columns],
            ));
        }
        let rows = self.rows + other.rows;
        let top = self.segment().borrow_contiguous()?;
        let bottom = other.segment().borrow_contiguous()?;
        let segment = self.context().create_segment_from_fn(rows * self.columns, |i| {
            let (r, c) = (i % rows, i / rows);
            if r < self.rows {
                top[c * self.rows + r]
            } else {
                bottom[c * other.rows + (r - self.rows)]
            }
        });
        Ok(Matrix::from_segment_unchecked(segment, rows, self.columns, self.context()))
    }

    /// `self` followed by `other` side by side
    pub fn concat_columns(&self, other: &Matrix) -> Result<Matrix> {
        if self.rows != other.rows {
            return Err(TensorError::shape_mismatch(
                "concat_columns",
                vec![self.rows],
                vec![other.rows],
            ));
        }
        let segment = self.context().create_segment(self.size() + other.size(), false);
        self.segment().copy_to_segment(&segment, 0, 0, self.size())?;
        other.segment().copy_to_segment(&segment, 0, self.size(), other.size())?;
        Ok(Matrix::from_segment_unchecked(
            segment,
            self.rows,
            self.columns + other.columns,
            self.context(),
        ))
    }

    /// New matrix made of the listed rows, in order
    pub fn copy_rows(&self, indices: &[usize]) -> Result<Matrix> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.rows) {
            return Err(TensorError::index_out_of_range(&[bad], &[self.rows]));
        }
        let source = self.segment().borrow_contiguous()?;
        let rows = indices.len();
        let segment = self.context().create_segment_from_fn(rows * self.columns, |i| {
            let (r, c) = (i % rows, i / rows);
            source[c * self.rows + indices[r]]
        });
        Ok(Matrix::from_segment_unchecked(segment, rows, self.columns, self.context()))
    }

    /// New matrix made of the listed columns, in order
    pub fn copy_columns(&self, indices: &[usize]) -> Result<Matrix> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.columns) {
            return Err(TensorError::index_out_of_range(&[bad], &[self.columns]));
        }
        let segment = self.context().create_segment(indices.len() * self.rows, false);
        for (target, &column) in indices.iter().enumerate() {
            self.segment()
                .copy_to_segment(&segment, column * self.rows, target * self.rows, self.rows)?;
        }
        Ok(Matrix::from_segment_unchecked(segment, self.rows, indices.len(), self.context()))
    }

    fn rows_to_matrix(&self, range: std::ops::Range<usize>) -> Result<Matrix> {
        let indices: Vec<usize> = range.collect();
        self.copy_rows(&indices)
    }
}

impl ShapedTensor for Matrix {
    const RANK: usize = 2;

    fn lease(&self) -> &Lease {
        &self.lease
    }

    fn shape_vec(&self) -> Vec<usize> {
        self.shape().to_vec()
    }

    fn with_segment(&self, segment: Segment) -> Result<Self> {
        check_segment_size("matrix", &self.shape(), &segment)?;
        Ok(Matrix::from_segment_unchecked(segment, self.rows, self.columns, self.context()))
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Matrix({}x{}) {}",
            self.rows,
            self.columns,
            self.segment().preview(8)
        )
    }
}
