use std::fmt;

use super::{check_index, check_segment_size, Matrix, ShapedTensor};
use crate::context::TensorContext;
use crate::error::Result;
use crate::scope::Lease;
use crate::segment::{Scalar, Segment};

/// Rank-3 tensor: `depth` column-major matrices laid out one after another
pub struct Tensor3D {
    lease: Lease,
    rows: usize,
    columns: usize,
    depth: usize,
}

impl Tensor3D {
    pub(crate) fn from_segment_unchecked(
        segment: Segment,
        rows: usize,
        columns: usize,
        depth: usize,
        context: &TensorContext,
    ) -> Self {
        debug_assert_eq!(segment.size(), rows * columns * depth);
        Self {
            lease: Lease::acquire(segment, context),
            rows,
            columns,
            depth,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.rows, self.columns, self.depth]
    }

    /// Elements in one depth slice
    pub fn matrix_size(&self) -> usize {
        self.rows * self.columns
    }

    #[inline]
    pub fn offset(&self, row: usize, column: usize, depth: usize) -> usize {
        depth * self.matrix_size() + column * self.rows + row
    }

    pub fn get(&self, row: usize, column: usize, depth: usize) -> Result<Scalar> {
        check_index(&[row, column, depth], &self.shape())?;
        self.segment().get(self.offset(row, column, depth))
    }

    pub fn set(&self, row: usize, column: usize, depth: usize, value: Scalar) -> Result<()> {
        check_index(&[row, column, depth], &self.shape())?;
        self.segment().set(self.offset(row, column, depth), value)
    }

    /// Depth slice `index` as an aliasing matrix
    pub fn matrix(&self, index: usize) -> Result<Matrix> {
        check_index(&[index], &[self.depth])?;
        let size = self.matrix_size();
        let view = self.segment().view(index * size, 1, size)?;
        Ok(Matrix::from_segment_unchecked(view, self.rows, self.columns, self.context()))
    }

    pub fn matrices(&self) -> Result<Vec<Matrix>> {
        (0..self.depth).map(|i| self.matrix(i)).collect()
    }

    /// Same storage as a `(rows * columns) x depth` matrix, one column per slice
    pub fn as_matrix(&self) -> Matrix {
        Matrix::from_segment_unchecked(
            self.segment().clone(),
            self.matrix_size(),
            self.depth,
            self.context(),
        )
    }
}

impl ShapedTensor for Tensor3D {
    const RANK: usize = 3;

    fn lease(&self) -> &Lease {
        &self.lease
    }

    fn shape_vec(&self) -> Vec<usize> {
        self.shape().to_vec()
    }

    fn with_segment(&self, segment: Segment) -> Result<Self> {
        check_segment_size("tensor3d", &self.shape(), &segment)?;
        Ok(Tensor3D::from_segment_unchecked(
            segment,
            self.rows,
            self.columns,
            self.depth,
            self.context(),
        ))
    }
}

impl fmt::Debug for Tensor3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor3D({}x{}x{}) {}",
            self.rows,
            self.columns,
            self.depth,
            self.segment().preview(8)
        )
    }
}
