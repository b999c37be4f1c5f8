use std::fmt;

use super::{check_index, check_segment_size, Matrix, ShapedTensor};
use crate::context::TensorContext;
use crate::error::{Result, TensorError};
use crate::scope::Lease;
use crate::segment::{Scalar, Segment};

/// Rank-1 tensor
pub struct Vector {
    lease: Lease,
}

impl Vector {
    pub(crate) fn from_segment_unchecked(segment: Segment, context: &TensorContext) -> Self {
        Self {
            lease: Lease::acquire(segment, context),
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn shape(&self) -> [usize; 1] {
        [self.size()]
    }

    pub fn get(&self, index: usize) -> Result<Scalar> {
        check_index(&[index], &self.shape())?;
        self.segment().get(index)
    }

    pub fn set(&self, index: usize, value: Scalar) -> Result<()> {
        check_index(&[index], &self.shape())?;
        self.segment().set(index, value)
    }

    /// Aliasing window of `len` elements starting at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> Result<Vector> {
        if offset + len > self.size() {
            return Err(TensorError::index_out_of_range(&[offset + len], &self.shape()));
        }
        let view = self.segment().view(offset, 1, len)?;
        Ok(Vector::from_segment_unchecked(view, self.context()))
    }

    /// Split into `block_count` equally sized aliasing vectors
    pub fn split(&self, block_count: usize) -> Result<Vec<Vector>> {
        if block_count == 0 || self.size() % block_count != 0 {
            return Err(TensorError::shape_mismatch(
                "split",
                vec![self.size()],
                vec![block_count],
            ));
        }
        let block = self.size() / block_count;
        (0..block_count)
            .map(|i| self.slice(i * block, block))
            .collect()
    }

    /// Same storage as a single-row matrix
    pub fn as_row_matrix(&self) -> Matrix {
        Matrix::from_segment_unchecked(self.segment().clone(), 1, self.size(), self.context())
    }

    /// Same storage as a single-column matrix
    pub fn as_column_matrix(&self) -> Matrix {
        Matrix::from_segment_unchecked(self.segment().clone(), self.size(), 1, self.context())
    }
}

impl ShapedTensor for Vector {
    const RANK: usize = 1;

    fn lease(&self) -> &Lease {
        &self.lease
    }

    fn shape_vec(&self) -> Vec<usize> {
        self.shape().to_vec()
    }

    fn with_segment(&self, segment: Segment) -> Result<Self> {
        check_segment_size("vector", &self.shape(), &segment)?;
        Ok(Vector::from_segment_unchecked(segment, self.context()))
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector({}) {}", self.size(), self.segment().preview(8))
    }
}
