use std::fmt;

use super::{check_index, check_segment_size, Matrix, ShapedTensor, Tensor3D};
use crate::context::TensorContext;
use crate::error::Result;
use crate::scope::Lease;
use crate::segment::{Scalar, Segment};

/// Rank-4 tensor: a batch of `count` equally shaped 3D tensors
pub struct Tensor4D {
    lease: Lease,
    rows: usize,
    columns: usize,
    depth: usize,
    count: usize,
}

impl Tensor4D {
    pub(crate) fn from_segment_unchecked(
        segment: Segment,
        rows: usize,
        columns: usize,
        depth: usize,
        count: usize,
        context: &TensorContext,
    ) -> Self {
        debug_assert_eq!(segment.size(), rows * columns * depth * count);
        Self {
            lease: Lease::acquire(segment, context),
            rows,
            columns,
            depth,
            count,
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

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn shape(&self) -> [usize; 4] {
        [self.rows, self.columns, self.depth, self.count]
    }

    /// Elements in one 3D tensor of the batch
    pub fn tensor_size(&self) -> usize {
        self.rows * self.columns * self.depth
    }

    #[inline]
    pub fn offset(&self, row: usize, column: usize, depth: usize, count: usize) -> usize {
        count * self.tensor_size() + depth * (self.rows * self.columns) + column * self.rows + row
    }

    pub fn get(&self, row: usize, column: usize, depth: usize, count: usize) -> Result<Scalar> {
        check_index(&[row, column, depth, count], &self.shape())?;
        self.segment().get(self.offset(row, column, depth, count))
    }

    pub fn set(
        &self,
        row: usize,
        column: usize,
        depth: usize,
        count: usize,
        value: Scalar,
    ) -> Result<()> {
        check_index(&[row, column, depth, count], &self.shape())?;
        self.segment().set(self.offset(row, column, depth, count), value)
    }

    /// Batch entry `index` as an aliasing 3D tensor
    pub fn tensor(&self, index: usize) -> Result<Tensor3D> {
        check_index(&[index], &[self.count])?;
        let size = self.tensor_size();
        let view = self.segment().view(index * size, 1, size)?;
        Ok(Tensor3D::from_segment_unchecked(
            view,
            self.rows,
            self.columns,
            self.depth,
            self.context(),
        ))
    }

    pub fn tensors(&self) -> Result<Vec<Tensor3D>> {
        (0..self.count).map(|i| self.tensor(i)).collect()
    }

    /// Same storage as a `(rows * columns * depth) x count` matrix, one column per entry
    pub fn as_matrix(&self) -> Matrix {
        Matrix::from_segment_unchecked(
            self.segment().clone(),
            self.tensor_size(),
            self.count,
            self.context(),
        )
    }
}

impl ShapedTensor for Tensor4D {
    const RANK: usize = 4;

    fn lease(&self) -> &Lease {
        &self.lease
    }

    fn shape_vec(&self) -> Vec<usize> {
        self.shape().to_vec()
    }

    fn with_segment(&self, segment: Segment) -> Result<Self> {
        check_segment_size("tensor4d", &self.shape(), &segment)?;
        Ok(Tensor4D::from_segment_unchecked(
            segment,
            self.rows,
            self.columns,
            self.depth,
            self.count,
            self.context(),
        ))
    }
}

impl fmt::Debug for Tensor4D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor4D({}x{}x{}x{}) {}",
            self.rows,
            self.columns,
            self.depth,
            self.count,
            self.segment().preview(8)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_formula() {
        let context = TensorContext::default();
        let values: Vec<Scalar> = (0..48).map(|x| x as Scalar).collect();
        let tensor = context.create_tensor4d_from(2, 3, 4, 2, &values).unwrap();

        // count * (D*R*C) + depth * (R*C) + column * R + row
        assert_eq!(tensor.get(1, 2, 3, 1).unwrap(), (24 + 3 * 6 + 2 * 2 + 1) as Scalar);
        assert!(tensor.get(0, 0, 0, 2).is_err());
    }

    #[test]
    fn test_tensor_slice_and_nested_matrix() {
        let context = TensorContext::default();
        let values: Vec<Scalar> = (0..16).map(|x| x as Scalar).collect();
        let batch = context.create_tensor4d_from(2, 2, 2, 2, &values).unwrap();

        let second = batch.tensor(1).unwrap();
        assert_eq!(second.get(0, 0, 0).unwrap(), 8.0);

        let slice = second.matrix(1).unwrap();
        assert_eq!(slice.to_vec().unwrap(), vec![12.0, 13.0, 14.0, 15.0]);

        slice.set(0, 0, -1.0).unwrap();
        assert_eq!(batch.get(0, 0, 1, 1).unwrap(), -1.0);
    }

    #[test]
    fn test_as_matrix() {
        let context = TensorContext::default();
        let batch = context.create_tensor4d(3, 3, 2, 5, true);
        assert_eq!(batch.as_matrix().shape(), [18, 5]);
        assert_eq!(batch.tensors().unwrap().len(), 5);
    }
}
