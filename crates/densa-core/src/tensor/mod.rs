//! Rank 1-4 tensors over segments
//!
//! Every tensor is a [`Lease`] on one segment plus a shape. Storage is
//! column-major at every rank:
//!
//! | type       | shape (most significant last) | offset                                 |
//! |------------|-------------------------------|----------------------------------------|
//! | [`Vector`]   | `[size]`                      | `i`                                    |
//! | [`Matrix`]   | `[rows, columns]`             | `c·R + r`                              |
//! | [`Tensor3D`] | `[rows, columns, depth]`      | `d·R·C + c·R + r`                      |
//! | [`Tensor4D`] | `[rows, columns, depth, count]` | `n·D·R·C + d·R·C + c·R + r`          |
//!
//! Reshapes and slices never copy: they take a new lease on the same segment
//! or on a strided view of it, so writes through any alias are visible through
//! all of them. Use [`ShapedTensor::clone_tensor`] for an independent copy.

mod matrix;
mod tensor3d;
mod tensor4d;
mod vector;

pub use matrix::Matrix;
pub use tensor3d::Tensor3D;
pub use tensor4d::Tensor4D;
pub use vector::Vector;

use crate::context::{element_count, TensorContext};
use crate::error::{Result, TensorError};
use crate::scope::Lease;
use crate::segment::{Scalar, Segment};

/// Operations shared by every tensor rank
pub trait ShapedTensor {
    /// Number of dimensions
    const RANK: usize;

    /// The counted reference this tensor holds
    fn lease(&self) -> &Lease;

    /// Shape as an owned vector, most significant dimension last
    fn shape_vec(&self) -> Vec<usize>;

    /// New tensor of the same shape over `segment`
    fn with_segment(&self, segment: Segment) -> Result<Self>
    where
        Self: Sized;

    /// Underlying segment
    fn segment(&self) -> &Segment {
        self.lease().segment()
    }

    /// Context the tensor was created in
    fn context(&self) -> &TensorContext {
        self.lease().context()
    }

    /// Total element count
    fn size(&self) -> usize {
        self.segment().size()
    }

    /// False once this tensor was disposed or its storage was released
    fn is_valid(&self) -> bool {
        !self.lease().is_disposed() && self.segment().is_valid()
    }

    /// Give back this tensor's reference; idempotent
    fn dispose(&self) {
        self.lease().dispose()
    }

    /// Elements in storage order
    fn to_vec(&self) -> Result<Vec<Scalar>> {
        self.segment().to_vec()
    }

    /// Independent copy in a fresh pooled segment
    fn clone_tensor(&self) -> Result<Self>
    where
        Self: Sized,
    {
        let copy = {
            let values = self.segment().borrow_contiguous()?;
            self.context().create_segment_from(&values)
        };
        self.with_segment(copy)
    }

    /// Same storage seen as a flat vector
    fn as_vector(&self) -> Vector {
        Vector::from_segment_unchecked(self.segment().clone(), self.context())
    }

    /// Same storage seen as a matrix; at most one dimension may be `None`
    fn reshape_as_matrix(&self, rows: Option<usize>, columns: Option<usize>) -> Result<Matrix> {
        let dims = resolve_shape(self.size(), &[rows, columns])?;
        Ok(Matrix::from_segment_unchecked(
            self.segment().clone(),
            dims[0],
            dims[1],
            self.context(),
        ))
    }

    /// Same storage seen as a 3D tensor; at most one dimension may be `None`
    fn reshape_as_tensor3d(
        &self,
        rows: Option<usize>,
        columns: Option<usize>,
        depth: Option<usize>,
    ) -> Result<Tensor3D> {
        let dims = resolve_shape(self.size(), &[rows, columns, depth])?;
        Ok(Tensor3D::from_segment_unchecked(
            self.segment().clone(),
            dims[0],
            dims[1],
            dims[2],
            self.context(),
        ))
    }

    /// Same storage seen as a 4D tensor; at most one dimension may be `None`
    fn reshape_as_tensor4d(
        &self,
        rows: Option<usize>,
        columns: Option<usize>,
        depth: Option<usize>,
        count: Option<usize>,
    ) -> Result<Tensor4D> {
        let dims = resolve_shape(self.size(), &[rows, columns, depth, count])?;
        Ok(Tensor4D::from_segment_unchecked(
            self.segment().clone(),
            dims[0],
            dims[1],
            dims[2],
            dims[3],
            self.context(),
        ))
    }
}

/// Resolve a reshape request against `total` elements.
///
/// At most one dimension may be `None`; it is inferred as
/// `total / product(specified)` and must divide evenly. Fully specified
/// requests must multiply out to `total`.
pub fn resolve_shape(total: usize, requested: &[Option<usize>]) -> Result<Vec<usize>> {
    let free = requested.iter().filter(|d| d.is_none()).count();
    if free > 1 {
        return Err(TensorError::invalid_reshape(
            total,
            requested,
            "at most one dimension can be inferred",
        ));
    }

    let dims: Vec<usize> = requested.iter().flatten().copied().collect();
    let specified = element_count(&dims).ok_or_else(|| {
        TensorError::invalid_reshape(total, requested, "dimensions overflow usize")
    })?;
    if free == 0 {
        if specified != total {
            return Err(TensorError::invalid_reshape(
                total,
                requested,
                format!("dimensions multiply to {specified}"),
            ));
        }
        return Ok(dims);
    }

    if specified == 0 || total % specified != 0 {
        return Err(TensorError::invalid_reshape(
            total,
            requested,
            format!("{total} is not divisible by {specified}"),
        ));
    }
    let inferred = total / specified;
    Ok(requested.iter().map(|d| d.unwrap_or(inferred)).collect())
}

/// Bounds check for rank-specific indices
pub(crate) fn check_index(index: &[usize], shape: &[usize]) -> Result<()> {
    if index.iter().zip(shape).any(|(i, d)| i >= d) {
        return Err(TensorError::index_out_of_range(index, shape));
    }
    Ok(())
}

/// Size check for `with_segment`
pub(crate) fn check_segment_size(
    operation: &str,
    shape: &[usize],
    segment: &Segment,
) -> Result<()> {
    if element_count(shape) != Some(segment.size()) {
        return Err(TensorError::shape_mismatch(
            operation,
            shape.to_vec(),
            vec![segment.size()],
        ));
    }
    Ok(())
}
