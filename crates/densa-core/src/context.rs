//! Segment and tensor factory shared by a provider and every tensor it creates

use std::sync::Arc;

use crate::error::{Result, TensorError};
use crate::pool::{PoolConfig, PoolStats, SegmentPool};
use crate::scope::{ScopeId, ScopeStack};
use crate::segment::{Scalar, Segment};
use crate::tensor::{Matrix, ShapedTensor, Tensor3D, Tensor4D, Vector};

/// Cheap handle to a segment pool and a scope stack.
///
/// Clones share the same pool and stack. Tensors keep a clone so that
/// reshapes and slices register in the same scopes as their parent.
#[derive(Clone)]
pub struct TensorContext {
    pool: Arc<SegmentPool>,
    scopes: Arc<ScopeStack>,
}

impl TensorContext {
    /// Create a context whose pool uses `config`
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pool: Arc::new(SegmentPool::new(config)),
            scopes: Arc::new(ScopeStack::new()),
        }
    }

    /// Segment pool
    pub fn pool(&self) -> &Arc<SegmentPool> {
        &self.pool
    }

    /// Pool statistics
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Scope stack
    pub fn scopes(&self) -> &ScopeStack {
        &self.scopes
    }

    /// Open a new innermost scope
    pub fn push_scope(&self) -> ScopeId {
        self.scopes.push()
    }

    /// Close the innermost scope, disposing its remaining tensors
    pub fn pop_scope(&self) -> Option<usize> {
        self.scopes.pop()
    }

    /// Close every open scope, innermost first
    pub fn dispose_all_scopes(&self) -> usize {
        self.scopes.dispose_all()
    }

    /// Run `f` inside a fresh scope that is popped on every exit path.
    ///
    /// Results built inside `f` that must survive the bracket should call
    /// `detach_from_scope` on their lease before returning.
    pub fn scoped<R>(&self, f: impl FnOnce(&TensorContext) -> Result<R>) -> Result<R> {
        let scope = self.push_scope();
        let _guard = ScopeGuard {
            scopes: &self.scopes,
            scope,
        };
        f(self)
    }

    /// Pooled segment of `size` elements; reused buffers are zeroed when `zeroed`
    pub fn create_segment(&self, size: usize, zeroed: bool) -> Segment {
        Segment::pooled(self.pool.acquire(size, zeroed), self.pool.clone())
    }

    /// Pooled segment holding a copy of `values`
    pub fn create_segment_from(&self, values: &[Scalar]) -> Segment {
        let mut buffer = self.pool.acquire(values.len(), false);
        buffer.copy_from_slice(values);
        Segment::pooled(buffer, self.pool.clone())
    }

    /// Owned one-shot segment that never returns to the pool
    pub fn create_owned_segment(&self, values: Vec<Scalar>) -> Segment {
        Segment::owned(values)
    }

    /// Pooled segment filled by `f(index)`
    pub fn create_segment_from_fn(&self, size: usize, f: impl Fn(usize) -> Scalar) -> Segment {
        let mut buffer = self.pool.acquire(size, false);
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = f(i);
        }
        Segment::pooled(buffer, self.pool.clone())
    }

    // === Vectors ===

    pub fn create_vector(&self, size: usize, zeroed: bool) -> Vector {
        Vector::from_segment_unchecked(self.create_segment(size, zeroed), self)
    }

    pub fn create_vector_from(&self, values: &[Scalar]) -> Vector {
        Vector::from_segment_unchecked(self.create_segment_from(values), self)
    }

    pub fn create_vector_from_fn(&self, size: usize, f: impl Fn(usize) -> Scalar) -> Vector {
        Vector::from_segment_unchecked(self.create_segment_from_fn(size, f), self)
    }

    /// Vector over an existing segment (takes its own reference)
    pub fn create_vector_from_segment(&self, segment: Segment) -> Vector {
        Vector::from_segment_unchecked(segment, self)
    }

    /// Vector of uniform samples in `[low, high)`
    pub fn create_random_vector(&self, size: usize, low: Scalar, high: Scalar) -> Vector {
        self.create_vector_from(&random_uniform(size, low, high))
    }

    // === Matrices ===

    pub fn create_matrix(&self, rows: usize, columns: usize, zeroed: bool) -> Matrix {
        let segment = self.create_segment(rows * columns, zeroed);
        Matrix::from_segment_unchecked(segment, rows, columns, self)
    }

    /// Matrix from column-major `values`
    pub fn create_matrix_from(
        &self,
        rows: usize,
        columns: usize,
        values: &[Scalar],
    ) -> Result<Matrix> {
        check_len("create_matrix_from", &[rows, columns], values.len())?;
        Ok(Matrix::from_segment_unchecked(
            self.create_segment_from(values),
            rows,
            columns,
            self,
        ))
    }

    /// Matrix filled by `f(row, column)`
    pub fn create_matrix_from_fn(
        &self,
        rows: usize,
        columns: usize,
        f: impl Fn(usize, usize) -> Scalar,
    ) -> Matrix {
        let stride = rows.max(1);
        let segment = self.create_segment_from_fn(rows * columns, |i| f(i % stride, i / stride));
        Matrix::from_segment_unchecked(segment, rows, columns, self)
    }

    /// Matrix whose rows are `rows`; all rows must have the same length
    pub fn create_matrix_from_rows(&self, rows: &[Vec<Scalar>]) -> Result<Matrix> {
        let columns = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != columns) {
            return Err(TensorError::shape_mismatch(
                "create_matrix_from_rows",
                vec![columns],
                vec![bad.len()],
            ));
        }
        Ok(self.create_matrix_from_fn(rows.len(), columns, |r, c| rows[r][c]))
    }

    /// Matrix over an existing segment; `rows * columns` must equal its size
    pub fn create_matrix_from_segment(
        &self,
        segment: Segment,
        rows: usize,
        columns: usize,
    ) -> Result<Matrix> {
        check_len("create_matrix_from_segment", &[rows, columns], segment.size())?;
        Ok(Matrix::from_segment_unchecked(segment, rows, columns, self))
    }

    pub fn create_random_matrix(
        &self,
        rows: usize,
        columns: usize,
        low: Scalar,
        high: Scalar,
    ) -> Matrix {
        let segment = self.create_segment_from(&random_uniform(rows * columns, low, high));
        Matrix::from_segment_unchecked(segment, rows, columns, self)
    }

    /// Matrix of normal samples with the given mean and standard deviation
    pub fn create_random_normal_matrix(
        &self,
        rows: usize,
        columns: usize,
        mean: Scalar,
        std: Scalar,
    ) -> Matrix {
        let segment = self.create_segment_from(&random_normal(rows * columns, mean, std));
        Matrix::from_segment_unchecked(segment, rows, columns, self)
    }

    /// Identity matrix of the given order
    pub fn create_identity_matrix(&self, order: usize) -> Matrix {
        self.create_matrix_from_fn(order, order, |r, c| if r == c { 1.0 } else { 0.0 })
    }

    // === 3D tensors ===

    pub fn create_tensor3d(
        &self,
        rows: usize,
        columns: usize,
        depth: usize,
        zeroed: bool,
    ) -> Tensor3D {
        Tensor3D::from_segment_unchecked(
            self.create_segment(rows * columns * depth, zeroed),
            rows,
            columns,
            depth,
            self,
        )
    }

    /// 3D tensor from `values` laid out depth-major, then column-major
    pub fn create_tensor3d_from(
        &self,
        rows: usize,
        columns: usize,
        depth: usize,
        values: &[Scalar],
    ) -> Result<Tensor3D> {
        check_len("create_tensor3d_from", &[rows, columns, depth], values.len())?;
        Ok(Tensor3D::from_segment_unchecked(
            self.create_segment_from(values),
            rows,
            columns,
            depth,
            self,
        ))
    }

    pub fn create_tensor3d_from_segment(
        &self,
        segment: Segment,
        rows: usize,
        columns: usize,
        depth: usize,
    ) -> Result<Tensor3D> {
        check_len("create_tensor3d_from_segment", &[rows, columns, depth], segment.size())?;
        Ok(Tensor3D::from_segment_unchecked(segment, rows, columns, depth, self))
    }

    /// Stack equally shaped matrices as depth slices
    pub fn create_tensor3d_from_matrices(&self, matrices: &[&Matrix]) -> Result<Tensor3D> {
        let (rows, columns) = matrices
            .first()
            .map(|m| (m.rows(), m.columns()))
            .unwrap_or((0, 0));
        if let Some(matrix) = matrices.iter().find(|m| m.shape() != [rows, columns]) {
            return Err(TensorError::shape_mismatch(
                "create_tensor3d_from_matrices",
                vec![rows, columns],
                matrix.shape().to_vec(),
            ));
        }
        let slice = rows * columns;
        let segment = self.create_segment(slice * matrices.len(), false);
        for (k, matrix) in matrices.iter().enumerate() {
            matrix.segment().copy_to_segment(&segment, 0, k * slice, slice)?;
        }
        Ok(Tensor3D::from_segment_unchecked(segment, rows, columns, matrices.len(), self))
    }

    // === 4D tensors ===

    pub fn create_tensor4d(
        &self,
        rows: usize,
        columns: usize,
        depth: usize,
        count: usize,
        zeroed: bool,
    ) -> Tensor4D {
        Tensor4D::from_segment_unchecked(
            self.create_segment(rows * columns * depth * count, zeroed),
            rows,
            columns,
            depth,
            count,
            self,
        )
    }

    pub fn create_tensor4d_from(
        &self,
        rows: usize,
        columns: usize,
        depth: usize,
        count: usize,
        values: &[Scalar],
    ) -> Result<Tensor4D> {
        check_len("create_tensor4d_from", &[rows, columns, depth, count], values.len())?;
        Ok(Tensor4D::from_segment_unchecked(
            self.create_segment_from(values),
            rows,
            columns,
            depth,
            count,
            self,
        ))
    }

    pub fn create_tensor4d_from_segment(
        &self,
        segment: Segment,
        rows: usize,
        columns: usize,
        depth: usize,
        count: usize,
    ) -> Result<Tensor4D> {
        check_len("create_tensor4d_from_segment", &[rows, columns, depth, count], segment.size())?;
        Ok(Tensor4D::from_segment_unchecked(segment, rows, columns, depth, count, self))
    }

    /// Stack equally shaped 3D tensors along the count dimension
    pub fn create_tensor4d_from_tensors(&self, tensors: &[&Tensor3D]) -> Result<Tensor4D> {
        let (rows, columns, depth) = tensors
            .first()
            .map(|t| (t.rows(), t.columns(), t.depth()))
            .unwrap_or((0, 0, 0));
        if let Some(tensor) = tensors.iter().find(|t| t.shape() != [rows, columns, depth]) {
            return Err(TensorError::shape_mismatch(
                "create_tensor4d_from_tensors",
                vec![rows, columns, depth],
                tensor.shape().to_vec(),
            ));
        }
        let block = rows * columns * depth;
        let segment = self.create_segment(block * tensors.len(), false);
        for (n, tensor) in tensors.iter().enumerate() {
            tensor.segment().copy_to_segment(&segment, 0, n * block, block)?;
        }
        Ok(Tensor4D::from_segment_unchecked(segment, rows, columns, depth, tensors.len(), self))
    }
}

impl Default for TensorContext {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl std::fmt::Debug for TensorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorContext")
            .field("pool", &self.pool)
            .field("scope_depth", &self.scopes.depth())
            .finish()
    }
}

struct ScopeGuard<'a> {
    scopes: &'a ScopeStack,
    scope: ScopeId,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scopes.pop_to(self.scope);
    }
}

/// Product of `dims`, or `None` when it does not fit in `usize`
pub(crate) fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |total, &dim| total.checked_mul(dim))
}

fn check_len(operation: &str, dims: &[usize], actual: usize) -> Result<()> {
    if element_count(dims) != Some(actual) {
        return Err(TensorError::shape_mismatch(operation, dims.to_vec(), vec![actual]));
    }
    Ok(())
}

/// Uniform samples in `[low, high)`
fn random_uniform(size: usize, low: Scalar, high: Scalar) -> Vec<Scalar> {
    use scirs2_core::random::quick::random_f64;
    let range = (high - low) as f64;
    (0..size)
        .map(|_| (low as f64 + random_f64() * range) as Scalar)
        .collect()
}

/// Normal samples via Box-Muller
fn random_normal(size: usize, mean: Scalar, std: Scalar) -> Vec<Scalar> {
    use scirs2_core::random::quick::random_f64;
    let mut values = Vec::with_capacity(size + 1);
    while values.len() < size {
        // Keep u1 away from zero so ln() stays finite
        let u1 = random_f64().max(f64::MIN_POSITIVE);
        let u2 = random_f64();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        values.push((mean as f64 + std as f64 * radius * theta.cos()) as Scalar);
        values.push((mean as f64 + std as f64 * radius * theta.sin()) as Scalar);
    }
    values.truncate(size);
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentKind;

    #[test]
    fn test_created_segments_are_pooled() {
        let context = TensorContext::default();
        let segment = context.create_segment(5, true);
        assert_eq!(segment.kind(), SegmentKind::Pooled);
        assert_eq!(segment.to_vec().unwrap(), vec![0.0; 5]);

        let owned = context.create_owned_segment(vec![1.0]);
        assert_eq!(owned.kind(), SegmentKind::Owned);
    }

    #[test]
    fn test_tensor_disposal_recycles_buffer() {
        let context = TensorContext::default();
        let vector = context.create_vector(16, true);
        vector.dispose();
        let _again = context.create_vector(16, true);

        let stats = context.pool_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_matrix_from_fn_is_column_major() {
        let context = TensorContext::default();
        let matrix = context.create_matrix_from_fn(2, 3, |r, c| (r * 10 + c) as Scalar);
        assert_eq!(
            matrix.to_vec().unwrap(),
            vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0]
        );
    }

    #[test]
    fn test_create_from_rejects_bad_length() {
        let context = TensorContext::default();
        assert!(matches!(
            context.create_matrix_from(2, 2, &[1.0; 3]),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert!(context.create_tensor3d_from(2, 2, 2, &[0.0; 8]).is_ok());
        assert!(context.create_matrix_from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn test_scoped_pops_on_error() {
        let context = TensorContext::default();
        let mut escaped = None;
        let result: Result<()> = context.scoped(|ctx| {
            escaped = Some(ctx.create_vector(4, true));
            Err(TensorError::unsupported("test", "none"))
        });
        assert!(result.is_err());
        assert_eq!(context.scopes().depth(), 0);
        assert!(!escaped.unwrap().is_valid());
    }

    #[test]
    fn test_scoped_detached_result_survives() {
        let context = TensorContext::default();
        let kept = context
            .scoped(|ctx| {
                let _scratch = ctx.create_vector(8, true);
                let result = ctx.create_vector_from(&[1.0, 2.0]);
                result.lease().detach_from_scope();
                Ok(result)
            })
            .unwrap();
        assert!(kept.is_valid());
        assert_eq!(kept.to_vec().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_stacking_helpers() {
        let context = TensorContext::default();
        let a = context.create_matrix_from(2, 1, &[1.0, 2.0]).unwrap();
        let b = context.create_matrix_from(2, 1, &[3.0, 4.0]).unwrap();
        let stacked = context.create_tensor3d_from_matrices(&[&a, &b]).unwrap();
        assert_eq!(stacked.shape(), [2, 1, 2]);
        assert_eq!(stacked.to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        let batch = context.create_tensor4d_from_tensors(&[&stacked, &stacked]).unwrap();
        assert_eq!(batch.shape(), [2, 1, 2, 2]);
        assert_eq!(batch.get(1, 0, 1, 1).unwrap(), 4.0);
    }

    #[test]
    fn test_stacking_rejects_mixed_shapes_before_allocating() {
        let context = TensorContext::default();
        let small = context.create_matrix(2, 2, true);
        let large = context.create_matrix(3, 3, true);
        let before = context.pool_stats().total_allocations;

        assert!(matches!(
            context.create_tensor3d_from_matrices(&[&small, &large]),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert_eq!(context.pool_stats().total_allocations, before);

        let a = context.create_tensor3d(2, 2, 1, true);
        let b = context.create_tensor3d(2, 2, 2, true);
        let before = context.pool_stats().total_allocations;
        assert!(matches!(
            context.create_tensor4d_from_tensors(&[&a, &b]),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert_eq!(context.pool_stats().total_allocations, before);
    }

    #[test]
    fn test_overflowing_dimensions_are_rejected() {
        assert_eq!(element_count(&[2, 3, 4]), Some(24));
        assert_eq!(element_count(&[usize::MAX, 2]), None);

        let context = TensorContext::default();
        let segment = context.create_segment(0, true);
        let huge = 1usize << (usize::BITS / 2);
        assert!(matches!(
            context.create_matrix_from_segment(segment, huge, huge),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_random_initialisers() {
        let context = TensorContext::default();
        let uniform = context.create_random_vector(100, -1.0, 1.0);
        assert!(uniform.to_vec().unwrap().iter().all(|v| (-1.0..=1.0).contains(v)));

        let normal = context.create_random_normal_matrix(5, 5, 0.0, 1.0);
        assert_eq!(normal.size(), 25);
        assert!(normal.to_vec().unwrap().iter().all(|v| v.is_finite()));
    }
}
