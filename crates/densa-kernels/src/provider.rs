//! Linear algebra provider contract
//!
//! [`LinearAlgebraProvider`] is object-safe: upstream code can hold an
//! `Arc<dyn LinearAlgebraProvider>`. A concrete provider only supplies its
//! [`TensorContext`], its [`ProviderConfig`] and a name; every kernel has a
//! default CPU implementation that a provider may override.
//!
//! Results are always allocated from the provider's context, so they are
//! pooled and register in the innermost open scope. Shape errors are raised
//! before any output is allocated.
//!
//! [`TensorOps`] layers rank-generic conveniences (`add`, `sigmoid`,
//! `relu_in_place`, ...) on top of any provider, including trait objects.

use densa_core::{
    Matrix, Result, Scalar, ScopeId, Segment, ShapedTensor, Tensor3D, Tensor4D, TensorContext,
    TensorError, Vector,
};

use crate::config::ProviderConfig;
use crate::convolution::{
    add_padding_into, im2col_into, max_pool_into, remove_padding_into, reverse_im2col_into,
    reverse_max_pool_into, FilterGeometry,
};
use crate::elementwise::{softmax_into, softmax_jacobian_into, BinaryOp, UnaryOp};
use crate::matmul::multiply_transposed_into;
use crate::parallel::{self, should_parallelize};
use crate::reductions::{self, DistanceMetric, MinMax};
use crate::simd;
use crate::transpose::transpose_into;

/// Factory and compute engine for tensors of one context
pub trait LinearAlgebraProvider: Send + Sync {
    /// Provider name used in logs and `UnsupportedOperation` errors
    fn name(&self) -> &str;

    /// Context every result is allocated from
    fn context(&self) -> &TensorContext;

    /// Kernel tuning
    fn config(&self) -> &ProviderConfig;

    // === Scopes and factories ===

    fn push_scope(&self) -> ScopeId {
        self.context().push_scope()
    }

    fn pop_scope(&self) -> Option<usize> {
        self.context().pop_scope()
    }

    fn create_vector(&self, size: usize, zeroed: bool) -> Vector {
        self.context().create_vector(size, zeroed)
    }

    fn create_matrix(&self, rows: usize, columns: usize, zeroed: bool) -> Matrix {
        self.context().create_matrix(rows, columns, zeroed)
    }

    fn create_tensor3d(&self, rows: usize, columns: usize, depth: usize, zeroed: bool) -> Tensor3D {
        self.context().create_tensor3d(rows, columns, depth, zeroed)
    }

    fn create_tensor4d(
        &self,
        rows: usize,
        columns: usize,
        depth: usize,
        count: usize,
        zeroed: bool,
    ) -> Tensor4D {
        self.context().create_tensor4d(rows, columns, depth, count, zeroed)
    }

    // === Elementwise ===

    /// New segment with `op` applied to every element of `input`
    fn map(&self, input: &Segment, op: UnaryOp) -> Result<Segment> {
        let threshold = self.config().parallel_threshold;
        let source = input.borrow_contiguous()?;
        tracing::trace!(op = op.name(), len = source.len(), "map");

        let output = self.context().create_segment(source.len(), false);
        output.with_contiguous_mut(|out| {
            parallel::map_into(&source, out, threshold, move |x| op.apply(x))
        })?;
        Ok(output)
    }

    /// Apply `op` to every element of `target`
    fn map_in_place(&self, target: &Segment, op: UnaryOp) -> Result<()> {
        let threshold = self.config().parallel_threshold;
        tracing::trace!(op = op.name(), len = target.size(), "map_in_place");
        target.with_contiguous_mut(|data| {
            parallel::map_in_place(data, threshold, move |x| op.apply(x))
        })
    }

    /// New segment with `op(a[i], b[i])`
    fn zip(&self, a: &Segment, b: &Segment, op: BinaryOp) -> Result<Segment> {
        check_same_size(op.name(), a, b)?;
        let threshold = self.config().parallel_threshold;
        let left = a.borrow_contiguous()?;
        let right = b.borrow_contiguous()?;
        tracing::trace!(op = op.name(), len = left.len(), "zip");

        let output = self.context().create_segment(left.len(), false);
        output.with_contiguous_mut(|out| {
            parallel::zip_into(&left, &right, out, threshold, move |x, y| op.apply(x, y))
        })?;
        Ok(output)
    }

    /// `target[i] = op(target[i], other[i])`
    fn zip_in_place(&self, target: &Segment, other: &Segment, op: BinaryOp) -> Result<()> {
        check_same_size(op.name(), target, other)?;
        let threshold = self.config().parallel_threshold;
        // Copy first: `other` may alias `target`
        let other = other.to_vec()?;
        target.with_contiguous_mut(|data| {
            parallel::zip_in_place(data, &other, threshold, move |x, y| op.apply(x, y))
        })
    }

    /// Numerically stable softmax
    fn softmax(&self, input: &Vector) -> Result<Vector> {
        let source = input.segment().borrow_contiguous()?;
        let output = self.create_vector(source.len(), false);
        output
            .segment()
            .with_contiguous_mut(|out| softmax_into(&source, out))?;
        Ok(output)
    }

    /// Jacobian of softmax given its output
    fn softmax_derivative(&self, softmax_output: &Vector) -> Result<Matrix> {
        let source = softmax_output.segment().borrow_contiguous()?;
        let n = source.len();
        let output = self.create_matrix(n, n, false);
        output
            .segment()
            .with_contiguous_mut(|out| softmax_jacobian_into(&source, out))?;
        Ok(output)
    }

    // === Reductions ===

    fn sum(&self, values: &Segment) -> Result<Scalar> {
        let values = values.borrow_contiguous()?;
        Ok(reductions::sum(&values, self.config().parallel_threshold))
    }

    fn average(&self, values: &Segment) -> Result<Scalar> {
        let values = values.borrow_contiguous()?;
        Ok(reductions::average(&values, self.config().parallel_threshold))
    }

    fn l1_norm(&self, values: &Segment) -> Result<Scalar> {
        Ok(reductions::l1_norm(&values.borrow_contiguous()?))
    }

    fn l2_norm(&self, values: &Segment) -> Result<Scalar> {
        Ok(reductions::l2_norm(&values.borrow_contiguous()?))
    }

    /// Minimum and maximum with their index; `None` when empty
    fn min_max(&self, values: &Segment) -> Result<Option<MinMax>> {
        Ok(reductions::min_max(&values.borrow_contiguous()?))
    }

    /// Population standard deviation, reusing `mean` when supplied
    fn std_dev(&self, values: &Segment, mean: Option<Scalar>) -> Result<Scalar> {
        let values = values.borrow_contiguous()?;
        Ok(reductions::std_dev(&values, mean, self.config().parallel_threshold))
    }

    fn dot(&self, a: &Segment, b: &Segment) -> Result<Scalar> {
        check_same_size("dot", a, b)?;
        Ok(reductions::dot(&a.borrow_contiguous()?, &b.borrow_contiguous()?))
    }

    fn distance(&self, a: &Segment, b: &Segment, metric: DistanceMetric) -> Result<Scalar> {
        check_same_size("distance", a, b)?;
        Ok(metric.distance(&a.borrow_contiguous()?, &b.borrow_contiguous()?))
    }

    // === Matrices ===

    fn transpose(&self, matrix: &Matrix) -> Result<Matrix> {
        let (rows, columns) = (matrix.rows(), matrix.columns());
        let source = matrix.segment().borrow_contiguous()?;
        let output = self.create_matrix(columns, rows, false);
        let block = self.config().transpose_block;
        output
            .segment()
            .with_contiguous_mut(|out| transpose_into(&source, rows, columns, out, block))?;
        Ok(output)
    }

    /// `a · b`
    fn multiply(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        if a.columns() != b.rows() {
            return Err(TensorError::shape_mismatch(
                "multiply",
                vec![a.rows(), a.columns()],
                vec![b.rows(), b.columns()],
            ));
        }
        let lhs_rows = transposed_segment(self.context(), self.config(), a)?;
        let lhs_rows = lhs_rows.borrow_contiguous()?;
        let rhs_columns = b.segment().borrow_contiguous()?;
        multiply_prepared(self, &lhs_rows, &rhs_columns, a.rows(), a.columns(), b.columns())
    }

    /// `aᵀ · b`
    fn transpose_this_and_multiply(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        if a.rows() != b.rows() {
            return Err(TensorError::shape_mismatch(
                "transpose_this_and_multiply",
                vec![a.rows(), a.columns()],
                vec![b.rows(), b.columns()],
            ));
        }
        // Columns of `a` are already the rows of `aᵀ`
        let lhs_rows = a.segment().borrow_contiguous()?;
        let rhs_columns = b.segment().borrow_contiguous()?;
        multiply_prepared(self, &lhs_rows, &rhs_columns, a.columns(), a.rows(), b.columns())
    }

    /// `a · bᵀ`
    fn transpose_and_multiply(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        if a.columns() != b.columns() {
            return Err(TensorError::shape_mismatch(
                "transpose_and_multiply",
                vec![a.rows(), a.columns()],
                vec![b.rows(), b.columns()],
            ));
        }
        let lhs_rows = transposed_segment(self.context(), self.config(), a)?;
        let rhs_columns = transposed_segment(self.context(), self.config(), b)?;
        let lhs_rows = lhs_rows.borrow_contiguous()?;
        let rhs_columns = rhs_columns.borrow_contiguous()?;
        multiply_prepared(self, &lhs_rows, &rhs_columns, a.rows(), a.columns(), b.rows())
    }

    /// Sum of every row
    fn row_sums(&self, matrix: &Matrix) -> Result<Vector> {
        let rows = matrix.rows();
        let source = matrix.segment().borrow_contiguous()?;
        let output = self.create_vector(rows, true);
        output.segment().with_contiguous_mut(|out| {
            for column in source.chunks(rows.max(1)) {
                for (total, value) in out.iter_mut().zip(column) {
                    *total += value;
                }
            }
        })?;
        Ok(output)
    }

    /// Sum of every column
    fn column_sums(&self, matrix: &Matrix) -> Result<Vector> {
        let rows = matrix.rows();
        let guard = matrix.segment().borrow_contiguous()?;
        let source: &[Scalar] = &guard;
        let output = self.create_vector(matrix.columns(), false);
        output.segment().with_contiguous_mut(|out| {
            parallel::fill_indexed(out, self.config().parallel_threshold, |c| {
                simd::sum(&source[c * rows..(c + 1) * rows])
            })
        })?;
        Ok(output)
    }

    /// `matrix[r, c] + values[c]` for every row
    fn add_to_each_row(&self, matrix: &Matrix, values: &Vector) -> Result<Matrix> {
        if values.len() != matrix.columns() {
            return Err(TensorError::shape_mismatch(
                "add_to_each_row",
                vec![matrix.columns()],
                vec![values.len()],
            ));
        }
        let rows = matrix.rows().max(1);
        let (addend_guard, source_guard) = (
            values.segment().borrow_contiguous()?,
            matrix.segment().borrow_contiguous()?,
        );
        let (addend, source): (&[Scalar], &[Scalar]) = (&addend_guard, &source_guard);
        let output = self.create_matrix(matrix.rows(), matrix.columns(), false);
        output.segment().with_contiguous_mut(|out| {
            parallel::fill_indexed(out, self.config().parallel_threshold, |i| {
                source[i] + addend[i / rows]
            })
        })?;
        Ok(output)
    }

    /// `matrix[r, c] + values[r]` for every column
    fn add_to_each_column(&self, matrix: &Matrix, values: &Vector) -> Result<Matrix> {
        if values.len() != matrix.rows() {
            return Err(TensorError::shape_mismatch(
                "add_to_each_column",
                vec![matrix.rows()],
                vec![values.len()],
            ));
        }
        let rows = matrix.rows().max(1);
        let (addend_guard, source_guard) = (
            values.segment().borrow_contiguous()?,
            matrix.segment().borrow_contiguous()?,
        );
        let (addend, source): (&[Scalar], &[Scalar]) = (&addend_guard, &source_guard);
        let output = self.create_matrix(matrix.rows(), matrix.columns(), false);
        output.segment().with_contiguous_mut(|out| {
            parallel::fill_indexed(out, self.config().parallel_threshold, |i| {
                source[i] + addend[i % rows]
            })
        })?;
        Ok(output)
    }

    /// Singular value decomposition `(U, S, Vᵀ)`; no base implementation
    fn svd(&self, matrix: &Matrix) -> Result<(Matrix, Vector, Matrix)> {
        let _ = matrix;
        Err(TensorError::unsupported("svd", self.name()))
    }

    // === Convolution on 3D tensors ===

    /// One row per filter placement, `filter_size * depth` columns
    fn im2col(&self, tensor: &Tensor3D, geometry: FilterGeometry) -> Result<Matrix> {
        let [rows, columns, depth] = tensor.shape();
        let (out_rows, out_columns) = geometry.output_size(rows, columns)?;
        let source = tensor.segment().borrow_contiguous()?;
        let threshold = self.config().parallel_threshold;

        let output =
            self.create_matrix(out_rows * out_columns, geometry.filter_size() * depth, false);
        output.segment().with_contiguous_mut(|out| {
            im2col_into(&source, rows, columns, depth, geometry, out, threshold)
        })??;
        Ok(output)
    }

    /// Window maxima and, when `save_indices`, the in-window offset of each
    fn max_pool(
        &self,
        tensor: &Tensor3D,
        geometry: FilterGeometry,
        save_indices: bool,
    ) -> Result<(Tensor3D, Option<Tensor3D>)> {
        let [rows, columns, depth] = tensor.shape();
        let (out_rows, out_columns) = geometry.output_size(rows, columns)?;
        let source = tensor.segment().borrow_contiguous()?;
        let threshold = self.config().parallel_threshold;

        let output = self.create_tensor3d(out_rows, out_columns, depth, false);
        let indices =
            save_indices.then(|| self.create_tensor3d(out_rows, out_columns, depth, false));
        match &indices {
            Some(indices) => output.segment().with_contiguous_mut(|out| {
                indices.segment().with_contiguous_mut(|idx| {
                    max_pool_into(
                        &source,
                        rows,
                        columns,
                        depth,
                        geometry,
                        out,
                        Some(idx),
                        threshold,
                    )
                })
            })???,
            None => output.segment().with_contiguous_mut(|out| {
                max_pool_into(&source, rows, columns, depth, geometry, out, None, threshold)
            })??,
        }
        Ok((output, indices))
    }

    /// Gradient of max pooling: `error` routed to the positions in `indices`
    fn reverse_max_pool(
        &self,
        error: &Tensor3D,
        indices: &Tensor3D,
        rows: usize,
        columns: usize,
        geometry: FilterGeometry,
    ) -> Result<Tensor3D> {
        check_same_shape("reverse_max_pool", &error.shape(), &indices.shape())?;
        let [error_rows, error_columns, depth] = error.shape();
        check_pooled_grid(geometry, rows, columns, error_rows, error_columns)?;
        let gradients = error.segment().borrow_contiguous()?;
        let offsets = indices.segment().borrow_contiguous()?;
        let threshold = self.config().parallel_threshold;

        let output = self.create_tensor3d(rows, columns, depth, false);
        output.segment().with_contiguous_mut(|out| {
            reverse_max_pool_into(
                &gradients,
                &offsets,
                error_rows,
                error_columns,
                depth,
                geometry,
                out,
                rows,
                columns,
                threshold,
            )
        })??;
        Ok(output)
    }

    /// Scatter convolution errors `(eR, eC, filters)` back to a `(rows, columns, depth)` input
    fn reverse_im2col(
        &self,
        error: &Tensor3D,
        filters: &Matrix,
        rows: usize,
        columns: usize,
        depth: usize,
        geometry: FilterGeometry,
    ) -> Result<Tensor3D> {
        check_filters(error.depth(), filters, geometry, depth)?;
        geometry.output_size(rows, columns)?;
        let [error_rows, error_columns, filter_count] = error.shape();
        let errors = error.segment().borrow_contiguous()?;
        let weights = filters.segment().borrow_contiguous()?;
        let threshold = self.config().parallel_threshold;

        let output = self.create_tensor3d(rows, columns, depth, false);
        output.segment().with_contiguous_mut(|out| {
            reverse_im2col_into(
                &errors,
                &weights,
                error_rows,
                error_columns,
                filter_count,
                geometry,
                out,
                rows,
                columns,
                depth,
                threshold,
            )
        })??;
        Ok(output)
    }

    fn add_padding(&self, tensor: &Tensor3D, padding: usize) -> Result<Tensor3D> {
        let [rows, columns, depth] = tensor.shape();
        let source = tensor.segment().borrow_contiguous()?;
        let output = self.create_tensor3d(rows + 2 * padding, columns + 2 * padding, depth, false);
        output.segment().with_contiguous_mut(|out| {
            add_padding_into(&source, rows, columns, depth, padding, out)
        })??;
        Ok(output)
    }

    fn remove_padding(&self, tensor: &Tensor3D, padding: usize) -> Result<Tensor3D> {
        let [rows, columns, depth] = tensor.shape();
        check_padding(rows, columns, padding)?;
        let source = tensor.segment().borrow_contiguous()?;
        let output = self.create_tensor3d(rows - 2 * padding, columns - 2 * padding, depth, false);
        output.segment().with_contiguous_mut(|out| {
            remove_padding_into(&source, rows, columns, depth, padding, out)
        })??;
        Ok(output)
    }

    /// Multiply every depth slice `(R, C)` by `matrix` `(C, M)` giving `(R, M, D)`
    fn multiply_each_depth(&self, tensor: &Tensor3D, matrix: &Matrix) -> Result<Tensor3D> {
        if tensor.columns() != matrix.rows() {
            return Err(TensorError::shape_mismatch(
                "multiply_each_depth",
                vec![tensor.rows(), tensor.columns()],
                vec![matrix.rows(), matrix.columns()],
            ));
        }
        let output = self.create_tensor3d(tensor.rows(), matrix.columns(), tensor.depth(), false);
        let slice = tensor.rows() * matrix.columns();

        // Per-slice views and products are released when the scope closes
        self.context().scoped(|_| {
            for d in 0..tensor.depth() {
                let product = self.multiply(&tensor.matrix(d)?, matrix)?;
                product
                    .segment()
                    .copy_to_segment(output.segment(), 0, d * slice, slice)?;
            }
            Ok(())
        })?;
        Ok(output)
    }

    /// Element-wise sum of all depth slices
    fn combine_depth_slices(&self, tensor: &Tensor3D) -> Result<Matrix> {
        let slice = tensor.matrix_size();
        let source = tensor.segment().borrow_contiguous()?;
        let output = self.create_matrix(tensor.rows(), tensor.columns(), true);
        output.segment().with_contiguous_mut(|out| {
            for channel in source.chunks(slice.max(1)) {
                for (total, value) in out.iter_mut().zip(channel) {
                    *total += value;
                }
            }
        })?;
        Ok(output)
    }

    // === Convolution on 4D batches ===

    /// im2col of every batch entry, stacked along depth
    fn im2col_batch(&self, tensor: &Tensor4D, geometry: FilterGeometry) -> Result<Tensor3D> {
        let [rows, columns, depth, count] = tensor.shape();
        let (out_rows, out_columns) = geometry.output_size(rows, columns)?;
        let (placements, width) = (out_rows * out_columns, geometry.filter_size() * depth);
        let source = tensor.segment().borrow_contiguous()?;
        let (item, threshold) = (tensor.tensor_size(), self.config().parallel_threshold);
        tracing::debug!(count, placements, width, "im2col batch");

        let output = self.create_tensor3d(placements, width, count, false);
        output.segment().with_contiguous_mut(|out| {
            for_each_item(out, placements * width, count, |n, chunk| {
                let item_source = &source[n * item..(n + 1) * item];
                im2col_into(item_source, rows, columns, depth, geometry, chunk, threshold)
            })
        })??;
        Ok(output)
    }

    fn max_pool_batch(
        &self,
        tensor: &Tensor4D,
        geometry: FilterGeometry,
        save_indices: bool,
    ) -> Result<(Tensor4D, Option<Tensor4D>)> {
        let [rows, columns, depth, count] = tensor.shape();
        let (out_rows, out_columns) = geometry.output_size(rows, columns)?;
        let source = tensor.segment().borrow_contiguous()?;
        let (item, out_item) = (tensor.tensor_size(), out_rows * out_columns * depth);
        let threshold = self.config().parallel_threshold;

        let output = self.create_tensor4d(out_rows, out_columns, depth, count, false);
        let indices = save_indices
            .then(|| self.create_tensor4d(out_rows, out_columns, depth, count, false));
        match &indices {
            Some(indices) => output.segment().with_contiguous_mut(|out| {
                indices.segment().with_contiguous_mut(|idx| {
                    (0..count).try_for_each(|n| {
                        max_pool_into(
                            &source[n * item..(n + 1) * item],
                            rows,
                            columns,
                            depth,
                            geometry,
                            &mut out[n * out_item..(n + 1) * out_item],
                            Some(&mut idx[n * out_item..(n + 1) * out_item]),
                            threshold,
                        )
                    })
                })
            })???,
            None => output.segment().with_contiguous_mut(|out| {
                for_each_item(out, out_item, count, |n, chunk| {
                    let item_source = &source[n * item..(n + 1) * item];
                    max_pool_into(
                        item_source,
                        rows,
                        columns,
                        depth,
                        geometry,
                        chunk,
                        None,
                        threshold,
                    )
                })
            })??,
        }
        Ok((output, indices))
    }

    fn reverse_max_pool_batch(
        &self,
        error: &Tensor4D,
        indices: &Tensor4D,
        rows: usize,
        columns: usize,
        geometry: FilterGeometry,
    ) -> Result<Tensor4D> {
        check_same_shape("reverse_max_pool_batch", &error.shape(), &indices.shape())?;
        let [error_rows, error_columns, depth, count] = error.shape();
        check_pooled_grid(geometry, rows, columns, error_rows, error_columns)?;
        let gradients = error.segment().borrow_contiguous()?;
        let offsets = indices.segment().borrow_contiguous()?;
        let (item, out_item) = (error.tensor_size(), rows * columns * depth);
        let threshold = self.config().parallel_threshold;

        let output = self.create_tensor4d(rows, columns, depth, count, false);
        output.segment().with_contiguous_mut(|out| {
            for_each_item(out, out_item, count, |n, chunk| {
                let range = n * item..(n + 1) * item;
                reverse_max_pool_into(
                    &gradients[range.clone()],
                    &offsets[range],
                    error_rows,
                    error_columns,
                    depth,
                    geometry,
                    chunk,
                    rows,
                    columns,
                    threshold,
                )
            })
        })??;
        Ok(output)
    }

    fn reverse_im2col_batch(
        &self,
        error: &Tensor4D,
        filters: &Matrix,
        rows: usize,
        columns: usize,
        depth: usize,
        geometry: FilterGeometry,
    ) -> Result<Tensor4D> {
        check_filters(error.depth(), filters, geometry, depth)?;
        geometry.output_size(rows, columns)?;
        let [error_rows, error_columns, filter_count, count] = error.shape();
        let errors = error.segment().borrow_contiguous()?;
        let weights = filters.segment().borrow_contiguous()?;
        let (item, out_item) = (error.tensor_size(), rows * columns * depth);
        let threshold = self.config().parallel_threshold;

        let output = self.create_tensor4d(rows, columns, depth, count, false);
        output.segment().with_contiguous_mut(|out| {
            for_each_item(out, out_item, count, |n, chunk| {
                reverse_im2col_into(
                    &errors[n * item..(n + 1) * item],
                    &weights,
                    error_rows,
                    error_columns,
                    filter_count,
                    geometry,
                    chunk,
                    rows,
                    columns,
                    depth,
                    threshold,
                )
            })
        })??;
        Ok(output)
    }

    fn add_padding_batch(&self, tensor: &Tensor4D, padding: usize) -> Result<Tensor4D> {
        let [rows, columns, depth, count] = tensor.shape();
        let (padded_rows, padded_columns) = (rows + 2 * padding, columns + 2 * padding);
        let source = tensor.segment().borrow_contiguous()?;
        let (item, out_item) = (tensor.tensor_size(), padded_rows * padded_columns * depth);

        let output = self.create_tensor4d(padded_rows, padded_columns, depth, count, false);
        output.segment().with_contiguous_mut(|out| {
            for_each_item(out, out_item, count, |n, chunk| {
                let item_source = &source[n * item..(n + 1) * item];
                add_padding_into(item_source, rows, columns, depth, padding, chunk)
            })
        })??;
        Ok(output)
    }

    fn remove_padding_batch(&self, tensor: &Tensor4D, padding: usize) -> Result<Tensor4D> {
        let [rows, columns, depth, count] = tensor.shape();
        check_padding(rows, columns, padding)?;
        let (inner_rows, inner_columns) = (rows - 2 * padding, columns - 2 * padding);
        let source = tensor.segment().borrow_contiguous()?;
        let (item, out_item) = (tensor.tensor_size(), inner_rows * inner_columns * depth);

        let output = self.create_tensor4d(inner_rows, inner_columns, depth, count, false);
        output.segment().with_contiguous_mut(|out| {
            for_each_item(out, out_item, count, |n, chunk| {
                let item_source = &source[n * item..(n + 1) * item];
                remove_padding_into(item_source, rows, columns, depth, padding, chunk)
            })
        })??;
        Ok(output)
    }
}

fn check_same_size(operation: &str, a: &Segment, b: &Segment) -> Result<()> {
    if a.size() != b.size() {
        return Err(TensorError::shape_mismatch(operation, vec![a.size()], vec![b.size()]));
    }
    Ok(())
}

fn check_same_shape(operation: &str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(TensorError::shape_mismatch(operation, expected.to_vec(), actual.to_vec()));
    }
    Ok(())
}

fn check_pooled_grid(
    geometry: FilterGeometry,
    rows: usize,
    columns: usize,
    error_rows: usize,
    error_columns: usize,
) -> Result<()> {
    let (expected_rows, expected_columns) = geometry.output_size(rows, columns)?;
    check_same_shape(
        "reverse_max_pool",
        &[expected_rows, expected_columns],
        &[error_rows, error_columns],
    )
}

fn check_filters(
    filter_count: usize,
    filters: &Matrix,
    geometry: FilterGeometry,
    depth: usize,
) -> Result<()> {
    check_same_shape(
        "reverse_im2col",
        &[geometry.filter_size() * depth, filter_count],
        &filters.shape(),
    )
}

fn check_padding(rows: usize, columns: usize, padding: usize) -> Result<()> {
    if rows < 2 * padding || columns < 2 * padding {
        return Err(TensorError::shape_mismatch(
            "remove_padding",
            vec![2 * padding, 2 * padding],
            vec![rows, columns],
        ));
    }
    Ok(())
}

/// Run `f` over `count` consecutive `item_len` blocks of `output`
fn for_each_item(
    output: &mut [Scalar],
    item_len: usize,
    count: usize,
    mut f: impl FnMut(usize, &mut [Scalar]) -> Result<()>,
) -> Result<()> {
    (0..count).try_for_each(|n| f(n, &mut output[n * item_len..(n + 1) * item_len]))
}

/// Pooled copy of `matrix` transposed, so its rows become contiguous
fn transposed_segment(
    context: &TensorContext,
    config: &ProviderConfig,
    matrix: &Matrix,
) -> Result<Segment> {
    let (rows, columns) = (matrix.rows(), matrix.columns());
    let source = matrix.segment().borrow_contiguous()?;
    let scratch = context.create_segment(rows * columns, false);
    scratch.with_contiguous_mut(|out| {
        transpose_into(&source, rows, columns, out, config.transpose_block)
    })?;
    Ok(scratch)
}

fn multiply_prepared<P: LinearAlgebraProvider + ?Sized>(
    provider: &P,
    lhs_rows: &[Scalar],
    rhs_columns: &[Scalar],
    rows: usize,
    inner: usize,
    columns: usize,
) -> Result<Matrix> {
    let threshold = provider.config().parallel_threshold;
    tracing::debug!(
        provider = provider.name(),
        rows,
        inner,
        columns,
        parallel = should_parallelize(rows * columns, threshold),
        "matrix multiply"
    );
    let output = provider.create_matrix(rows, columns, false);
    output.segment().with_contiguous_mut(|out| {
        multiply_transposed_into(lhs_rows, rhs_columns, rows, inner, columns, out, threshold)
    })?;
    Ok(output)
}

/// Rank-generic elementwise operations for every provider
///
/// Allocating methods return a tensor of the input's shape; `_in_place`
/// methods overwrite the first operand.
pub trait TensorOps: LinearAlgebraProvider {
    /// `op` applied to every element
    fn apply<T: ShapedTensor>(&self, tensor: &T, op: UnaryOp) -> Result<T> {
        tensor.with_segment(self.map(tensor.segment(), op)?)
    }

    fn apply_in_place<T: ShapedTensor>(&self, tensor: &T, op: UnaryOp) -> Result<()> {
        self.map_in_place(tensor.segment(), op)
    }

    /// `op(a, b)` element by element; shapes must match
    fn combine<T: ShapedTensor>(&self, a: &T, b: &T, op: BinaryOp) -> Result<T> {
        check_same_shape(op.name(), &a.shape_vec(), &b.shape_vec())?;
        a.with_segment(self.zip(a.segment(), b.segment(), op)?)
    }

    fn combine_in_place<T: ShapedTensor>(&self, a: &T, b: &T, op: BinaryOp) -> Result<()> {
        check_same_shape(op.name(), &a.shape_vec(), &b.shape_vec())?;
        self.zip_in_place(a.segment(), b.segment(), op)
    }

    /// Run `f` inside a scope that is popped on every exit path
    fn scoped<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        self.context().scoped(|_| f(self))
    }

    fn add<T: ShapedTensor>(&self, a: &T, b: &T) -> Result<T> {
        self.combine(a, b, BinaryOp::Add)
    }

    fn add_in_place<T: ShapedTensor>(&self, a: &T, b: &T) -> Result<()> {
        self.combine_in_place(a, b, BinaryOp::Add)
    }

    fn subtract<T: ShapedTensor>(&self, a: &T, b: &T) -> Result<T> {
        self.combine(a, b, BinaryOp::Subtract)
    }

    fn subtract_in_place<T: ShapedTensor>(&self, a: &T, b: &T) -> Result<()> {
        self.combine_in_place(a, b, BinaryOp::Subtract)
    }

    fn pointwise_multiply<T: ShapedTensor>(&self, a: &T, b: &T) -> Result<T> {
        self.combine(a, b, BinaryOp::Multiply)
    }

    fn pointwise_multiply_in_place<T: ShapedTensor>(&self, a: &T, b: &T) -> Result<()> {
        self.combine_in_place(a, b, BinaryOp::Multiply)
    }

    fn pointwise_divide<T: ShapedTensor>(&self, a: &T, b: &T) -> Result<T> {
        self.combine(a, b, BinaryOp::Divide)
    }

    fn pointwise_divide_in_place<T: ShapedTensor>(&self, a: &T, b: &T) -> Result<()> {
        self.combine_in_place(a, b, BinaryOp::Divide)
    }

    /// `a * a_coefficient + b * b_coefficient`
    fn add_weighted<T: ShapedTensor>(
        &self,
        a: &T,
        b: &T,
        a_coefficient: Scalar,
        b_coefficient: Scalar,
    ) -> Result<T> {
        self.combine(a, b, BinaryOp::AddWeighted { a_coefficient, b_coefficient })
    }

    fn add_weighted_in_place<T: ShapedTensor>(
        &self,
        a: &T,
        b: &T,
        a_coefficient: Scalar,
        b_coefficient: Scalar,
    ) -> Result<()> {
        self.combine_in_place(a, b, BinaryOp::AddWeighted { a_coefficient, b_coefficient })
    }

    /// `a * a_coefficient - b * b_coefficient`
    fn subtract_weighted<T: ShapedTensor>(
        &self,
        a: &T,
        b: &T,
        a_coefficient: Scalar,
        b_coefficient: Scalar,
    ) -> Result<T> {
        self.add_weighted(a, b, a_coefficient, -b_coefficient)
    }

    fn subtract_weighted_in_place<T: ShapedTensor>(
        &self,
        a: &T,
        b: &T,
        a_coefficient: Scalar,
        b_coefficient: Scalar,
    ) -> Result<()> {
        self.add_weighted_in_place(a, b, a_coefficient, -b_coefficient)
    }

    fn add_scalar<T: ShapedTensor>(&self, tensor: &T, value: Scalar) -> Result<T> {
        self.apply(tensor, UnaryOp::AddScalar(value))
    }

    fn add_scalar_in_place<T: ShapedTensor>(&self, tensor: &T, value: Scalar) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::AddScalar(value))
    }

    fn multiply_scalar<T: ShapedTensor>(&self, tensor: &T, value: Scalar) -> Result<T> {
        self.apply(tensor, UnaryOp::MultiplyScalar(value))
    }

    fn multiply_scalar_in_place<T: ShapedTensor>(&self, tensor: &T, value: Scalar) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::MultiplyScalar(value))
    }

    fn sqrt<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::Sqrt)
    }

    fn sqrt_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Sqrt)
    }

    fn log<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::Log)
    }

    fn log_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Log)
    }

    fn exp<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::Exp)
    }

    fn exp_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Exp)
    }

    fn abs<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::Abs)
    }

    fn abs_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Abs)
    }

    fn squared<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::Squared)
    }

    fn squared_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Squared)
    }

    fn pow<T: ShapedTensor>(&self, tensor: &T, power: Scalar) -> Result<T> {
        self.apply(tensor, UnaryOp::Pow(power))
    }

    fn pow_in_place<T: ShapedTensor>(&self, tensor: &T, power: Scalar) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Pow(power))
    }

    fn sigmoid<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::Sigmoid)
    }

    fn sigmoid_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Sigmoid)
    }

    fn sigmoid_derivative<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::SigmoidDerivative)
    }

    fn sigmoid_derivative_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::SigmoidDerivative)
    }

    fn tanh<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::Tanh)
    }

    fn tanh_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Tanh)
    }

    fn tanh_derivative<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::TanhDerivative)
    }

    fn tanh_derivative_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::TanhDerivative)
    }

    fn relu<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::Relu)
    }

    fn relu_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Relu)
    }

    fn relu_derivative<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::ReluDerivative)
    }

    fn relu_derivative_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::ReluDerivative)
    }

    fn leaky_relu<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::LeakyRelu)
    }

    fn leaky_relu_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::LeakyRelu)
    }

    fn leaky_relu_derivative<T: ShapedTensor>(&self, tensor: &T) -> Result<T> {
        self.apply(tensor, UnaryOp::LeakyReluDerivative)
    }

    fn leaky_relu_derivative_in_place<T: ShapedTensor>(&self, tensor: &T) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::LeakyReluDerivative)
    }

    /// Clamp into `[min, max]`
    fn constrain<T: ShapedTensor>(&self, tensor: &T, min: Scalar, max: Scalar) -> Result<T> {
        self.apply(tensor, UnaryOp::Constrain { min, max })
    }

    fn constrain_in_place<T: ShapedTensor>(
        &self,
        tensor: &T,
        min: Scalar,
        max: Scalar,
    ) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Constrain { min, max })
    }

    /// Snap every element to `lower` or `upper`, whichever side of the midpoint it falls on
    fn round<T: ShapedTensor>(&self, tensor: &T, lower: Scalar, upper: Scalar) -> Result<T> {
        self.apply(tensor, UnaryOp::Round { lower, upper })
    }

    fn round_in_place<T: ShapedTensor>(
        &self,
        tensor: &T,
        lower: Scalar,
        upper: Scalar,
    ) -> Result<()> {
        self.apply_in_place(tensor, UnaryOp::Round { lower, upper })
    }
}

impl<P: LinearAlgebraProvider + ?Sized> TensorOps for P {}
