//! Integration tests for densa-kernels
//!
//! Every test goes through the provider API, the way a training loop would.

use std::sync::Arc;

use densa_core::{Scalar, ShapedTensor, TensorError};
use densa_kernels::{
    CpuProvider, DistanceMetric, FilterGeometry, LinearAlgebraProvider, ProviderConfig, TensorOps,
};

fn provider() -> CpuProvider {
    CpuProvider::new()
}

fn approx_eq(actual: &[Scalar], expected: &[Scalar]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        approx::assert_relative_eq!(*a, *e, epsilon = 1e-5);
    }
}

#[test]
fn test_matrix_products() -> anyhow::Result<()> {
    let provider = provider();
    let context = provider.context();
    // [[1, 2], [3, 4]] and [[5, 6], [7, 8]]
    let a = context.create_matrix_from(2, 2, &[1.0, 3.0, 2.0, 4.0])?;
    let b = context.create_matrix_from(2, 2, &[5.0, 7.0, 6.0, 8.0])?;

    assert_eq!(provider.multiply(&a, &b)?.to_vec()?, vec![19.0, 43.0, 22.0, 50.0]);
    assert_eq!(
        provider.transpose_this_and_multiply(&a, &b)?.to_vec()?,
        vec![26.0, 38.0, 30.0, 44.0]
    );
    assert_eq!(
        provider.transpose_and_multiply(&a, &b)?.to_vec()?,
        vec![17.0, 39.0, 23.0, 53.0]
    );
    assert_eq!(provider.transpose(&a)?.to_vec()?, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn test_multiply_rejects_mismatched_inner_dimension() -> anyhow::Result<()> {
    let provider = provider();
    let a = provider.create_matrix(2, 3, true);
    let b = provider.create_matrix(2, 3, true);

    let result = provider.multiply(&a, &b);
    assert!(matches!(result, Err(TensorError::ShapeMismatch { .. })));

    // The transposed variants accept the same pair
    assert_eq!(provider.transpose_this_and_multiply(&a, &b)?.shape(), [3, 3]);
    assert_eq!(provider.transpose_and_multiply(&a, &b)?.shape(), [2, 2]);
    Ok(())
}

#[test]
fn test_rectangular_multiply_parallel_matches_serial() -> anyhow::Result<()> {
    let serial = CpuProvider::with_config(ProviderConfig::serial());
    let parallel = CpuProvider::with_config(ProviderConfig::default().with_parallel_threshold(1));

    let values_a: Vec<Scalar> = (0..6 * 9).map(|x| (x as Scalar * 0.3).sin()).collect();
    let values_b: Vec<Scalar> = (0..9 * 4).map(|x| (x as Scalar * 0.7).cos()).collect();

    let product = |provider: &CpuProvider| -> anyhow::Result<Vec<Scalar>> {
        let a = provider.context().create_matrix_from(6, 9, &values_a)?;
        let b = provider.context().create_matrix_from(9, 4, &values_b)?;
        Ok(provider.multiply(&a, &b)?.to_vec()?)
    };
    approx_eq(&product(&parallel)?, &product(&serial)?);
    Ok(())
}

#[test]
fn test_row_and_column_broadcasts() -> anyhow::Result<()> {
    let provider = provider();
    let context = provider.context();
    let matrix = context.create_matrix_from(2, 2, &[1.0, 3.0, 2.0, 4.0])?;
    let values = context.create_vector_from(&[10.0, 20.0]);

    assert_eq!(provider.row_sums(&matrix)?.to_vec()?, vec![3.0, 7.0]);
    assert_eq!(provider.column_sums(&matrix)?.to_vec()?, vec![4.0, 6.0]);
    assert_eq!(
        provider.add_to_each_row(&matrix, &values)?.to_vec()?,
        vec![11.0, 13.0, 22.0, 24.0]
    );
    assert_eq!(
        provider.add_to_each_column(&matrix, &values)?.to_vec()?,
        vec![11.0, 23.0, 12.0, 24.0]
    );

    let too_long = context.create_vector(3, true);
    assert!(matches!(
        provider.add_to_each_row(&matrix, &too_long),
        Err(TensorError::ShapeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_elementwise_across_ranks() -> anyhow::Result<()> {
    let provider = provider();
    let context = provider.context();

    let vector = context.create_vector_from(&[-2.0, 0.0, 3.0]);
    assert_eq!(provider.relu(&vector)?.to_vec()?, vec![0.0, 0.0, 3.0]);
    approx_eq(&provider.leaky_relu(&vector)?.to_vec()?, &[-0.02, 0.0, 3.0]);
    assert_eq!(provider.constrain(&vector, -1.0, 1.0)?.to_vec()?, vec![-1.0, 0.0, 1.0]);

    let tensor = context.create_tensor3d_from(1, 2, 2, &[1.0, 2.0, 3.0, 4.0])?;
    let other = context.create_tensor3d_from(1, 2, 2, &[4.0, 3.0, 2.0, 1.0])?;
    let sum = provider.add(&tensor, &other)?;
    assert_eq!(sum.shape(), [1, 2, 2]);
    assert_eq!(sum.to_vec()?, vec![5.0; 4]);
    assert_eq!(
        provider.add_weighted(&tensor, &other, 2.0, -1.0)?.to_vec()?,
        vec![-2.0, 1.0, 4.0, 7.0]
    );

    let mismatched = context.create_tensor3d(2, 1, 2, true);
    assert!(matches!(
        provider.add(&tensor, &mismatched),
        Err(TensorError::ShapeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_in_place_on_shared_storage() -> anyhow::Result<()> {
    let provider = provider();
    let matrix = provider.context().create_matrix_from(2, 2, &[1.0, 2.0, 3.0, 4.0])?;
    let alias = matrix.reshape_as_matrix(Some(2), None)?;

    provider.add_in_place(&matrix, &alias)?;
    assert_eq!(matrix.to_vec()?, vec![2.0, 4.0, 6.0, 8.0]);

    provider.pointwise_multiply_in_place(&alias, &matrix)?;
    assert_eq!(matrix.to_vec()?, vec![4.0, 16.0, 36.0, 64.0]);
    Ok(())
}

#[test]
fn test_in_place_through_row_view() -> anyhow::Result<()> {
    let provider = provider();
    // [[1, 3], [2, 4]]
    let matrix = provider.context().create_matrix_from(2, 2, &[1.0, 2.0, 3.0, 4.0])?;
    let first_row = matrix.row(0)?;

    provider.multiply_scalar_in_place(&first_row, 10.0)?;
    assert_eq!(matrix.to_vec()?, vec![10.0, 2.0, 30.0, 4.0]);

    let second_row = matrix.row(1)?;
    assert_eq!(provider.sum(second_row.segment())?, 6.0);
    let extremes = provider.min_max(second_row.segment())?.expect("non-empty");
    assert_eq!((extremes.max, extremes.max_index), (4.0, 1));
    Ok(())
}

#[test]
fn test_reductions_and_distances() -> anyhow::Result<()> {
    let provider = provider();
    let context = provider.context();
    let a = context.create_vector_from(&[3.0, 4.0]);
    let b = context.create_vector_from(&[0.0, 0.0]);

    assert_eq!(provider.l1_norm(a.segment())?, 7.0);
    approx::assert_relative_eq!(provider.l2_norm(a.segment())?, 5.0);
    approx::assert_relative_eq!(provider.average(a.segment())?, 3.5);
    approx::assert_relative_eq!(provider.std_dev(a.segment(), None)?, 0.5);
    approx::assert_relative_eq!(provider.dot(a.segment(), a.segment())?, 25.0);
    approx::assert_relative_eq!(
        provider.distance(a.segment(), b.segment(), DistanceMetric::Euclidean)?,
        5.0
    );
    assert_eq!(
        provider.distance(a.segment(), b.segment(), DistanceMetric::Cosine)?,
        1.0
    );

    let short = context.create_vector(1, true);
    assert!(matches!(
        provider.dot(a.segment(), short.segment()),
        Err(TensorError::ShapeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_softmax_and_jacobian() -> anyhow::Result<()> {
    let provider = provider();
    let input = provider.context().create_vector_from(&[1.0, 2.0, 3.0]);

    let output = provider.softmax(&input)?;
    let values = output.to_vec()?;
    approx::assert_relative_eq!(values.iter().sum::<Scalar>(), 1.0, epsilon = 1e-6);
    assert!(values[0] < values[1] && values[1] < values[2]);

    let jacobian = provider.softmax_derivative(&output)?;
    assert_eq!(jacobian.shape(), [3, 3]);
    for column in 0..3 {
        let total: Scalar = (0..3).map(|row| jacobian.get(row, column).unwrap()).sum();
        approx::assert_relative_eq!(total, 0.0, epsilon = 1e-6);
        approx::assert_relative_eq!(
            jacobian.get(column, column)?,
            values[column] * (1.0 - values[column]),
            epsilon = 1e-6
        );
    }
    Ok(())
}

#[test]
fn test_padding_roundtrip() -> anyhow::Result<()> {
    let provider = provider();
    let ones = provider.context().create_tensor3d_from(2, 2, 1, &[1.0; 4])?;

    let padded = provider.add_padding(&ones, 1)?;
    assert_eq!(padded.shape(), [4, 4, 1]);
    let mut expected = vec![0.0; 16];
    for index in [5, 6, 9, 10] {
        expected[index] = 1.0;
    }
    assert_eq!(padded.to_vec()?, expected);

    let restored = provider.remove_padding(&padded, 1)?;
    assert_eq!(restored.shape(), [2, 2, 1]);
    assert_eq!(restored.to_vec()?, vec![1.0; 4]);

    assert!(matches!(
        provider.remove_padding(&ones, 2),
        Err(TensorError::ShapeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_batch_padding_roundtrip() -> anyhow::Result<()> {
    let provider = provider();
    let values: Vec<Scalar> = (1..=16).map(|x| x as Scalar).collect();
    let batch = provider.context().create_tensor4d_from(2, 2, 2, 2, &values)?;

    let padded = provider.add_padding_batch(&batch, 2)?;
    assert_eq!(padded.shape(), [6, 6, 2, 2]);
    assert_eq!(padded.get(2, 2, 1, 1)?, batch.get(0, 0, 1, 1)?);

    let restored = provider.remove_padding_batch(&padded, 2)?;
    assert_eq!(restored.to_vec()?, values);
    Ok(())
}

#[test]
fn test_max_pool_and_reverse() -> anyhow::Result<()> {
    let provider = provider();
    let values: Vec<Scalar> = (0..16).map(|x| ((x * 7) % 16) as Scalar).collect();
    let input = provider.context().create_tensor3d_from(4, 4, 1, &values)?;
    let geometry = FilterGeometry::square(2, 2);

    let (pooled, indices) = provider.max_pool(&input, geometry, true)?;
    let indices = indices.expect("indices requested");
    let restored = provider.reverse_max_pool(&pooled, &indices, 4, 4, geometry)?;

    let restored = restored.to_vec()?;
    for (position, &value) in restored.iter().enumerate() {
        if value != 0.0 {
            assert_eq!(value, values[position]);
        }
    }
    assert_eq!(
        restored.iter().sum::<Scalar>(),
        pooled.to_vec()?.iter().sum::<Scalar>()
    );

    let (_, no_indices) = provider.max_pool(&input, geometry, false)?;
    assert!(no_indices.is_none());

    assert!(matches!(
        provider.reverse_max_pool(&pooled, &indices, 6, 6, geometry),
        Err(TensorError::ShapeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_batch_convolution_matches_per_item() -> anyhow::Result<()> {
    let provider = provider();
    let values: Vec<Scalar> = (0..3 * 3 * 2 * 2).map(|x| (x as Scalar * 1.7).sin()).collect();
    let batch = provider.context().create_tensor4d_from(3, 3, 2, 2, &values)?;
    let geometry = FilterGeometry::square(2, 1);

    let columns = provider.im2col_batch(&batch, geometry)?;
    assert_eq!(columns.shape(), [4, 8, 2]);
    let (pooled, indices) = provider.max_pool_batch(&batch, geometry, true)?;
    let indices = indices.expect("indices requested");
    assert_eq!(pooled.shape(), [2, 2, 2, 2]);

    let columns_values = columns.to_vec()?;
    let pooled_values = pooled.to_vec()?;
    let indices_values = indices.to_vec()?;
    for n in 0..2 {
        let item = batch.tensor(n)?;

        let single = provider.im2col(&item, geometry)?.to_vec()?;
        assert_eq!(&columns_values[n * 32..(n + 1) * 32], single.as_slice());

        let (single_pooled, single_indices) = provider.max_pool(&item, geometry, true)?;
        assert_eq!(&pooled_values[n * 8..(n + 1) * 8], single_pooled.to_vec()?.as_slice());
        assert_eq!(
            &indices_values[n * 8..(n + 1) * 8],
            single_indices.expect("indices requested").to_vec()?.as_slice()
        );
    }

    let restored = provider.reverse_max_pool_batch(&pooled, &indices, 3, 3, geometry)?;
    assert_eq!(restored.shape(), [3, 3, 2, 2]);
    Ok(())
}

#[test]
fn test_reverse_im2col_shapes() -> anyhow::Result<()> {
    let provider = provider();
    let context = provider.context();
    let geometry = FilterGeometry::square(2, 1);

    // Two filters over a depth-1 3x3 input give a 2x2x2 error
    let error = context.create_tensor3d_from(2, 2, 2, &[1.0; 8])?;
    let filters = context.create_matrix_from(4, 2, &[1.0; 8])?;
    let gradient = provider.reverse_im2col(&error, &filters, 3, 3, 1, geometry)?;
    assert_eq!(gradient.shape(), [3, 3, 1]);
    // Centre cell is covered by all four placements of both filters
    assert_eq!(gradient.get(1, 1, 0)?, 8.0);
    assert_eq!(gradient.get(0, 0, 0)?, 2.0);

    let wrong_filters = context.create_matrix(3, 2, true);
    assert!(matches!(
        provider.reverse_im2col(&error, &wrong_filters, 3, 3, 1, geometry),
        Err(TensorError::ShapeMismatch { .. })
    ));

    let batch_error = context.create_tensor4d_from(2, 2, 2, 3, &[1.0; 24])?;
    let batch_gradient = provider.reverse_im2col_batch(&batch_error, &filters, 3, 3, 1, geometry)?;
    assert_eq!(batch_gradient.shape(), [3, 3, 1, 3]);
    assert_eq!(batch_gradient.get(1, 1, 0, 2)?, 8.0);
    Ok(())
}

#[test]
fn test_multiply_each_depth_and_combine() -> anyhow::Result<()> {
    let provider = provider();
    let context = provider.context();
    // Depth 0 is the identity, depth 1 is [[1, 2], [3, 4]]
    let tensor = context.create_tensor3d_from(2, 2, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 3.0, 2.0, 4.0])?;
    let matrix = context.create_matrix_from(2, 2, &[5.0, 7.0, 6.0, 8.0])?;

    let product = provider.multiply_each_depth(&tensor, &matrix)?;
    assert!(product.is_valid());
    assert_eq!(
        product.to_vec()?,
        vec![5.0, 7.0, 6.0, 8.0, 19.0, 43.0, 22.0, 50.0]
    );
    assert_eq!(provider.context().scopes().depth(), 0);

    let combined = provider.combine_depth_slices(&product)?;
    assert_eq!(combined.to_vec()?, vec![24.0, 50.0, 28.0, 58.0]);
    Ok(())
}

#[test]
fn test_svd_is_unsupported() {
    let provider = provider();
    let matrix = provider.create_matrix(2, 2, true);
    match provider.svd(&matrix) {
        Err(TensorError::UnsupportedOperation { operation, provider: name }) => {
            assert_eq!(operation, "svd");
            assert_eq!(name, "cpu");
        }
        other => panic!("expected UnsupportedOperation, got {other:?}"),
    }
}

#[test]
fn test_dyn_provider() -> anyhow::Result<()> {
    let provider: Arc<dyn LinearAlgebraProvider> = Arc::new(CpuProvider::new());
    let a = provider.context().create_vector_from(&[1.0, 2.0]);
    let b = provider.context().create_vector_from(&[3.0, 4.0]);

    assert_eq!(provider.add(&a, &b)?.to_vec()?, vec![4.0, 6.0]);
    provider.sigmoid_in_place(&a)?;
    assert!(a.to_vec()?.iter().all(|&x| x > 0.5 && x < 1.0));
    Ok(())
}

#[test]
fn test_scoped_intermediates_release_to_pool() -> anyhow::Result<()> {
    let provider = provider();
    let input = provider.context().create_matrix_from(2, 2, &[1.0, 2.0, 3.0, 4.0])?;

    let mut kept = Vec::new();
    for _ in 0..2 {
        let result = provider.scoped(|p| {
            let transposed = p.transpose(&input)?;
            let product = p.multiply(&transposed, &input)?;
            let scaled = p.multiply_scalar(&product, 0.5)?;
            scaled.lease().detach_from_scope();
            Ok(scaled)
        })?;
        kept.push(result);
    }

    assert_eq!(provider.context().scopes().depth(), 0);
    assert!(kept.iter().all(|m| m.is_valid()));
    assert!(provider.pool_stats().hits > 0);
    assert_eq!(kept[0].to_vec()?, kept[1].to_vec()?);
    Ok(())
}

#[test]
fn test_pop_scope_invalidates_results() {
    let provider = provider();
    let input = provider.create_vector(8, true);

    provider.push_scope();
    let output = provider.exp(&input).unwrap();
    assert_eq!(output.to_vec().unwrap(), vec![1.0; 8]);
    assert_eq!(provider.pop_scope(), Some(1));

    assert!(!output.is_valid());
    assert!(matches!(output.to_vec(), Err(TensorError::UseAfterRelease { .. })));
    assert!(input.is_valid());
}
