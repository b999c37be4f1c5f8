//! One forward and backward pass of a small convolution layer
//!
//! Run with:
//! ```bash
//! cargo run -p densa --example convolution_pipeline --features tracing
//! ```

use anyhow::Result;
use densa::prelude::*;
use densa::tracing_support::{init_tracing, record_pool_stats, TracingConfig};

const IMAGE: usize = 12;
const CHANNELS: usize = 3;
const FILTERS: usize = 4;
const BATCH: usize = 8;

fn main() -> Result<()> {
    init_tracing(TracingConfig::default())?;

    let provider = CpuProvider::from_env();
    let context = provider.context().clone();
    let kernel = FilterGeometry::square(3, 1);
    let pool = FilterGeometry::square(2, 2);

    let images = context.create_tensor4d_from(
        IMAGE,
        IMAGE,
        CHANNELS,
        BATCH,
        &(0..IMAGE * IMAGE * CHANNELS * BATCH)
            .map(|i| ((i % 17) as Scalar - 8.0) / 8.0)
            .collect::<Vec<_>>(),
    )?;
    let filters =
        context.create_random_normal_matrix(kernel.filter_size() * CHANNELS, FILTERS, 0.0, 0.1);
    let (conv_rows, conv_columns) = kernel.output_size(IMAGE + 2, IMAGE + 2)?;

    for step in 0..3 {
        let loss = provider.scoped(|p| {
            // Forward: pad, unfold, multiply by the filter bank, activate, pool
            let padded = p.add_padding_batch(&images, 1)?;
            let columns = p.im2col_batch(&padded, kernel)?;
            let mut activations = Vec::with_capacity(BATCH);
            for n in 0..BATCH {
                let unfolded = columns.matrix(n)?;
                let response = p.relu(&p.multiply(&unfolded, &filters)?)?;
                let slices =
                    response.reshape_as_tensor3d(Some(conv_rows), Some(conv_columns), None)?;
                activations.push(slices);
            }
            let items: Vec<&Tensor3D> = activations.iter().collect();
            let stacked = p.context().create_tensor4d_from_tensors(&items)?;
            let (pooled, indices) = p.max_pool_batch(&stacked, pool, true)?;
            let indices = indices
                .ok_or_else(|| TensorError::unsupported("max_pool indices", p.name()))?;

            // Backward: route the pooled error to the argmax cells, then to the input
            let error = p.multiply_scalar(&pooled, 1.0 / pooled.size() as Scalar)?;
            let routed = p.reverse_max_pool_batch(&error, &indices, conv_rows, conv_columns, pool)?;
            let routed = p.pointwise_multiply(&routed, &p.relu_derivative(&stacked)?)?;
            let padded_size = IMAGE + 2;
            let input_error = p.reverse_im2col_batch(
                &routed,
                &filters,
                padded_size,
                padded_size,
                CHANNELS,
                kernel,
            )?;
            let input_error = p.remove_padding_batch(&input_error, 1)?;

            p.l2_norm(input_error.segment())
        })?;

        println!("step {step}: input error norm {loss:.6}");
    }

    record_pool_stats("convolution_pipeline", &provider.pool_stats());
    let stats = provider.pool_stats();
    println!(
        "pool: {} hits, {} misses ({:.0}% reuse)",
        stats.hits,
        stats.misses,
        stats.hit_rate * 100.0
    );
    Ok(())
}
