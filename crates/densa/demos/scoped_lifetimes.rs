//! Scope brackets, aliases and pool reuse
//!
//! Run with:
//! ```bash
//! cargo run -p densa --example scoped_lifetimes
//! ```

use anyhow::Result;
use densa::prelude::*;

fn main() -> Result<()> {
    let provider = CpuProvider::new();
    let context = provider.context();

    // Aliases share one segment; each holds its own reference
    let matrix = context.create_matrix_from(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
    let flat = matrix.as_vector();
    let row = matrix.row(1)?;
    println!(
        "matrix {:?}\n  row 1 = {:?}, references = {}",
        matrix,
        row.to_vec()?,
        matrix.segment().ref_count()
    );
    flat.dispose();
    println!("  after disposing the flat alias: {}", matrix.segment().ref_count());

    // Everything created inside a scope is released when it closes
    context.push_scope();
    let scratch = provider.exp(&matrix)?;
    let norm = provider.l2_norm(scratch.segment())?;
    let disposed = context.pop_scope().unwrap_or(0);
    println!(
        "scope closed: norm {norm:.3}, {disposed} tensor(s) released, scratch valid = {}",
        scratch.is_valid()
    );

    // Results that must outlive their bracket detach from it
    let normalized = provider.scoped(|p| {
        let total = p.sum(matrix.segment())?;
        let result = p.multiply_scalar(&matrix, 1.0 / total)?;
        result.lease().detach_from_scope();
        Ok(result)
    })?;
    println!("normalized {:?}, valid = {}", normalized.to_vec()?, normalized.is_valid());

    // Released buffers come back out of the pool
    for _ in 0..4 {
        provider.scoped(|p| {
            let t = p.transpose(&matrix)?;
            p.multiply(&matrix, &t).map(|_| ())
        })?;
    }
    let stats = provider.pool_stats();
    println!("pool: {} hits, {} misses", stats.hits, stats.misses);

    Ok(())
}
