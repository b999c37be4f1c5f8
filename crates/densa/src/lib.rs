//! # densa
//!
//! Dense tensor engine for neural-network style workloads: pooled,
//! reference-counted `f32` storage, column-major tensors of rank one to four
//! and a CPU provider with SIMD and multithreaded kernels.
//!
//! This is the **meta crate** that re-exports every densa component.
//!
//! ## Quick Start
//!
//! ```
//! use densa::prelude::*;
//!
//! let provider = CpuProvider::new();
//! let weights = provider.context().create_matrix_from(2, 3, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0])?;
//! let input = provider.context().create_matrix_from(3, 1, &[1.0, 2.0, 3.0])?;
//!
//! let output = provider.sigmoid(&provider.multiply(&weights, &input)?)?;
//! assert_eq!(output.shape(), [2, 1]);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Components
//!
//! ### Storage and Tensors ([`core`])
//!
//! Segments, the segment pool, lifetime scopes, [`Vector`](core::Vector)
//! through [`Tensor4D`](core::Tensor4D) and the persisted binary format.
//!
//! ```
//! use densa::core::{ShapedTensor, TensorContext};
//!
//! let context = TensorContext::default();
//! let tensor = context.create_tensor3d(4, 4, 3, true);
//! let slice = tensor.matrix(2).unwrap();
//! assert_eq!(slice.shape(), [4, 4]);
//! ```
//!
//! ### Kernels and Providers ([`kernels`])
//!
//! Elementwise activations, reductions, transpose, matrix multiply, im2col,
//! max pooling and their reverses behind [`LinearAlgebraProvider`](kernels::LinearAlgebraProvider).
//!
//! ```
//! use densa::core::ShapedTensor;
//! use densa::kernels::{CpuProvider, FilterGeometry, LinearAlgebraProvider};
//!
//! let provider = CpuProvider::new();
//! let image = provider.context().create_tensor3d(6, 6, 2, true);
//! let columns = provider.im2col(&image, FilterGeometry::square(3, 1)).unwrap();
//! assert_eq!(columns.shape(), [16, 18]);
//! ```
//!
//! ### Logging ([`tracing_support`])
//!
//! Subscriber setup for the `tracing` events densa emits. The subscriber
//! itself is installed only with the `tracing` feature.
//!
//! ## Features
//!
//! - `parallel` (default): multithreaded kernels
//! - `serde`: Serialize/Deserialize for configuration types
//! - `tracing`: `init_tracing` installs a `tracing-subscriber` formatter

pub use densa_core as core;
pub use densa_kernels as kernels;

pub mod tracing_support;

pub mod prelude {
    //! Prelude module for convenient imports
    //!
    //! ```
    //! use densa::prelude::*;
    //!
    //! let provider = CpuProvider::default();
    //! let vector = provider.create_vector(8, true);
    //! assert_eq!(vector.size(), 8);
    //! ```

    // Storage and tensors
    pub use crate::core::{
        Matrix, Result, Scalar, ScopeId, Segment, ShapedTensor, Tensor3D, Tensor4D, TensorContext,
        TensorError, Vector,
    };

    // Providers and kernels
    pub use crate::kernels::{
        BinaryOp, CpuProvider, DistanceMetric, FilterGeometry, LinearAlgebraProvider,
        ProviderConfig, TensorOps, UnaryOp,
    };
}
