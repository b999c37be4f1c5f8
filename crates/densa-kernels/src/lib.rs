//! # densa-kernels
//!
//! Compute kernels and the linear algebra provider for densa.
//!
//! ## Overview
//!
//! Kernels work on plain column-major `f32` slices and are wrapped by the
//! [`LinearAlgebraProvider`] trait, which allocates results from its
//! [`densa_core::TensorContext`] so they pool and scope like any other tensor.
//!
//! **Key Features:**
//! - **Elementwise** ([`UnaryOp`], [`BinaryOp`]): activations and their
//!   derivatives, scalar arithmetic, stable softmax and its Jacobian
//! - **Reductions**: sum, average, norms, min/max with index, standard
//!   deviation and [`DistanceMetric`]s
//! - **Matrices**: cache-oblivious transpose, SIMD matrix multiply, row and
//!   column broadcasts
//! - **Convolution** ([`FilterGeometry`]): im2col, max pooling with saved
//!   indices, their reverses and padding, for 3D tensors and 4D batches
//!
//! ## Quick Start
//!
//! ```
//! use densa_core::ShapedTensor;
//! use densa_kernels::{CpuProvider, LinearAlgebraProvider, TensorOps};
//!
//! let provider = CpuProvider::new();
//! let context = provider.context();
//!
//! // [[1, 2], [3, 4]] · [[5, 6], [7, 8]]
//! let a = context.create_matrix_from(2, 2, &[1.0, 3.0, 2.0, 4.0]).unwrap();
//! let b = context.create_matrix_from(2, 2, &[5.0, 7.0, 6.0, 8.0]).unwrap();
//! let c = provider.multiply(&a, &b).unwrap();
//! assert_eq!(c.to_vec().unwrap(), vec![19.0, 43.0, 22.0, 50.0]);
//!
//! let activated = provider.relu(&provider.add_scalar(&c, -30.0).unwrap()).unwrap();
//! assert_eq!(activated.to_vec().unwrap(), vec![0.0, 13.0, 0.0, 20.0]);
//! ```
//!
//! ## Convolution
//!
//! ```
//! use densa_core::ShapedTensor;
//! use densa_kernels::{CpuProvider, FilterGeometry, LinearAlgebraProvider};
//!
//! let provider = CpuProvider::new();
//! let input = provider
//!     .context()
//!     .create_tensor3d_from(4, 4, 1, &(0..16).map(|x| x as f32).collect::<Vec<_>>())
//!     .unwrap();
//!
//! let (pooled, indices) = provider
//!     .max_pool(&input, FilterGeometry::square(2, 2), true)
//!     .unwrap();
//! assert_eq!(pooled.shape(), [2, 2, 1]);
//! assert_eq!(pooled.to_vec().unwrap(), vec![5.0, 7.0, 13.0, 15.0]);
//! assert!(indices.is_some());
//! ```
//!
//! ## Features
//!
//! - `parallel` (default): fan kernels out over the scirs2-core thread pool
//!   once an operation reaches [`ProviderConfig::parallel_threshold`]
//! - `serde`: Serialize/Deserialize for [`ProviderConfig`],
//!   [`FilterGeometry`] and [`DistanceMetric`]

pub mod config;
pub mod convolution;
pub mod cpu;
pub mod elementwise;
pub mod matmul;
pub mod parallel;
pub mod provider;
pub mod reductions;
pub mod simd;
pub mod transpose;


pub use config::ProviderConfig;
pub use convolution::FilterGeometry;
pub use cpu::CpuProvider;
pub use elementwise::{BinaryOp, UnaryOp, LEAKY_RELU_SLOPE};
pub use provider::{LinearAlgebraProvider, TensorOps};
pub use reductions::{DistanceMetric, MinMax};
