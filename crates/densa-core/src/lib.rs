//! # densa-core
//!
//! Storage, lifetime and shape layer of the densa tensor engine.
//!
//! This crate provides:
//!
//! - **Segments** ([`Segment`]): reference-counted `f32` buffers in three
//!   flavours: owned, pooled and strided view
//! - **Segment pool** ([`SegmentPool`]): size-keyed buffer reuse with statistics
//! - **Scopes** ([`ScopeStack`], [`Lease`]): bulk disposal of forgotten
//!   intermediates
//! - **Shaped tensors** ([`Vector`], [`Matrix`], [`Tensor3D`], [`Tensor4D`]):
//!   column-major views that reshape and slice without copying
//! - **Persisted format** ([`io`]): bit-exact binary read/write
//!
//! Compute kernels live in `densa-kernels`.
//!
//! ## Quick Start
//!
//! ```
//! use densa_core::{ShapedTensor, TensorContext};
//!
//! let context = TensorContext::default();
//! let matrix = context.create_matrix_from(2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
//!
//! // Column-major: offset = column * rows + row
//! assert_eq!(matrix.get(0, 1).unwrap(), 3.0);
//! assert_eq!(matrix.row(1).unwrap().to_vec().unwrap(), vec![2.0, 4.0]);
//!
//! // Reshape aliases the same segment
//! let flat = matrix.as_vector();
//! assert_eq!(flat.size(), 4);
//! assert_eq!(matrix.segment().ref_count(), 2);
//! ```
//!
//! ## Scopes
//!
//! ```
//! use densa_core::{ShapedTensor, TensorContext};
//!
//! let context = TensorContext::default();
//! context.push_scope();
//! let scratch = context.create_vector(128, true);
//! context.pop_scope();
//! assert!(!scratch.is_valid());
//! ```
//!
//! ## Error Handling
//!
//! Operations return [`Result<T>`] with a [`TensorError`]:
//!
//! ```
//! use densa_core::{ShapedTensor, TensorContext, TensorError};
//!
//! let context = TensorContext::default();
//! let vector = context.create_vector(12, true);
//!
//! // Two free dimensions cannot be inferred
//! let result = vector.reshape_as_matrix(None, None);
//! assert!(matches!(result, Err(TensorError::InvalidReshape { .. })));
//! ```
//!
//! ## Features
//!
//! - `serde`: Serialize/Deserialize for configuration and statistics types

pub mod context;
pub mod error;
pub mod io;
pub mod pool;
pub mod scope;
pub mod segment;
pub mod tensor;


pub use context::TensorContext;
pub use error::{Result, TensorError};
pub use pool::{PoolConfig, PoolStats, SegmentPool};
pub use scope::{Lease, ScopeId, ScopeStack};
pub use segment::{Contiguous, Scalar, Segment, SegmentKind, SegmentValues, UnderlyingStorage};
pub use tensor::{resolve_shape, Matrix, ShapedTensor, Tensor3D, Tensor4D, Vector};
