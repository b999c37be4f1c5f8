//! Error types for segment, tensor and kernel operations
//!
//! Every failure in densa is a local precondition violation detected
//! synchronously at the call site. Nothing is retried and no partial output
//! is produced: validation always runs before a result segment is allocated.

use crate::segment::SegmentKind;
use thiserror::Error;

/// Error type for densa operations
#[derive(Error, Debug)]
pub enum TensorError {
    /// Operand sizes or shapes disagree
    #[error("{operation}: shape mismatch - expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        operation: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Reshape request cannot be resolved against the element count
    #[error("invalid reshape of {total} elements to {requested}: {reason}")]
    InvalidReshape {
        total: usize,
        requested: String,
        reason: String,
    },

    /// Rank-specific index beyond bounds
    #[error("index {index:?} out of range for shape {shape:?}")]
    IndexOutOfRange { index: Vec<usize>, shape: Vec<usize> },

    /// Operation has no implementation in this provider
    #[error("{operation} is not supported by the {provider} provider")]
    UnsupportedOperation { operation: String, provider: String },

    /// Access to a segment whose storage was already released
    #[error("{kind:?} segment of size {size} used after release")]
    UseAfterRelease { kind: SegmentKind, size: usize },

    /// Failure reading or writing the persisted tensor format
    #[error("tensor i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for densa operations
pub type Result<T> = std::result::Result<T, TensorError>;

impl TensorError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(
        operation: impl Into<String>,
        expected: Vec<usize>,
        actual: Vec<usize>,
    ) -> Self {
        TensorError::ShapeMismatch {
            operation: operation.into(),
            expected,
            actual,
        }
    }

    /// Create an invalid reshape error
    pub fn invalid_reshape(
        total: usize,
        requested: &[Option<usize>],
        reason: impl Into<String>,
    ) -> Self {
        let requested = requested
            .iter()
            .map(|d| match d {
                Some(d) => d.to_string(),
                None => "?".to_string(),
            })
            .collect::<Vec<_>>()
            .join("x");
        TensorError::InvalidReshape {
            total,
            requested,
            reason: reason.into(),
        }
    }

    /// Create an index out of range error
    pub fn index_out_of_range(index: &[usize], shape: &[usize]) -> Self {
        TensorError::IndexOutOfRange {
            index: index.to_vec(),
            shape: shape.to_vec(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(operation: impl Into<String>, provider: impl Into<String>) -> Self {
        TensorError::UnsupportedOperation {
            operation: operation.into(),
            provider: provider.into(),
        }
    }

    /// Create a use-after-release error
    pub fn use_after_release(kind: SegmentKind, size: usize) -> Self {
        TensorError::UseAfterRelease { kind, size }
    }
}
