//! Errors raised by operators.
//!
//! Shape resolution reports three kinds of failure:
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | [`OpError::Configuration`] | the attribute is inconsistent on its own |
//! | [`OpError::ShapeMismatch`] | element counts of input and output differ |
//! | [`OpError::AliasingFailure`] | no zero-copy layout exists for the output |
//!
//! The remaining variants are contract violations by the caller (wrong
//! number of inputs, mismatched element types, undersized buffers).

use tgc_shape::{DType, ShapeError, StaticShape};

use crate::reshape::layout::AliasFailure;

/// Errors in operator shape resolution and execution.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OpError {
    /// The operator's attributes are self-inconsistent.
    #[error("{op}: {message}")]
    Configuration {
        /// The operator name.
        op: &'static str,
        /// What is wrong.
        message: String,
    },

    /// Resolved output and input disagree on an element count.
    #[error("{op}: wrong number of {quantity}: output has {output} whereas the input has {input}")]
    ShapeMismatch {
        /// The operator name.
        op: &'static str,
        /// What was counted ("elements" or "fixed elements").
        quantity: &'static str,
        /// Count on the input side.
        input: usize,
        /// Count on the output side.
        output: usize,
    },

    /// The input layout cannot be viewed as the requested dims.
    #[error("{op}: cannot alias {input} as {dims:?}: {reason}")]
    AliasingFailure {
        /// The operator name.
        op: &'static str,
        /// The non-standard input shape.
        input: StaticShape,
        /// The requested output lens.
        dims: Vec<usize>,
        /// Where the decomposition failed.
        reason: AliasFailure,
    },

    /// Wrong number of inputs.
    #[error("{op}: expected {expected} inputs, got {actual}")]
    InputCount {
        /// The operator name.
        op: &'static str,
        /// Required count.
        expected: usize,
        /// Supplied count.
        actual: usize,
    },

    /// A dynamic shape reached an operator that only accepts static shapes.
    #[error("{op}: dynamic input shapes are not supported")]
    DynamicInput {
        /// The operator name.
        op: &'static str,
    },

    /// Inputs with different element types.
    #[error("{op}: element type mismatch: expected {expected}, got {actual}")]
    DTypeMismatch {
        /// The operator name.
        op: &'static str,
        /// Required element type.
        expected: DType,
        /// Supplied element type.
        actual: DType,
    },

    /// A buffer too small for the shape laid over it.
    #[error("buffer holds {available} elements but the shape needs {required}")]
    StorageTooSmall {
        /// Elements the shape addresses.
        required: usize,
        /// Elements the storage holds.
        available: usize,
    },

    /// Invalid shape construction.
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

impl OpError {
    /// Creates a configuration error for `op`.
    pub fn config(op: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            op,
            message: message.into(),
        }
    }

    /// Returns true for [`OpError::AliasingFailure`].
    #[must_use]
    pub fn is_aliasing_failure(&self) -> bool {
        matches!(self, Self::AliasingFailure { .. })
    }
}

/// Result type for operator methods.
pub type OpResult<T> = Result<T, OpError>;
