//! # TGC Ops
//!
//! Operators of the tensor graph compiler, and the shape negotiation they
//! perform before any buffer is allocated.
//!
//! ## Overview
//!
//! Every operator implements [`Operation`]. At compile time the driver asks
//! each instruction for its output shape, then lets it finalize; at run time
//! it hands the operator concrete [`Argument`]s.
//!
//! | Operator | Inputs | Output |
//! |----------|--------|--------|
//! | [`Reshape`] | `x` | `x` under new lens, a view when the layout allows |
//! | [`Contiguous`] | `x` | `x` copied into standard layout |
//! | [`Elu`] | `x`, `out` | `elu(x)` written into `out` |
//!
//! ## Zero-copy reshape
//!
//! A reshape of a standard input is always expressible. For any other
//! layout, [`reshape::layout`] searches for strides that let the output view
//! the input storage; when none exist the reshape fails with
//! [`OpError::AliasingFailure`] and the caller decides whether to insert a
//! [`Contiguous`] copy.
//!
//! ## Main Types
//!
//! - [`Op`]: The serializable operator catalogue
//! - [`Operation`]: The operator contract
//! - [`Argument`]: A shaped buffer
//! - [`Context`]: State shared across operator instances

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod argument;
pub mod check_shapes;
pub mod context;
pub mod contiguous;
pub mod elu;
pub mod error;
pub mod operation;
pub mod reshape;

use std::fmt;

use serde::{Deserialize, Serialize};
use tgc_shape::Shape;

pub use argument::{Argument, Element};
pub use context::{ActivationDescriptor, ActivationMode, Context};
pub use contiguous::Contiguous;
pub use elu::Elu;
pub use error::{OpError, OpResult};
pub use operation::{DynOutput, Operation};
pub use reshape::Reshape;

/// Every operator the compiler knows, tagged by name when serialized.
///
/// ```
/// use tgc_ops::{Op, Reshape};
///
/// let op: Op = serde_json::from_str(r#"{"name": "reshape", "dims": [0, -1]}"#).unwrap();
/// assert_eq!(op, Op::Reshape(Reshape::new([0, -1])));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Op {
    /// See [`Reshape`].
    Reshape(Reshape),
    /// See [`Contiguous`].
    Contiguous,
    /// See [`Elu`].
    Elu(Elu),
}

impl Op {
    fn as_operation(&self) -> &dyn Operation {
        match self {
            Op::Reshape(op) => op,
            Op::Contiguous => &Contiguous,
            Op::Elu(op) => op,
        }
    }
}

impl Operation for Op {
    fn name(&self) -> &'static str {
        self.as_operation().name()
    }

    fn compute_shape(&self, inputs: &[Shape]) -> OpResult<Shape> {
        self.as_operation().compute_shape(inputs)
    }

    fn compute(&self, ctx: &Context, output: &DynOutput, args: &[Argument]) -> OpResult<Argument> {
        self.as_operation().compute(ctx, output, args)
    }

    fn finalize(&mut self, ctx: &Context, output: &Shape, inputs: &[Shape]) -> OpResult<()> {
        match self {
            Op::Reshape(op) => op.finalize(ctx, output, inputs),
            Op::Contiguous => Contiguous.finalize(ctx, output, inputs),
            Op::Elu(op) => op.finalize(ctx, output, inputs),
        }
    }

    fn output_alias(&self, inputs: &[Shape]) -> Option<usize> {
        self.as_operation().output_alias(inputs)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_operation(), f)
    }
}

impl From<Reshape> for Op {
    fn from(op: Reshape) -> Self {
        Op::Reshape(op)
    }
}

impl From<Elu> for Op {
    fn from(op: Elu) -> Self {
        Op::Elu(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_shape::DType;

    #[test]
    fn test_serde_tagged_by_name() {
        let ops = vec![
            Op::Reshape(Reshape::new([2, -1])),
            Op::Contiguous,
            Op::Elu(Elu::new(0.25)),
        ];
        let json = serde_json::to_string(&ops).unwrap();
        assert!(json.contains(r#""name":"contiguous""#));
        let back: Vec<Op> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ops);
    }

    #[test]
    fn test_unknown_op_rejected() {
        let result: Result<Op, _> = serde_json::from_str(r#"{"name": "transpose"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_delegates_to_operator() {
        let op = Op::from(Reshape::new([-1]));
        assert_eq!(op.name(), "reshape");
        assert_eq!(op.to_string(), "reshape[dims={-1}]");
        let out = op
            .compute_shape(&[Shape::from_lens(DType::Int8, [2, 3])])
            .unwrap();
        assert_eq!(out.as_static().unwrap().lens(), &[6]);
        assert_eq!(Op::Contiguous.to_string(), "contiguous");
    }
}
