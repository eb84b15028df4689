//! The contract every operator satisfies.
//!
//! The compiler drives an operator in two phases:
//!
//! 1. **Compile time**: [`Operation::compute_shape`] once per compilation
//!    pass, then [`Operation::finalize`] once for one-time setup.
//! 2. **Run time**: [`Operation::compute`] once per execution, with the
//!    output shape finalized by [`DynOutput::resolve`].
//!
//! [`Operation::output_alias`] lets an operator declare that its output
//! shares storage with one of its inputs, so an allocator can skip
//! allocating it.

use std::fmt;

use tgc_shape::{Shape, StaticShape};

use crate::argument::Argument;
use crate::context::Context;
use crate::error::{OpError, OpResult};

/// An operator in the tensor graph.
pub trait Operation: fmt::Display {
    /// Stable identifier used in diagnostics and serialization.
    fn name(&self) -> &'static str;

    /// Infers the output shape from the input shapes.
    ///
    /// # Errors
    ///
    /// Returns an [`OpError`] if the inputs or attributes are invalid.
    fn compute_shape(&self, inputs: &[Shape]) -> OpResult<Shape>;

    /// Produces the output from concrete input buffers.
    ///
    /// # Errors
    ///
    /// Only on contract violations by the caller: the buffers do not match
    /// the shapes that were resolved at compile time.
    fn compute(&self, ctx: &Context, output: &DynOutput, args: &[Argument]) -> OpResult<Argument>;

    /// One-time setup after the output shape is known.
    ///
    /// # Errors
    ///
    /// Returns an [`OpError`] if setup is impossible for these shapes.
    fn finalize(&mut self, _ctx: &Context, _output: &Shape, _inputs: &[Shape]) -> OpResult<()> {
        Ok(())
    }

    /// Index of the input whose storage the output reuses, if any.
    fn output_alias(&self, _inputs: &[Shape]) -> Option<usize> {
        None
    }
}

/// The output shape an operator computes into, fixed for one execution.
///
/// When the compile-time shape is dynamic, the shape is re-resolved against
/// the concrete argument shapes of this invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynOutput {
    computed_shape: StaticShape,
}

impl DynOutput {
    /// Finalizes `output_shape` for a call with `args`.
    ///
    /// # Errors
    ///
    /// Returns the operator's shape error for these concrete inputs, or
    /// [`OpError::Shape`] if the concrete shape falls outside the
    /// compile-time ranges.
    pub fn resolve<O: Operation + ?Sized>(
        op: &O,
        output_shape: &Shape,
        args: &[Argument],
    ) -> OpResult<Self> {
        let dynamic = match output_shape {
            Shape::Static(shape) => {
                return Ok(Self {
                    computed_shape: shape.clone(),
                })
            }
            Shape::Dynamic(dynamic) => dynamic,
        };

        let inputs: Vec<Shape> = args
            .iter()
            .map(|arg| Shape::Static(arg.shape().clone()))
            .collect();
        match op.compute_shape(&inputs)? {
            Shape::Static(shape) => {
                // the concrete lens must instantiate the compiled ranges
                dynamic.to_static(shape.lens())?;
                Ok(Self {
                    computed_shape: shape,
                })
            }
            Shape::Dynamic(shape) => Err(OpError::config(
                op.name(),
                format!("output shape {shape} is still dynamic for static inputs"),
            )),
        }
    }

    /// Wraps an already static shape.
    #[must_use]
    pub fn fixed(shape: StaticShape) -> Self {
        Self {
            computed_shape: shape,
        }
    }

    /// The finalized output shape.
    #[must_use]
    pub fn computed_shape(&self) -> &StaticShape {
        &self.computed_shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshape::Reshape;
    use tgc_shape::{DType, DynamicDimension, ShapeError};

    fn compiled(op: &Reshape) -> Shape {
        let input = Shape::from_dims(
            DType::Float32,
            [
                DynamicDimension::new(1, 8).unwrap(),
                DynamicDimension::fixed(2),
                DynamicDimension::fixed(6),
            ],
        );
        op.compute_shape(&[input]).unwrap()
    }

    #[test]
    fn test_static_shape_passes_through() {
        let shape = StaticShape::standard(DType::Int32, [4]);
        let out =
            DynOutput::resolve(&Reshape::new([4]), &Shape::Static(shape.clone()), &[]).unwrap();
        assert_eq!(out.computed_shape(), &shape);
    }

    #[test]
    fn test_dynamic_shape_resolved_per_call() {
        let op = Reshape::new([0, 3, -1]);
        let shape = compiled(&op);
        let arg = Argument::zeroed(StaticShape::standard(DType::Float32, [5, 2, 6]));
        let out = DynOutput::resolve(&op, &shape, &[arg]).unwrap();
        assert_eq!(out.computed_shape().lens(), &[5, 3, 4]);
    }

    #[test]
    fn test_out_of_range_call() {
        let op = Reshape::new([0, 3, -1]);
        let shape = compiled(&op);
        let arg = Argument::zeroed(StaticShape::standard(DType::Float32, [9, 2, 6]));
        let err = DynOutput::resolve(&op, &shape, &[arg]).unwrap_err();
        assert!(matches!(
            err,
            OpError::Shape(ShapeError::OutOfRange { axis: 0, len: 9, .. })
        ));
    }
}
