//! Copy into standard layout.
//!
//! `contiguous` keeps the lens and element order of its input and rewrites
//! the storage so that the strides are standard. The driver inserts it in
//! front of a reshape whose input layout cannot be aliased.

use std::fmt;

use tgc_shape::Shape;

use crate::argument::Argument;
use crate::check_shapes::CheckShapes;
use crate::context::Context;
use crate::error::{OpError, OpResult};
use crate::operation::{DynOutput, Operation};

const NAME: &str = "contiguous";

/// Copy into a standard-layout buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Contiguous;

impl Operation for Contiguous {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compute_shape(&self, inputs: &[Shape]) -> OpResult<Shape> {
        CheckShapes::new(NAME, inputs).dynamic_allowed().has(1)?;
        Ok(match &inputs[0] {
            Shape::Static(input) => Shape::Static(input.to_standard()),
            dynamic @ Shape::Dynamic(_) => dynamic.clone(),
        })
    }

    fn compute(&self, _ctx: &Context, output: &DynOutput, args: &[Argument]) -> OpResult<Argument> {
        let [input] = args else {
            return Err(OpError::InputCount {
                op: NAME,
                expected: 1,
                actual: args.len(),
            });
        };
        Argument::materialize(output.computed_shape().clone(), input)
    }
}

impl fmt::Display for Contiguous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_shape::{DType, StaticShape};

    #[test]
    fn test_shape_becomes_standard() {
        let input = Shape::with_strides(DType::Float32, [2, 3], [1, 2]).unwrap();
        let out = Contiguous.compute_shape(&[input]).unwrap();
        assert!(out.is_standard());
        assert_eq!(out.as_static().unwrap().lens(), &[2, 3]);
    }

    #[test]
    fn test_compute_transposed() {
        let shape = StaticShape::with_strides(DType::Int64, [2, 3], [1, 2]).unwrap();
        let input = Argument::from_slice(shape, &[0i64, 3, 1, 4, 2, 5]).unwrap();
        let out = DynOutput::fixed(input.shape().to_standard());
        let result = Contiguous
            .compute(&Context::new(), &out, std::slice::from_ref(&input))
            .unwrap();
        assert!(result.shape().is_standard());
        assert_eq!(result.to_vec::<i64>().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }
}
