//! Input-shape preconditions shared by operators.

use tgc_shape::Shape;

use crate::error::{OpError, OpResult};

/// Validates the input shapes handed to an operator.
///
/// ```
/// use tgc_ops::check_shapes::CheckShapes;
/// use tgc_shape::{DType, Shape};
///
/// let inputs = [Shape::from_lens(DType::Float32, [2, 3])];
/// CheckShapes::new("reshape", &inputs).has(1).unwrap();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CheckShapes<'a> {
    op: &'static str,
    shapes: &'a [Shape],
    dynamic_allowed: bool,
}

impl<'a> CheckShapes<'a> {
    /// Starts checking `shapes` for operator `op`. Dynamic shapes are
    /// rejected unless [`CheckShapes::dynamic_allowed`] is called.
    #[must_use]
    pub fn new(op: &'static str, shapes: &'a [Shape]) -> Self {
        Self {
            op,
            shapes,
            dynamic_allowed: false,
        }
    }

    /// Accepts dynamic input shapes.
    #[must_use]
    pub fn dynamic_allowed(mut self) -> Self {
        self.dynamic_allowed = true;
        self
    }

    /// Requires exactly `n` inputs.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::InputCount`] or, for a disallowed dynamic input,
    /// [`OpError::DynamicInput`].
    pub fn has(self, n: usize) -> OpResult<Self> {
        if self.shapes.len() != n {
            return Err(OpError::InputCount {
                op: self.op,
                expected: n,
                actual: self.shapes.len(),
            });
        }
        if !self.dynamic_allowed && self.shapes.iter().any(Shape::is_dynamic) {
            return Err(OpError::DynamicInput { op: self.op });
        }
        Ok(self)
    }

    /// Requires every input to share the first input's element type.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::DTypeMismatch`] naming the first mismatch.
    pub fn same_type(self) -> OpResult<Self> {
        if let Some(first) = self.shapes.first() {
            let expected = first.dtype();
            if let Some(other) = self.shapes.iter().find(|s| s.dtype() != expected) {
                return Err(OpError::DTypeMismatch {
                    op: self.op,
                    expected,
                    actual: other.dtype(),
                });
            }
        }
        Ok(self)
    }

    /// Requires every input to have the first input's lens (or ranges).
    ///
    /// # Errors
    ///
    /// Returns [`OpError::Configuration`] naming the mismatched input.
    pub fn same_dims(self) -> OpResult<Self> {
        if let Some(first) = self.shapes.first() {
            let expected = first.dyn_dims();
            for (i, shape) in self.shapes.iter().enumerate().skip(1) {
                if shape.dyn_dims() != expected {
                    return Err(OpError::config(
                        self.op,
                        format!("input {i} ({shape}) does not match input 0 ({first})"),
                    ));
                }
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_shape::{DType, DynamicDimension};

    #[test]
    fn test_has_counts_inputs() {
        let inputs = [Shape::from_lens(DType::Float32, [2])];
        assert!(CheckShapes::new("op", &inputs).has(1).is_ok());
        assert_eq!(
            CheckShapes::new("op", &inputs).has(2).unwrap_err(),
            OpError::InputCount {
                op: "op",
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_dynamic_rejected_by_default() {
        let inputs = [Shape::from_dims(
            DType::Float32,
            [DynamicDimension::new(1, 4).unwrap()],
        )];
        assert_eq!(
            CheckShapes::new("op", &inputs).has(1).unwrap_err(),
            OpError::DynamicInput { op: "op" }
        );
        assert!(CheckShapes::new("op", &inputs)
            .dynamic_allowed()
            .has(1)
            .is_ok());
    }

    #[test]
    fn test_same_type_and_dims() {
        let inputs = [
            Shape::from_lens(DType::Float32, [2, 3]),
            Shape::from_lens(DType::Float64, [2, 3]),
        ];
        assert!(matches!(
            CheckShapes::new("op", &inputs).same_type(),
            Err(OpError::DTypeMismatch { .. })
        ));
        assert!(CheckShapes::new("op", &inputs).same_dims().is_ok());
    }
}
