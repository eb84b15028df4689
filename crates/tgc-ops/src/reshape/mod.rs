//! The reshape operator.
//!
//! `reshape` reinterprets its input under new lens without changing the
//! element order. The `dims` attribute has one entry per output axis:
//!
//! | Entry | Meaning |
//! |-------|---------|
//! | `n > 0` | the output axis has size `n` |
//! | `0` | copy the size of the input axis at the same position |
//! | `-1` | infer the size from the element count (at most one) |
//!
//! Static inputs resolve to a fixed output shape. A standard input yields a
//! standard output; any other layout goes through [`layout::reshape_dims`]
//! so the output can view the input storage. Dynamic inputs with a single
//! ranged axis resolve to a dynamic output that carries the range through.

mod dynamic;
pub mod layout;

use std::fmt;

use serde::{Deserialize, Serialize};
use tgc_shape::{Lens, Shape, StaticShape};
use tracing::debug;

use crate::argument::Argument;
use crate::check_shapes::CheckShapes;
use crate::context::Context;
use crate::error::{OpError, OpResult};
use crate::operation::{DynOutput, Operation};

pub(crate) const NAME: &str = "reshape";

/// Reshape to the lens described by `dims`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reshape {
    /// Target dims, one per output axis.
    pub dims: Vec<i64>,
}

impl Reshape {
    /// Creates a reshape to `dims`.
    #[must_use]
    pub fn new(dims: impl IntoIterator<Item = i64>) -> Self {
        Self {
            dims: dims.into_iter().collect(),
        }
    }

    /// Substitutes `0` and `-1` entries against a static input.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::Configuration`] for a `0` with no matching input
    /// axis, a negative entry other than `-1`, a `-1` that cannot be
    /// inferred because another output axis is zero-sized, or dims whose
    /// product overflows `usize`.
    pub fn resolve_dims(&self, input: &StaticShape) -> OpResult<Lens> {
        let mut infer = None;
        let mut rdims = Lens::with_capacity(self.dims.len());
        for (i, &dim) in self.dims.iter().enumerate() {
            let len = match dim {
                0 => input.lens().get(i).copied().ok_or_else(|| {
                    OpError::config(
                        NAME,
                        format!(
                            "dims[{i}] is 0 but the input has only {} axes",
                            input.rank()
                        ),
                    )
                })?,
                -1 => {
                    infer = Some(i);
                    1
                }
                d if d > 0 => usize::try_from(d)
                    .map_err(|_| OpError::config(NAME, format!("dimension {d} is too large")))?,
                d => {
                    return Err(OpError::config(
                        NAME,
                        format!("invalid dimension {d} at position {i}"),
                    ))
                }
            };
            rdims.push(len);
        }

        if let Some(slot) = infer {
            let known = checked_product(&rdims)?;
            if known == 0 {
                return Err(OpError::config(
                    NAME,
                    "cannot infer a -1 dimension alongside a zero-sized dimension",
                ));
            }
            rdims[slot] = input.elements() / known;
        }
        Ok(rdims)
    }

    fn static_compute_shape(&self, input: &StaticShape) -> OpResult<StaticShape> {
        let rdims = self.resolve_dims(input)?;

        let elements = checked_product(&rdims)?;
        if elements != input.elements() {
            return Err(OpError::ShapeMismatch {
                op: NAME,
                quantity: "elements",
                input: input.elements(),
                output: elements,
            });
        }

        let output = layout::reshape_dims(input, &rdims).map_err(|reason| {
            OpError::AliasingFailure {
                op: NAME,
                input: input.clone(),
                dims: rdims.to_vec(),
                reason,
            }
        })?;
        debug!(input = %input, output = %output, "resolved reshape");
        Ok(output)
    }
}

/// Product of `lens`, rejecting dims whose element count wraps.
fn checked_product(lens: &[usize]) -> OpResult<usize> {
    lens.iter()
        .try_fold(1usize, |acc, &len| acc.checked_mul(len))
        .ok_or_else(|| OpError::config(NAME, format!("element count of {lens:?} overflows")))
}

impl Operation for Reshape {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compute_shape(&self, inputs: &[Shape]) -> OpResult<Shape> {
        CheckShapes::new(NAME, inputs).dynamic_allowed().has(1)?;

        let n_neg_dims = self.dims.iter().filter(|&&d| d == -1).count();
        if n_neg_dims > 1 {
            return Err(OpError::config(
                NAME,
                format!("dims can only have one -1 dim, found {n_neg_dims}"),
            ));
        }

        match &inputs[0] {
            Shape::Dynamic(input) => dynamic::dyn_compute_shape(&self.dims, input),
            Shape::Static(input) => self.static_compute_shape(input).map(Shape::Static),
        }
    }

    fn compute(&self, _ctx: &Context, output: &DynOutput, args: &[Argument]) -> OpResult<Argument> {
        let [input] = args else {
            return Err(OpError::InputCount {
                op: NAME,
                expected: 1,
                actual: args.len(),
            });
        };
        let shape = output.computed_shape().clone();
        if input.shape().is_standard() {
            Argument::materialize(shape, input)
        } else {
            input.view(shape)
        }
    }

    fn output_alias(&self, inputs: &[Shape]) -> Option<usize> {
        match inputs.first() {
            Some(Shape::Static(input)) if !input.is_standard() => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for Reshape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(ToString::to_string).collect();
        write!(f, "{NAME}[dims={{{}}}]", dims.join(", "))
    }
}
