//! Exponential linear unit.
//!
//! `elu(x) = x` for `x > 0`, `alpha * (exp(x) - 1)` otherwise. The operator
//! takes `[x, out]` and writes into the caller-provided `out`, which it
//! declares as its output alias. The activation itself lives in a shared
//! [`ActivationDescriptor`] obtained from the [`Context`] at finalize time.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tgc_shape::{DType, Shape};

use crate::argument::Argument;
use crate::check_shapes::CheckShapes;
use crate::context::{ActivationDescriptor, ActivationMode, Context};
use crate::error::{OpError, OpResult};
use crate::operation::{DynOutput, Operation};

const NAME: &str = "elu";

/// Elementwise ELU writing into a provided buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Elu {
    /// Scale of the negative branch.
    pub alpha: f64,
    #[serde(skip)]
    descriptor: Option<Arc<ActivationDescriptor>>,
}

impl Elu {
    /// Creates an ELU with the given `alpha`.
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            descriptor: None,
        }
    }

    /// Returns true once [`Operation::finalize`] has run.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.descriptor.is_some()
    }
}

impl Default for Elu {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Operation for Elu {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compute_shape(&self, inputs: &[Shape]) -> OpResult<Shape> {
        CheckShapes::new(NAME, inputs)
            .has(2)?
            .same_type()?
            .same_dims()?;
        let dtype = inputs[0].dtype();
        if !matches!(dtype, DType::Float32 | DType::Float64) {
            return Err(OpError::config(
                NAME,
                format!("unsupported element type {dtype}"),
            ));
        }
        Ok(inputs[1].clone())
    }

    fn finalize(&mut self, ctx: &Context, _output: &Shape, _inputs: &[Shape]) -> OpResult<()> {
        self.descriptor = Some(ctx.activation_descriptor(ActivationMode::Elu, self.alpha));
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn compute(&self, ctx: &Context, _output: &DynOutput, args: &[Argument]) -> OpResult<Argument> {
        let [x, out] = args else {
            return Err(OpError::InputCount {
                op: NAME,
                expected: 2,
                actual: args.len(),
            });
        };
        let descriptor = match &self.descriptor {
            Some(descriptor) => Arc::clone(descriptor),
            None => ctx.activation_descriptor(ActivationMode::Elu, self.alpha),
        };

        let result = out.clone();
        match x.shape().dtype() {
            DType::Float32 => {
                result.map_from::<f32>(x, |v| descriptor.apply(f64::from(v)) as f32)?;
            }
            DType::Float64 => result.map_from::<f64>(x, |v| descriptor.apply(v))?,
            other => {
                return Err(OpError::config(
                    NAME,
                    format!("unsupported element type {other}"),
                ))
            }
        }
        Ok(result)
    }

    fn output_alias(&self, inputs: &[Shape]) -> Option<usize> {
        inputs.len().checked_sub(1)
    }
}

impl fmt::Display for Elu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NAME}[alpha={}]", self.alpha)
    }
}
