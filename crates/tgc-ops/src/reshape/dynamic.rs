//! Reshape over an input with one ranged axis.
//!
//! The ranged axis must map to a `0` or `-1` entry, which carries its range
//! through unchanged. Every other axis is fixed on both sides, and the
//! product of the fixed sizes must be conserved.

use smallvec::SmallVec;
use tgc_shape::{DynamicDimension, DynamicShape, Shape};
use tracing::debug;

use crate::error::{OpError, OpResult};

use super::NAME;

pub(super) fn dyn_compute_shape(dims: &[i64], input: &DynamicShape) -> OpResult<Shape> {
    let num_not_fixed = input.non_fixed_count();
    if num_not_fixed != 1 {
        return Err(OpError::config(
            NAME,
            format!("only one non-fixed dynamic dimension is supported, found {num_not_fixed}"),
        ));
    }
    if dims.len() != input.rank() {
        return Err(OpError::config(
            NAME,
            format!(
                "dims has {} entries but the dynamic input has {} axes",
                dims.len(),
                input.rank()
            ),
        ));
    }

    // products of the fixed portion on each side
    let input_fixed = input.fixed_elements();
    let mut output_fixed = 1usize;
    let mut infer = None;
    let mut out: SmallVec<[DynamicDimension; 4]> = SmallVec::with_capacity(dims.len());

    for (i, (dd, &dim)) in input.dims().iter().zip(dims).enumerate() {
        if !dd.is_fixed() {
            if dim != 0 && dim != -1 {
                return Err(OpError::config(
                    NAME,
                    format!(
                        "non-fixed dynamic dimension at axis {i} must map to 0 or -1, got {dim}"
                    ),
                ));
            }
            out.push(*dd);
            continue;
        }

        let len = match dim {
            0 => dd.min,
            -1 => {
                infer = Some(i);
                out.push(DynamicDimension::fixed(1));
                continue;
            }
            d if d > 0 => usize::try_from(d)
                .map_err(|_| OpError::config(NAME, format!("dimension {d} is too large")))?,
            d => {
                return Err(OpError::config(
                    NAME,
                    format!("invalid dimension {d} at axis {i}"),
                ))
            }
        };
        output_fixed = output_fixed.checked_mul(len).ok_or_else(overflow)?;
        out.push(DynamicDimension::fixed(len));
    }

    if let Some(slot) = infer {
        if output_fixed == 0 {
            return Err(OpError::config(
                NAME,
                "cannot infer a -1 dimension alongside a zero-sized dimension",
            ));
        }
        let missing = input_fixed / output_fixed;
        output_fixed = output_fixed.checked_mul(missing).ok_or_else(overflow)?;
        out[slot] = DynamicDimension::fixed(missing);
    }

    if output_fixed != input_fixed {
        return Err(OpError::ShapeMismatch {
            op: NAME,
            quantity: "fixed elements",
            input: input_fixed,
            output: output_fixed,
        });
    }

    let shape = DynamicShape::new(input.dtype(), out);
    debug!(input = %input, output = %shape, "resolved dynamic reshape");
    Ok(Shape::Dynamic(shape))
}

fn overflow() -> OpError {
    OpError::config(NAME, "fixed element count of dims overflows")
}
