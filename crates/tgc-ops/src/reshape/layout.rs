//! Layout aliasing for reshape.
//!
//! Given a non-standard input layout (lens `I`, strides `S`) and target
//! lens `R` with the same element count, [`alias_strides`] computes strides
//! `S'` such that walking `R` in row-major order touches the same storage
//! offsets, in the same order, as walking `I` with `S`. The output is then a
//! view over the input storage.
//!
//! ## Algorithm
//!
//! Two cursors walk `I` and `R`:
//!
//! ```text
//! I = [2, 3, 4]  S = [24, 4, 1]
//! R = [2, 3, 2, 2]
//!
//! R[0] == I[0]            equal:     S'[0] = 24
//! R[1] == I[1]            equal:     S'[1] = 4
//! R[2] <  I[2]            unsqueeze: 4 -> [2, 2], S'[2..4] = [2, 1]
//! ```
//!
//! - **Equal** carries the stride.
//! - **Squeeze** (`R[r] > I[i]`) merges the minimal run of input axes whose
//!   product is `R[r]`. The run must be contiguous within itself; the merged
//!   stride is that of its innermost non-unit axis. A run that reaches the
//!   last input axis is rejected.
//! - **Unsqueeze** (`R[r] < I[i]`) splits `I[i]` over the minimal run of
//!   output axes whose product is `I[i]`, row-major.
//!
//! Trailing output axes left over once the input is exhausted are unit axes
//! and take the last produced stride.

use smallvec::SmallVec;
use tgc_shape::{StaticShape, Strides};
use tracing::trace;

/// Why a layout could not be aliased.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AliasFailure {
    /// No run of input axes starting at `axis` multiplies to `target`.
    #[error("no run of input axes from axis {axis} has exactly {target} elements")]
    NoSqueezeRun {
        /// First input axis of the attempted run.
        axis: usize,
        /// The output axis size to reach.
        target: usize,
    },

    /// A squeeze run covered every remaining input axis.
    #[error("merging input axes {start}..={end} into {target} consumes every remaining axis")]
    SqueezeConsumesAll {
        /// First input axis of the run.
        start: usize,
        /// Last input axis of the run.
        end: usize,
        /// The merged size.
        target: usize,
    },

    /// The input axes of a squeeze run are not laid out contiguously.
    #[error("input axes {start}..={end} are not contiguous and cannot be merged")]
    NonContiguousRun {
        /// First input axis of the run.
        start: usize,
        /// Last input axis of the run.
        end: usize,
    },

    /// No run of output axes starting at `axis` multiplies to `target`.
    #[error("no run of output axes from axis {axis} has exactly {target} elements")]
    NoUnsqueezeRun {
        /// First output axis of the attempted run.
        axis: usize,
        /// The input axis size to split.
        target: usize,
    },

    /// The walk ended without a stride for every output axis.
    #[error("resolved {produced} of {expected} output strides")]
    Incomplete {
        /// Strides produced.
        produced: usize,
        /// Output rank.
        expected: usize,
    },
}

/// Attempts to view `input` as `rdims` without copying.
///
/// Standard inputs (and inputs with no elements) always succeed with a
/// standard result; otherwise the strides come from [`alias_strides`].
///
/// # Errors
///
/// Returns the [`AliasFailure`] from [`alias_strides`].
pub fn reshape_dims(input: &StaticShape, rdims: &[usize]) -> Result<StaticShape, AliasFailure> {
    if input.is_standard() || input.elements() == 0 {
        return Ok(StaticShape::standard(input.dtype(), rdims.iter().copied()));
    }
    let rstrides = alias_strides(input.lens(), input.strides(), rdims)?;
    StaticShape::with_strides(input.dtype(), rdims.iter().copied(), rstrides).map_err(|_| {
        AliasFailure::Incomplete {
            produced: 0,
            expected: rdims.len(),
        }
    })
}

/// Computes output strides that alias `lens`/`strides` as `rdims`.
///
/// The caller guarantees `product(lens) == product(rdims)`.
///
/// # Errors
///
/// Returns an [`AliasFailure`] naming the first axis with no exact
/// squeeze/unsqueeze decomposition.
pub fn alias_strides(
    lens: &[usize],
    strides: &[usize],
    rdims: &[usize],
) -> Result<Strides, AliasFailure> {
    let mut rstrides: Strides = SmallVec::with_capacity(rdims.len());
    let mut i = 0;
    let mut r = 0;

    while i < lens.len() && r < rdims.len() {
        let idim = lens[i];
        let rdim = rdims[r];

        if rdim == idim {
            trace!(i, r, stride = strides[i], "carry stride");
            rstrides.push(strides[i]);
        } else if rdim > idim {
            let end = i + run_end(&lens[i..], rdim).ok_or(AliasFailure::NoSqueezeRun {
                axis: i,
                target: rdim,
            })?;
            if end + 1 == lens.len() {
                return Err(AliasFailure::SqueezeConsumesAll {
                    start: i,
                    end,
                    target: rdim,
                });
            }
            let stride = merged_stride(&lens[i..=end], &strides[i..=end])
                .ok_or(AliasFailure::NonContiguousRun { start: i, end })?;
            trace!(start = i, end, r, stride, "squeeze");
            rstrides.push(stride);
            i = end;
        } else {
            let end = r + run_end(&rdims[r..], idim).ok_or(AliasFailure::NoUnsqueezeRun {
                axis: r,
                target: idim,
            })?;
            let first = rstrides.len();
            let mut stride = strides[i];
            for &dim in rdims[r..=end].iter().rev() {
                rstrides.push(stride);
                stride *= dim;
            }
            rstrides[first..].reverse();
            trace!(i, start = r, end, "unsqueeze");
            r = end;
        }
        i += 1;
        r += 1;
    }

    // trailing unit axes
    if let Some(&last) = rstrides.last() {
        rstrides.resize(rdims.len().max(rstrides.len()), last);
    }

    if rstrides.len() != rdims.len() {
        return Err(AliasFailure::Incomplete {
            produced: rstrides.len(),
            expected: rdims.len(),
        });
    }
    Ok(rstrides)
}

/// Index of the last axis in the minimal prefix of `dims` whose product is
/// exactly `target`.
fn run_end(dims: &[usize], target: usize) -> Option<usize> {
    let mut product = 1usize;
    for (n, &dim) in dims.iter().enumerate() {
        product = product.checked_mul(dim)?;
        if product == target {
            return Some(n);
        }
        if product > target {
            return None;
        }
    }
    None
}

/// Stride of the merged axis if the run is contiguous within itself.
fn merged_stride(lens: &[usize], strides: &[usize]) -> Option<usize> {
    let (_, &inner) = lens
        .iter()
        .zip(strides)
        .rev()
        .find(|(len, _)| **len != 1)?;
    let mut span = 1usize;
    for (&len, &stride) in lens.iter().zip(strides).rev() {
        if len != 1 && stride != inner.checked_mul(span)? {
            return None;
        }
        span = span.checked_mul(len)?;
    }
    Some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_shape::DType;

    fn shape(lens: &[usize], strides: &[usize]) -> StaticShape {
        StaticShape::with_strides(DType::Float32, lens.iter().copied(), strides.iter().copied())
            .unwrap()
    }

    fn offsets(s: &StaticShape) -> Vec<usize> {
        s.offsets().collect()
    }

    #[test]
    fn test_standard_input_shortcut() {
        let input = StaticShape::standard(DType::Float32, [2, 3, 4]);
        let out = reshape_dims(&input, &[6, 4]).unwrap();
        assert!(out.is_standard());
        assert_eq!(out.lens(), &[6, 4]);
    }

    #[test]
    fn test_equal_axes_carry_strides() {
        let input = shape(&[2, 3], &[8, 2]);
        let strides = alias_strides(input.lens(), input.strides(), &[2, 3]).unwrap();
        assert_eq!(strides.as_slice(), &[8, 2]);
    }

    #[test]
    fn test_unsqueeze_splits_row_major() {
        let input = shape(&[2, 3, 4], &[24, 4, 1]);
        let out = reshape_dims(&input, &[2, 3, 2, 2]).unwrap();
        assert_eq!(out.strides(), &[24, 4, 2, 1]);
        assert_eq!(offsets(&out), offsets(&input));
    }

    #[test]
    fn test_unsqueeze_outer_padded_axis() {
        // 6 rows of 4, each row padded to 5
        let input = shape(&[6, 4], &[5, 1]);
        let out = reshape_dims(&input, &[2, 3, 4]).unwrap();
        assert_eq!(out.strides(), &[15, 5, 1]);
        assert_eq!(offsets(&out), offsets(&input));
    }

    #[test]
    fn test_squeeze_contiguous_run() {
        // outer axis padded, inner two axes packed, trailing unit axis
        let input = shape(&[2, 3, 4, 1], &[24, 4, 1, 1]);
        let out = reshape_dims(&input, &[2, 12, 1]).unwrap();
        assert_eq!(out.strides(), &[24, 1, 1]);
        assert_eq!(offsets(&out), offsets(&input));
    }

    #[test]
    fn test_squeeze_consuming_all_axes_is_rejected() {
        let input = shape(&[2, 3, 4], &[24, 4, 1]);
        let err = reshape_dims(&input, &[2, 12]).unwrap_err();
        assert_eq!(
            err,
            AliasFailure::SqueezeConsumesAll {
                start: 1,
                end: 2,
                target: 12
            }
        );
    }

    #[test]
    fn test_squeeze_transposed_run_is_rejected() {
        let input = shape(&[2, 3, 1], &[1, 2, 1]);
        let err = reshape_dims(&input, &[6, 1]).unwrap_err();
        assert_eq!(err, AliasFailure::NonContiguousRun { start: 0, end: 1 });
    }

    #[test]
    fn test_squeeze_without_exact_run() {
        let input = shape(&[2, 3, 4], &[1, 2, 6]);
        let err = alias_strides(input.lens(), input.strides(), &[4, 6]).unwrap_err();
        assert_eq!(err, AliasFailure::NoSqueezeRun { axis: 0, target: 4 });
    }

    #[test]
    fn test_unsqueeze_without_exact_run() {
        let input = shape(&[6, 4], &[1, 6]);
        let err = alias_strides(input.lens(), input.strides(), &[4, 6]).unwrap_err();
        assert_eq!(err, AliasFailure::NoUnsqueezeRun { axis: 0, target: 6 });
    }

    #[test]
    fn test_trailing_unit_axes_extend_last_stride() {
        let input = shape(&[3, 2], &[4, 1]);
        let out = reshape_dims(&input, &[3, 2, 1, 1]).unwrap();
        assert_eq!(out.strides(), &[4, 1, 1, 1]);
        assert_eq!(offsets(&out), offsets(&input));
    }

    #[test]
    fn test_unit_axis_with_arbitrary_stride_inside_run() {
        let input = shape(&[2, 1, 3, 5], &[40, 99, 5, 1]);
        let out = reshape_dims(&input, &[2, 3, 5]).unwrap();
        assert_eq!(offsets(&out), offsets(&input));
    }

    #[test]
    fn test_empty_input_is_trivially_aliased() {
        let input = shape(&[0, 3], &[7, 1]);
        let out = reshape_dims(&input, &[3, 0]).unwrap();
        assert!(out.is_standard());
    }
}
