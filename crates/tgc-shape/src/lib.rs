//! # TGC Shape
//!
//! This crate defines the value types every operator in the tensor graph
//! compiler reasons about when it infers output shapes: element types,
//! per-axis sizes, per-axis strides, and size ranges for axes that are only
//! known at run time.
//!
//! ## Overview
//!
//! A [`Shape`] is either:
//!
//! - **Static** ([`StaticShape`]): every axis has a fixed size and a stride.
//!   Strides are counted in elements, not bytes.
//! - **Dynamic** ([`DynamicShape`]): at least one axis is a range
//!   `[min, max]`. Dynamic shapes carry no strides; their layout is decided
//!   once concrete sizes are known.
//!
//! ## Standard Layout
//!
//! A static shape is *standard* when its strides equal the canonical
//! row-major strides for its lens:
//!
//! ```text
//! lens    = [2, 3, 4]
//! strides = [12, 4, 1]   <- standard
//! strides = [24, 4, 1]   <- padded outer axis, not standard
//! strides = [1, 2, 6]    <- transposed, not standard
//! ```
//!
//! ## Main Types
//!
//! - [`DType`]: Element types
//! - [`DynamicDimension`]: A fixed or ranged axis size
//! - [`StaticShape`]: Lens plus strides
//! - [`DynamicShape`]: Per-axis ranges
//! - [`Shape`]: Either of the above

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Per-axis sizes of a static shape.
pub type Lens = SmallVec<[usize; 4]>;

/// Per-axis strides of a static shape, in elements.
pub type Strides = SmallVec<[usize; 4]>;

/// Tensor element types.
///
/// Opaque to shape inference beyond their byte width, which the buffer
/// layer needs to turn element offsets into byte offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Boolean (1 byte).
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 16-bit floating point (half precision).
    Float16,
    /// 32-bit floating point (single precision).
    Float32,
    /// 64-bit floating point (double precision).
    Float64,
    /// Brain floating point (bfloat16).
    BFloat16,
}

impl DType {
    /// Returns the size in bytes of this dtype.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Returns true if this is a floating-point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Float16 | Self::Float32 | Self::Float64 | Self::BFloat16
        )
    }

    /// Returns the short name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float16 => "half",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::BFloat16 => "bf16",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The size of one axis: a single fixed value, or a range `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DimensionRange")]
pub struct DynamicDimension {
    /// Smallest size the axis can take.
    pub min: usize,
    /// Largest size the axis can take.
    pub max: usize,
}

#[derive(Deserialize)]
struct DimensionRange {
    min: usize,
    max: usize,
}

impl TryFrom<DimensionRange> for DynamicDimension {
    type Error = ShapeError;

    fn try_from(range: DimensionRange) -> Result<Self, Self::Error> {
        Self::new(range.min, range.max)
    }
}

impl DynamicDimension {
    /// Creates a ranged dimension.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidRange`] if `min > max`.
    pub fn new(min: usize, max: usize) -> Result<Self, ShapeError> {
        if min > max {
            return Err(ShapeError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Creates a dimension fixed at `n`.
    #[must_use]
    pub const fn fixed(n: usize) -> Self {
        Self { min: n, max: n }
    }

    /// Returns true if the range holds exactly one value.
    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    /// Returns true if `n` lies within the range.
    #[must_use]
    pub const fn contains(&self, n: usize) -> bool {
        self.min <= n && n <= self.max
    }
}

impl fmt::Display for DynamicDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fixed() {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{{{}, {}}}", self.min, self.max)
        }
    }
}

/// Computes canonical row-major strides (in elements) for `lens`.
///
/// The rightmost axis has stride 1; each axis to its left advances by the
/// product of all lens to its right.
#[must_use]
pub fn standard_strides(lens: &[usize]) -> Strides {
    let mut strides: Strides = SmallVec::with_capacity(lens.len());
    let mut stride = 1usize;
    for &len in lens.iter().rev() {
        strides.push(stride);
        stride *= len;
    }
    strides.reverse();
    strides
}

/// A shape whose every axis has a known size and stride.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StaticShapeParts")]
pub struct StaticShape {
    dtype: DType,
    lens: Lens,
    strides: Strides,
}

#[derive(Deserialize)]
struct StaticShapeParts {
    dtype: DType,
    lens: Lens,
    strides: Strides,
}

impl TryFrom<StaticShapeParts> for StaticShape {
    type Error = ShapeError;

    fn try_from(parts: StaticShapeParts) -> Result<Self, Self::Error> {
        Self::with_strides(parts.dtype, parts.lens, parts.strides)
    }
}

impl StaticShape {
    /// Creates a shape in standard (contiguous row-major) layout.
    #[must_use]
    pub fn standard(dtype: DType, lens: impl IntoIterator<Item = usize>) -> Self {
        let lens: Lens = lens.into_iter().collect();
        let strides = standard_strides(&lens);
        Self {
            dtype,
            lens,
            strides,
        }
    }

    /// Creates a shape with explicit strides.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::StrideRankMismatch`] if `lens` and `strides`
    /// differ in length.
    pub fn with_strides(
        dtype: DType,
        lens: impl IntoIterator<Item = usize>,
        strides: impl IntoIterator<Item = usize>,
    ) -> Result<Self, ShapeError> {
        let lens: Lens = lens.into_iter().collect();
        let strides: Strides = strides.into_iter().collect();
        if lens.len() != strides.len() {
            return Err(ShapeError::StrideRankMismatch {
                lens: lens.len(),
                strides: strides.len(),
            });
        }
        Ok(Self {
            dtype,
            lens,
            strides,
        })
    }

    /// Creates a rank-0 shape holding one element.
    #[must_use]
    pub fn scalar(dtype: DType) -> Self {
        Self::standard(dtype, [])
    }

    /// Returns the element type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the per-axis sizes.
    #[must_use]
    pub fn lens(&self) -> &[usize] {
        &self.lens
    }

    /// Returns the per-axis strides, in elements.
    #[must_use]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Returns the rank (number of axes).
    #[must_use]
    pub fn rank(&self) -> usize {
        self.lens.len()
    }

    /// Returns the number of logical elements.
    #[must_use]
    pub fn elements(&self) -> usize {
        self.lens.iter().product()
    }

    /// Returns the number of bytes the logical elements occupy when packed.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.elements() * self.dtype.size_bytes()
    }

    /// Returns the number of storage elements a buffer must hold for every
    /// logical element of this shape to be addressable.
    #[must_use]
    pub fn element_space(&self) -> usize {
        if self.elements() == 0 {
            return 0;
        }
        self.lens
            .iter()
            .zip(&self.strides)
            .map(|(len, stride)| (len - 1) * stride)
            .sum::<usize>()
            + 1
    }

    /// Returns true if the strides are the canonical row-major strides for
    /// the lens.
    #[must_use]
    pub fn is_standard(&self) -> bool {
        self.strides == standard_strides(&self.lens)
    }

    /// Returns the same lens in standard layout.
    #[must_use]
    pub fn to_standard(&self) -> Self {
        Self::standard(self.dtype, self.lens.iter().copied())
    }

    /// Returns the storage offset of a multi-index, or `None` if the index
    /// has the wrong rank or is out of bounds.
    #[must_use]
    pub fn index(&self, idx: &[usize]) -> Option<usize> {
        if idx.len() != self.rank() {
            return None;
        }
        let mut offset = 0;
        for ((&i, &len), &stride) in idx.iter().zip(&self.lens).zip(&self.strides) {
            if i >= len {
                return None;
            }
            offset += i * stride;
        }
        Some(offset)
    }

    /// Iterates the storage offset of every element in logical row-major
    /// order (rightmost axis fastest).
    #[must_use]
    pub fn offsets(&self) -> Offsets<'_> {
        Offsets {
            shape: self,
            coords: SmallVec::from_elem(0, self.rank()),
            offset: 0,
            remaining: self.elements(),
        }
    }
}

impl fmt::Display for StaticShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {{{}}}, {{{}}}",
            self.dtype,
            join(&self.lens),
            join(&self.strides)
        )
    }
}

/// Iterator over storage offsets of a [`StaticShape`] in logical order.
#[derive(Debug, Clone)]
pub struct Offsets<'a> {
    shape: &'a StaticShape,
    coords: SmallVec<[usize; 4]>,
    offset: usize,
    remaining: usize,
}

impl Iterator for Offsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.offset;
        self.remaining -= 1;
        if self.remaining > 0 {
            // odometer step: bump the innermost axis, carry outward
            for axis in (0..self.coords.len()).rev() {
                let stride = self.shape.strides[axis];
                self.coords[axis] += 1;
                self.offset += stride;
                if self.coords[axis] < self.shape.lens[axis] {
                    break;
                }
                self.offset -= self.coords[axis] * stride;
                self.coords[axis] = 0;
            }
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Offsets<'_> {}

/// A shape with at least one axis whose size is a range.
///
/// Carries no strides: layout is decided once sizes are concrete.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DynamicShape {
    dtype: DType,
    dims: SmallVec<[DynamicDimension; 4]>,
}

impl DynamicShape {
    /// Creates a dynamic shape.
    #[must_use]
    pub fn new(dtype: DType, dims: impl IntoIterator<Item = DynamicDimension>) -> Self {
        Self {
            dtype,
            dims: dims.into_iter().collect(),
        }
    }

    /// Returns the element type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the per-axis size ranges.
    #[must_use]
    pub fn dims(&self) -> &[DynamicDimension] {
        &self.dims
    }

    /// Returns the rank (number of axes).
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns how many axes are not fixed.
    #[must_use]
    pub fn non_fixed_count(&self) -> usize {
        self.dims.iter().filter(|d| !d.is_fixed()).count()
    }

    /// Returns the product of the fixed axes only.
    #[must_use]
    pub fn fixed_elements(&self) -> usize {
        self.dims
            .iter()
            .filter(|d| d.is_fixed())
            .map(|d| d.min)
            .product()
    }

    /// Returns the smallest lens every axis can take.
    #[must_use]
    pub fn min_lens(&self) -> Lens {
        self.dims.iter().map(|d| d.min).collect()
    }

    /// Returns the largest lens every axis can take.
    #[must_use]
    pub fn max_lens(&self) -> Lens {
        self.dims.iter().map(|d| d.max).collect()
    }

    /// Returns true if `lens` is a valid instantiation of this shape.
    #[must_use]
    pub fn accepts(&self, lens: &[usize]) -> bool {
        lens.len() == self.rank() && self.dims.iter().zip(lens).all(|(d, &n)| d.contains(n))
    }

    /// Instantiates this shape at concrete lens in standard layout.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::RankMismatch`] or [`ShapeError::OutOfRange`] if
    /// `lens` does not fit the ranges.
    pub fn to_static(&self, lens: &[usize]) -> Result<StaticShape, ShapeError> {
        if lens.len() != self.rank() {
            return Err(ShapeError::RankMismatch {
                expected: self.rank(),
                actual: lens.len(),
            });
        }
        for (axis, (dim, &len)) in self.dims.iter().zip(lens).enumerate() {
            if !dim.contains(len) {
                return Err(ShapeError::OutOfRange {
                    axis,
                    len,
                    min: dim.min,
                    max: dim.max,
                });
            }
        }
        Ok(StaticShape::standard(self.dtype, lens.iter().copied()))
    }
}

impl fmt::Display for DynamicShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {{{}}}", self.dtype, join(&self.dims))
    }
}

/// A tensor shape: static (fixed lens with strides) or dynamic (ranges).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Every axis fixed, with strides.
    Static(StaticShape),
    /// At least one ranged axis, no strides.
    Dynamic(DynamicShape),
}

impl Shape {
    /// Creates a standard-layout static shape.
    #[must_use]
    pub fn from_lens(dtype: DType, lens: impl IntoIterator<Item = usize>) -> Self {
        Self::Static(StaticShape::standard(dtype, lens))
    }

    /// Creates a static shape with explicit strides.
    ///
    /// # Errors
    ///
    /// See [`StaticShape::with_strides`].
    pub fn with_strides(
        dtype: DType,
        lens: impl IntoIterator<Item = usize>,
        strides: impl IntoIterator<Item = usize>,
    ) -> Result<Self, ShapeError> {
        StaticShape::with_strides(dtype, lens, strides).map(Self::Static)
    }

    /// Creates a shape from per-axis ranges.
    ///
    /// Collapses to a standard static shape when every range is fixed.
    #[must_use]
    pub fn from_dims(dtype: DType, dims: impl IntoIterator<Item = DynamicDimension>) -> Self {
        let shape = DynamicShape::new(dtype, dims);
        if shape.non_fixed_count() == 0 {
            Self::from_lens(dtype, shape.min_lens())
        } else {
            Self::Dynamic(shape)
        }
    }

    /// Returns the element type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Static(s) => s.dtype(),
            Self::Dynamic(d) => d.dtype(),
        }
    }

    /// Returns the rank (number of axes).
    #[must_use]
    pub fn rank(&self) -> usize {
        match self {
            Self::Static(s) => s.rank(),
            Self::Dynamic(d) => d.rank(),
        }
    }

    /// Returns true if any axis size is a range.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }

    /// Returns true for static shapes in standard layout.
    #[must_use]
    pub fn is_standard(&self) -> bool {
        match self {
            Self::Static(s) => s.is_standard(),
            Self::Dynamic(_) => false,
        }
    }

    /// Returns the element count, if every axis is fixed.
    #[must_use]
    pub fn elements(&self) -> Option<usize> {
        match self {
            Self::Static(s) => Some(s.elements()),
            Self::Dynamic(_) => None,
        }
    }

    /// Returns the static shape, if this is one.
    #[must_use]
    pub fn as_static(&self) -> Option<&StaticShape> {
        match self {
            Self::Static(s) => Some(s),
            Self::Dynamic(_) => None,
        }
    }

    /// Returns the dynamic shape, if this is one.
    #[must_use]
    pub fn as_dynamic(&self) -> Option<&DynamicShape> {
        match self {
            Self::Static(_) => None,
            Self::Dynamic(d) => Some(d),
        }
    }

    /// Returns every axis as a range; fixed axes become `[n, n]`.
    #[must_use]
    pub fn dyn_dims(&self) -> SmallVec<[DynamicDimension; 4]> {
        match self {
            Self::Static(s) => s.lens().iter().map(|&n| DynamicDimension::fixed(n)).collect(),
            Self::Dynamic(d) => d.dims().iter().copied().collect(),
        }
    }
}

impl From<StaticShape> for Shape {
    fn from(shape: StaticShape) -> Self {
        Self::Static(shape)
    }
}

impl From<DynamicShape> for Shape {
    fn from(shape: DynamicShape) -> Self {
        Self::Dynamic(shape)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(s) => s.fmt(f),
            Self::Dynamic(d) => d.fmt(f),
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors constructing or instantiating shapes.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// Lens and strides have different lengths.
    #[error("shape has {lens} lens but {strides} strides")]
    StrideRankMismatch {
        /// Number of lens.
        lens: usize,
        /// Number of strides.
        strides: usize,
    },

    /// A dynamic dimension with `min > max`.
    #[error("invalid dynamic dimension: min {min} exceeds max {max}")]
    InvalidRange {
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },

    /// Concrete lens of the wrong rank.
    #[error("expected {expected} axes, got {actual}")]
    RankMismatch {
        /// Expected rank.
        expected: usize,
        /// Actual rank.
        actual: usize,
    },

    /// A concrete size outside its dynamic range.
    #[error("axis {axis} has size {len}, outside [{min}, {max}]")]
    OutOfRange {
        /// The offending axis.
        axis: usize,
        /// The concrete size.
        len: usize,
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },
}
