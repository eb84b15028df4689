//! Typed, shaped views over raw storage.
//!
//! An [`Argument`] pairs a [`StaticShape`] with a byte buffer shared through
//! an `Arc`. Several arguments may view the same storage under different
//! shapes; that is how zero-copy reshapes and output aliases are expressed.
//! Writes go to the shared storage, so every view over it observes them.
//! Element offsets in the shape are relative to the argument's own `offset`
//! into the storage.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::RwLock;
use tgc_shape::{DType, StaticShape};

use crate::error::{OpError, OpResult};

/// Rust scalar types that map onto a [`DType`].
pub trait Element: Pod {
    /// The matching element type.
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DType = DType::$dtype;
        })*
    };
}

impl_element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}

/// A shaped buffer.
#[derive(Clone)]
pub struct Argument {
    shape: StaticShape,
    storage: Arc<RwLock<Vec<u8>>>,
    /// First element of this view, in elements.
    offset: usize,
}

impl Argument {
    /// Allocates zero-filled storage for `shape`.
    #[must_use]
    pub fn zeroed(shape: StaticShape) -> Self {
        let bytes = shape.element_space() * shape.dtype().size_bytes();
        Self {
            shape,
            storage: Arc::new(RwLock::new(vec![0; bytes])),
            offset: 0,
        }
    }

    /// Copies `data` into new storage laid out by `shape`.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` does not match the shape's element type or
    /// `data` is too short for the shape's strides.
    pub fn from_slice<T: Element>(shape: StaticShape, data: &[T]) -> OpResult<Self> {
        check_dtype(shape.dtype(), T::DTYPE)?;
        Self::from_bytes(shape, bytemuck::cast_slice(data).to_vec())
    }

    /// Copies `data` into a standard-layout argument with the given lens.
    ///
    /// # Errors
    ///
    /// Returns an error if `data.len()` differs from the element count.
    pub fn from_vec<T: Element>(lens: &[usize], data: &[T]) -> OpResult<Self> {
        let shape = StaticShape::standard(T::DTYPE, lens.iter().copied());
        if data.len() != shape.elements() {
            return Err(OpError::StorageTooSmall {
                required: shape.elements(),
                available: data.len(),
            });
        }
        Self::from_slice(shape, data)
    }

    /// Wraps raw bytes laid out by `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::StorageTooSmall`] if the bytes cannot hold every
    /// element the shape addresses.
    pub fn from_bytes(shape: StaticShape, bytes: Vec<u8>) -> OpResult<Self> {
        let available = bytes.len() / shape.dtype().size_bytes();
        let required = shape.element_space();
        if available < required {
            return Err(OpError::StorageTooSmall {
                required,
                available,
            });
        }
        Ok(Self {
            shape,
            storage: Arc::new(RwLock::new(bytes)),
            offset: 0,
        })
    }

    /// Returns the shape of this view.
    #[must_use]
    pub fn shape(&self) -> &StaticShape {
        &self.shape
    }

    /// Returns true if both arguments view the same storage.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Views the same storage under another shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the element types differ or the new shape
    /// addresses past the end of the storage.
    pub fn view(&self, shape: StaticShape) -> OpResult<Self> {
        check_dtype(self.shape.dtype(), shape.dtype())?;
        let available = self.capacity();
        if shape.element_space() > available {
            return Err(OpError::StorageTooSmall {
                required: shape.element_space(),
                available,
            });
        }
        Ok(Self {
            shape,
            storage: Arc::clone(&self.storage),
            offset: self.offset,
        })
    }

    /// Bytes of every element, packed in logical row-major order.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let width = self.shape.dtype().size_bytes();
        let data = self.storage.read();
        let mut packed = Vec::with_capacity(self.shape.elements() * width);
        for idx in self.shape.offsets() {
            let start = (self.offset + idx) * width;
            packed.extend_from_slice(&data[start..start + width]);
        }
        packed
    }

    /// Reads every element in logical row-major order.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::DTypeMismatch`] if `T` does not match.
    pub fn to_vec<T: Element>(&self) -> OpResult<Vec<T>> {
        check_dtype(self.shape.dtype(), T::DTYPE)?;
        let width = self.shape.dtype().size_bytes();
        let data = self.storage.read();
        Ok(self
            .shape
            .offsets()
            .map(|idx| {
                let start = (self.offset + idx) * width;
                bytemuck::pod_read_unaligned(&data[start..start + width])
            })
            .collect())
    }

    /// Copies `input` element-for-element, in logical order, into fresh
    /// storage laid out by `shape`.
    ///
    /// # Errors
    ///
    /// Returns an error if the element types or counts differ.
    pub fn materialize(shape: StaticShape, input: &Self) -> OpResult<Self> {
        let result = Self::zeroed(shape);
        result.copy_from(input)?;
        Ok(result)
    }

    /// Overwrites this argument's elements with `input`'s, in logical
    /// order. Every view sharing this storage observes the write.
    ///
    /// # Errors
    ///
    /// Returns an error if the element types or counts differ.
    pub fn copy_from(&self, input: &Self) -> OpResult<()> {
        check_dtype(self.shape.dtype(), input.shape.dtype())?;
        check_count(input.shape.elements(), self.shape.elements())?;
        // read fully before locking for write: input may share this storage
        let packed = input.to_bytes();
        let width = self.shape.dtype().size_bytes();
        self.scatter(packed.chunks_exact(width));
        Ok(())
    }

    /// Applies `f` to every element of `input`, writing results into this
    /// argument in logical order.
    ///
    /// # Errors
    ///
    /// Returns an error if either argument is not of type `T` or the element
    /// counts differ.
    pub fn map_from<T: Element>(&self, input: &Self, f: impl Fn(T) -> T) -> OpResult<()> {
        let values = input.to_vec::<T>()?;
        check_dtype(self.shape.dtype(), T::DTYPE)?;
        check_count(values.len(), self.shape.elements())?;
        let results: Vec<T> = values.into_iter().map(f).collect();
        self.scatter(bytemuck::cast_slice::<T, u8>(&results).chunks_exact(T::DTYPE.size_bytes()));
        Ok(())
    }

    /// Writes one element-sized chunk per logical position.
    fn scatter<'a>(&self, chunks: impl Iterator<Item = &'a [u8]>) {
        let width = self.shape.dtype().size_bytes();
        let mut data = self.storage.write();
        for (chunk, idx) in chunks.zip(self.shape.offsets()) {
            let start = (self.offset + idx) * width;
            data[start..start + width].copy_from_slice(chunk);
        }
    }

    fn capacity(&self) -> usize {
        self.storage.read().len() / self.shape.dtype().size_bytes() - self.offset
    }
}

fn check_dtype(expected: DType, actual: DType) -> OpResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(OpError::DTypeMismatch {
            op: "argument",
            expected,
            actual,
        })
    }
}

fn check_count(required: usize, available: usize) -> OpResult<()> {
    if required == available {
        Ok(())
    } else {
        Err(OpError::StorageTooSmall {
            required,
            available,
        })
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Argument")
            .field("shape", &self.shape.to_string())
            .field("bytes", &self.storage.read().len())
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_roundtrip() {
        let arg = Argument::from_vec(&[2, 3], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert!(arg.shape().is_standard());
        assert_eq!(arg.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_vec_wrong_length() {
        let err = Argument::from_vec(&[2, 3], &[1i32, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            OpError::StorageTooSmall {
                required: 6,
                available: 3
            }
        );
    }

    #[test]
    fn test_dtype_checked() {
        let arg = Argument::from_vec(&[2], &[1i64, 2]).unwrap();
        assert!(matches!(
            arg.to_vec::<f64>(),
            Err(OpError::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_strided_read_is_logical_order() {
        // [[0, 1, 2], [3, 4, 5]] stored column-major
        let shape = StaticShape::with_strides(DType::Int32, [2, 3], [1, 2]).unwrap();
        let arg = Argument::from_slice(shape, &[0i32, 3, 1, 4, 2, 5]).unwrap();
        assert_eq!(arg.to_vec::<i32>().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_view_shares_storage() {
        let arg = Argument::from_vec(&[2, 3], &[0u8, 1, 2, 3, 4, 5]).unwrap();
        let view = arg
            .view(StaticShape::standard(DType::UInt8, [3, 2]))
            .unwrap();
        assert!(view.shares_storage(&arg));
        assert_eq!(view.to_vec::<u8>().unwrap(), vec![0, 1, 2, 3, 4, 5]);

        let too_big = arg.view(StaticShape::standard(DType::UInt8, [7]));
        assert!(matches!(too_big, Err(OpError::StorageTooSmall { .. })));
    }

    #[test]
    fn test_materialize_compacts_strided_input() {
        let shape = StaticShape::with_strides(DType::Float64, [2, 2], [4, 1]).unwrap();
        let input = Argument::from_slice(shape, &[1.0f64, 2.0, -1.0, -1.0, 3.0, 4.0]).unwrap();
        let out = Argument::materialize(StaticShape::standard(DType::Float64, [4]), &input)
            .unwrap();
        assert!(!out.shares_storage(&input));
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_copy_from_writes_through_shared_storage() {
        let source = Argument::from_vec(&[3], &[7u16, 8, 9]).unwrap();
        let target = Argument::from_vec(&[3], &[0u16, 0, 0]).unwrap();
        let alias = target.clone();
        target.copy_from(&source).unwrap();
        assert!(alias.shares_storage(&target));
        assert_eq!(alias.to_vec::<u16>().unwrap(), vec![7, 8, 9]);
        assert_eq!(source.to_vec::<u16>().unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_map_from_in_place() {
        let arg = Argument::from_vec(&[4], &[1i32, -2, 3, -4]).unwrap();
        arg.map_from::<i32>(&arg.clone(), i32::abs).unwrap();
        assert_eq!(arg.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_to_bytes_packs_strided_view() {
        let shape = StaticShape::with_strides(DType::UInt8, [2, 2], [1, 2]).unwrap();
        let arg = Argument::from_slice(shape, &[0u8, 2, 1, 3]).unwrap();
        assert_eq!(arg.to_bytes(), vec![0, 1, 2, 3]);
    }
}
