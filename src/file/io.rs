//! Low-level byte order and safe reading/writing utilities for PE and CLI structures.
//!
//! This module provides the endian-aware primitive codec every other layer builds on. All
//! structures this crate deals with are little-endian on disk, independent of the host byte
//! order, so only little-endian accessors exist.
//!
//! # Key Components
//!
//! - [`crate::file::io::CilIO`] - Trait converting primitive types to and from their little-endian bytes
//! - [`crate::file::io::read_le`] - Read a value from the start of a slice
//! - [`crate::file::io::read_le_at`] - Read a value at an offset and advance the offset
//! - [`crate::file::io::write_le_at`] - Write a value at an offset and advance the offset
//!
//! # Usage Examples
//!
//! ```rust
//! use dotlens::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 1u16)?;  // offset: 0 -> 2
//! write_le_at(&mut data, &mut offset, 2u32)?;  // offset: 2 -> 6
//!
//! let mut offset = 0;
//! assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 1);
//! assert_eq!(read_le_at::<u32>(&data, &mut offset)?, 2);
//! # Ok::<(), dotlens::Error>(())
//! ```
//!
//! # Error Handling
//!
//! Every function returns [`crate::Error::OutOfBounds`] if the slice cannot hold the value at
//! the requested offset. The offset is only advanced on success, and the offset arithmetic is
//! overflow checked.

use crate::Result;

/// Trait for primitive types that can be read from and written to little-endian bytes.
///
/// Each implementation defines a `Bytes` associated type holding the fixed-size byte array
/// for that type (e.g. `[u8; 4]` for `u32`).
pub trait CilIO: Sized + Copy {
    /// Fixed-size byte representation of the type
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Build a value from its little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Produce the little-endian bytes of a value
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty),*) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Returns the end of `width` bytes at `offset`, if they fit into `len` bytes.
pub(crate) fn checked_end(offset: usize, width: usize, len: usize) -> Option<usize> {
    offset.checked_add(width).filter(|end| *end <= len)
}

fn out_of_bounds(offset: usize, width: usize, len: usize) -> crate::Error {
    out_of_bounds_error!(offset as u64, width as u64, len)
}

/// Read a little-endian value from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a little-endian value at `offset`, advancing `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit at `offset`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = checked_end(*offset, type_len, data.len()) else {
        return Err(out_of_bounds(*offset, type_len, data.len()));
    };

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds(*offset, type_len, data.len()));
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Write a little-endian value at `offset`, advancing `offset` past it.
///
/// The slice is never grown; a value that does not fit is rejected before any byte is written.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit at `offset`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = checked_end(*offset, type_len, data.len()) else {
        return Err(out_of_bounds(*offset, type_len, data.len()));
    };

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;

    Ok(())
}
