//! Raw byte storage and the structure overlay engine.
//!
//! This module owns the bytes of an input file and provides everything needed to look at them
//! through typed structures without copying them:
//!
//! - [`RawBuffer`] - the single source of truth: owned bytes plus bounds-checked,
//!   little-endian primitive accessors
//! - [`view`] - non-owning [`view::StructureView`] overlays and the memoized
//!   [`view::LazyStructure`] cell for nested structures
//! - [`rva`] - the [`rva::RvaTranslator`] seam which maps relative virtual addresses to file
//!   offsets, with a goblin-backed section table implementation
//! - [`image`] - [`image::PeImage`], a PE file opened through goblin whose data directories are
//!   exposed as overlay views
//!
//! # Backends
//!
//! A [`RawBuffer`] is backed either by memory handed over by the caller, or by a private
//! copy-on-write mapping of a file. Both backends support in-place mutation; neither grows.
//!
//! # Thread Safety
//!
//! [`RawBuffer`] is [`Send`] and [`Sync`]. Shared references can be read from many threads;
//! writes require `&mut RawBuffer`, so the exclusive-writer/shared-reader discipline is
//! enforced by the borrow checker rather than by locks.

pub mod image;
pub mod io;
pub mod rva;
pub mod view;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    file::io::{read_le_at, write_le_at, CilIO},
    Error::Empty,
    Result,
};
use memory::Memory;
use physical::Physical;

/// Backend for abstracting file and memory access.
///
/// Implemented by [`Memory`] (owned `Vec<u8>`) and [`Physical`] (copy-on-write file mapping).
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range does not lie within the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the full data buffer.
    fn data(&self) -> &[u8];

    /// Returns the full data buffer for in-place modification.
    fn data_mut(&mut self) -> &mut [u8];

    /// Returns the length of the data buffer.
    fn len(&self) -> usize;

    /// Consumes the backend and returns its bytes.
    fn into_data(self: Box<Self>) -> Vec<u8>;
}

/// The bytes of an input file, with bounds-checked primitive accessors.
///
/// Every accessor validates `offset + width <= len` before touching memory and reports a
/// violation as [`crate::Error::OutOfBounds`]. Multi-byte values are little-endian regardless
/// of the host. Writes never grow the buffer, and are visible to every view created afterwards.
///
/// # Examples
///
/// ```rust
/// use dotlens::RawBuffer;
///
/// let mut buffer = RawBuffer::from_mem(vec![0u8; 8])?;
/// buffer.write_u32(4, 0xDEAD_BEEF)?;
///
/// assert_eq!(buffer.read_u32(4)?, 0xDEAD_BEEF);
/// assert_eq!(buffer.read_u8(4)?, 0xEF);
/// assert!(buffer.read_u64(4).is_err());
/// # Ok::<(), dotlens::Error>(())
/// ```
pub struct RawBuffer {
    data: Box<dyn Backend>,
}

impl RawBuffer {
    /// Takes ownership of an in-memory byte buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if `data` is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<RawBuffer> {
        Self::load(Memory::new(data))
    }

    /// Maps a file from disk into a private, copy-on-write buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped, and
    /// [`crate::Error::Empty`] if it has no content.
    pub fn from_file(path: &Path) -> Result<RawBuffer> {
        if std::fs::metadata(path)?.len() == 0 {
            return Err(Empty);
        }

        Self::load(Physical::new(path)?)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<RawBuffer> {
        if data.len() == 0 {
            return Err(Empty);
        }

        Ok(RawBuffer {
            data: Box::new(data),
        })
    }

    /// Returns the length of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the full buffer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range does not fit into the buffer.
    pub fn data_slice(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let (Ok(start), Ok(count)) = (usize::try_from(offset), usize::try_from(len)) else {
            return Err(out_of_bounds_error!(offset, len, self.len()));
        };

        self.data.data_slice(start, count)
    }

    /// Returns true if `width` bytes at `offset` lie within the buffer.
    #[must_use]
    pub fn contains(&self, offset: u64, width: u64) -> bool {
        offset
            .checked_add(width)
            .is_some_and(|end| end <= self.len() as u64)
    }

    /// Consumes the buffer and returns its (possibly modified) bytes.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data.into_data()
    }

    /// Reads a little-endian value of any [`CilIO`] type at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `offset + size_of::<T>()` exceeds the buffer.
    pub fn read_le<T: CilIO>(&self, offset: u64) -> Result<T> {
        let mut cursor = self.cursor::<T>(offset)?;
        read_le_at(self.data.data(), &mut cursor)
    }

    /// Writes a little-endian value of any [`CilIO`] type at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `offset + size_of::<T>()` exceeds the buffer;
    /// nothing is written in that case.
    pub fn write_le<T: CilIO>(&mut self, offset: u64, value: T) -> Result<()> {
        let mut cursor = self.cursor::<T>(offset)?;
        write_le_at(self.data.data_mut(), &mut cursor, value)
    }

    fn cursor<T: CilIO>(&self, offset: u64) -> Result<usize> {
        let width = std::mem::size_of::<T>() as u64;
        if !self.contains(offset, width) {
            return Err(out_of_bounds_error!(offset, width, self.len()));
        }

        usize::try_from(offset).map_err(|_| out_of_bounds_error!(offset, width, self.len()))
    }

    /// Reads a `u8` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the byte lies outside the buffer.
    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        self.read_le(offset)
    }

    /// Reads a little-endian `u16` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit into the buffer.
    pub fn read_u16(&self, offset: u64) -> Result<u16> {
        self.read_le(offset)
    }

    /// Reads a little-endian `u32` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit into the buffer.
    pub fn read_u32(&self, offset: u64) -> Result<u32> {
        self.read_le(offset)
    }

    /// Reads a little-endian `u64` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit into the buffer.
    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        self.read_le(offset)
    }

    /// Writes a `u8` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the byte lies outside the buffer.
    pub fn write_u8(&mut self, offset: u64, value: u8) -> Result<()> {
        self.write_le(offset, value)
    }

    /// Writes a little-endian `u16` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit into the buffer.
    pub fn write_u16(&mut self, offset: u64, value: u16) -> Result<()> {
        self.write_le(offset, value)
    }

    /// Writes a little-endian `u32` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit into the buffer.
    pub fn write_u32(&mut self, offset: u64, value: u32) -> Result<()> {
        self.write_le(offset, value)
    }

    /// Writes a little-endian `u64` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit into the buffer.
    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.write_le(offset, value)
    }
}

impl std::fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBuffer").field("len", &self.len()).finish()
    }
}
