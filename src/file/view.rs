//! Typed overlays over a [`RawBuffer`].
//!
//! A [`StructureView`] is a `(buffer, offset)` pair. It owns no bytes; every field accessor of a
//! typed structure is a bounds-checked read or write at `offset + delta` against the shared
//! buffer, so a modification through one view is immediately visible through every other view
//! over the same buffer.
//!
//! Views are generic over how they hold the buffer:
//!
//! - `StructureView<&RawBuffer>` - read-only, `Copy`, shareable across threads
//! - `StructureView<&mut RawBuffer>` - read-write, exclusive
//!
//! Typed structures implement [`Structure`], which fixes their size and provides the checked
//! [`Structure::resolve`] constructor used for every nested or lazily resolved structure.
//! [`LazyStructure`] memoizes such a resolution per parent instance.
//!
//! # Examples
//!
//! ```rust
//! use dotlens::{metadata::directory::DataDirectory, RawBuffer, Structure, StructureView};
//!
//! let mut buffer = RawBuffer::from_mem(vec![0u8; 16])?;
//!
//! let mut directory = DataDirectory::resolve(&mut buffer, 8)?;
//! directory.set_virtual_address(0x2000)?;
//! directory.set_size(0x48)?;
//!
//! let view = StructureView::new(&buffer, 8);
//! assert_eq!(view.read::<u32>(0)?, 0x2000);
//! assert_eq!(view.read::<u32>(4)?, 0x48);
//! # Ok::<(), dotlens::Error>(())
//! ```

use std::{
    borrow::{Borrow, BorrowMut},
    sync::OnceLock,
};

use crate::{file::io::CilIO, RawBuffer, Result};

/// A non-owning overlay of a structure at `offset` within a [`RawBuffer`].
///
/// Construction performs no validation; each field access is checked individually. Use
/// [`Structure::resolve`] when the whole structure has to be present.
#[derive(Debug, Clone, Copy)]
pub struct StructureView<B> {
    buffer: B,
    offset: u64,
}

impl<B: Borrow<RawBuffer>> StructureView<B> {
    /// Creates a view at `offset` within `buffer`.
    pub fn new(buffer: B, offset: u64) -> Self {
        StructureView { buffer, offset }
    }

    /// File offset at which the viewed structure starts.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The underlying buffer.
    #[must_use]
    pub fn buffer(&self) -> &RawBuffer {
        self.buffer.borrow()
    }

    /// Absolute offset of the field at `delta`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `offset + delta` overflows.
    pub fn field_offset(&self, delta: u64) -> Result<u64> {
        self.offset
            .checked_add(delta)
            .ok_or_else(|| out_of_bounds_error!(self.offset, delta, self.buffer().len()))
    }

    /// Reads the little-endian field at `delta`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn read<T: CilIO>(&self, delta: u64) -> Result<T> {
        self.buffer().read_le(self.field_offset(delta)?)
    }

    /// Returns true if `size` bytes starting at the view offset lie within the buffer.
    #[must_use]
    pub fn fits(&self, size: u64) -> bool {
        self.buffer().contains(self.offset, size)
    }

    /// Ensures that `size` bytes starting at the view offset lie within the buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] describing the whole region otherwise.
    pub fn ensure(&self, size: u64) -> Result<()> {
        if self.fits(size) {
            Ok(())
        } else {
            Err(out_of_bounds_error!(self.offset, size, self.buffer().len()))
        }
    }

    /// A read-only view at the same offset.
    #[must_use]
    pub fn reborrow(&self) -> StructureView<&RawBuffer> {
        StructureView::new(self.buffer(), self.offset)
    }

    /// A read-only view at `delta` bytes past this one.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the new offset overflows.
    pub fn at(&self, delta: u64) -> Result<StructureView<&RawBuffer>> {
        Ok(StructureView::new(self.buffer(), self.field_offset(delta)?))
    }
}

impl<B: BorrowMut<RawBuffer>> StructureView<B> {
    /// The underlying buffer, for modification.
    pub fn buffer_mut(&mut self) -> &mut RawBuffer {
        self.buffer.borrow_mut()
    }

    /// Writes the little-endian field at `delta`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer; nothing is
    /// written in that case.
    pub fn write<T: CilIO>(&mut self, delta: u64, value: T) -> Result<()> {
        let offset = self.field_offset(delta)?;
        self.buffer_mut().write_le(offset, value)
    }

    /// A writable view at the same offset.
    pub fn reborrow_mut(&mut self) -> StructureView<&mut RawBuffer> {
        let offset = self.offset;
        StructureView::new(self.buffer_mut(), offset)
    }
}

/// A typed structure laid over a [`StructureView`].
///
/// `SIZE` is the number of bytes the fixed part of the structure occupies. Variable-length
/// tails (such as the row counts after the tables stream header) are validated by the
/// structure itself when they are read.
pub trait Structure<B: Borrow<RawBuffer>>: Sized {
    /// Size of the fixed part of the structure in bytes
    const SIZE: u64;

    /// Wraps a view without validation.
    fn from_view(view: StructureView<B>) -> Self;

    /// The view this structure is laid over.
    fn view(&self) -> &StructureView<B>;

    /// File offset of the structure.
    fn offset(&self) -> u64 {
        self.view().offset()
    }

    /// Lays the structure over `buffer` at `offset`, requiring all `SIZE` bytes to be present.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the structure does not fit into the buffer.
    fn resolve(buffer: B, offset: u64) -> Result<Self> {
        let view = StructureView::new(buffer, offset);
        view.ensure(Self::SIZE)?;

        Ok(Self::from_view(view))
    }
}

/// A memoized, possibly absent sub-structure of a parent view.
///
/// The cell stores the outcome of the first resolution, which is the offset of the
/// sub-structure or its absence. Later calls rebuild the view from that outcome and never
/// resolve again:
///
/// - a present sub-structure is always returned at the same offset
/// - an absent sub-structure stays absent
///
/// The cell only stores an offset, so the same cell serves read-only and writable views. Its
/// owner always requests the same structure type from it.
///
/// The cell is backed by a [`OnceLock`], so concurrent first accesses from several threads
/// resolve exactly once.
#[derive(Default)]
pub struct LazyStructure {
    cell: OnceLock<Option<u64>>,
}

impl LazyStructure {
    /// Creates an unresolved cell.
    #[must_use]
    pub fn new() -> Self {
        LazyStructure {
            cell: OnceLock::new(),
        }
    }

    /// Returns true once the first resolution has happened.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    fn resolve_offset(
        &self,
        buffer: &RawBuffer,
        size: u64,
        locate: impl FnOnce() -> Option<u64>,
    ) -> Option<u64> {
        *self.cell.get_or_init(|| {
            let offset = locate()?;
            if buffer.contains(offset, size) {
                Some(offset)
            } else {
                log::debug!(
                    "Sub-structure of {} bytes at {:#x} exceeds the buffer, treating it as absent",
                    size,
                    offset
                );
                None
            }
        })
    }

    /// Returns the read-only sub-structure, resolving it on first use.
    ///
    /// `locate` yields the candidate offset; returning `None` from it marks the sub-structure
    /// as absent.
    pub fn get<'a, S>(&self, buffer: &'a RawBuffer, locate: impl FnOnce() -> Option<u64>) -> Option<S>
    where
        S: Structure<&'a RawBuffer>,
    {
        let offset = self.resolve_offset(buffer, S::SIZE, locate)?;
        Some(S::from_view(StructureView::new(buffer, offset)))
    }

    /// Returns the writable sub-structure, resolving it on first use.
    pub fn get_mut<'a, S>(
        &self,
        buffer: &'a mut RawBuffer,
        locate: impl FnOnce() -> Option<u64>,
    ) -> Option<S>
    where
        S: Structure<&'a mut RawBuffer>,
    {
        let offset = self.resolve_offset(buffer, S::SIZE, locate)?;
        Some(S::from_view(StructureView::new(buffer, offset)))
    }
}

impl std::fmt::Debug for LazyStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyStructure")
            .field("resolved", &self.cell.get())
            .finish()
    }
}
