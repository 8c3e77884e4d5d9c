//! Data directory slots and their lazy resolution.
//!
//! The PE optional header ends in an array of `(virtual_address, size)` slots, and the CLI
//! header embeds seven more. Each slot names a region of the image by RVA. [`DataDirectory`] is
//! the 8-byte view of one slot; [`DataDirectories`] resolves the slots of an array into typed
//! views on request.
//!
//! Resolution never fails loudly. A slot that is not declared, is empty, cannot be translated,
//! or names a region past the end of the buffer yields `None`, so a single corrupt slot never
//! prevents access to the others.
//!
//! # Examples
//!
//! ```rust
//! use dotlens::{
//!     metadata::directory::{DataDirectories, DataDirectory, DirectoryEntry},
//!     rva::Identity,
//!     RawBuffer, Structure,
//! };
//!
//! // 16 empty slots, followed by 8 payload bytes
//! let mut bytes = vec![0u8; 16 * 8 + 8];
//! bytes[14 * 8..14 * 8 + 4].copy_from_slice(&128u32.to_le_bytes());
//! bytes[14 * 8 + 4..14 * 8 + 8].copy_from_slice(&8u32.to_le_bytes());
//! let buffer = RawBuffer::from_mem(bytes)?;
//!
//! let directories = DataDirectories::new(&buffer, 0, 16, Identity);
//! let slot = directories.entry(DirectoryEntry::ClrRuntime).unwrap();
//! assert_eq!(slot.virtual_address()?, 128);
//!
//! let payload: Option<DataDirectory<_>> = directories.resolve(DirectoryEntry::ClrRuntime);
//! assert_eq!(payload.unwrap().offset(), 128);
//! assert!(directories.resolve::<DataDirectory<_>>(DirectoryEntry::Export).is_none());
//! # Ok::<(), dotlens::Error>(())
//! ```

use std::borrow::{Borrow, BorrowMut};

use strum::{EnumCount, EnumIter, FromRepr};

use crate::{
    file::{
        rva::RvaTranslator,
        view::{Structure, StructureView},
    },
    metadata::{config::DecoderConfig, cor20header::Cor20Header},
    RawBuffer, Result,
};

/// Size of a single `(virtual_address, size)` slot
pub const DATA_DIRECTORY_SIZE: u64 = 8;

/// One `(virtual_address, size)` slot.
#[derive(Debug, Clone, Copy)]
pub struct DataDirectory<B> {
    view: StructureView<B>,
}

impl<B: Borrow<RawBuffer>> Structure<B> for DataDirectory<B> {
    const SIZE: u64 = DATA_DIRECTORY_SIZE;

    fn from_view(view: StructureView<B>) -> Self {
        DataDirectory { view }
    }

    fn view(&self) -> &StructureView<B> {
        &self.view
    }
}

impl<B: Borrow<RawBuffer>> DataDirectory<B> {
    /// RVA of the region; 0 marks an unused slot.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the slot lies outside the buffer.
    pub fn virtual_address(&self) -> Result<u32> {
        self.view.read(0)
    }

    /// Size of the region in bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the slot lies outside the buffer.
    pub fn size(&self) -> Result<u32> {
        self.view.read(4)
    }
}

impl<B: BorrowMut<RawBuffer>> DataDirectory<B> {
    /// Overwrites the RVA of the region.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the slot lies outside the buffer.
    pub fn set_virtual_address(&mut self, value: u32) -> Result<()> {
        self.view.write(0, value)
    }

    /// Overwrites the size of the region.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the slot lies outside the buffer.
    pub fn set_size(&mut self, value: u32) -> Result<()> {
        self.view.write(4, value)
    }
}

/// The standard slots of the PE optional header data directory array.
///
/// The `Certificate` slot holds a file offset rather than an RVA; read it through
/// [`DataDirectories::entry`] instead of resolving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, FromRepr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum DirectoryEntry {
    Export = 0,
    Import = 1,
    Resource = 2,
    Exception = 3,
    Certificate = 4,
    BaseRelocation = 5,
    Debug = 6,
    Architecture = 7,
    GlobalPtr = 8,
    Tls = 9,
    LoadConfig = 10,
    BoundImport = 11,
    Iat = 12,
    DelayImport = 13,
    ClrRuntime = 14,
    Reserved = 15,
}

impl From<DirectoryEntry> for usize {
    fn from(entry: DirectoryEntry) -> usize {
        entry as usize
    }
}

/// Lazy resolver over an array of data directory slots.
///
/// The resolver knows where the array starts, how many slots the header declares, and how to
/// turn RVAs into file offsets. Slots are only read when requested, and every request is
/// independent of all others.
///
/// `B` is `&RawBuffer` for read-only resolution or `&mut RawBuffer` when writable views are
/// needed.
#[derive(Debug)]
pub struct DataDirectories<B, T> {
    buffer: B,
    offset: u64,
    count: u32,
    translator: T,
    config: DecoderConfig,
}

impl<B: Borrow<RawBuffer>, T: RvaTranslator> DataDirectories<B, T> {
    /// Creates a resolver for `count` slots starting at `offset`.
    pub fn new(buffer: B, offset: u64, count: u32, translator: T) -> Self {
        DataDirectories {
            buffer,
            offset,
            count,
            translator,
            config: DecoderConfig::default(),
        }
    }

    /// Replaces the decoder configuration.
    #[must_use]
    pub fn with_config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// File offset of the slot array.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of slots declared by the header.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The RVA translator in use.
    pub fn translator(&self) -> &T {
        &self.translator
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &RawBuffer {
        self.buffer.borrow()
    }

    fn slot_offset(&self, index: usize) -> Option<u64> {
        if index >= self.count as usize {
            return None;
        }

        let delta = (index as u64).checked_mul(DATA_DIRECTORY_SIZE)?;
        self.offset.checked_add(delta)
    }

    /// The raw slot at `index`.
    ///
    /// Returns `None`, without touching the buffer, if the header declares fewer slots. Also
    /// returns `None` if the slot itself lies outside the buffer.
    pub fn entry(&self, index: impl Into<usize>) -> Option<DataDirectory<&RawBuffer>> {
        let slot = self.slot_offset(index.into())?;
        DataDirectory::resolve(self.buffer(), slot).ok()
    }

    /// Iterates over the declared slots that lie within the buffer.
    pub fn iter(&self) -> impl Iterator<Item = (usize, DataDirectory<&RawBuffer>)> + '_ {
        // slots are contiguous, the first one out of bounds ends the walk
        (0..self.count as usize).map_while(move |index| self.entry(index).map(|slot| (index, slot)))
    }

    /// Returns the file offset and size of the region a slot names, if it can be resolved.
    pub fn locate(&self, index: impl Into<usize>) -> Option<(u64, u32)> {
        let index = index.into();
        let slot = self.entry(index)?;

        let rva = slot.virtual_address().ok()?;
        let size = slot.size().ok()?;
        if rva == 0 {
            return None;
        }

        if size == 0 && self.config.require_directory_size {
            log::debug!("Data directory {} has an RVA but no size", index);
            return None;
        }

        let Some(offset) = self.translator.rva_to_offset(rva) else {
            log::debug!(
                "Data directory {} RVA {:#x} is not backed by file data",
                index,
                rva
            );
            return None;
        };

        if !self.buffer().contains(offset, u64::from(size)) {
            log::debug!(
                "Data directory {} region {:#x}+{:#x} exceeds the buffer of {} bytes",
                index,
                offset,
                size,
                self.buffer().len()
            );
            return None;
        }

        Some((offset, size))
    }

    /// Resolves the slot at `index` to a read-only structure.
    pub fn resolve<'a, S>(&'a self, index: impl Into<usize>) -> Option<S>
    where
        S: Structure<&'a RawBuffer>,
    {
        let (offset, _) = self.locate(index)?;
        S::resolve(self.buffer(), offset)
            .inspect_err(|error| log::debug!("Data directory target rejected - {}", error))
            .ok()
    }

    /// Shortcut for resolving the CLI header slot.
    pub fn cor20(&self) -> Option<Cor20Header<&RawBuffer>> {
        self.resolve(DirectoryEntry::ClrRuntime)
    }
}

impl<B: BorrowMut<RawBuffer>, T: RvaTranslator> DataDirectories<B, T> {
    /// The underlying buffer, for modification.
    pub fn buffer_mut(&mut self) -> &mut RawBuffer {
        self.buffer.borrow_mut()
    }

    /// The raw slot at `index`, for modification.
    pub fn entry_mut(&mut self, index: impl Into<usize>) -> Option<DataDirectory<&mut RawBuffer>> {
        let slot = self.slot_offset(index.into())?;
        DataDirectory::resolve(self.buffer_mut(), slot).ok()
    }

    /// Resolves the slot at `index` to a writable structure.
    pub fn resolve_mut<'a, S>(&'a mut self, index: impl Into<usize>) -> Option<S>
    where
        S: Structure<&'a mut RawBuffer>,
    {
        let (offset, _) = self.locate(index)?;
        S::resolve(self.buffer_mut(), offset)
            .inspect_err(|error| log::debug!("Data directory target rejected - {}", error))
            .ok()
    }

    /// Shortcut for resolving the CLI header slot for modification.
    pub fn cor20_mut(&mut self) -> Option<Cor20Header<&mut RawBuffer>> {
        self.resolve_mut(DirectoryEntry::ClrRuntime)
    }
}
