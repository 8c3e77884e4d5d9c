use super::{io::checked_end, Backend};
use crate::{Error::FileError, Result};

use memmap2::{MmapMut, MmapOptions};
use std::{fs, path::Path};

/// Input file backed by a private, copy-on-write memory mapping
///
/// Writes through [`Backend::data_mut`] land in process-private pages and never reach the
/// file on disk. Persisting a modified image is left to the caller.
#[derive(Debug)]
pub struct Physical {
    data: MmapMut,
}

impl Physical {
    /// Map a file into memory
    ///
    /// ## Arguments
    /// * 'path' - The path of the file to map
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path).map_err(FileError)?;

        // SAFETY: the mapping is private; the file must not be truncated while it is mapped
        let mmap = unsafe { MmapOptions::new().map_copy(&file) }.map_err(FileError)?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = checked_end(offset, len, self.data.len()) else {
            return Err(out_of_bounds_error!(
                offset as u64,
                len as u64,
                self.data.len()
            ));
        };

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn into_data(self: Box<Self>) -> Vec<u8> {
        self.data.as_ref().to_vec()
    }
}
