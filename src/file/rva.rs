//! Relative virtual address translation.
//!
//! Data directories and the CLI header refer to other structures by RVA, the address a byte
//! has once the image is mapped by the loader. [`RvaTranslator`] is the seam through which the
//! overlay turns such an address back into a file offset. Three implementations exist:
//!
//! - [`SectionMap`] - walks the section table of a PE file, as read by goblin
//! - [`Identity`] - RVA and file offset are the same, for mapped images and crafted buffers
//! - any `Fn(u32) -> Option<u64>` closure
//!
//! A translator answers `None` for every address it cannot place. The resolvers turn that
//! answer into an absent structure.

use goblin::pe::section_table::SectionTable;

/// Maps a relative virtual address to a file offset.
pub trait RvaTranslator {
    /// Returns the file offset of `rva`, or `None` if the address is not backed by file data.
    fn rva_to_offset(&self, rva: u32) -> Option<u64>;
}

impl<F> RvaTranslator for F
where
    F: Fn(u32) -> Option<u64>,
{
    fn rva_to_offset(&self, rva: u32) -> Option<u64> {
        self(rva)
    }
}

/// Translator for buffers whose RVAs are already file offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity;

impl RvaTranslator for Identity {
    fn rva_to_offset(&self, rva: u32) -> Option<u64> {
        Some(u64::from(rva))
    }
}

/// Section-table based translator.
///
/// A section covers the virtual range `[virtual_address, virtual_address + max(virtual_size,
/// size_of_raw_data))`. Only the part backed by raw data can be translated; addresses in the
/// zero-filled tail of a section have no file offset.
#[derive(Debug, Clone, Default)]
pub struct SectionMap {
    sections: Vec<SectionTable>,
}

impl SectionMap {
    /// Builds a translator from a goblin section table.
    pub fn new(sections: &[SectionTable]) -> Self {
        SectionMap {
            sections: sections.to_vec(),
        }
    }

    /// The sections this translator walks.
    #[must_use]
    pub fn sections(&self) -> &[SectionTable] {
        &self.sections
    }

    /// Returns the section containing `rva`, if any.
    #[must_use]
    pub fn section_for(&self, rva: u32) -> Option<&SectionTable> {
        self.sections.iter().find(|section| {
            let extent = section.virtual_size.max(section.size_of_raw_data);
            let start = u64::from(section.virtual_address);

            (start..start + u64::from(extent)).contains(&u64::from(rva))
        })
    }
}

impl RvaTranslator for SectionMap {
    fn rva_to_offset(&self, rva: u32) -> Option<u64> {
        let section = self.section_for(rva)?;
        let delta = rva - section.virtual_address;
        if delta >= section.size_of_raw_data {
            return None;
        }

        Some(u64::from(section.pointer_to_raw_data) + u64::from(delta))
    }
}

impl RvaTranslator for &SectionMap {
    fn rva_to_offset(&self, rva: u32) -> Option<u64> {
        (**self).rva_to_offset(rva)
    }
}
