//! PE images opened through goblin.
//!
//! [`PeImage`] is the convenience entry point for whole files. goblin parses the PE headers and
//! the section table once, when the image is opened. It never touches what the data directories
//! point to, so a broken import or debug directory does not keep the CLI header from loading.
//! The image keeps the location of the optional header's data directory array and the section
//! table. Everything past the data directories is then read through overlay views on the
//! image's own [`RawBuffer`], so those structures can be modified in place.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotlens::{metadata::tables::TableId, PeImage};
//! use std::path::Path;
//!
//! let image = PeImage::from_file(Path::new("WindowsBase.dll"))?;
//! let tables = image.decode_tables_header()?;
//!
//! println!("TypeDef rows: {}", tables.row_count(TableId::TypeDef));
//! for diagnostic in image.diagnostics().iter() {
//!     println!("{}", diagnostic);
//! }
//! # Ok::<(), dotlens::Error>(())
//! ```

use std::{path::Path, sync::Arc};

use goblin::pe::header::Header;

use crate::{
    file::{
        rva::SectionMap,
        view::{LazyStructure, Structure},
    },
    metadata::{
        config::DecoderConfig,
        cor20header::Cor20Header,
        diagnostics::Diagnostics,
        directory::{DataDirectories, DirectoryEntry},
        root::Root,
        streams::{MetadataTablesHeader, TablesHeader},
    },
    Error::GoblinErr,
    RawBuffer, Result,
};

/// Size of the PE signature plus the COFF file header
const PE_HEADERS_SIZE: u64 = 24;
/// Optional header magic of PE32+ images
const PE32_PLUS_MAGIC: u16 = 0x20B;

/// A PE file whose data directories are resolved through overlay views.
pub struct PeImage {
    buffer: RawBuffer,
    sections: SectionMap,
    directory_offset: u64,
    directory_count: u32,
    config: DecoderConfig,
    diagnostics: Arc<Diagnostics>,
    cor20: LazyStructure,
}

impl PeImage {
    /// Opens an image held in memory, with the default configuration.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::GoblinErr`] if goblin
    /// rejects the PE container, and [`crate::Error::Malformed`] if there is no optional
    /// header.
    pub fn from_mem(data: Vec<u8>) -> Result<PeImage> {
        Self::with_config(RawBuffer::from_mem(data)?, DecoderConfig::default())
    }

    /// Opens an image from disk, with the default configuration.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened, and any error of
    /// [`PeImage::from_mem`].
    pub fn from_file(path: &Path) -> Result<PeImage> {
        Self::with_config(RawBuffer::from_file(path)?, DecoderConfig::default())
    }

    /// Opens an image held by `buffer`.
    ///
    /// # Errors
    /// See [`PeImage::from_mem`].
    pub fn with_config(buffer: RawBuffer, config: DecoderConfig) -> Result<PeImage> {
        let (sections, directory_offset, directory_count) = {
            let data = buffer.data();
            let header = Header::parse(data).map_err(GoblinErr)?;
            let Some(optional_header) = header.optional_header else {
                return Err(malformed_error!("File does not have an OptionalHeader"));
            };

            let mut section_offset = header.dos_header.pe_pointer as usize
                + PE_HEADERS_SIZE as usize
                + usize::from(header.coff_header.size_of_optional_header);
            let sections = header
                .coff_header
                .sections(data, &mut section_offset)
                .map_err(GoblinErr)?;

            let optional_header_size = if optional_header.standard_fields.magic == PE32_PLUS_MAGIC
            {
                112
            } else {
                96
            };
            let directory_offset = u64::from(header.dos_header.pe_pointer)
                + PE_HEADERS_SIZE
                + optional_header_size;

            (
                SectionMap::new(&sections),
                directory_offset,
                optional_header.windows_fields.number_of_rva_and_sizes,
            )
        };

        log::debug!(
            "PE image with {} sections, {} data directories at {:#x}",
            sections.sections().len(),
            directory_count,
            directory_offset
        );

        let image = PeImage {
            buffer,
            sections,
            directory_offset,
            directory_count,
            config,
            diagnostics: Arc::new(Diagnostics::new()),
            cor20: LazyStructure::new(),
        };

        if let Some(cor20) = image.cor20() {
            cor20.validate(&image.config, &image.diagnostics)?;
        }

        Ok(image)
    }

    /// The bytes of the image.
    #[must_use]
    pub fn buffer(&self) -> &RawBuffer {
        &self.buffer
    }

    /// The bytes of the image, for modification.
    ///
    /// Drops the cached CLI header location.
    pub fn buffer_mut(&mut self) -> &mut RawBuffer {
        self.cor20 = LazyStructure::new();
        &mut self.buffer
    }

    /// The section table translator.
    #[must_use]
    pub fn sections(&self) -> &SectionMap {
        &self.sections
    }

    /// Resolver over the optional header data directories.
    #[must_use]
    pub fn directories(&self) -> DataDirectories<&RawBuffer, &SectionMap> {
        DataDirectories::new(
            &self.buffer,
            self.directory_offset,
            self.directory_count,
            &self.sections,
        )
        .with_config(self.config)
    }

    /// Resolver over the optional header data directories, for modification.
    ///
    /// Drops the cached CLI header location.
    pub fn directories_mut(&mut self) -> DataDirectories<&mut RawBuffer, &SectionMap> {
        self.cor20 = LazyStructure::new();
        DataDirectories::new(
            &mut self.buffer,
            self.directory_offset,
            self.directory_count,
            &self.sections,
        )
        .with_config(self.config)
    }

    /// The CLI header, if the image has one.
    ///
    /// The header location is resolved once and reused until the image is borrowed mutably.
    #[must_use]
    pub fn cor20(&self) -> Option<Cor20Header<&RawBuffer>> {
        self.cor20.get(&self.buffer, || {
            self.directories()
                .locate(DirectoryEntry::ClrRuntime)
                .map(|(offset, _)| offset)
        })
    }

    /// The metadata root, if the image has a CLI header pointing to a valid one.
    #[must_use]
    pub fn metadata_root(&self) -> Option<Root> {
        self.cor20()?.metadata_root(&self.sections)
    }

    /// Live view of the tables stream header.
    #[must_use]
    pub fn tables_header(&self) -> Option<MetadataTablesHeader<&RawBuffer>> {
        self.metadata_root()?.tables_header(&self.buffer)
    }

    /// Decodes the tables stream header, recording anomalies into the image diagnostics.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the image has no tables stream, and any error of
    /// [`MetadataTablesHeader::decode_with`].
    pub fn decode_tables_header(&self) -> Result<TablesHeader> {
        let Some(root) = self
            .cor20()
            .and_then(|cor20| cor20.metadata_root_with(&self.sections, &self.diagnostics))
        else {
            return Err(malformed_error!("Image has no metadata root"));
        };

        let Some(stream) = root.tables_stream() else {
            return Err(malformed_error!("Metadata has no tables stream"));
        };

        MetadataTablesHeader::resolve(&self.buffer, root.stream_offset(stream))?
            .decode_with(&self.config, self.diagnostics.clone())
    }

    /// Anomalies recorded for this image.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// The decoder configuration in use.
    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Releases the buffer, with all modifications made through the image.
    #[must_use]
    pub fn into_buffer(self) -> RawBuffer {
        self.buffer
    }
}

impl std::fmt::Debug for PeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeImage")
            .field("len", &self.buffer.len())
            .field("sections", &self.sections.sections().len())
            .field("directory_offset", &self.directory_offset)
            .field("directory_count", &self.directory_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            cor20header::{ComImageFlags, EntryPoint},
            diagnostics::DiagnosticCategory,
            directory::DataDirectory,
            tables::TableId,
        },
        test::{
            MetadataBuilder, PeBuilder, TablesStreamBuilder, CLI_HEADER_LEN, TEXT_OFFSET, TEXT_RVA,
        },
        Error,
    };

    #[test]
    fn pe32() {
        let builder = PeBuilder::new();
        let image = PeImage::from_mem(builder.build()).unwrap();

        let directories = image.directories();
        assert_eq!(directories.offset(), builder.directory_offset());
        assert_eq!(directories.count(), 16);
        assert_eq!(
            directories.locate(DirectoryEntry::ClrRuntime),
            Some((u64::from(TEXT_OFFSET), CLI_HEADER_LEN))
        );
        assert!(directories.locate(DirectoryEntry::Import).is_none());

        let cor20 = image.cor20().unwrap();
        assert_eq!(cor20.offset(), u64::from(TEXT_OFFSET));
        assert_eq!(cor20.flags().unwrap(), ComImageFlags::ILONLY);
        assert_eq!(cor20.entry_point().unwrap(), EntryPoint::Token(0x0600_0001));

        let root = image.metadata_root().unwrap();
        assert_eq!(root.offset, u64::from(TEXT_OFFSET + CLI_HEADER_LEN));
        assert_eq!(root.version, "v4.0.30319");

        let tables = image.decode_tables_header().unwrap();
        assert_eq!(tables.row_count(TableId::Module), 1);
        assert_eq!(tables.offset, image.tables_header().unwrap().offset());
        assert!(!image.diagnostics().has_any());
    }

    #[test]
    fn pe32_plus() {
        let builder = PeBuilder::new().pe32_plus();
        let image = PeImage::from_mem(builder.build()).unwrap();

        assert_eq!(image.directories().offset(), 0x108);
        assert!(image.cor20().is_some());
        assert_eq!(
            image
                .decode_tables_header()
                .unwrap()
                .row_count(TableId::Module),
            1
        );
    }

    #[test]
    fn without_clr() {
        let image = PeImage::from_mem(PeBuilder::new().without_clr().build()).unwrap();

        assert!(image.cor20().is_none());
        assert!(image.metadata_root().is_none());
        assert!(image.tables_header().is_none());
        assert!(matches!(
            image.decode_tables_header(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn undeclared_clr_slot() {
        let image = PeImage::from_mem(PeBuilder::new().directory_count(14).build()).unwrap();

        assert_eq!(image.directories().count(), 14);
        assert!(image.directories().entry(DirectoryEntry::ClrRuntime).is_none());
        assert!(image.cor20().is_none());
    }

    #[test]
    fn no_tables_stream() {
        let metadata = MetadataBuilder::new().stream("#Strings", &[0u8; 4]).build();
        let image = PeImage::from_mem(PeBuilder::new().metadata(metadata).build()).unwrap();

        assert!(image.metadata_root().is_some());
        assert!(image.tables_header().is_none());
        assert!(image.decode_tables_header().is_err());
    }

    #[test]
    fn diagnostics_accumulate() {
        let tables = TablesStreamBuilder::new()
            .reserved1(1)
            .table(0x00, 1)
            .table(0x02, 1)
            .build();
        let metadata = MetadataBuilder::new().stream("#~", &tables).build();
        let image = PeImage::from_mem(PeBuilder::new().metadata(metadata).build()).unwrap();

        image.decode_tables_header().unwrap();
        image.decode_tables_header().unwrap();

        assert_eq!(
            image
                .diagnostics()
                .by_category(DiagnosticCategory::Header)
                .len(),
            2
        );
    }

    #[test]
    fn strict_image() {
        let tables = TablesStreamBuilder::new().reserved2(0).table(0x00, 1).build();
        let metadata = MetadataBuilder::new().stream("#~", &tables).build();
        let buffer = RawBuffer::from_mem(PeBuilder::new().metadata(metadata).build()).unwrap();

        let image = PeImage::with_config(buffer, DecoderConfig::strict()).unwrap();
        assert!(matches!(
            image.decode_tables_header(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn modify_through_image() {
        let mut image = PeImage::from_mem(PeBuilder::new().build()).unwrap();

        {
            let mut directories = image.directories_mut();
            let mut cor20 = directories.cor20_mut().unwrap();
            cor20.set_minor_runtime_version(7).unwrap();
        }

        {
            let mut directories = image.directories_mut();
            let mut slot = directories.entry_mut(DirectoryEntry::Debug).unwrap();
            slot.set_size(0x1C).unwrap();
        }

        assert_eq!(image.cor20().unwrap().minor_runtime_version().unwrap(), 7);
        let directories = image.directories();
        let debug: DataDirectory<_> = directories.entry(DirectoryEntry::Debug).unwrap();
        assert_eq!(debug.size().unwrap(), 0x1C);

        let buffer = image.into_buffer();
        assert_eq!(buffer.read_u16(u64::from(TEXT_OFFSET) + 6).unwrap(), 7);
    }

    #[test]
    fn broken_directories_elsewhere() {
        // both point past the only section
        let image = PeImage::from_mem(
            PeBuilder::new()
                .directory(DirectoryEntry::Import as usize, 0x9000, 0x28)
                .directory(DirectoryEntry::Debug as usize, 0x9000, 0x1C)
                .build(),
        )
        .unwrap();

        let directories = image.directories();
        assert!(directories.entry(DirectoryEntry::Import).is_some());
        assert!(directories.locate(DirectoryEntry::Import).is_none());
        assert!(directories.locate(DirectoryEntry::Debug).is_none());

        let cor20 = image.cor20().unwrap();
        assert_eq!(cor20.offset(), u64::from(TEXT_OFFSET));
        assert_eq!(
            image
                .decode_tables_header()
                .unwrap()
                .row_count(TableId::Module),
            1
        );
    }

    #[test]
    fn unknown_stream() {
        let tables = TablesStreamBuilder::new().table(0x00, 1).build();
        let metadata = MetadataBuilder::new()
            .stream("#~", &tables)
            .stream("#JTD", &[])
            .build();
        let image = PeImage::from_mem(PeBuilder::new().metadata(metadata).build()).unwrap();

        assert_eq!(image.metadata_root().unwrap().stream_headers.len(), 2);
        assert!(!image.diagnostics().has_any());

        let header = image.decode_tables_header().unwrap();
        assert_eq!(header.row_count(TableId::Module), 1);

        let streams = image.diagnostics().by_category(DiagnosticCategory::Stream);
        assert_eq!(streams.len(), 1);
        assert!(streams[0].message.contains("#JTD"));
    }

    #[test]
    fn cor20_cached() {
        let mut image = PeImage::from_mem(PeBuilder::new().build()).unwrap();
        assert!(image.cor20.is_resolved());
        assert!(image.cor20().is_some());

        {
            let mut directories = image.directories_mut();
            let mut slot = directories.entry_mut(DirectoryEntry::ClrRuntime).unwrap();
            slot.set_virtual_address(0).unwrap();
        }
        assert!(!image.cor20.is_resolved());
        assert!(image.cor20().is_none());
        assert!(image.metadata_root().is_none());

        let slot = image.directories().offset() + 14 * 8;
        image.buffer_mut().write_u32(slot, TEXT_RVA).unwrap();
        assert!(image.cor20().is_some());
    }

    #[test]
    fn not_a_pe() {
        assert!(matches!(
            PeImage::from_mem(vec![0x4D, 0x5A, 0, 0]),
            Err(Error::GoblinErr(_))
        ));
        assert!(matches!(PeImage::from_mem(Vec::new()), Err(Error::Empty)));
    }
}
