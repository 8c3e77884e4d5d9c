//! CLR 2.0 (Cor20) header of .NET assemblies.
//!
//! This module defines the [`Cor20Header`] view, the 72-byte header found through the
//! `IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR` data directory of PE files. Besides a few scalar
//! fields it embeds seven data directories of its own, the most important one locating the
//! metadata root.
//!
//! The embedded directories are resolved lazily, once per header instance. A directory that
//! cannot be resolved is reported as `None`; the other fields stay accessible.
//!
//! # Reference
//! - [ECMA-335 II.25.3.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use std::borrow::{Borrow, BorrowMut};

use bitflags::bitflags;

use crate::{
    file::{
        rva::RvaTranslator,
        view::{LazyStructure, Structure, StructureView},
    },
    metadata::{
        config::DecoderConfig,
        diagnostics::{DiagnosticCategory, Diagnostics},
        directory::DataDirectory,
        root::Root,
    },
    RawBuffer, Result,
};

/// Size of the CLI header in bytes
pub const COR20_HEADER_SIZE: u64 = 72;

bitflags! {
    /// Runtime flags of the CLI header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ComImageFlags: u32 {
        /// The image contains IL only
        const ILONLY = 0x0000_0001;
        /// The image can only be loaded into a 32-bit process
        const REQUIRED_32BIT = 0x0000_0002;
        /// The image is an IL library
        const IL_LIBRARY = 0x0000_0004;
        /// The image has a strong name signature
        const STRONGNAMESIGNED = 0x0000_0008;
        /// The entry point field holds an RVA to native code instead of a token
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        /// The loader and JIT track debug data
        const TRACKDEBUGDATA = 0x0001_0000;
        /// The image prefers a 32-bit process
        const PREFERRED_32BIT = 0x0002_0000;
    }
}

/// The data directories embedded in the CLI header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cor20Directory {
    /// Physical metadata, starting with the metadata root
    MetaData,
    /// Managed resources
    Resources,
    /// Strong name hash data
    StrongNameSignature,
    /// Always 0
    CodeManagerTable,
    /// Array of v-table fixups for unmanaged callers
    VTableFixups,
    /// Always 0
    ExportAddressTableJumps,
    /// Precompiled image information, 0 for ordinary images
    ManagedNativeHeader,
}

impl Cor20Directory {
    /// All embedded directories in header order.
    pub const ALL: [Cor20Directory; 7] = [
        Cor20Directory::MetaData,
        Cor20Directory::Resources,
        Cor20Directory::StrongNameSignature,
        Cor20Directory::CodeManagerTable,
        Cor20Directory::VTableFixups,
        Cor20Directory::ExportAddressTableJumps,
        Cor20Directory::ManagedNativeHeader,
    ];

    /// Offset of the slot within the CLI header.
    #[must_use]
    pub fn field_offset(self) -> u64 {
        match self {
            Cor20Directory::MetaData => 0x08,
            Cor20Directory::Resources => 0x18,
            Cor20Directory::StrongNameSignature => 0x20,
            Cor20Directory::CodeManagerTable => 0x28,
            Cor20Directory::VTableFixups => 0x30,
            Cor20Directory::ExportAddressTableJumps => 0x38,
            Cor20Directory::ManagedNativeHeader => 0x40,
        }
    }
}

/// The entry point field, interpreted according to [`ComImageFlags::NATIVE_ENTRYPOINT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// `MethodDef` or `File` token of the managed entry point
    Token(u32),
    /// RVA of a native entry point
    Rva(u32),
}

/// View of the CLI header.
pub struct Cor20Header<B> {
    view: StructureView<B>,
    directories: [LazyStructure; 7],
}

impl<B: Borrow<RawBuffer>> Structure<B> for Cor20Header<B> {
    const SIZE: u64 = COR20_HEADER_SIZE;

    fn from_view(view: StructureView<B>) -> Self {
        Cor20Header {
            view,
            directories: Default::default(),
        }
    }

    fn view(&self) -> &StructureView<B> {
        &self.view
    }
}

impl<B: Borrow<RawBuffer>> Cor20Header<B> {
    /// Size of the header in bytes, 72 for every known runtime.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn cb(&self) -> Result<u32> {
        self.view.read(0x00)
    }

    /// Major version of the runtime the image targets.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn major_runtime_version(&self) -> Result<u16> {
        self.view.read(0x04)
    }

    /// Minor version of the runtime the image targets.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn minor_runtime_version(&self) -> Result<u16> {
        self.view.read(0x06)
    }

    /// Runtime flags. Unknown bits are kept.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn flags(&self) -> Result<ComImageFlags> {
        Ok(ComImageFlags::from_bits_retain(self.view.read(0x10)?))
    }

    /// The entry point field read as a metadata token.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn entry_point_token(&self) -> Result<u32> {
        self.view.read(0x14)
    }

    /// The entry point field read as an RVA; meaningful with
    /// [`ComImageFlags::NATIVE_ENTRYPOINT`] set.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn entry_point_rva(&self) -> Result<u32> {
        self.view.read(0x14)
    }

    /// The entry point field, interpreted according to the flags.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if a field lies outside the buffer.
    pub fn entry_point(&self) -> Result<EntryPoint> {
        if self.flags()?.contains(ComImageFlags::NATIVE_ENTRYPOINT) {
            Ok(EntryPoint::Rva(self.entry_point_rva()?))
        } else {
            Ok(EntryPoint::Token(self.entry_point_token()?))
        }
    }

    /// The embedded directory slot `which`, resolved on first access.
    pub fn directory(&self, which: Cor20Directory) -> Option<DataDirectory<&RawBuffer>> {
        let slot = self.view.field_offset(which.field_offset()).ok();
        self.directories[which as usize].get(self.view.buffer(), || slot)
    }

    /// Location of the metadata.
    pub fn metadata(&self) -> Option<DataDirectory<&RawBuffer>> {
        self.directory(Cor20Directory::MetaData)
    }

    /// Location of the managed resources.
    pub fn resources(&self) -> Option<DataDirectory<&RawBuffer>> {
        self.directory(Cor20Directory::Resources)
    }

    /// Location of the strong name signature.
    pub fn strong_name_signature(&self) -> Option<DataDirectory<&RawBuffer>> {
        self.directory(Cor20Directory::StrongNameSignature)
    }

    /// Location of the code manager table.
    pub fn code_manager_table(&self) -> Option<DataDirectory<&RawBuffer>> {
        self.directory(Cor20Directory::CodeManagerTable)
    }

    /// Location of the v-table fixups.
    pub fn vtable_fixups(&self) -> Option<DataDirectory<&RawBuffer>> {
        self.directory(Cor20Directory::VTableFixups)
    }

    /// Location of the export address table jumps.
    pub fn export_address_table_jumps(&self) -> Option<DataDirectory<&RawBuffer>> {
        self.directory(Cor20Directory::ExportAddressTableJumps)
    }

    /// Location of the managed native header.
    pub fn managed_native_header(&self) -> Option<DataDirectory<&RawBuffer>> {
        self.directory(Cor20Directory::ManagedNativeHeader)
    }

    /// Parses the metadata root the MetaData directory points to.
    ///
    /// Returns `None` if the directory is empty, cannot be translated, exceeds the buffer, or
    /// does not hold a valid root.
    pub fn metadata_root(&self, translator: impl RvaTranslator) -> Option<Root> {
        self.metadata_root_with(translator, &Diagnostics::new())
    }

    /// Same as [`Cor20Header::metadata_root`], recording streams with unknown names in
    /// `diagnostics`.
    pub fn metadata_root_with(
        &self,
        translator: impl RvaTranslator,
        diagnostics: &Diagnostics,
    ) -> Option<Root> {
        let metadata = self.metadata()?;
        let rva = metadata.virtual_address().ok()?;
        let size = metadata.size().ok()?;
        if rva == 0 || size == 0 {
            return None;
        }

        let offset = translator.rva_to_offset(rva)?;
        Root::read_at_with(self.view.buffer(), offset, u64::from(size), diagnostics)
            .inspect_err(|error| log::debug!("Metadata root at {:#x} rejected - {}", offset, error))
            .ok()
    }

    /// Checks the header for values no regular compiler emits.
    ///
    /// Findings are recorded as warnings; with [`DecoderConfig::strict_reserved`] set, an
    /// unexpected header size is returned as an error instead.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header lies outside the buffer, and
    /// [`crate::Error::Malformed`] for an unexpected header size in strict mode.
    pub fn validate(&self, config: &DecoderConfig, diagnostics: &Diagnostics) -> Result<()> {
        let cb = self.cb()?;
        if u64::from(cb) != COR20_HEADER_SIZE {
            if config.strict_reserved {
                return Err(malformed_error!(
                    "Invalid CLR header size: expected 72, got {}",
                    cb
                ));
            }

            diagnostics.warning(
                DiagnosticCategory::Header,
                format!("CLI header declares {} bytes, expected 72", cb),
            );
        }

        for (which, name) in [
            (Cor20Directory::CodeManagerTable, "CodeManagerTable"),
            (Cor20Directory::ExportAddressTableJumps, "ExportAddressTableJumps"),
        ] {
            let slot = self.view.at(which.field_offset())?;
            if slot.read::<u32>(0)? != 0 || slot.read::<u32>(4)? != 0 {
                diagnostics.warning(
                    DiagnosticCategory::Directory,
                    format!("CLI header directory {} is reserved but set", name),
                );
            }
        }

        let fixups = self.view.at(Cor20Directory::VTableFixups.field_offset())?;
        if (fixups.read::<u32>(0)? == 0) != (fixups.read::<u32>(4)? == 0) {
            diagnostics.warning(
                DiagnosticCategory::Directory,
                "CLI header v-table fixups have only one of RVA and size set",
            );
        }

        Ok(())
    }
}

impl<B: BorrowMut<RawBuffer>> Cor20Header<B> {
    /// Overwrites the header size.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_cb(&mut self, value: u32) -> Result<()> {
        self.view.write(0x00, value)
    }

    /// Overwrites the major runtime version.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_major_runtime_version(&mut self, value: u16) -> Result<()> {
        self.view.write(0x04, value)
    }

    /// Overwrites the minor runtime version.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_minor_runtime_version(&mut self, value: u16) -> Result<()> {
        self.view.write(0x06, value)
    }

    /// Overwrites the runtime flags.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_flags(&mut self, value: ComImageFlags) -> Result<()> {
        self.view.write(0x10, value.bits())
    }

    /// Overwrites the entry point field with a token.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_entry_point_token(&mut self, value: u32) -> Result<()> {
        self.view.write(0x14, value)
    }

    /// Overwrites the entry point field with an RVA.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_entry_point_rva(&mut self, value: u32) -> Result<()> {
        self.view.write(0x14, value)
    }

    /// The embedded directory slot `which`, for modification.
    pub fn directory_mut(&mut self, which: Cor20Directory) -> Option<DataDirectory<&mut RawBuffer>> {
        let slot = self.view.field_offset(which.field_offset()).ok();
        self.directories[which as usize].get_mut(self.view.buffer_mut(), || slot)
    }

    /// Location of the metadata, for modification.
    pub fn metadata_mut(&mut self) -> Option<DataDirectory<&mut RawBuffer>> {
        self.directory_mut(Cor20Directory::MetaData)
    }

    /// Location of the managed resources, for modification.
    pub fn resources_mut(&mut self) -> Option<DataDirectory<&mut RawBuffer>> {
        self.directory_mut(Cor20Directory::Resources)
    }

    /// Location of the strong name signature, for modification.
    pub fn strong_name_signature_mut(&mut self) -> Option<DataDirectory<&mut RawBuffer>> {
        self.directory_mut(Cor20Directory::StrongNameSignature)
    }

    /// Location of the code manager table, for modification.
    pub fn code_manager_table_mut(&mut self) -> Option<DataDirectory<&mut RawBuffer>> {
        self.directory_mut(Cor20Directory::CodeManagerTable)
    }

    /// Location of the v-table fixups, for modification.
    pub fn vtable_fixups_mut(&mut self) -> Option<DataDirectory<&mut RawBuffer>> {
        self.directory_mut(Cor20Directory::VTableFixups)
    }

    /// Location of the export address table jumps, for modification.
    pub fn export_address_table_jumps_mut(&mut self) -> Option<DataDirectory<&mut RawBuffer>> {
        self.directory_mut(Cor20Directory::ExportAddressTableJumps)
    }

    /// Location of the managed native header, for modification.
    pub fn managed_native_header_mut(&mut self) -> Option<DataDirectory<&mut RawBuffer>> {
        self.directory_mut(Cor20Directory::ManagedNativeHeader)
    }
}

impl<B: Borrow<RawBuffer>> std::fmt::Debug for Cor20Header<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cor20Header")
            .field("offset", &self.view.offset())
            .field("cb", &self.cb().ok())
            .field("flags", &self.flags().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::rva::Identity, test::MetadataBuilder};

    #[rustfmt::skip]
    fn header_bytes() -> Vec<u8> {
        vec![
            0x48, 0x00, 0x00, 0x00, // cb = 72
            0x02, 0x00,             // major_runtime_version = 2
            0x05, 0x00,             // minor_runtime_version = 5
            0x48, 0x00, 0x00, 0x00, // meta_data_rva = 0x48
            0x40, 0x00, 0x00, 0x00, // meta_data_size = 0x40
            0x01, 0x00, 0x00, 0x00, // flags = ILONLY
            0x01, 0x00, 0x00, 0x06, // entry_point_token = 0x06000001
            0x00, 0x00, 0x00, 0x00, // resource_rva
            0x00, 0x00, 0x00, 0x00, // resource_size
            0x00, 0x00, 0x00, 0x00, // strong_name_signature_rva
            0x00, 0x00, 0x00, 0x00, // strong_name_signature_size
            0x00, 0x00, 0x00, 0x00, // code_manager_table_rva
            0x00, 0x00, 0x00, 0x00, // code_manager_table_size
            0x00, 0x00, 0x00, 0x00, // vtable_fixups_rva
            0x00, 0x00, 0x00, 0x00, // vtable_fixups_size
            0x00, 0x00, 0x00, 0x00, // export_address_table_jmp_rva
            0x00, 0x00, 0x00, 0x00, // export_address_table_jmp_size
            0x00, 0x00, 0x00, 0x00, // managed_native_header_rva
            0x00, 0x00, 0x00, 0x00, // managed_native_header_size
        ]
    }

    #[test]
    fn crafted() {
        let buffer = RawBuffer::from_mem(header_bytes()).unwrap();
        let header = Cor20Header::resolve(&buffer, 0).unwrap();

        assert_eq!(header.cb().unwrap(), 72);
        assert_eq!(header.major_runtime_version().unwrap(), 2);
        assert_eq!(header.minor_runtime_version().unwrap(), 5);
        assert_eq!(header.flags().unwrap(), ComImageFlags::ILONLY);
        assert_eq!(header.entry_point_token().unwrap(), 0x0600_0001);
        assert_eq!(header.entry_point().unwrap(), EntryPoint::Token(0x0600_0001));

        let metadata = header.metadata().unwrap();
        assert_eq!(metadata.offset(), 0x08);
        assert_eq!(metadata.virtual_address().unwrap(), 0x48);
        assert_eq!(metadata.size().unwrap(), 0x40);

        let fixups = header.vtable_fixups().unwrap();
        assert_eq!(fixups.offset(), 0x30);
        assert_eq!(fixups.virtual_address().unwrap(), 0);
    }

    #[test]
    fn truncated_header() {
        let mut bytes = header_bytes();
        bytes.truncate(71);
        let buffer = RawBuffer::from_mem(bytes).unwrap();

        assert!(Cor20Header::resolve(&buffer, 0).is_err());
    }

    #[test]
    fn directories_memoized_per_instance() {
        let mut buffer = RawBuffer::from_mem(header_bytes()).unwrap();

        {
            let mut header = Cor20Header::resolve(&mut buffer, 0).unwrap();
            assert!(!header.directories[0].is_resolved());

            let mut metadata = header.metadata_mut().unwrap();
            metadata.set_virtual_address(0x2000).unwrap();
            assert!(header.directories[0].is_resolved());
            assert!(!header.directories[1].is_resolved());

            let mut fixups = header.vtable_fixups_mut().unwrap();
            fixups.set_size(0x10).unwrap();
        }

        let header = Cor20Header::resolve(&buffer, 0).unwrap();
        assert_eq!(header.metadata().unwrap().virtual_address().unwrap(), 0x2000);
        assert_eq!(header.vtable_fixups().unwrap().size().unwrap(), 0x10);
        assert_eq!(buffer.read_u32(0x08).unwrap(), 0x2000);
    }

    #[test]
    fn unresolvable_directory_keeps_siblings() {
        // only the scalar fields and the first slots are present
        let mut bytes = header_bytes();
        bytes.truncate(0x20);
        let buffer = RawBuffer::from_mem(bytes).unwrap();

        let header = Cor20Header::from_view(StructureView::new(&buffer, 0));
        assert!(header.strong_name_signature().is_none());
        assert!(header.managed_native_header().is_none());
        // absence is remembered
        assert!(header.directories[Cor20Directory::StrongNameSignature as usize].is_resolved());

        assert_eq!(header.cb().unwrap(), 72);
        assert!(header.metadata().is_some());
        assert!(header.resources().is_some());
    }

    #[test]
    fn native_entry_point() {
        let mut buffer = RawBuffer::from_mem(header_bytes()).unwrap();

        let mut header = Cor20Header::resolve(&mut buffer, 0).unwrap();
        header
            .set_flags(ComImageFlags::ILONLY | ComImageFlags::NATIVE_ENTRYPOINT)
            .unwrap();
        header.set_entry_point_rva(0x1234).unwrap();

        assert_eq!(header.entry_point().unwrap(), EntryPoint::Rva(0x1234));
        assert_eq!(header.entry_point_token().unwrap(), 0x1234);
        assert_eq!(buffer.read_u32(0x10).unwrap(), 0x11);
    }

    #[test]
    fn unknown_flags_retained() {
        let mut bytes = header_bytes();
        bytes[0x10..0x14].copy_from_slice(&0x8000_0001u32.to_le_bytes());
        let buffer = RawBuffer::from_mem(bytes).unwrap();

        let header = Cor20Header::resolve(&buffer, 0).unwrap();
        let flags = header.flags().unwrap();
        assert!(flags.contains(ComImageFlags::ILONLY));
        assert_eq!(flags.bits(), 0x8000_0001);
    }

    #[test]
    fn validate() {
        let mut bytes = header_bytes();
        bytes[0..4].copy_from_slice(&0x50u32.to_le_bytes());
        bytes[0x38..0x3C].copy_from_slice(&1u32.to_le_bytes());
        bytes[0x30..0x34].copy_from_slice(&0x3000u32.to_le_bytes());
        let buffer = RawBuffer::from_mem(bytes).unwrap();
        let header = Cor20Header::resolve(&buffer, 0).unwrap();

        let diagnostics = Diagnostics::new();
        header.validate(&DecoderConfig::default(), &diagnostics).unwrap();
        assert_eq!(diagnostics.count(), 3);
        assert_eq!(diagnostics.by_category(DiagnosticCategory::Header).len(), 1);
        assert_eq!(diagnostics.by_category(DiagnosticCategory::Directory).len(), 2);

        let diagnostics = Diagnostics::new();
        assert!(header.validate(&DecoderConfig::strict(), &diagnostics).is_err());

        let clean = RawBuffer::from_mem(header_bytes()).unwrap();
        let diagnostics = Diagnostics::new();
        Cor20Header::resolve(&clean, 0)
            .unwrap()
            .validate(&DecoderConfig::strict(), &diagnostics)
            .unwrap();
        assert!(!diagnostics.has_any());
    }

    #[test]
    fn metadata_root() {
        let root = MetadataBuilder::new().stream("#~", &[0u8; 24]).build();

        let mut bytes = header_bytes();
        bytes[0x0C..0x10].copy_from_slice(&(root.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&root);
        let buffer = RawBuffer::from_mem(bytes).unwrap();

        let header = Cor20Header::resolve(&buffer, 0).unwrap();
        let parsed = header.metadata_root(Identity).unwrap();
        assert_eq!(parsed.offset, 0x48);
        assert_eq!(parsed.stream_headers.len(), 1);
        assert!(parsed.tables_stream().is_some());

        let diagnostics = Diagnostics::new();
        assert!(header.metadata_root_with(Identity, &diagnostics).is_some());
        assert!(!diagnostics.has_any());

        // translation failure
        assert!(header.metadata_root(|_: u32| -> Option<u64> { None }).is_none());
        // translated somewhere without a root
        assert!(header
            .metadata_root(|_: u32| -> Option<u64> { Some(0) })
            .is_none());
    }
}
