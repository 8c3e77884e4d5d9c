use std::collections::BTreeMap;

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    metadata::tables::{CodedIndexType, TableId},
    Result,
};

/// Byte widths of indexes into the `#Strings`, `#GUID` and `#Blob` heaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapIndexWidths {
    /// Width of a `#Strings` index, 2 or 4
    pub string: u8,
    /// Width of a `#GUID` index, 2 or 4
    pub guid: u8,
    /// Width of a `#Blob` index, 2 or 4
    pub blob: u8,
}

impl HeapIndexWidths {
    /// Derives the widths from the `heap_sizes` byte of the tables stream header.
    #[must_use]
    pub fn from_flags(heap_sizes: u8) -> Self {
        let width = |bit: u8| if heap_sizes & bit != 0 { 4 } else { 2 };

        HeapIndexWidths {
            string: width(0x01),
            guid: width(0x02),
            blob: width(0x04),
        }
    }
}

impl Default for HeapIndexWidths {
    fn default() -> Self {
        Self::from_flags(0)
    }
}

/// Index and row widths derived from the row counts of a tables stream.
///
/// Every column that refers to another table or to a heap is either 2 or 4 bytes wide,
/// depending on how many rows the referenced tables hold or on the heap size flags.
/// Consequently the width of a row, and with it the location of every table, is only known
/// once all row counts have been read.
#[derive(Clone, Debug, PartialEq)]
pub struct TableInfo {
    rows: [u32; TableId::COUNT],
    heaps: HeapIndexWidths,
    coded_indexes: [u8; CodedIndexType::COUNT],
}

impl TableInfo {
    /// Builds the layout from the row counts keyed by table number.
    ///
    /// Keys outside the known table range carry no layout information and are ignored.
    #[must_use]
    pub fn new(row_counts: &BTreeMap<u8, u32>, heaps: HeapIndexWidths) -> Self {
        let mut rows = [0u32; TableId::COUNT];
        for (&id, &count) in row_counts {
            if let Some(table) = TableId::from_repr(id) {
                rows[table as usize] = count;
            }
        }

        let mut info = TableInfo {
            rows,
            heaps,
            coded_indexes: [0; CodedIndexType::COUNT],
        };

        for kind in CodedIndexType::iter() {
            info.coded_indexes[kind as usize] = info.calculate_coded_index_bits(kind);
        }

        info
    }

    /// Row count of `table`, 0 if absent.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize]
    }

    /// Heap index widths.
    #[must_use]
    pub fn heaps(&self) -> HeapIndexWidths {
        self.heaps
    }

    /// Number of bits needed to hold a row number of `table`. An empty table still counts as
    /// one bit.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn index_bits(&self, table: TableId) -> u8 {
        match self.rows(table) {
            0 => 1,
            rows => (32 - rows.leading_zeros()) as u8,
        }
    }

    /// Width of a simple index into `table`.
    #[must_use]
    pub fn index_size(&self, table: TableId) -> u8 {
        if self.rows(table) > u32::from(u16::MAX) {
            4
        } else {
            2
        }
    }

    /// Number of bits a coded index of `kind` needs, tag included.
    #[must_use]
    pub fn coded_index_bits(&self, kind: CodedIndexType) -> u8 {
        self.coded_indexes[kind as usize]
    }

    /// Width of a coded index of `kind`.
    #[must_use]
    pub fn coded_index_size(&self, kind: CodedIndexType) -> u8 {
        if self.coded_index_bits(kind) > 16 {
            4
        } else {
            2
        }
    }

    fn calculate_coded_index_bits(&self, kind: CodedIndexType) -> u8 {
        let max_bits = kind
            .tables()
            .iter()
            .flatten()
            .map(|table| self.index_bits(*table))
            .max()
            .unwrap_or(1);

        max_bits + kind.tag_bits()
    }

    /// Splits a coded index value into its table and row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag selects no table.
    pub fn decode_coded_index(&self, value: u32, kind: CodedIndexType) -> Result<(TableId, u32)> {
        let tag_bits = kind.tag_bits();
        let tag = (value & ((1 << tag_bits) - 1)) as usize;

        match kind.tables().get(tag).copied().flatten() {
            Some(table) => Ok((table, value >> tag_bits)),
            None => Err(malformed_error!(
                "Invalid tag {} for coded index {:?} - {:#x}",
                tag,
                kind,
                value
            )),
        }
    }

    /// Width in bytes of a single row of `table`.
    #[must_use]
    pub fn row_size(&self, table: TableId) -> u32 {
        let string = u32::from(self.heaps.string);
        let guid = u32::from(self.heaps.guid);
        let blob = u32::from(self.heaps.blob);
        let idx = |table: TableId| u32::from(self.index_size(table));
        let coded = |kind: CodedIndexType| u32::from(self.coded_index_size(kind));

        match table {
            TableId::Module => 2 + string + guid * 3,
            TableId::TypeRef => coded(CodedIndexType::ResolutionScope) + string * 2,
            TableId::TypeDef => {
                4 + string * 2
                    + coded(CodedIndexType::TypeDefOrRef)
                    + idx(TableId::Field)
                    + idx(TableId::MethodDef)
            }
            TableId::FieldPtr => idx(TableId::Field),
            TableId::Field => 2 + string + blob,
            TableId::MethodPtr => idx(TableId::MethodDef),
            TableId::MethodDef => 4 + 2 + 2 + string + blob + idx(TableId::Param),
            TableId::ParamPtr => idx(TableId::Param),
            TableId::Param => 2 + 2 + string,
            TableId::InterfaceImpl => idx(TableId::TypeDef) + coded(CodedIndexType::TypeDefOrRef),
            TableId::MemberRef => coded(CodedIndexType::MemberRefParent) + string + blob,
            // type byte plus padding byte
            TableId::Constant => 2 + coded(CodedIndexType::HasConstant) + blob,
            TableId::CustomAttribute => {
                coded(CodedIndexType::HasCustomAttribute)
                    + coded(CodedIndexType::CustomAttributeType)
                    + blob
            }
            TableId::FieldMarshal => coded(CodedIndexType::HasFieldMarshal) + blob,
            TableId::DeclSecurity => 2 + coded(CodedIndexType::HasDeclSecurity) + blob,
            TableId::ClassLayout => 2 + 4 + idx(TableId::TypeDef),
            TableId::FieldLayout => 4 + idx(TableId::Field),
            TableId::StandAloneSig => blob,
            TableId::EventMap => idx(TableId::TypeDef) + idx(TableId::Event),
            TableId::EventPtr => idx(TableId::Event),
            TableId::Event => 2 + string + coded(CodedIndexType::TypeDefOrRef),
            TableId::PropertyMap => idx(TableId::TypeDef) + idx(TableId::Property),
            TableId::PropertyPtr => idx(TableId::Property),
            TableId::Property => 2 + string + blob,
            TableId::MethodSemantics => {
                2 + idx(TableId::MethodDef) + coded(CodedIndexType::HasSemantics)
            }
            TableId::MethodImpl => {
                idx(TableId::TypeDef) + coded(CodedIndexType::MethodDefOrRef) * 2
            }
            TableId::ModuleRef => string,
            TableId::TypeSpec => blob,
            TableId::ImplMap => {
                2 + coded(CodedIndexType::MemberForwarded) + string + idx(TableId::ModuleRef)
            }
            TableId::FieldRVA => 4 + idx(TableId::Field),
            TableId::EncLog => 4 + 4,
            TableId::EncMap => 4,
            TableId::Assembly => 4 + 2 * 4 + 4 + blob + string * 2,
            TableId::AssemblyProcessor => 4,
            TableId::AssemblyOS => 4 * 3,
            TableId::AssemblyRef => 2 * 4 + 4 + blob * 2 + string * 2,
            TableId::AssemblyRefProcessor => 4 + idx(TableId::AssemblyRef),
            TableId::AssemblyRefOS => 4 * 3 + idx(TableId::AssemblyRef),
            TableId::File => 4 + string + blob,
            TableId::ExportedType => 4 + 4 + string * 2 + coded(CodedIndexType::Implementation),
            TableId::ManifestResource => 4 + 4 + string + coded(CodedIndexType::Implementation),
            TableId::NestedClass => idx(TableId::TypeDef) * 2,
            TableId::GenericParam => 2 + 2 + coded(CodedIndexType::TypeOrMethodDef) + string,
            TableId::MethodSpec => coded(CodedIndexType::MethodDefOrRef) + blob,
            TableId::GenericParamConstraint => {
                idx(TableId::GenericParam) + coded(CodedIndexType::TypeDefOrRef)
            }
        }
    }
}
