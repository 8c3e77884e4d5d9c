use strum::{EnumCount, EnumIter, FromRepr};

/// Identifiers of the ECMA-335 metadata tables.
///
/// The discriminant of each variant is the table number, which is also its bit position in the
/// `valid` and `sorted` masks of the tables stream header and the high byte of metadata tokens
/// referring to its rows. Tables `0x00..=0x2C` are contiguous, including the `*Ptr` indirection
/// tables of uncompressed (`#-`) streams and the edit-and-continue log tables.
///
/// ## Reference
/// * '<https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf>' - Partition II, 22
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, EnumIter, EnumCount, FromRepr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRVA = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOS = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOS = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

impl TableId {
    /// Bit of this table in the `valid` / `sorted` masks.
    #[must_use]
    pub fn mask(self) -> u64 {
        1u64 << (self as u8)
    }

    /// Metadata token of `row` in this table.
    #[must_use]
    pub fn token(self, row: u32) -> u32 {
        (u32::from(self as u8) << 24) | (row & 0x00FF_FFFF)
    }
}

impl TryFrom<u8> for TableId {
    type Error = crate::Error;

    fn try_from(value: u8) -> crate::Result<Self> {
        TableId::from_repr(value).ok_or_else(|| malformed_error!("Unknown table id - {:#04x}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn contiguous_ids() {
        assert_eq!(TableId::COUNT, 0x2D);

        for (expected, id) in TableId::iter().enumerate() {
            assert_eq!(id as usize, expected);
            assert_eq!(TableId::from_repr(expected as u8), Some(id));
        }

        assert_eq!(TableId::from_repr(0x2D), None);
        assert_eq!(TableId::from_repr(0x30), None);
        assert!(TableId::try_from(0x3F).is_err());
        assert_eq!(TableId::try_from(0x20).unwrap(), TableId::Assembly);
    }

    #[test]
    fn mask_and_token() {
        assert_eq!(TableId::Module.mask(), 0x1);
        assert_eq!(TableId::TypeDef.mask(), 0x4);
        assert_eq!(TableId::GenericParamConstraint.mask(), 1 << 0x2C);

        assert_eq!(TableId::MethodDef.token(1), 0x0600_0001);
        assert_eq!(TableId::Module.token(0x1234), 0x0000_1234);
    }
}
