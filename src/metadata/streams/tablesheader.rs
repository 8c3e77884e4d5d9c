//! The header of the metadata tables stream (`#~`).
//!
//! The tables stream starts with a 24-byte fixed header, followed by one `u32` row count for
//! every table whose bit is set in the `valid` mask, in ascending bit order. Tables whose bit
//! is clear consume no row count. The rows of all present tables follow, back to back.
//!
//! ```text
//! offset  size  field
//! 0x00    4     reserved1      always 0
//! 0x04    1     major_version
//! 0x05    1     minor_version
//! 0x06    1     heap_sizes     bit 0: #Strings, bit 1: #GUID, bit 2: #Blob index is 4 bytes
//! 0x07    1     reserved2      always 1
//! 0x08    8     valid          bit n set: table n is present
//! 0x10    8     sorted         bit n set: table n is sorted
//! 0x18    4*n   row counts     n = popcount(valid)
//! ```
//!
//! [`MetadataTablesHeader`] is a live view of this layout with a getter and setter for each
//! fixed field. [`MetadataTablesHeader::decode`] turns it into a [`TablesHeader`], an owned and
//! immutable summary holding the row counts, the derived index widths and the location of
//! every table.
//!
//! # Failure policy
//!
//! Reading past the end of the buffer while decoding the fixed header or the row counts is
//! fatal. Everything else is recorded in [`Diagnostics`] and decoding continues:
//!
//! - `reserved1 != 0` or `reserved2 != 1`
//! - an empty `valid` mask
//! - a present table that declares 0 rows
//! - a bit in `valid` that no known table uses
//! - table data that runs past the end of the buffer
//!
//! [`DecoderConfig::strict`] turns the reserved field and unknown table findings into
//! [`crate::Error::Malformed`]. A present `EXTRA_DATA` word is noted as an info entry.
//!
//! # Examples
//!
//! ```rust
//! use dotlens::{metadata::streams::MetadataTablesHeader, RawBuffer, Structure};
//!
//! #[rustfmt::skip]
//! let bytes = vec![
//!     0x00, 0x00, 0x00, 0x00,                         // reserved1
//!     0x02, 0x00,                                     // version 2.0
//!     0x01,                                           // #Strings indexes are 4 bytes
//!     0x01,                                           // reserved2
//!     0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // valid: Module, MethodPtr
//!     0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // sorted
//!     0x0A, 0x00, 0x00, 0x00,                         // Module rows
//!     0x03, 0x00, 0x00, 0x00,                         // MethodPtr rows
//! ];
//! let buffer = RawBuffer::from_mem(bytes)?;
//!
//! let header = MetadataTablesHeader::resolve(&buffer, 0)?.decode()?;
//! assert_eq!(header.row_counts.get(&0x00), Some(&10));
//! assert_eq!(header.row_counts.get(&0x05), Some(&3));
//! assert_eq!(header.row_counts_end, 32);
//! assert_eq!(header.heap_widths.string, 4);
//! # Ok::<(), dotlens::Error>(())
//! ```

use std::{
    borrow::{Borrow, BorrowMut},
    collections::BTreeMap,
    ops::Range,
    sync::Arc,
};

use bitflags::bitflags;

use crate::{
    file::view::{Structure, StructureView},
    metadata::{
        config::DecoderConfig,
        diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
        tables::{CodedIndexType, HeapIndexWidths, TableId, TableInfo},
    },
    RawBuffer, Result,
};

/// Size of the fixed part of the tables stream header
pub const TABLES_HEADER_SIZE: u64 = 24;

bitflags! {
    /// The `heap_sizes` byte of the tables stream header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeapSizes: u8 {
        /// `#Strings` indexes are 4 bytes wide
        const STRING = 0x01;
        /// `#GUID` indexes are 4 bytes wide
        const GUID = 0x02;
        /// `#Blob` indexes are 4 bytes wide
        const BLOB = 0x04;
        /// Tables contain padding rows, written by edit-and-continue
        const PADDING = 0x08;
        /// The stream only holds deltas
        const DELTA_ONLY = 0x20;
        /// An extra `u32` follows the row counts
        const EXTRA_DATA = 0x40;
        /// Rows may be marked deleted
        const HAS_DELETE = 0x80;
    }
}

/// Live view of the tables stream header.
#[derive(Debug, Clone, Copy)]
pub struct MetadataTablesHeader<B> {
    view: StructureView<B>,
}

impl<B: Borrow<RawBuffer>> Structure<B> for MetadataTablesHeader<B> {
    const SIZE: u64 = TABLES_HEADER_SIZE;

    fn from_view(view: StructureView<B>) -> Self {
        MetadataTablesHeader { view }
    }

    fn view(&self) -> &StructureView<B> {
        &self.view
    }
}

impl<B: Borrow<RawBuffer>> MetadataTablesHeader<B> {
    /// Reserved, always 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn reserved1(&self) -> Result<u32> {
        self.view.read(0x00)
    }

    /// Major version of the table schemata, 2.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn major_version(&self) -> Result<u8> {
        self.view.read(0x04)
    }

    /// Minor version of the table schemata, 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn minor_version(&self) -> Result<u8> {
        self.view.read(0x05)
    }

    /// Heap size flags. Unknown bits are kept.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn heap_sizes(&self) -> Result<HeapSizes> {
        Ok(HeapSizes::from_bits_retain(self.view.read(0x06)?))
    }

    /// Reserved, always 1.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn reserved2(&self) -> Result<u8> {
        self.view.read(0x07)
    }

    /// Bit mask of present tables.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn valid(&self) -> Result<u64> {
        self.view.read(0x08)
    }

    /// Bit mask of sorted tables.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn sorted(&self) -> Result<u64> {
        self.view.read(0x10)
    }

    /// Offset of the row count of `table`, relative to the header, if the table is present.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the `valid` mask lies outside the buffer.
    pub fn row_count_delta(&self, table: u8) -> Result<Option<u64>> {
        if table >= 64 {
            return Ok(None);
        }

        let valid = self.valid()?;
        if valid & (1u64 << table) == 0 {
            return Ok(None);
        }

        let preceding = (valid & ((1u64 << table) - 1)).count_ones();
        Ok(Some(TABLES_HEADER_SIZE + 4 * u64::from(preceding)))
    }

    /// Row count of `table`, read directly from the buffer; `None` if the table is absent.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the mask or the row count lies outside the
    /// buffer.
    pub fn row_count(&self, table: u8) -> Result<Option<u32>> {
        match self.row_count_delta(table)? {
            Some(delta) => Ok(Some(self.view.read(delta)?)),
            None => Ok(None),
        }
    }

    /// Decodes the header with the default configuration into a fresh diagnostics container.
    ///
    /// # Errors
    /// See [`MetadataTablesHeader::decode_with`].
    pub fn decode(&self) -> Result<TablesHeader> {
        self.decode_with(&DecoderConfig::default(), Arc::new(Diagnostics::new()))
    }

    /// Decodes the header, recording anomalies into `diagnostics`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the fixed header, a row count, or the extra
    /// data word lies outside the buffer. Returns [`crate::Error::Malformed`] for reserved
    /// field or unknown table findings when `config` asks for it.
    pub fn decode_with(
        &self,
        config: &DecoderConfig,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<TablesHeader> {
        let view = &self.view;
        view.ensure(TABLES_HEADER_SIZE)?;

        let offset = view.offset();
        let reserved1 = self.reserved1()?;
        let major_version = self.major_version()?;
        let minor_version = self.minor_version()?;
        let heap_sizes = self.heap_sizes()?;
        let reserved2 = self.reserved2()?;
        let valid = self.valid()?;
        let sorted = self.sorted()?;

        if reserved1 != 0 {
            if config.strict_reserved {
                return Err(malformed_error!(
                    "Tables header reserved1 is {:#x}, expected 0",
                    reserved1
                ));
            }

            diagnostics.push(
                Diagnostic::new(
                    DiagnosticSeverity::Warning,
                    DiagnosticCategory::Header,
                    format!("Tables header reserved1 is {:#x}, expected 0", reserved1),
                )
                .with_offset(offset),
            );
        }

        if reserved2 != 1 {
            if config.strict_reserved {
                return Err(malformed_error!(
                    "Tables header reserved2 is {:#x}, expected 1",
                    reserved2
                ));
            }

            diagnostics.push(
                Diagnostic::new(
                    DiagnosticSeverity::Warning,
                    DiagnosticCategory::Header,
                    format!("Tables header reserved2 is {:#x}, expected 1", reserved2),
                )
                .with_offset(offset + 7),
            );
        }

        if valid == 0 {
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticSeverity::Warning,
                    DiagnosticCategory::Table,
                    "Tables header declares no tables",
                )
                .with_offset(offset + 8),
            );
        }

        let heap_widths = HeapIndexWidths::from_flags(heap_sizes.bits());

        let mut row_counts = BTreeMap::new();
        let mut delta = TABLES_HEADER_SIZE;
        let mut remaining = valid;
        while remaining != 0 {
            #[allow(clippy::cast_possible_truncation)]
            let table = remaining.trailing_zeros() as u8;
            remaining &= remaining - 1;

            let rows: u32 = view.read(delta)?;
            log::trace!("Table {:#04x} declares {} rows", table, rows);

            if TableId::from_repr(table).is_none() {
                if config.reject_unknown_tables {
                    return Err(malformed_error!("Unknown table {:#04x} is present", table));
                }

                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Warning,
                        DiagnosticCategory::Table,
                        format!("Unknown table {:#04x} is present", table),
                    )
                    .with_table(table),
                );
            }

            if rows == 0 {
                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Warning,
                        DiagnosticCategory::Table,
                        format!("Table {:#04x} is present but declares 0 rows", table),
                    )
                    .with_offset(view.field_offset(delta)?)
                    .with_table(table),
                );
            }

            row_counts.insert(table, rows);
            delta += 4;
        }

        let row_counts_end = view.field_offset(delta)?;
        let (extra_data, tables_offset) = if heap_sizes.contains(HeapSizes::EXTRA_DATA) {
            let extra_data = view.read::<u32>(delta)?;
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticSeverity::Info,
                    DiagnosticCategory::Header,
                    format!("Tables header carries extra data {:#x}", extra_data),
                )
                .with_offset(row_counts_end),
            );

            (Some(extra_data), row_counts_end + 4)
        } else {
            (None, row_counts_end)
        };

        let info = TableInfo::new(&row_counts, heap_widths);
        let tables = locate_tables(
            view.buffer(),
            &row_counts,
            &info,
            tables_offset,
            &diagnostics,
        );

        Ok(TablesHeader {
            offset,
            reserved1,
            major_version,
            minor_version,
            heap_sizes,
            reserved2,
            valid,
            sorted,
            heap_widths,
            row_counts,
            row_counts_end,
            extra_data,
            tables_offset,
            info,
            tables,
            diagnostics,
        })
    }
}

/// Computes the extent of every present table, in ascending table order.
///
/// The first table with an unknown id ends the computation, as its row width and therefore
/// the start of every later table is unknown.
fn locate_tables(
    buffer: &RawBuffer,
    row_counts: &BTreeMap<u8, u32>,
    info: &TableInfo,
    tables_offset: u64,
    diagnostics: &Diagnostics,
) -> BTreeMap<TableId, Range<u64>> {
    let mut tables = BTreeMap::new();
    let mut cursor = tables_offset;
    let mut reported = false;

    for (&id, &rows) in row_counts {
        let Some(table) = TableId::from_repr(id) else {
            log::debug!(
                "Table {:#04x} has no known layout, later tables cannot be located",
                id
            );
            break;
        };

        let start = cursor;
        let end = start + u64::from(rows) * u64::from(info.row_size(table));
        if !reported && end > buffer.len() as u64 {
            reported = true;
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticSeverity::Warning,
                    DiagnosticCategory::Table,
                    format!(
                        "Table {:?} data {:#x}..{:#x} exceeds the buffer of {} bytes",
                        table,
                        start,
                        end,
                        buffer.len()
                    ),
                )
                .with_offset(start)
                .with_table(id),
            );
        }

        tables.insert(table, start..end);
        cursor = end;
    }

    tables
}

impl<B: BorrowMut<RawBuffer>> MetadataTablesHeader<B> {
    /// Overwrites `reserved1`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_reserved1(&mut self, value: u32) -> Result<()> {
        self.view.write(0x00, value)
    }

    /// Overwrites the major version.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_major_version(&mut self, value: u8) -> Result<()> {
        self.view.write(0x04, value)
    }

    /// Overwrites the minor version.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_minor_version(&mut self, value: u8) -> Result<()> {
        self.view.write(0x05, value)
    }

    /// Overwrites the heap size flags.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_heap_sizes(&mut self, value: HeapSizes) -> Result<()> {
        self.view.write(0x06, value.bits())
    }

    /// Overwrites `reserved2`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_reserved2(&mut self, value: u8) -> Result<()> {
        self.view.write(0x07, value)
    }

    /// Overwrites the `valid` mask.
    ///
    /// The row counts are not moved; changing the mask reinterprets the words that follow
    /// the header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_valid(&mut self, value: u64) -> Result<()> {
        self.view.write(0x08, value)
    }

    /// Overwrites the `sorted` mask.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the buffer.
    pub fn set_sorted(&mut self, value: u64) -> Result<()> {
        self.view.write(0x10, value)
    }

    /// Overwrites the row count of a present table.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table is not present, and
    /// [`crate::Error::OutOfBounds`] if the row count lies outside the buffer.
    pub fn set_row_count(&mut self, table: u8, rows: u32) -> Result<()> {
        let Some(delta) = self.row_count_delta(table)? else {
            return Err(malformed_error!("Table {:#04x} is not present", table));
        };

        self.view.write(delta, rows)
    }
}

/// The decoded tables stream header.
///
/// An owned snapshot: it holds no reference to the buffer, and later writes to the buffer are
/// not reflected. Decode again to observe them.
#[derive(Debug, Clone)]
pub struct TablesHeader {
    /// File offset of the header
    pub offset: u64,
    /// Reserved, always 0
    pub reserved1: u32,
    /// Major version of the table schemata
    pub major_version: u8,
    /// Minor version of the table schemata
    pub minor_version: u8,
    /// Heap size flags, unknown bits kept
    pub heap_sizes: HeapSizes,
    /// Reserved, always 1
    pub reserved2: u8,
    /// Bit mask of present tables
    pub valid: u64,
    /// Bit mask of sorted tables
    pub sorted: u64,
    /// Index widths of the three heaps
    pub heap_widths: HeapIndexWidths,
    /// Row counts keyed by table bit; only bits set in `valid` have a key
    pub row_counts: BTreeMap<u8, u32>,
    /// File offset right after the last row count
    pub row_counts_end: u64,
    /// The extra data word, present with [`HeapSizes::EXTRA_DATA`]
    pub extra_data: Option<u32>,
    /// File offset of the first table row
    pub tables_offset: u64,
    info: TableInfo,
    tables: BTreeMap<TableId, Range<u64>>,
    diagnostics: Arc<Diagnostics>,
}

impl TablesHeader {
    /// Returns true if the bit of `table` is set in `valid`.
    #[must_use]
    pub fn has_table(&self, table: u8) -> bool {
        table < 64 && self.valid & (1u64 << table) != 0
    }

    /// Returns true if `table` is present.
    #[must_use]
    pub fn has_table_by_id(&self, table: TableId) -> bool {
        self.has_table(table as u8)
    }

    /// Returns true if `table` is marked as sorted.
    #[must_use]
    pub fn is_sorted(&self, table: TableId) -> bool {
        self.sorted & table.mask() != 0
    }

    /// Row count of `table`; 0 if absent.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.row_counts.get(&(table as u8)).copied().unwrap_or(0)
    }

    /// Present tables with a known id, in ascending order.
    pub fn present_tables(&self) -> impl Iterator<Item = TableId> + '_ {
        self.row_counts
            .keys()
            .filter_map(|&table| TableId::from_repr(table))
    }

    /// Number of bits set in `valid`.
    #[must_use]
    pub fn table_count(&self) -> u32 {
        self.valid.count_ones()
    }

    /// Index and row widths derived from the row counts.
    #[must_use]
    pub fn table_info(&self) -> &TableInfo {
        &self.info
    }

    /// Width of a row of `table` in bytes.
    #[must_use]
    pub fn row_size(&self, table: TableId) -> u32 {
        self.info.row_size(table)
    }

    /// File offset of the first row of `table`, if the table is present and could be located.
    #[must_use]
    pub fn table_offset(&self, table: TableId) -> Option<u64> {
        self.tables.get(&table).map(|range| range.start)
    }

    /// File range occupied by the rows of `table`, if the table is present and could be
    /// located. The range may extend past the end of the buffer.
    #[must_use]
    pub fn table_range(&self, table: TableId) -> Option<Range<u64>> {
        self.tables.get(&table).cloned()
    }

    /// Splits a coded index value into its table and row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag selects no table.
    pub fn decode_coded_index(&self, value: u32, kind: CodedIndexType) -> Result<(TableId, u32)> {
        self.info.decode_coded_index(value, kind)
    }

    /// Anomalies recorded while decoding.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }
}
