//! Metadata table identifiers and layout.
//!
//! The `#~` stream stores up to 64 tables back to back, without any per-table header. Locating
//! a table therefore requires the width of every row before it, and those widths depend on the
//! row counts of the referenced tables and on the heap size flags. This module holds the
//! pieces needed for that computation:
//!
//! - [`TableId`] - the table numbers known to ECMA-335
//! - [`CodedIndexType`] - the multi-table index kinds and their candidate tables
//! - [`TableInfo`] - index widths and row widths for a given set of row counts
//!
//! Decoding individual rows is out of scope; [`TableInfo::row_size`] only provides what is
//! needed to find where each table starts and ends.

mod codedindex;
mod tableid;
mod tableinfo;

pub use codedindex::CodedIndexType;
pub use tableid::TableId;
pub use tableinfo::{HeapIndexWidths, TableInfo};
