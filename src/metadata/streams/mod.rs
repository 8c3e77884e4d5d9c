//! Metadata stream headers and the tables stream header.
//!
//! The metadata root lists its streams through [`StreamHeader`] entries. Each one names a
//! stream and locates it relative to the start of the root:
//!
//! - **`#Strings`**, **`#US`**, **`#Blob`**, **`#GUID`** - the heaps; only their location is
//!   decoded here
//! - **`#~`** / **`#-`** - the tables stream, whose header [`MetadataTablesHeader`] declares
//!   which tables are present, their row counts and the width of heap indexes
//!
//! [`MetadataTablesHeader::decode`] produces a [`TablesHeader`], from which the location of
//! every table in the stream can be queried.
//!
//! # Reference
//! - [ECMA-335 II.24.2.2 and II.24.2.6](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

mod streamheader;
pub use streamheader::StreamHeader;

mod tablesheader;
pub use tablesheader::{HeapSizes, MetadataTablesHeader, TablesHeader, TABLES_HEADER_SIZE};
