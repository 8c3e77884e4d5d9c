//! CLI metadata location and the tables stream header.
//!
//! This module covers the path from the PE data directories to the metadata tables:
//!
//! - [`directory`] - PE data directory slots and their resolution into typed structures
//! - [`cor20header`] - the CLI header and its own directories
//! - [`root`] - the metadata root (`BSJB`) and its stream headers
//! - [`streams`] - stream headers and the tables stream header decoder
//! - [`tables`] - table ids, coded indexes and row widths
//! - [`diagnostics`] / [`config`] - anomaly reporting and decoder strictness
//!
//! # Examples
//!
//! ```rust
//! use dotlens::metadata::root::Root;
//!
//! # fn decode(data: &[u8]) -> dotlens::Result<()> {
//! let root = Root::read(data)?;
//! if let Some(tables) = root.tables_stream() {
//!     println!("{} at {:#x}, {} bytes", tables.name, tables.offset, tables.size);
//! }
//! # Ok(())
//! # }
//! ```

/// Decoder strictness settings
pub mod config;
/// Implementation of the Header of CIL
pub mod cor20header;
/// Anomalies recorded while decoding
pub mod diagnostics;
/// PE data directories and their resolution
pub mod directory;
/// Implementation of the root metadata structure
pub mod root;
/// Implementation of the metadata streams
pub mod streams;
/// Metadata table ids and layout
pub mod tables;
