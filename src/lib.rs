// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # dotlens
//!
//! Zero-copy structure overlays for the CLI parts of .NET PE files.
//!
//! `dotlens` keeps the bytes of an image in a single [`RawBuffer`] and looks at them through
//! typed views instead of parsing them into owned copies. Reading a field reads the buffer,
//! writing a field writes the buffer, and every other view over the same bytes observes the
//! change immediately.
//!
//! ## Features
//!
//! - **Bounds-checked primitives** - every little-endian read and write is checked against the
//!   buffer, no accessor panics on hostile input
//! - **Typed overlays** - [`StructureView`] and the [`Structure`] trait lay fixed-size
//!   structures over arbitrary offsets
//! - **Lazy data directories** - PE and CLI header directory slots resolve on first use; a
//!   corrupt slot yields `None` without affecting its siblings
//! - **Tables stream header** - the sparse row count array of the `#~` stream is decoded into
//!   row counts, heap index widths and table locations
//! - **Diagnostics** - anomalies are recorded instead of aborting, with a strict mode for the
//!   ones that indicate tampering
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotlens::prelude::*;
//!
//! let image = PeImage::from_file("tests/samples/WindowsBase.dll".as_ref())?;
//!
//! if let Some(cor20) = image.cor20() {
//!     println!("Runtime {}.{}", cor20.major_runtime_version()?, cor20.minor_runtime_version()?);
//! }
//!
//! let tables = image.decode_tables_header()?;
//! for table in tables.present_tables() {
//!     println!("{:?}: {} rows at {:#x?}", table, tables.row_count(table), tables.table_offset(table));
//! }
//! # Ok::<(), dotlens::Error>(())
//! ```
//!
//! Buffers that do not hold a whole PE file can be used directly; RVA translation is then up
//! to the caller:
//!
//! ```rust
//! use dotlens::{metadata::directory::DataDirectories, rva::Identity, RawBuffer};
//!
//! let buffer = RawBuffer::from_mem(vec![0u8; 16 * 8])?;
//! let directories = DataDirectories::new(&buffer, 0, 16, Identity);
//!
//! assert!(directories.cor20().is_none());
//! # Ok::<(), dotlens::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`RawBuffer`], [`view`], [`rva`] and [`image`]: bytes, overlays and PE container access
//! - [`metadata`]: data directories, the CLI header, the metadata root and the tables stream
//!   header
//!
//! ## Standards
//!
//! - [ECMA-335 6th Edition](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)
//! - [PE Format](https://learn.microsoft.com/en-us/windows/win32/debug/pe-format)

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use dotlens::prelude::*;
///
/// let image = PeImage::from_file("tests/samples/WindowsBase.dll".as_ref())?;
/// let header = image.decode_tables_header()?;
/// println!("{} tables", header.table_count());
/// # Ok::<(), dotlens::Error>(())
/// ```
pub mod prelude;

/// Data directories, the CLI header, the metadata root and the tables stream header
pub mod metadata;

pub use file::{image, io, rva, view};

/// `dotlens` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotlens` Error type
///
/// # Examples
///
/// ```rust
/// use dotlens::{Error, RawBuffer};
///
/// let buffer = RawBuffer::from_mem(vec![0u8; 2])?;
/// match buffer.read_u32(0) {
///     Err(Error::OutOfBounds { offset, width, len }) => {
///         assert_eq!((offset, width, len), (0, 4, 2));
///     }
///     _ => unreachable!(),
/// }
/// # Ok::<(), dotlens::Error>(())
/// ```
pub use error::Error;

/// The owned bytes every view is laid over.
pub use file::RawBuffer;

/// Overlay primitives.
pub use file::view::{LazyStructure, Structure, StructureView};

/// A PE file whose data directories are resolved through overlay views.
pub use file::image::PeImage;

/// Decoder strictness settings.
pub use metadata::config::DecoderConfig;

/// The decoded tables stream header.
pub use metadata::streams::{MetadataTablesHeader, TablesHeader};
