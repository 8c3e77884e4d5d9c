//! # dotlens Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dotlens library.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotlens operations
pub use crate::Error;

/// The result type used throughout dotlens
pub use crate::Result;

/// Decoder strictness settings
pub use crate::DecoderConfig;

// ================================================================================================
// Buffers and Views
// ================================================================================================

/// Owned bytes and the overlay primitives
pub use crate::{LazyStructure, RawBuffer, Structure, StructureView};

/// Little-endian primitive I/O
pub use crate::io::{read_le, read_le_at, write_le_at, CilIO};

/// RVA translation
pub use crate::rva::{Identity, RvaTranslator, SectionMap};

/// Main entry point for whole PE files
pub use crate::PeImage;

// ================================================================================================
// Metadata Structures
// ================================================================================================

/// Data directory slots and their resolver
pub use crate::metadata::directory::{
    DataDirectories, DataDirectory, DirectoryEntry, DATA_DIRECTORY_SIZE,
};

/// The CLI header
pub use crate::metadata::cor20header::{
    ComImageFlags, Cor20Directory, Cor20Header, EntryPoint, COR20_HEADER_SIZE,
};

/// The metadata root
pub use crate::metadata::root::{Root, CIL_HEADER_MAGIC};

/// Stream headers and the tables stream header
pub use crate::metadata::streams::{
    HeapSizes, MetadataTablesHeader, StreamHeader, TablesHeader, TABLES_HEADER_SIZE,
};

/// Table ids and layout
pub use crate::metadata::tables::{CodedIndexType, HeapIndexWidths, TableId, TableInfo};

/// Diagnostics
pub use crate::metadata::diagnostics::{
    Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics,
};
