//! Metadata root (BSJB header) of .NET assemblies.
//!
//! The metadata directory of the CLI header points to this structure. It carries a version
//! string and the headers of the metadata streams, which locate the heaps and the tables stream
//! relative to the start of the root.
//!
//! # Reference
//! - [ECMA-335 II.24.2.1](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{
    file::{
        io::{read_le, read_le_at},
        view::Structure,
    },
    metadata::{
        diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
        streams::{MetadataTablesHeader, StreamHeader},
    },
    RawBuffer, Result,
};

/// The magic signature of the metadata root, `BSJB`
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// Upper bound on the number of stream headers accepted
const MAX_STREAMS: u16 = 8;

/// The root of the physical metadata.
///
/// Unlike the overlay views, the root is parsed into an owned structure: it is small,
/// variable-length, and only read once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    /// File offset of the root; 0 when parsed from a detached slice
    pub offset: u64,
    /// Magic signature for physical metadata, always `0x424A_5342`
    pub signature: u32,
    /// Major version, 1 (ignore on read)
    pub major_version: u16,
    /// Minor version, 1 (ignore on read)
    pub minor_version: u16,
    /// Reserved, always 0
    pub reserved: u32,
    /// Number of bytes allocated to hold the version string, including padding
    pub length: u32,
    /// Version string, without its terminator and padding
    pub version: String,
    /// Reserved, always 0
    pub flags: u16,
    /// Number of streams
    pub stream_number: u16,
    /// Headers of all streams, in file order
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Create a `Root` object from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this object shall be created
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the root or a stream exceeds `data`, and
    /// [`crate::Error::Malformed`] for a bad signature or stream count.
    pub fn read(data: &[u8]) -> Result<Root> {
        Self::parse(data, 0, &Diagnostics::new())
    }

    /// Same as [`Root::read`], recording streams with unknown names in `diagnostics`.
    ///
    /// # Errors
    /// Any error of [`Root::read`].
    pub fn read_with(data: &[u8], diagnostics: &Diagnostics) -> Result<Root> {
        Self::parse(data, 0, diagnostics)
    }

    fn parse(data: &[u8], base: u64, diagnostics: &Diagnostics) -> Result<Root> {
        if data.len() < 36 {
            return Err(out_of_bounds_error!(0, 36, data.len()));
        }

        let signature = read_le::<u32>(data)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {:#x}",
                signature
            ));
        }

        let length = read_le_at::<u32>(data, &mut 12)?;
        let Some(version_end) = usize::try_from(length)
            .ok()
            .and_then(|length| length.checked_add(16))
            .filter(|end| *end <= data.len())
        else {
            return Err(out_of_bounds_error!(16, u64::from(length), data.len()));
        };

        let version_bytes = &data[16..version_end];
        let version_len = version_bytes
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(version_bytes.len());
        let version = String::from_utf8_lossy(&version_bytes[..version_len]).into_owned();

        let mut cursor = version_end;
        let flags = read_le_at::<u16>(data, &mut cursor)?;
        let stream_number = read_le_at::<u16>(data, &mut cursor)?;
        // 9 - min size that a valid StreamHeader can be
        if stream_number == 0
            || stream_number > MAX_STREAMS
            || usize::from(stream_number) * 9 > data.len()
        {
            return Err(malformed_error!("Invalid stream count - {}", stream_number));
        }

        let mut stream_headers = Vec::with_capacity(usize::from(stream_number));
        let mut stream_offset = cursor;
        for _ in 0..stream_number {
            if stream_offset > data.len() {
                return Err(out_of_bounds_error!(stream_offset as u64, 9, data.len()));
            }

            let stream = StreamHeader::from(&data[stream_offset..])?;
            let stream_end = u64::from(stream.offset) + u64::from(stream.size);
            if stream_end > data.len() as u64 {
                return Err(out_of_bounds_error!(
                    u64::from(stream.offset),
                    u64::from(stream.size),
                    data.len()
                ));
            }

            if !stream.is_known() {
                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Warning,
                        DiagnosticCategory::Stream,
                        format!("Unknown stream {}", stream.name),
                    )
                    .with_offset(base + stream_offset as u64),
                );
            }

            stream_offset += stream.header_size();
            stream_headers.push(stream);
        }

        Ok(Root {
            offset: base,
            signature,
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            reserved: read_le::<u32>(&data[8..])?,
            length,
            version,
            flags,
            stream_number,
            stream_headers,
        })
    }

    /// Parses the root at `offset` within `buffer`, limited to `size` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the region exceeds the buffer, and any error of
    /// [`Root::read`].
    pub fn read_at(buffer: &RawBuffer, offset: u64, size: u64) -> Result<Root> {
        Self::read_at_with(buffer, offset, size, &Diagnostics::new())
    }

    /// Same as [`Root::read_at`], recording streams with unknown names in `diagnostics`.
    ///
    /// # Errors
    /// Any error of [`Root::read_at`].
    pub fn read_at_with(
        buffer: &RawBuffer,
        offset: u64,
        size: u64,
        diagnostics: &Diagnostics,
    ) -> Result<Root> {
        Self::parse(buffer.data_slice(offset, size)?, offset, diagnostics)
    }

    /// The first stream header called `name`.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|stream| stream.name == name)
    }

    /// The tables stream, compressed (`#~`) or uncompressed (`#-`).
    #[must_use]
    pub fn tables_stream(&self) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|stream| stream.is_tables())
    }

    /// File offset of `stream`.
    #[must_use]
    pub fn stream_offset(&self, stream: &StreamHeader) -> u64 {
        self.offset + u64::from(stream.offset)
    }

    /// Lays the tables stream header view over `buffer`.
    ///
    /// Returns `None` if there is no tables stream or its fixed header exceeds the buffer.
    pub fn tables_header<'a>(
        &self,
        buffer: &'a RawBuffer,
    ) -> Option<MetadataTablesHeader<&'a RawBuffer>> {
        let stream = self.tables_stream()?;
        MetadataTablesHeader::resolve(buffer, self.stream_offset(stream)).ok()
    }

    /// Lays a writable tables stream header view over `buffer`.
    pub fn tables_header_mut<'a>(
        &self,
        buffer: &'a mut RawBuffer,
    ) -> Option<MetadataTablesHeader<&'a mut RawBuffer>> {
        let stream = self.tables_stream()?;
        MetadataTablesHeader::resolve(buffer, self.stream_offset(stream)).ok()
    }
}
