use crate::{file::io::read_le, Result};

/// Longest stream name the format allows, without the terminator
const MAX_NAME_LEN: usize = 32;

/// Stream names this crate recognizes
const KNOWN_STREAMS: [&str; 6] = ["#Strings", "#US", "#Blob", "#GUID", "#~", "#-"];

/// A stream header provides the names, and the position and length of a particular table or
/// heap. The length of a stream header structure is not fixed, but depends on the length of
/// its name field (a variable length null-terminated string, padded to a 4-byte boundary).
///
/// ## Reference
/// * '<https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf>' - Partition II, 24.2.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Memory offset to start of this stream from start of the metadata root
    pub offset: u32,
    /// Size of this stream in bytes, shall be a multiple of 4
    pub size: u32,
    /// Name of the stream as null-terminated variable length array of ASCII characters
    pub name: String,
}

impl StreamHeader {
    /// Create a `StreamHeader` object from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this object shall be created
    ///
    /// Headers of streams this crate does not know are accepted; see [`StreamHeader::is_known`].
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header is truncated, and
    /// [`crate::Error::Malformed`] if the name is unterminated.
    pub fn from(data: &[u8]) -> Result<StreamHeader> {
        if data.len() < 9 {
            return Err(out_of_bounds_error!(0, 9, data.len()));
        }

        let name_bytes = &data[8..data.len().min(8 + MAX_NAME_LEN + 1)];
        let Some(name_len) = name_bytes.iter().position(|byte| *byte == 0) else {
            return Err(malformed_error!("Unterminated stream header name"));
        };

        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

        Ok(StreamHeader {
            offset: read_le::<u32>(data)?,
            size: read_le::<u32>(&data[4..])?,
            name,
        })
    }

    /// Size of the serialized header, including the padded name.
    #[must_use]
    pub fn header_size(&self) -> usize {
        8 + ((self.name.len() + 1 + 3) & !3)
    }

    /// Returns true for the heaps and tables streams of ECMA-335.
    #[must_use]
    pub fn is_known(&self) -> bool {
        KNOWN_STREAMS.contains(&self.name.as_str())
    }

    /// Returns true for the compressed (`#~`) or uncompressed (`#-`) tables stream.
    #[must_use]
    pub fn is_tables(&self) -> bool {
        self.name == "#~" || self.name == "#-"
    }
}
