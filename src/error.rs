use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    ($offset:expr, $width:expr, $len:expr) => {
        crate::Error::OutOfBounds {
            offset: $offset,
            width: $width,
            len: $len,
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Only a few conditions are hard errors. Structures reached through data directories or lazy
/// sub-structure fields never surface these errors; they degrade to `None` instead, so a single
/// damaged region cannot abort the inspection of the rest of the file.
///
/// # Error Categories
///
/// ## Structural Errors
/// - [`Error::OutOfBounds`] - An access (or a declared region) would leave the buffer
/// - [`Error::Malformed`] - A sanity-checked field holds a value that cannot be worked with
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE container parsing errors from the goblin crate
///
/// # Examples
///
/// ```rust,no_run
/// use dotlens::{Error, RawBuffer};
///
/// let buffer = RawBuffer::from_mem(vec![0x4D, 0x5A])?;
/// match buffer.read_u32(0) {
///     Ok(value) => println!("value: {value:#x}"),
///     Err(Error::OutOfBounds { offset, width, len }) => {
///         eprintln!("{width} bytes at {offset:#x} do not fit into {len} bytes");
///     }
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// # Ok::<(), dotlens::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// Raised for fields whose value makes any further interpretation meaningless, and for
    /// sanity checks that [`crate::DecoderConfig::strict`] promotes from a diagnostic to an
    /// error. The error includes the source location where the malformation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted.
    ///
    /// Every primitive accessor checks `offset + width <= len` before touching memory. The
    /// same error reports a declared region (a directory size, a row count run) that does not
    /// fit into the buffer.
    #[error("Out of bound access - {width} bytes at offset {offset:#x}, buffer holds {len} bytes")]
    OutOfBounds {
        /// Start of the rejected access
        offset: u64,
        /// Number of bytes the access required
        width: u64,
        /// Length of the underlying buffer
        len: usize,
    },

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while opening or mapping an input file.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE container parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}
