//! Decoder configuration
//!
//! Controls how strictly the resolvers and the tables header decoder treat structures that
//! deviate from the format without making decoding impossible.

/// Configuration for directory resolution and metadata header decoding
///
/// Anomalies are recorded as diagnostics by default. The strict preset promotes the ones that
/// indicate a hand-crafted or damaged image into [`crate::Error::Malformed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Fail on reserved fields of the tables stream header that hold unexpected values
    /// (`reserved1 != 0`, `reserved2 != 1`) instead of recording a warning
    pub strict_reserved: bool,

    /// Fail on table bits in the `valid` mask that no known table uses, instead of recording a
    /// warning and stopping the table offset computation at that table
    pub reject_unknown_tables: bool,

    /// Treat a data directory slot with a non-zero RVA but a zero size as absent
    pub require_directory_size: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            strict_reserved: false,
            reject_unknown_tables: false,
            require_directory_size: true,
        }
    }
}

impl DecoderConfig {
    /// Creates the default, lenient configuration
    #[must_use]
    pub fn lenient() -> Self {
        Self::default()
    }

    /// Creates a configuration which rejects every anomaly the decoder can detect
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict_reserved: true,
            reject_unknown_tables: true,
            require_directory_size: true,
        }
    }

    /// Creates a configuration which resolves any directory slot with a non-zero RVA, even if
    /// its declared size is zero
    ///
    /// Some packers zero the size of the CLI header directory while the loader still honors
    /// the RVA.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            require_directory_size: false,
            ..Self::default()
        }
    }
}
