//! Error types shared across the ewfkit crates

use thiserror::Error;

/// The main error type for EWF operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the underlying file pool
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File header bytes do not match any EWF variant
    #[error("Format magic mismatch: {0}")]
    FormatMagicMismatch(String),

    /// A fixed field differs across segment files
    #[error("Format field mismatch: {0}")]
    FormatFieldMismatch(String),

    /// Requested write would exceed the maximum number of segments
    #[error("Format limit exceeded: {0}")]
    FormatLimitExceeded(String),

    /// Checksum verification failed for a chunk or section descriptor
    #[error("Checksum mismatch: {0}")]
    ChecksumMismatch(String),

    /// Chunk index has no mapped location
    #[error("Invalid chunk: {0}")]
    InvalidChunk(u64),

    /// Section descriptor or payload structurally invalid
    #[error("Corrupted section: {0}")]
    CorruptedSection(String),

    /// Format, compression method or date format not implemented
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    /// Caller contract violation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for EWF operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a format magic mismatch error
    pub fn magic_mismatch(msg: impl Into<String>) -> Self {
        Error::FormatMagicMismatch(msg.into())
    }

    /// Create a format field mismatch error
    pub fn field_mismatch(msg: impl Into<String>) -> Self {
        Error::FormatFieldMismatch(msg.into())
    }

    /// Create a format limit exceeded error
    pub fn limit_exceeded(msg: impl Into<String>) -> Self {
        Error::FormatLimitExceeded(msg.into())
    }

    /// Create a checksum mismatch error
    pub fn checksum_mismatch(msg: impl Into<String>) -> Self {
        Error::ChecksumMismatch(msg.into())
    }

    /// Create a corrupted section error
    pub fn corrupted_section(msg: impl Into<String>) -> Self {
        Error::CorruptedSection(msg.into())
    }

    /// Create an unsupported value error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedValue(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
