use std::io;

use thiserror::Error;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, CabError>;

/// The ways reading or extracting a cabinet can fail.
///
/// Parsing errors abort [`Cabinet`](crate::Cabinet) construction entirely;
/// there is never a partially-usable archive value.  Extraction errors abort
/// only the extraction in progress, and the archive remains usable for other
/// files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CabError {
    /// The header is structurally invalid (bad `MSCF` signature, impossible
    /// field value, or an out-of-range table index).
    #[error("malformed cabinet header: {0}")]
    MalformedHeader(String),

    /// The header declares a format version newer than this crate supports.
    #[error("version {major}.{minor} cabinet files are not supported")]
    UnsupportedVersion {
        /// Major version from the header.
        major: u8,
        /// Minor version from the header.
        minor: u8,
    },

    /// A declared table or data-block offset lies beyond the end of the
    /// cabinet.
    #[error("table offset {offset:#x} is beyond the cabinet length {length:#x}")]
    InvalidTableOffset {
        /// The offending offset.
        offset: u64,
        /// The total length of the underlying stream.
        length: u64,
    },

    /// The cabinet ended before a structure or data block was complete.
    #[error("cabinet data is truncated")]
    TruncatedData,

    /// A data block's recorded checksum does not match its contents.
    #[error(
        "checksum error in data block {block} \
         (expected {expected:08x}, actual {actual:08x})"
    )]
    ChecksumMismatch {
        /// Index of the data block within its folder.
        block: usize,
        /// Checksum recorded in the block header.
        expected: u32,
        /// Checksum computed over the block contents.
        actual: u32,
    },

    /// A data block failed to decompress, or decompressed to the wrong
    /// length.
    #[error("corrupt data block: {0}")]
    CorruptBlock(String),

    /// An uncompressed block's stored size disagrees with its payload size.
    #[error(
        "stored block size mismatch (header says {expected} bytes, \
         payload is {actual} bytes)"
    )]
    SizeMismatch {
        /// Uncompressed size recorded in the block header.
        expected: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// The requested file name or index is not in the cabinet's catalog.
    #[error("no such file in cabinet: {0:?}")]
    UnknownFile(String),

    /// The folder uses a compression type this crate cannot decode.
    #[error("unsupported compression type: {0:#06x}")]
    UnsupportedCodec(u16),

    /// An I/O error from the underlying reader or sink.
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for CabError {
    fn from(error: io::Error) -> CabError {
        // Recover a typed error that was tunneled through a Read/Seek impl.
        match error.downcast::<CabError>() {
            Ok(cab_error) => cab_error,
            // A short read while parsing means the cabinet itself is cut off.
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                CabError::TruncatedData
            }
            Err(error) => CabError::Io(error),
        }
    }
}

impl From<CabError> for io::Error {
    fn from(error: CabError) -> io::Error {
        match error {
            CabError::Io(error) => error,
            CabError::TruncatedData => {
                io::Error::new(io::ErrorKind::UnexpectedEof, error)
            }
            CabError::UnknownFile(_) => {
                io::Error::new(io::ErrorKind::NotFound, error)
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
