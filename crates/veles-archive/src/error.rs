//! Error types for the archive crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when reading TRPFD/TRPFS archives and packs.
///
/// A hash that simply is not in the archive is not an error; lookups
/// return `Ok(None)` for that case.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Low-level read or FlatBuffer error.
    #[error("{0}")]
    Common(#[from] veles_common::Error),

    /// The archive directory has no descriptor file.
    #[error("descriptor not found: {}", .0.display())]
    MissingDescriptor(PathBuf),

    /// The archive directory has no storage file.
    #[error("filesystem not found: {}", .0.display())]
    MissingFileSystem(PathBuf),

    /// Bad magic at the start of a storage file or pack.
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: String, actual: String },

    /// Structure decoded but is internally inconsistent.
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    /// Byte range lies outside the storage file.
    #[error("range {offset:#x}+{size:#x} outside file of {len:#x} bytes")]
    OutOfRange { offset: u64, size: u64, len: u64 },

    /// The descriptor names a pack that the storage index does not contain.
    #[error("pack {name} ({hash:#018x}) not present in filesystem index")]
    PackNotFound { name: String, hash: u64 },

    /// The codec returned nothing for a compressed entry.
    #[error("decompression failed for {hash:#018x} (type {kind}, {expected_size} bytes expected)")]
    Decompression {
        hash: u64,
        kind: i32,
        expected_size: u64,
    },

    /// A native codec library could not be loaded or lacks its entry point.
    #[error("cannot load codec {}: {reason}", library.display())]
    Codec { library: PathBuf, reason: String },

    /// Compression scheme not known to the reader.
    #[error("unsupported compression type: {0}")]
    UnsupportedCompression(u16),

    /// Hash list or hash cache could not be parsed.
    #[error("hash list line {line}: {reason}")]
    HashList { line: usize, reason: String },
}

impl Error {
    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Error::Malformed {
            what,
            reason: reason.into(),
        }
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
