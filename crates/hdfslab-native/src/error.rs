//! Error types for the native library.

use std::fmt;
use std::path::PathBuf;

use crate::Hid;

/// Errors reported by the native library.
#[derive(Debug)]
pub enum NativeError {
    /// I/O error from the filesystem.
    Io(std::io::Error),
    /// No format signature at any of the probed offsets.
    SignatureNotFound(PathBuf),
    /// The file body is shorter than its structure requires.
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// A stored checksum does not match the bytes it covers.
    ChecksumMismatch {
        /// The checksum stored in the file.
        expected: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// Unknown datatype class code.
    InvalidDatatypeClass(u8),
    /// Unsupported datatype version for the given class.
    InvalidDatatypeVersion {
        /// Datatype class code.
        class: u8,
        /// Version found.
        version: u8,
    },
    /// Invalid string padding code.
    InvalidStringPadding(u8),
    /// Invalid character set code.
    InvalidCharacterSet(u8),
    /// Invalid reference type code.
    InvalidReferenceType(u8),
    /// Invalid dataspace version.
    InvalidDataspaceVersion(u8),
    /// File metadata is structurally invalid.
    Malformed(String),
    /// A valid format feature this library does not implement.
    Unsupported(String),
    /// A chunk filter this library cannot apply.
    UnsupportedFilter(u16),
    /// The id is not open (never issued or already closed).
    InvalidId(Hid),
    /// The id refers to an object of another kind.
    WrongIdKind {
        /// The offending id.
        id: Hid,
        /// What the operation expected.
        expected: &'static str,
    },
    /// No object exists at the path.
    NotFound(String),
    /// An object already exists at the path.
    AlreadyExists(String),
    /// A path component that must be a group is something else.
    NotAGroup(String),
    /// The file was opened read-only.
    ReadOnly(PathBuf),
    /// The selection does not fit inside the dataspace extent.
    SelectionOutOfBounds {
        /// Selected stop per dimension.
        stop: Vec<u64>,
        /// Current extent per dimension.
        dims: Vec<u64>,
    },
    /// Rank of a selection, extent, or chunk shape disagrees with the dataspace.
    RankMismatch {
        /// Rank expected.
        expected: usize,
        /// Rank given.
        actual: usize,
    },
    /// The supplied buffer does not match the selection size.
    BufferSizeMismatch {
        /// Bytes (or cells) required.
        expected: usize,
        /// Bytes (or cells) supplied.
        actual: usize,
    },
    /// Extent change on a non-chunked dataset or beyond its maximum dims.
    CannotExtend(String),
    /// Operation does not apply to this datatype.
    TypeMismatch(String),
    /// Compression or decompression failed.
    Compression(String),
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeError::Io(e) => write!(f, "I/O error: {e}"),
            NativeError::SignatureNotFound(path) => {
                write!(f, "file signature not found in {}", path.display())
            }
            NativeError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "unexpected EOF: need {expected} bytes, have {available}")
            }
            NativeError::ChecksumMismatch { expected, computed } => {
                write!(
                    f,
                    "checksum mismatch: expected {expected:#010x}, computed {computed:#010x}"
                )
            }
            NativeError::InvalidDatatypeClass(c) => write!(f, "invalid datatype class: {c}"),
            NativeError::InvalidDatatypeVersion { class, version } => {
                write!(f, "invalid datatype version {version} for class {class}")
            }
            NativeError::InvalidStringPadding(v) => write!(f, "invalid string padding: {v}"),
            NativeError::InvalidCharacterSet(v) => write!(f, "invalid character set: {v}"),
            NativeError::InvalidReferenceType(v) => write!(f, "invalid reference type: {v}"),
            NativeError::InvalidDataspaceVersion(v) => {
                write!(f, "invalid dataspace version: {v}")
            }
            NativeError::Malformed(msg) => write!(f, "malformed metadata: {msg}"),
            NativeError::Unsupported(msg) => write!(f, "unsupported feature: {msg}"),
            NativeError::UnsupportedFilter(id) => write!(f, "unsupported filter: {id}"),
            NativeError::InvalidId(id) => write!(f, "id {id} is not open"),
            NativeError::WrongIdKind { id, expected } => {
                write!(f, "id {id} is not a {expected}")
            }
            NativeError::NotFound(path) => write!(f, "no object at {path}"),
            NativeError::AlreadyExists(path) => write!(f, "object already exists at {path}"),
            NativeError::NotAGroup(path) => write!(f, "not a group: {path}"),
            NativeError::ReadOnly(path) => write!(f, "file is read-only: {}", path.display()),
            NativeError::SelectionOutOfBounds { stop, dims } => {
                write!(f, "selection stop {stop:?} exceeds extent {dims:?}")
            }
            NativeError::RankMismatch { expected, actual } => {
                write!(f, "rank mismatch: expected {expected}, got {actual}")
            }
            NativeError::BufferSizeMismatch { expected, actual } => {
                write!(f, "buffer size mismatch: expected {expected}, got {actual}")
            }
            NativeError::CannotExtend(msg) => write!(f, "cannot extend dataset: {msg}"),
            NativeError::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            NativeError::Compression(msg) => write!(f, "compression error: {msg}"),
        }
    }
}

impl std::error::Error for NativeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NativeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NativeError {
    fn from(e: std::io::Error) -> Self {
        NativeError::Io(e)
    }
}
