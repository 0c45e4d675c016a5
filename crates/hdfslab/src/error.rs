//! Error types for the dataset I/O layer.

use std::path::Path;

use hdfslab_native::NativeError;

use crate::config::FailureKind;

/// Errors raised by dataset and attribute operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A native type has no canonical element kind.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// The path is missing or names a group rather than a dataset.
    #[error("not a dataset: {0}")]
    NotADataset(String),

    /// A value's rank or extent disagrees with its target.
    #[error("shape violation: {0}")]
    ShapeViolation(String),

    /// A caller-supplied argument was rejected before any native call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Generic I/O failure reported by the native library.
    #[error("I/O failure: {context}")]
    Io {
        context: String,
        #[source]
        source: NativeError,
    },

    /// Format-specific failure reported by the native library.
    #[error("format failure: {context}")]
    Format {
        context: String,
        #[source]
        source: NativeError,
    },
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<NativeError> for Error {
    fn from(source: NativeError) -> Self {
        Error::Io {
            context: "native call".into(),
            source,
        }
    }
}

impl Error {
    /// True for failures that came from the native library.
    pub fn is_native(&self) -> bool {
        matches!(self, Error::Io { .. } | Error::Format { .. })
    }

    /// The underlying native error, if any.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Error::Io { source, .. } | Error::Format { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Re-raise a native failure as `kind` with `context`. Other errors pass
    /// through unchanged.
    pub(crate) fn rewrap(self, kind: FailureKind, context: impl Into<String>) -> Error {
        match self {
            Error::Io { source, .. } | Error::Format { source, .. } => kind.wrap(context, source),
            other => other,
        }
    }

    /// Log a failed `op` on `path` inside `file` and re-raise it as `kind`.
    pub(crate) fn at_boundary(self, kind: FailureKind, op: &str, path: &str, file: &Path) -> Error {
        match self.native() {
            Some(source) => tracing::error!(
                op,
                path,
                file = %file.display(),
                error = %source,
                "native call failed"
            ),
            None => tracing::debug!(op, path, file = %file.display(), error = %self, "operation rejected"),
        }
        self.rewrap(kind, format!("{op} {path} in {}", file.display()))
    }
}
