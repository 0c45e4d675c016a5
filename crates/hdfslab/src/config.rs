//! I/O configuration.

use std::fmt;
use std::str::FromStr;

use hdfslab_native::NativeError;

use crate::error::{Error, Result};

/// Default chunk size target in bytes.
pub const DEFAULT_CHUNK_TARGET_BYTES: u64 = 1024 * 1024;

/// Default number of rows a dataset grown by `append_row` is expected to hold.
pub const DEFAULT_APPEND_ROWS_HINT: u64 = 1024;

/// Chunk shape estimation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkStrategy {
    /// Halve free dimensions round-robin.
    Balanced,
    /// Halve free dimensions one at a time, outermost first, innermost last.
    #[default]
    SkewLast,
}

impl FromStr for ChunkStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(ChunkStrategy::Balanced),
            "skew-last" | "skew_last" | "skewlast" => Ok(ChunkStrategy::SkewLast),
            other => Err(Error::InvalidArgument(format!(
                "unknown chunk strategy {other:?}"
            ))),
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkStrategy::Balanced => write!(f, "balanced"),
            ChunkStrategy::SkewLast => write!(f, "skew-last"),
        }
    }
}

/// Dataset compression. Codes match the persisted setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0,
    /// DEFLATE at level 1.
    Deflate = 1,
}

impl Compression {
    /// Numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a numeric code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Deflate),
            other => Err(Error::InvalidArgument(format!(
                "unknown compression code {other}"
            ))),
        }
    }

    pub(crate) fn deflate_level(self) -> Option<u32> {
        match self {
            Compression::None => None,
            Compression::Deflate => Some(1),
        }
    }
}

/// Which domain-level failure native errors are re-raised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureKind {
    /// [`Error::Io`].
    #[default]
    Io,
    /// [`Error::Format`].
    Format,
}

impl FailureKind {
    /// Wrap a native error.
    pub fn wrap(self, context: impl Into<String>, source: NativeError) -> Error {
        let context = context.into();
        match self {
            FailureKind::Io => Error::Io { context, source },
            FailureKind::Format => Error::Format { context, source },
        }
    }
}

/// Settings shared by dataset and attribute operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoConfig {
    /// Chunk byte budget used when estimating chunk shapes.
    pub chunk_target_bytes: u64,
    /// Chunk estimation strategy.
    pub chunk_strategy: ChunkStrategy,
    /// Compression for new chunked datasets.
    pub compression: Compression,
    /// Failure kind for native errors.
    pub failure_kind: FailureKind,
    /// Expected leading extent of datasets created by `append_row`.
    pub append_rows_hint: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            chunk_target_bytes: DEFAULT_CHUNK_TARGET_BYTES,
            chunk_strategy: ChunkStrategy::default(),
            compression: Compression::default(),
            failure_kind: FailureKind::default(),
            append_rows_hint: DEFAULT_APPEND_ROWS_HINT,
        }
    }
}

impl IoConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk byte budget.
    pub fn chunk_target_bytes(mut self, bytes: u64) -> Self {
        self.chunk_target_bytes = bytes;
        self
    }

    /// Set the chunk estimation strategy.
    pub fn chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.chunk_strategy = strategy;
        self
    }

    /// Set compression for new datasets.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the failure kind for native errors.
    pub fn failure_kind(mut self, kind: FailureKind) -> Self {
        self.failure_kind = kind;
        self
    }

    /// Set the expected row count for appended datasets.
    pub fn append_rows_hint(mut self, rows: u64) -> Self {
        self.append_rows_hint = rows.max(1);
        self
    }

    /// Defaults overridden by `HDFSLAB_CHUNK_TARGET_BYTES`,
    /// `HDFSLAB_CHUNK_STRATEGY` and `HDFSLAB_COMPRESSION`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("HDFSLAB_CHUNK_TARGET_BYTES") {
            let bytes: u64 = v.trim().parse().map_err(|_| {
                Error::InvalidArgument(format!("HDFSLAB_CHUNK_TARGET_BYTES={v:?}"))
            })?;
            if bytes == 0 {
                return Err(Error::InvalidArgument(
                    "HDFSLAB_CHUNK_TARGET_BYTES must be positive".into(),
                ));
            }
            config.chunk_target_bytes = bytes;
        }
        if let Some(v) = lookup("HDFSLAB_CHUNK_STRATEGY") {
            config.chunk_strategy = v.parse()?;
        }
        if let Some(v) = lookup("HDFSLAB_COMPRESSION") {
            let code: u8 = v
                .trim()
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("HDFSLAB_COMPRESSION={v:?}")))?;
            config.compression = Compression::from_code(code)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = IoConfig::default();
        assert_eq!(c.chunk_target_bytes, 1024 * 1024);
        assert_eq!(c.chunk_strategy, ChunkStrategy::SkewLast);
        assert_eq!(c.compression, Compression::None);
        assert_eq!(c.failure_kind, FailureKind::Io);
        assert_eq!(c.append_rows_hint, 1024);
    }

    #[test]
    fn env_overrides() {
        let c = IoConfig::from_lookup(lookup(&[
            ("HDFSLAB_CHUNK_TARGET_BYTES", "4096"),
            ("HDFSLAB_CHUNK_STRATEGY", "Balanced"),
            ("HDFSLAB_COMPRESSION", "1"),
        ]))
        .unwrap();
        assert_eq!(c.chunk_target_bytes, 4096);
        assert_eq!(c.chunk_strategy, ChunkStrategy::Balanced);
        assert_eq!(c.compression, Compression::Deflate);
    }

    #[test]
    fn env_rejects_bad_values() {
        for pairs in [
            [("HDFSLAB_CHUNK_TARGET_BYTES", "lots")],
            [("HDFSLAB_CHUNK_TARGET_BYTES", "0")],
            [("HDFSLAB_CHUNK_STRATEGY", "diagonal")],
            [("HDFSLAB_COMPRESSION", "9")],
        ] {
            assert!(matches!(
                IoConfig::from_lookup(lookup(&pairs)),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn compression_codes() {
        assert_eq!(Compression::Deflate.code(), 1);
        assert_eq!(Compression::from_code(0).unwrap(), Compression::None);
        assert_eq!(Compression::Deflate.deflate_level(), Some(1));
        assert_eq!("skew-last".parse::<ChunkStrategy>().unwrap().to_string(), "skew-last");
    }
}
