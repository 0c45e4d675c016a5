//! Property lists for configuring file access and dataset creation.

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read only.
    ReadOnly,
    /// Read and write.
    #[default]
    ReadWrite,
}

/// File access properties.
#[derive(Debug, Clone, Default)]
pub struct FileAccessProps {
    /// Read-only or read-write access.
    pub mode: AccessMode,
    /// Single-writer/multiple-reader access. Flushes are synced to disk so
    /// readers observe a consistent state.
    pub swmr: bool,
}

impl FileAccessProps {
    /// Create default file access properties (read-write, no SWMR).
    pub fn new() -> Self {
        Self::default()
    }

    /// Open read-only.
    pub fn read_only(mut self) -> Self {
        self.mode = AccessMode::ReadOnly;
        self
    }

    /// Enable SWMR access.
    pub fn swmr(mut self) -> Self {
        self.swmr = true;
        self
    }

    /// True when the file may not be modified.
    pub fn is_read_only(&self) -> bool {
        self.mode == AccessMode::ReadOnly
    }
}

/// Dataset creation properties.
///
/// Controls storage layout, compression and fill value for a new dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetCreateProps {
    /// Chunk dimensions (enables chunked storage).
    pub chunk_dims: Option<Vec<u64>>,
    /// Deflate compression level (0-9). Requires chunked storage.
    pub deflate_level: Option<u32>,
    /// Raw bytes of one element used for unwritten regions.
    pub fill_value: Option<Vec<u8>>,
}

impl DatasetCreateProps {
    /// Create default dataset creation properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk dimensions.
    pub fn chunk(mut self, dims: &[u64]) -> Self {
        self.chunk_dims = Some(dims.to_vec());
        self
    }

    /// Set deflate compression level (0-9).
    pub fn deflate(mut self, level: u32) -> Self {
        self.deflate_level = Some(level.min(9));
        self
    }

    /// Set the fill value bytes.
    pub fn fill_value(mut self, bytes: &[u8]) -> Self {
        self.fill_value = Some(bytes.to_vec());
        self
    }
}
