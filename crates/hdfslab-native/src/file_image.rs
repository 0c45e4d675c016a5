//! One open file: the disk handle, its object tree and access flags.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::disk::Disk;
use crate::error::NativeError;
use crate::file_reader::load_root;
use crate::file_writer;
use crate::object::GroupNode;

#[derive(Debug)]
pub struct FileImage {
    pub path: PathBuf,
    pub disk: Disk,
    pub root: GroupNode,
    pub read_only: bool,
    pub swmr: bool,
    /// Something changed since the last flush.
    pub dirty: bool,
}

impl FileImage {
    /// Create (or truncate) `path` as an HDF5 file with an empty root group.
    pub fn create(path: &Path, swmr: bool) -> Result<Self, NativeError> {
        let mut image = FileImage {
            path: path.to_path_buf(),
            disk: Disk::create(path)?,
            root: GroupNode::default(),
            read_only: false,
            swmr,
            dirty: true,
        };
        image.flush()?;
        Ok(image)
    }

    /// Open the HDF5 file at `path` and read its object tree.
    pub fn open(path: &Path, read_only: bool, swmr: bool) -> Result<Self, NativeError> {
        let disk = Disk::open(path, !read_only)?;
        let root = load_root(&disk)?;
        debug!(path = %path.display(), read_only, "loaded object tree");
        Ok(FileImage {
            path: path.to_path_buf(),
            disk,
            root,
            read_only,
            swmr,
            dirty: false,
        })
    }

    /// Write every change back to the file. SWMR files are synced so
    /// concurrent readers see complete data.
    pub fn flush(&mut self) -> Result<(), NativeError> {
        if self.read_only {
            return Err(NativeError::ReadOnly(self.path.clone()));
        }
        file_writer::flush(&mut self.disk, &mut self.root)?;
        if self.swmr {
            self.disk.sync()?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Upgrade a read-only image to read-write.
    pub fn reopen_writable(&mut self) -> Result<(), NativeError> {
        self.disk.make_writable()?;
        self.read_only = false;
        Ok(())
    }
}
