//! One library instance, its file registry and the I/O settings.

use std::path::Path;

use hdfslab_native::Library;

use crate::attribute::AttributeIo;
use crate::config::IoConfig;
use crate::dataset::DatasetIo;
use crate::error::Result;
use crate::registry::{FileHandle, HandleRegistry};

/// Entry point bundling a [`HandleRegistry`] with an [`IoConfig`].
#[derive(Debug, Default)]
pub struct Session {
    registry: HandleRegistry<Library>,
    config: IoConfig,
}

impl Session {
    pub fn new(config: IoConfig) -> Self {
        Session {
            registry: HandleRegistry::default(),
            config,
        }
    }

    /// Session configured from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Session::new(IoConfig::from_env()?))
    }

    pub fn registry(&self) -> &HandleRegistry<Library> {
        &self.registry
    }

    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    pub fn library(&self) -> &Library {
        self.registry.backend()
    }

    pub fn datasets(&self) -> DatasetIo<'_> {
        DatasetIo::new(self.library(), &self.config)
    }

    pub fn attributes(&self) -> AttributeIo<'_> {
        AttributeIo::new(self.library(), &self.config)
    }

    /// Acquire `path`, creating it when asked.
    pub fn open(&self, path: impl AsRef<Path>, create: bool) -> Result<FileHandle> {
        self.registry.acquire(path, create)
    }

    /// Acquire `path` in SWMR mode.
    pub fn open_swmr(&self, path: impl AsRef<Path>, create: bool) -> Result<FileHandle> {
        self.registry.acquire_swmr(path, create)
    }

    /// Release one reference to the file behind `handle`.
    pub fn close(&self, handle: FileHandle) -> Result<()> {
        self.registry.release(handle.path(), false)
    }
}
