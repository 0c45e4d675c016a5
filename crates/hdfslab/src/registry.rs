//! Reference-counted registry of open files.
//!
//! The registry owns the native file open and close calls. The first
//! `acquire` of a path opens (or creates) the file; later acquisitions reuse
//! the same native id and bump a counter. `release` closes the file when the
//! counter returns to zero. One lock guards the whole map, so counter updates
//! and native open/close calls are serialized.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use hdfslab_native::{FileAccessProps, Hid, Library, NativeError};

use crate::error::{Error, Result};

/// The native file open/close pair the registry drives.
pub trait FileBackend {
    /// Open `path`, creating it when `create` is set and it does not exist.
    fn open_file(&self, path: &Path, create: bool, swmr: bool) -> std::result::Result<Hid, NativeError>;

    /// Close an id returned by [`FileBackend::open_file`].
    fn close_file(&self, id: Hid) -> std::result::Result<(), NativeError>;
}

impl FileBackend for Library {
    fn open_file(&self, path: &Path, create: bool, swmr: bool) -> std::result::Result<Hid, NativeError> {
        let mut fapl = FileAccessProps::new();
        if swmr {
            fapl = fapl.swmr();
        }
        if create && !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            return self.file_create(path, &fapl);
        }
        self.file_open(path, &fapl)
    }

    fn close_file(&self, id: Hid) -> std::result::Result<(), NativeError> {
        self.file_close(id)
    }
}

#[derive(Debug)]
struct Entry {
    id: Hid,
    count: usize,
    swmr: bool,
    op_lock: Arc<Mutex<()>>,
}

/// An open file as seen by one acquirer. Only the registry creates these.
#[derive(Debug)]
pub struct FileHandle {
    id: Hid,
    path: PathBuf,
    swmr: bool,
    op_lock: Arc<Mutex<()>>,
}

impl FileHandle {
    /// Native file id.
    pub fn id(&self) -> Hid {
        self.id
    }

    /// Registry key of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file is in SWMR mode; writes are flushed immediately.
    pub fn is_swmr(&self) -> bool {
        self.swmr
    }

    /// Serialize an operation against other operations on the same path.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn registry_key(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Registry of open files keyed by path.
#[derive(Debug)]
pub struct HandleRegistry<B: FileBackend = Library> {
    backend: B,
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl Default for HandleRegistry<Library> {
    fn default() -> Self {
        HandleRegistry::new(Library::new())
    }
}

impl<B: FileBackend> HandleRegistry<B> {
    pub fn new(backend: B) -> Self {
        HandleRegistry {
            backend,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The backend used for native open/close calls.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open `path` (creating it if requested and absent) or reuse the open
    /// file, incrementing its reference count.
    pub fn acquire(&self, path: impl AsRef<Path>, create_if_absent: bool) -> Result<FileHandle> {
        self.acquire_inner(path.as_ref(), create_if_absent, false)
    }

    /// Like [`HandleRegistry::acquire`], opening the file in SWMR mode when
    /// it is not already open. A file already open without SWMR stays in
    /// its mode; the returned handle reports that mode and a warning is
    /// logged.
    pub fn acquire_swmr(&self, path: impl AsRef<Path>, create_if_absent: bool) -> Result<FileHandle> {
        self.acquire_inner(path.as_ref(), create_if_absent, true)
    }

    fn acquire_inner(&self, path: &Path, create: bool, swmr: bool) -> Result<FileHandle> {
        let key = registry_key(path);
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(&key) {
            if swmr && !entry.swmr {
                tracing::warn!(
                    path = %key.display(),
                    count = entry.count,
                    "SWMR requested for a file already open without SWMR; writes will not flush immediately"
                );
            }
            entry.count += 1;
            tracing::debug!(path = %key.display(), count = entry.count, "reusing open file");
            return Ok(FileHandle {
                id: entry.id,
                path: key,
                swmr: entry.swmr,
                op_lock: Arc::clone(&entry.op_lock),
            });
        }
        let id = self
            .backend
            .open_file(&key, create, swmr)
            .map_err(|source| Error::Io {
                context: format!("open {}", key.display()),
                source,
            })?;
        tracing::debug!(path = %key.display(), id, swmr, "opened file");
        let op_lock = Arc::new(Mutex::new(()));
        entries.insert(
            key.clone(),
            Entry {
                id,
                count: 1,
                swmr,
                op_lock: Arc::clone(&op_lock),
            },
        );
        Ok(FileHandle {
            id,
            path: key,
            swmr,
            op_lock,
        })
    }

    /// Drop one reference to `path`; close the file when none remain or when
    /// `force_close` is set. Unknown paths are ignored.
    pub fn release(&self, path: impl AsRef<Path>, force_close: bool) -> Result<()> {
        let key = registry_key(path.as_ref());
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(&key) else {
            return Ok(());
        };
        entry.count = entry.count.saturating_sub(1);
        if entry.count > 0 && !force_close {
            return Ok(());
        }
        let Some(entry) = entries.remove(&key) else {
            return Ok(());
        };
        tracing::debug!(path = %key.display(), id = entry.id, force_close, "closing file");
        self.backend
            .close_file(entry.id)
            .map_err(|source| Error::Io {
                context: format!("close {}", key.display()),
                source,
            })
    }

    /// Current reference count of `path` (0 when not open).
    pub fn ref_count(&self, path: impl AsRef<Path>) -> usize {
        let key = registry_key(path.as_ref());
        self.entries().get(&key).map_or(0, |e| e.count)
    }

    /// True when no file is open.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Paths currently open.
    pub fn open_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        opens: AtomicUsize,
        closes: AtomicUsize,
        next: AtomicI64,
        fail_open: bool,
    }

    impl FileBackend for Counting {
        fn open_file(&self, path: &Path, _create: bool, _swmr: bool) -> std::result::Result<Hid, NativeError> {
            if self.fail_open {
                return Err(NativeError::NotFound(path.display().to_string()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn close_file(&self, _id: Hid) -> std::result::Result<(), NativeError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn bracketed_acquire_release() {
        let reg = HandleRegistry::new(Counting::default());
        let handles: Vec<_> = (0..5).map(|_| reg.acquire("/data/a.h5", true).unwrap()).collect();
        assert!(handles.iter().all(|h| h.id() == handles[0].id()));
        assert_eq!(reg.ref_count("/data/a.h5"), 5);
        assert_eq!(reg.backend().opens.load(Ordering::SeqCst), 1);

        for _ in 0..5 {
            reg.release("/data/a.h5", false).unwrap();
        }
        assert!(reg.is_empty());
        assert_eq!(reg.backend().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn swmr_request_keeps_existing_mode() {
        let reg = HandleRegistry::new(Counting::default());
        let plain = reg.acquire("/mode.h5", true).unwrap();
        assert!(!plain.is_swmr());
        let second = reg.acquire_swmr("/mode.h5", true).unwrap();
        assert!(!second.is_swmr());
        assert_eq!(second.id(), plain.id());
        assert_eq!(reg.ref_count("/mode.h5"), 2);
        assert_eq!(reg.backend().opens.load(Ordering::SeqCst), 1);

        let live = reg.acquire_swmr("/live.h5", true).unwrap();
        assert!(live.is_swmr());
        assert!(reg.acquire("/live.h5", false).unwrap().is_swmr());
    }

    #[test]
    fn unbalanced_release_is_noop() {
        let reg = HandleRegistry::new(Counting::default());
        reg.release("/never/opened.h5", false).unwrap();
        reg.acquire("/x.h5", false).unwrap();
        reg.release("/x.h5", false).unwrap();
        reg.release("/x.h5", false).unwrap();
        assert_eq!(reg.ref_count("/x.h5"), 0);
        assert_eq!(reg.backend().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn force_close_drops_all_references() {
        let reg = HandleRegistry::new(Counting::default());
        reg.acquire("/f.h5", true).unwrap();
        reg.acquire("/f.h5", true).unwrap();
        reg.release("/f.h5", true).unwrap();
        assert!(reg.is_empty());
        assert_eq!(reg.backend().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_open_registers_nothing() {
        let reg = HandleRegistry::new(Counting {
            fail_open: true,
            ..Default::default()
        });
        assert!(matches!(reg.acquire("/bad.h5", false), Err(Error::Io { .. })));
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_acquire_release() {
        let reg = Arc::new(HandleRegistry::new(Counting::default()));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        reg.acquire("/shared.h5", true).unwrap();
                        reg.release("/shared.h5", false).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(reg.is_empty());
        let b = reg.backend();
        assert_eq!(b.opens.load(Ordering::SeqCst), b.closes.load(Ordering::SeqCst));
    }
}
