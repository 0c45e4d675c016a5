//! The file on disk: positioned reads and writes relative to the
//! superblock's base address, plus end-of-file allocation.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::NativeError;
use crate::filters;
use crate::heap;
use crate::io::{align8, ReadAt, WriteAt, UNDEF};
use crate::object_header::{kind, ObjectHeader};
use crate::storage::{ChunkData, ChunkSource, ChunkStore, StoredChunk};
use crate::superblock::{Superblock, SUPERBLOCK_V2_SIZE};

/// An open file and its superblock.
#[derive(Debug)]
pub struct Disk {
    file: File,
    path: PathBuf,
    superblock: Superblock,
    /// Next free address, relative to the base.
    eof: u64,
    writable: bool,
}

impl Disk {
    /// Create (or truncate) `path` and write a version 2 superblock. The
    /// root group is not written yet.
    pub fn create(path: &Path) -> Result<Disk, NativeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut disk = Disk {
            file,
            path: path.to_path_buf(),
            superblock: Superblock::new_v2(UNDEF, SUPERBLOCK_V2_SIZE),
            eof: SUPERBLOCK_V2_SIZE,
            writable: true,
        };
        let bytes = disk.superblock.encode_v2();
        disk.write_absolute(0, &bytes)?;
        Ok(disk)
    }

    /// Open an existing file and locate its superblock.
    pub fn open(path: &Path, writable: bool) -> Result<Disk, NativeError> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let len = file.metadata()?.len();
        let mut disk = Disk {
            file,
            path: path.to_path_buf(),
            superblock: Superblock::new_v2(UNDEF, 0),
            eof: 0,
            writable,
        };
        let mut superblock = Superblock::find(&disk, len)?
            .ok_or_else(|| NativeError::SignatureNotFound(path.to_path_buf()))?;
        if superblock.extension != UNDEF {
            disk.superblock.base = superblock.base;
            let ext = ObjectHeader::read(&disk, superblock.extension)?;
            if let Some(msg) = ext.find(kind::BTREE_K) {
                if msg.data.len() >= 3 {
                    superblock.chunk_k = u16::from_le_bytes([msg.data[1], msg.data[2]]);
                }
            }
        }
        disk.eof = align8(superblock.eof.max(len.saturating_sub(superblock.base)));
        disk.superblock = superblock;
        Ok(disk)
    }

    /// Reopen the file for writing.
    pub fn make_writable(&mut self) -> Result<(), NativeError> {
        if !self.writable {
            self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            self.writable = true;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn eof(&self) -> u64 {
        self.eof
    }

    /// Point the superblock at `root` and record the current end of file.
    pub fn commit(&mut self, root: u64) -> Result<(), NativeError> {
        self.superblock.root = root;
        self.superblock.eof = self.eof;
        for (at, bytes) in self.superblock.patches() {
            self.write_absolute(at, &bytes)?;
        }
        Ok(())
    }

    /// Push written data to stable storage.
    pub fn sync(&self) -> Result<(), NativeError> {
        self.file.sync_data()?;
        Ok(())
    }

    fn write_absolute(&mut self, at: u64, bytes: &[u8]) -> Result<(), NativeError> {
        if !self.writable {
            return Err(NativeError::ReadOnly(self.path.clone()));
        }
        let mut file = &self.file;
        file.seek(SeekFrom::Start(at))?;
        file.write_all(bytes)?;
        Ok(())
    }
}

impl ReadAt for Disk {
    fn read_at(&self, addr: u64, len: usize) -> Result<Vec<u8>, NativeError> {
        let start = self
            .superblock
            .base
            .checked_add(addr)
            .ok_or_else(|| NativeError::Malformed(format!("address {addr:#x}")))?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; len];
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(NativeError::UnexpectedEof {
                expected: start.saturating_add(len as u64) as usize,
                available: self.file.metadata()?.len() as usize,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl WriteAt for Disk {
    fn allocate(&mut self, len: u64) -> u64 {
        let addr = align8(self.eof);
        self.eof = addr + len;
        addr
    }

    fn write_at(&mut self, addr: u64, bytes: &[u8]) -> Result<(), NativeError> {
        let at = self.superblock.base + addr;
        self.write_absolute(at, bytes)
    }
}

impl ChunkSource for Disk {
    fn load(&self, store: &ChunkStore, chunk: &StoredChunk) -> Result<ChunkData, NativeError> {
        let raw = self.read_at(chunk.addr, chunk.size as usize)?;
        let data = filters::decode_chunk(store.filters(), raw, chunk.filter_mask, store.item_size())?;
        if store.is_var_len() {
            Ok(ChunkData::VarLen(heap::read_vlen(self, &data, store.vlen_base())?))
        } else {
            Ok(ChunkData::Fixed(data))
        }
    }
}
