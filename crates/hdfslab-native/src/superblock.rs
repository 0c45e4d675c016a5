//! The superblock: format version, base address, end-of-file address and
//! the address of the root group's object header.
//!
//! Versions 0 through 3 are read. New files get a version 2 superblock at
//! offset 0. Existing superblocks are patched in place when the root
//! header moves or the file grows.

use crate::checksum::lookup3;
use crate::error::NativeError;
use crate::io::{ByteCursor, ReadAt, UNDEF};

/// The 8-byte format signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// B-tree K for chunk indexes when the file does not state one.
pub const DEFAULT_CHUNK_K: u16 = 32;

/// Size of a version 2 or 3 superblock.
pub const SUPERBLOCK_V2_SIZE: u64 = 48;

const V0_FIXED: u64 = 24;
const V1_FIXED: u64 = 28;

/// Decoded superblock fields used by this library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub version: u8,
    /// Absolute file offset of the signature.
    pub location: u64,
    /// Absolute offset that all addresses are relative to.
    pub base: u64,
    /// Consistency flags (versions 2 and 3).
    pub flags: u8,
    /// Superblock extension object header, or [`UNDEF`].
    pub extension: u64,
    /// End-of-file address, relative to `base`.
    pub eof: u64,
    /// Root group object header address.
    pub root: u64,
    /// Indexed storage (chunk B-tree) K.
    pub chunk_k: u16,
}

impl Superblock {
    /// A version 2 superblock for a new file.
    pub fn new_v2(root: u64, eof: u64) -> Self {
        Superblock {
            version: 2,
            location: 0,
            base: 0,
            flags: 0,
            extension: UNDEF,
            eof,
            root,
            chunk_k: DEFAULT_CHUNK_K,
        }
    }

    /// Search for the signature at offset 0 and then at every power of two
    /// from 512 up to the end of the file.
    pub fn find(src: &dyn ReadAt, file_len: u64) -> Result<Option<Superblock>, NativeError> {
        let mut location = 0u64;
        while location + SIGNATURE.len() as u64 <= file_len {
            if src.read_at(location, SIGNATURE.len())? == SIGNATURE {
                let len = (file_len - location).min(128) as usize;
                let bytes = src.read_at(location, len)?;
                return Superblock::parse(&bytes, location).map(Some);
            }
            location = if location == 0 { 512 } else { location * 2 };
        }
        Ok(None)
    }

    /// Parse a superblock whose signature starts `bytes`.
    pub fn parse(bytes: &[u8], location: u64) -> Result<Superblock, NativeError> {
        let mut cur = ByteCursor::new(bytes);
        cur.skip(SIGNATURE.len())?;
        let version = cur.u8()?;
        match version {
            0 | 1 => {
                cur.skip(4)?; // free-space, root table, reserved, shared header versions
                let offsets = cur.u8()?;
                let lengths = cur.u8()?;
                check_sizes(offsets, lengths)?;
                cur.skip(1)?;
                cur.skip(4)?; // group leaf and internal K
                cur.skip(4)?; // consistency flags
                let chunk_k = if version == 1 {
                    let k = cur.u16()?;
                    cur.skip(2)?;
                    k
                } else {
                    DEFAULT_CHUNK_K
                };
                let base = cur.u64()?;
                cur.skip(8)?; // free-space info address
                let eof = cur.u64()?;
                cur.skip(8)?; // driver info address
                cur.skip(8)?; // root link name offset
                let root = cur.u64()?;
                Ok(Superblock {
                    version,
                    location,
                    base,
                    flags: 0,
                    extension: UNDEF,
                    eof,
                    root,
                    chunk_k,
                })
            }
            2 | 3 => {
                let offsets = cur.u8()?;
                let lengths = cur.u8()?;
                check_sizes(offsets, lengths)?;
                let flags = cur.u8()?;
                let base = cur.u64()?;
                let extension = cur.u64()?;
                let eof = cur.u64()?;
                let root = cur.u64()?;
                let end = cur.pos();
                let stored = cur.u32()?;
                let computed = lookup3(&bytes[..end]);
                if stored != computed {
                    return Err(NativeError::ChecksumMismatch {
                        expected: stored,
                        computed,
                    });
                }
                Ok(Superblock {
                    version,
                    location,
                    base,
                    flags,
                    extension,
                    eof,
                    root,
                    chunk_k: DEFAULT_CHUNK_K,
                })
            }
            v => Err(NativeError::Unsupported(format!("superblock version {v}"))),
        }
    }

    /// Encode a version 2 or 3 superblock, checksum included.
    pub fn encode_v2(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_V2_SIZE as usize);
        buf.extend_from_slice(&SIGNATURE);
        buf.push(self.version.max(2));
        buf.push(8);
        buf.push(8);
        buf.push(self.flags);
        for field in [self.base, self.extension, self.eof, self.root] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
        let sum = lookup3(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        buf
    }

    /// Byte ranges (absolute offset, bytes) that bring the on-disk
    /// superblock up to date with `eof` and `root`.
    ///
    /// For versions 0 and 1 the root symbol table entry's cache is cleared,
    /// since the root header may no longer hold a symbol table message.
    pub fn patches(&self) -> Vec<(u64, Vec<u8>)> {
        match self.version {
            0 | 1 => {
                let var = self.location + if self.version == 0 { V0_FIXED } else { V1_FIXED };
                let mut entry = Vec::with_capacity(32);
                entry.extend_from_slice(&self.root.to_le_bytes());
                entry.extend_from_slice(&0u32.to_le_bytes()); // cache type: none
                entry.extend_from_slice(&[0u8; 4 + 16]);
                vec![
                    (var + 16, self.eof.to_le_bytes().to_vec()),
                    (var + 32 + 8, entry),
                ]
            }
            _ => vec![(self.location, self.encode_v2())],
        }
    }
}

fn check_sizes(offsets: u8, lengths: u8) -> Result<(), NativeError> {
    if offsets != 8 || lengths != 8 {
        return Err(NativeError::Unsupported(format!(
            "{offsets}-byte offsets and {lengths}-byte lengths"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v0_superblock(root: u64, eof: u64) -> Vec<u8> {
        let mut buf = SIGNATURE.to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        for field in [0, UNDEF, eof, UNDEF, 0, root] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4 + 16]);
        buf
    }

    #[test]
    fn v2_encode_parse() {
        let sb = Superblock::new_v2(48, 4096);
        let bytes = sb.encode_v2();
        assert_eq!(bytes.len() as u64, SUPERBLOCK_V2_SIZE);
        assert_eq!(bytes[..8], SIGNATURE);
        assert_eq!(Superblock::parse(&bytes, 0).unwrap(), sb);
    }

    #[test]
    fn v2_detects_corruption() {
        let mut bytes = Superblock::new_v2(48, 4096).encode_v2();
        bytes[30] ^= 1;
        assert!(matches!(
            Superblock::parse(&bytes, 0),
            Err(NativeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn v0_parse_and_patch() {
        let bytes = v0_superblock(96, 800);
        assert_eq!(bytes.len(), 96);
        let mut sb = Superblock::parse(&bytes, 0).unwrap();
        assert_eq!((sb.version, sb.root, sb.eof), (0, 96, 800));
        assert_eq!(sb.chunk_k, DEFAULT_CHUNK_K);

        sb.root = 1024;
        sb.eof = 2048;
        let mut patched = bytes.clone();
        for (at, data) in sb.patches() {
            patched[at as usize..at as usize + data.len()].copy_from_slice(&data);
        }
        let reparsed = Superblock::parse(&patched, 0).unwrap();
        assert_eq!((reparsed.root, reparsed.eof), (1024, 2048));
        assert_eq!(patched[72..76], [0, 0, 0, 0]);
    }

    #[test]
    fn find_after_user_block() {
        let mut file = vec![0u8; 512];
        file.extend_from_slice(&Superblock::new_v2(48, 64).encode_v2());
        let sb = Superblock::find(&file, file.len() as u64).unwrap().unwrap();
        assert_eq!(sb.location, 512);
        assert!(Superblock::find(&vec![0u8; 600], 600).unwrap().is_none());
    }

    #[test]
    fn narrow_offsets_unsupported() {
        let mut bytes = Superblock::new_v2(48, 64).encode_v2();
        bytes[9] = 4;
        assert!(matches!(
            Superblock::parse(&bytes, 0),
            Err(NativeError::Unsupported(_))
        ));
    }
}
