//! Positioned reads and a bounds-checked little-endian cursor over
//! metadata blocks.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::NativeError;

/// The "undefined address" value: all bits set.
pub const UNDEF: u64 = u64::MAX;

/// Random-access reads of `len` bytes at file-relative `addr`.
pub trait ReadAt {
    fn read_at(&self, addr: u64, len: usize) -> Result<Vec<u8>, NativeError>;
}

impl ReadAt for [u8] {
    fn read_at(&self, addr: u64, len: usize) -> Result<Vec<u8>, NativeError> {
        let start = usize::try_from(addr).unwrap_or(usize::MAX);
        match start.checked_add(len) {
            Some(end) if end <= self.len() => Ok(self[start..end].to_vec()),
            _ => Err(NativeError::UnexpectedEof {
                expected: start.saturating_add(len),
                available: self.len(),
            }),
        }
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, addr: u64, len: usize) -> Result<Vec<u8>, NativeError> {
        self.as_slice().read_at(addr, len)
    }
}

/// Space allocation and positioned writes at file-relative addresses.
pub trait WriteAt: ReadAt {
    /// Reserve `len` bytes at the end of the file, 8-byte aligned.
    fn allocate(&mut self, len: u64) -> u64;

    fn write_at(&mut self, addr: u64, bytes: &[u8]) -> Result<(), NativeError>;

    /// Allocate space for `bytes` and write them there.
    fn append(&mut self, bytes: &[u8]) -> Result<u64, NativeError> {
        let addr = self.allocate(bytes.len() as u64);
        self.write_at(addr, bytes)?;
        Ok(addr)
    }
}

impl WriteAt for Vec<u8> {
    fn allocate(&mut self, len: u64) -> u64 {
        let addr = align8(self.len() as u64);
        self.resize((addr + len) as usize, 0);
        addr
    }

    fn write_at(&mut self, addr: u64, bytes: &[u8]) -> Result<(), NativeError> {
        let start = addr as usize;
        if self.len() < start + bytes.len() {
            self.resize(start + bytes.len(), 0);
        }
        self[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// Round `n` up to a multiple of 8.
pub fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

/// Sequential little-endian reader that reports truncation as
/// [`NativeError::UnexpectedEof`].
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteCursor { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), NativeError> {
        if pos > self.data.len() {
            return Err(NativeError::UnexpectedEof {
                expected: pos,
                available: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], NativeError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let out = &self.data[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(NativeError::UnexpectedEof {
                expected: self.pos.saturating_add(n),
                available: self.data.len(),
            }),
        }
    }

    pub fn skip(&mut self, n: usize) -> Result<(), NativeError> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, NativeError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, NativeError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, NativeError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, NativeError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    /// Unsigned integer stored in `width` bytes (1 to 8).
    pub fn uint(&mut self, width: usize) -> Result<u64, NativeError> {
        if width == 0 || width > 8 {
            return Err(NativeError::Malformed(format!("integer width {width}")));
        }
        Ok(LittleEndian::read_uint(self.take(width)?, width))
    }

    /// Null-terminated string; the terminator is consumed.
    pub fn cstr(&mut self) -> Result<String, NativeError> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(NativeError::UnexpectedEof {
                expected: self.data.len() + 1,
                available: self.data.len(),
            })?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(s)
    }

    /// Expect a 4-byte block signature.
    pub fn signature(&mut self, sig: &[u8; 4]) -> Result<(), NativeError> {
        let found = self.take(4)?;
        if found != sig {
            return Err(NativeError::Malformed(format!(
                "expected {} block, found {:?}",
                String::from_utf8_lossy(sig),
                found
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads_and_reports_truncation() {
        let data = [1u8, 2, 0, b'a', b'b', 0, 0xFF];
        let mut cur = ByteCursor::new(&data);
        assert_eq!(cur.u8().unwrap(), 1);
        assert_eq!(cur.u16().unwrap(), 2);
        assert_eq!(cur.cstr().unwrap(), "ab");
        assert_eq!(cur.remaining(), 1);
        assert!(matches!(cur.u16(), Err(NativeError::UnexpectedEof { .. })));
    }

    #[test]
    fn variable_width_integers() {
        let data = [0x34u8, 0x12, 0x00, 0x01, 0x02, 0x03];
        let mut cur = ByteCursor::new(&data);
        assert_eq!(cur.uint(2).unwrap(), 0x1234);
        assert_eq!(cur.uint(4).unwrap(), 0x0302_0100);
        assert!(ByteCursor::new(&data).uint(9).is_err());
    }

    #[test]
    fn vec_allocation_is_aligned() {
        let mut file = vec![0u8; 5];
        let addr = WriteAt::append(&mut file, &[1, 2, 3]).unwrap();
        assert_eq!(addr, 8);
        assert_eq!(file.read_at(8, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(file.allocate(4), 16);
    }

    #[test]
    fn slice_read_at_bounds() {
        let data = vec![0u8; 16];
        assert_eq!(data.read_at(8, 8).unwrap().len(), 8);
        assert!(data.read_at(12, 8).is_err());
        assert!(data.read_at(u64::MAX, 1).is_err());
        assert_eq!(align8(9), 16);
    }
}
