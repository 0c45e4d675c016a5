//! Heaps: the local heap that holds old-style group link names, and global
//! heap collections that hold variable-length element data.

use std::collections::HashMap;

use crate::error::NativeError;
use crate::io::{align8, ByteCursor, ReadAt, WriteAt};

/// Size of one stored variable-length reference.
pub const VLEN_REF_SIZE: usize = 16;

/// Collections are never smaller than this.
const MIN_COLLECTION: u64 = 4096;
/// Start another collection once this many payload bytes are queued.
const TARGET_COLLECTION: u64 = 1 << 20;
const OBJECT_HEADER: u64 = 16;
const COLLECTION_HEADER: u64 = 16;
const MAX_OBJECTS: usize = 65_534;

/// A local heap's data segment.
#[derive(Debug, Clone)]
pub struct LocalHeap {
    data: Vec<u8>,
}

impl LocalHeap {
    pub fn read(src: &dyn ReadAt, addr: u64) -> Result<LocalHeap, NativeError> {
        let header = src.read_at(addr, 32)?;
        let mut cur = ByteCursor::new(&header);
        cur.signature(b"HEAP")?;
        cur.skip(4)?; // version, reserved
        let size = cur.u64()?;
        cur.skip(8)?; // free list head
        let data_addr = cur.u64()?;
        Ok(LocalHeap {
            data: src.read_at(data_addr, size as usize)?,
        })
    }

    /// Null-terminated string at `offset` in the data segment.
    pub fn string_at(&self, offset: u64) -> Result<String, NativeError> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&s| s < self.data.len())
            .ok_or_else(|| NativeError::Malformed(format!("local heap offset {offset}")))?;
        ByteCursor::new(&self.data[start..]).cstr()
    }
}

/// Objects of one global heap collection, by index.
#[derive(Debug, Clone, Default)]
pub struct GlobalHeap {
    objects: HashMap<u16, Vec<u8>>,
}

impl GlobalHeap {
    pub fn read(src: &dyn ReadAt, addr: u64) -> Result<GlobalHeap, NativeError> {
        let header = src.read_at(addr, COLLECTION_HEADER as usize)?;
        let mut cur = ByteCursor::new(&header);
        cur.signature(b"GCOL")?;
        cur.skip(4)?;
        let size = cur.u64()?;
        let block = src.read_at(addr, size as usize)?;
        let mut cur = ByteCursor::new(&block);
        cur.skip(COLLECTION_HEADER as usize)?;
        let mut objects = HashMap::new();
        while cur.remaining() >= OBJECT_HEADER as usize {
            let index = cur.u16()?;
            if index == 0 {
                break; // free space runs to the end
            }
            cur.skip(6)?; // reference count, reserved
            let len = cur.u64()? as usize;
            let data = cur.take(len)?.to_vec();
            let padded = align8(len as u64) as usize - len;
            cur.skip(padded.min(cur.remaining()))?;
            objects.insert(index, data);
        }
        Ok(GlobalHeap { objects })
    }

    pub fn get(&self, index: u16) -> Option<&[u8]> {
        self.objects.get(&index).map(Vec::as_slice)
    }
}

/// Resolve stored variable-length references into cells. `base_size` is
/// the size of one sequence element (1 for strings).
pub fn read_vlen(
    src: &dyn ReadAt,
    refs: &[u8],
    base_size: usize,
) -> Result<Vec<Vec<u8>>, NativeError> {
    let mut collections: HashMap<u64, GlobalHeap> = HashMap::new();
    let mut cells = Vec::with_capacity(refs.len() / VLEN_REF_SIZE);
    for raw in refs.chunks_exact(VLEN_REF_SIZE) {
        let mut cur = ByteCursor::new(raw);
        let len = cur.u32()? as usize;
        let addr = cur.u64()?;
        let index = cur.u32()?;
        if len == 0 || addr == 0 || index == 0 {
            cells.push(Vec::new());
            continue;
        }
        if !collections.contains_key(&addr) {
            collections.insert(addr, GlobalHeap::read(src, addr)?);
        }
        let object = collections
            .get(&addr)
            .and_then(|heap| u16::try_from(index).ok().and_then(|i| heap.get(i)))
            .ok_or_else(|| {
                NativeError::Malformed(format!("global heap object {index} at {addr}"))
            })?;
        let bytes = (len * base_size.max(1)).min(object.len());
        cells.push(object[..bytes].to_vec());
    }
    Ok(cells)
}

/// Store cells in new global heap collections and return their references,
/// [`VLEN_REF_SIZE`] bytes per cell. Empty cells get a null reference.
pub fn write_vlen(
    dst: &mut dyn WriteAt,
    cells: &[Vec<u8>],
    base_size: usize,
) -> Result<Vec<u8>, NativeError> {
    let mut refs = vec![0u8; cells.len() * VLEN_REF_SIZE];
    let mut batch: Vec<usize> = Vec::new();
    let mut batch_bytes = 0u64;
    for (i, cell) in cells.iter().enumerate() {
        if cell.is_empty() {
            continue;
        }
        let object = OBJECT_HEADER + align8(cell.len() as u64);
        let full = batch.len() == MAX_OBJECTS || batch_bytes + object > TARGET_COLLECTION;
        if full && !batch.is_empty() {
            flush_collection(dst, cells, &batch, base_size, &mut refs)?;
            batch.clear();
            batch_bytes = 0;
        }
        batch.push(i);
        batch_bytes += object;
    }
    if !batch.is_empty() {
        flush_collection(dst, cells, &batch, base_size, &mut refs)?;
    }
    Ok(refs)
}

fn flush_collection(
    dst: &mut dyn WriteAt,
    cells: &[Vec<u8>],
    batch: &[usize],
    base_size: usize,
    refs: &mut [u8],
) -> Result<(), NativeError> {
    let payload: u64 = batch
        .iter()
        .map(|&i| OBJECT_HEADER + align8(cells[i].len() as u64))
        .sum();
    // Leave room for the free-space object that closes the collection
    let size = (COLLECTION_HEADER + payload + OBJECT_HEADER).max(MIN_COLLECTION);
    let mut block = Vec::with_capacity(size as usize);
    block.extend_from_slice(b"GCOL");
    block.extend_from_slice(&[1, 0, 0, 0]);
    block.extend_from_slice(&size.to_le_bytes());
    for (n, &i) in batch.iter().enumerate() {
        let cell = &cells[i];
        block.extend_from_slice(&((n + 1) as u16).to_le_bytes());
        block.extend_from_slice(&1u16.to_le_bytes());
        block.extend_from_slice(&[0; 4]);
        block.extend_from_slice(&(cell.len() as u64).to_le_bytes());
        block.extend_from_slice(cell);
        block.resize(align8(block.len() as u64) as usize, 0);
    }
    let free = size - block.len() as u64;
    block.extend_from_slice(&0u16.to_le_bytes());
    block.extend_from_slice(&[0; 6]);
    block.extend_from_slice(&free.to_le_bytes());
    block.resize(size as usize, 0);

    let addr = dst.append(&block)?;
    for (n, &i) in batch.iter().enumerate() {
        let len = (cells[i].len() / base_size.max(1)) as u32;
        let slot = &mut refs[i * VLEN_REF_SIZE..(i + 1) * VLEN_REF_SIZE];
        slot[..4].copy_from_slice(&len.to_le_bytes());
        slot[4..12].copy_from_slice(&addr.to_le_bytes());
        slot[12..].copy_from_slice(&((n + 1) as u32).to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlen_cells_through_a_collection() {
        let mut file = vec![0u8; 64];
        let cells = vec![b"alpha".to_vec(), Vec::new(), b"a longer string value".to_vec()];
        let refs = write_vlen(&mut file, &cells, 1).unwrap();
        assert_eq!(refs.len(), 3 * VLEN_REF_SIZE);
        assert_eq!(&refs[16..32], &[0u8; 16]);
        assert_eq!(file.len() as u64, 64 + MIN_COLLECTION);
        assert_eq!(&file[64..68], b"GCOL");
        assert_eq!(read_vlen(&file, &refs, 1).unwrap(), cells);
    }

    #[test]
    fn sequence_length_counts_elements() {
        let mut file = Vec::new();
        let cells = vec![[1u32, 2, 3].iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>()];
        let refs = write_vlen(&mut file, &cells, 4).unwrap();
        assert_eq!(u32::from_le_bytes([refs[0], refs[1], refs[2], refs[3]]), 3);
        assert_eq!(read_vlen(&file, &refs, 4).unwrap(), cells);
    }

    #[test]
    fn large_cells_split_collections() {
        let mut file = Vec::new();
        let cells = vec![vec![7u8; 700_000], vec![8u8; 700_000], vec![9u8; 10]];
        let refs = write_vlen(&mut file, &cells, 1).unwrap();
        let addr = |i: usize| u64::from_le_bytes(refs[i * 16 + 4..i * 16 + 12].try_into().unwrap());
        assert_ne!(addr(0), addr(1));
        assert_eq!(addr(1), addr(2), "third cell shares the second collection");
        assert_eq!(read_vlen(&file, &refs, 1).unwrap(), cells);
    }

    #[test]
    fn local_heap_strings() {
        let mut file = vec![0u8; 32];
        let mut header = b"HEAP".to_vec();
        header.extend_from_slice(&[0; 4]);
        header.extend_from_slice(&16u64.to_le_bytes());
        header.extend_from_slice(&u64::MAX.to_le_bytes());
        header.extend_from_slice(&32u64.to_le_bytes());
        file[..32].copy_from_slice(&header);
        file.extend_from_slice(b"\0\0\0\0\0\0\0\0data\0\0\0\0");
        let heap = LocalHeap::read(&file, 0).unwrap();
        assert_eq!(heap.string_at(8).unwrap(), "data");
        assert_eq!(heap.string_at(0).unwrap(), "");
        assert!(heap.string_at(64).is_err());
    }
}
