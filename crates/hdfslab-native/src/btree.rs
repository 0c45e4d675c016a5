//! Version 1 B-trees: the chunk index of chunked datasets (node type 1) and
//! the group index of old-style groups (node type 0), plus the symbol table
//! nodes the group index points at.

use crate::error::NativeError;
use crate::io::{ByteCursor, ReadAt, WriteAt, UNDEF};

const NODE_HEADER: usize = 24;
const MAX_DEPTH: u8 = 64;

/// One chunk as recorded in a chunk index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Element offset of the chunk's origin, one per dimension.
    pub offsets: Vec<u64>,
    pub addr: u64,
    /// Stored (possibly filtered) size in bytes.
    pub size: u64,
    /// Bit `i` set means filter `i` was skipped for this chunk.
    pub filter_mask: u32,
}

struct NodeHeader {
    node_type: u8,
    level: u8,
    entries: usize,
}

fn node_header(cur: &mut ByteCursor<'_>) -> Result<NodeHeader, NativeError> {
    cur.signature(b"TREE")?;
    let node_type = cur.u8()?;
    let level = cur.u8()?;
    let entries = cur.u16()? as usize;
    cur.skip(16)?; // siblings
    Ok(NodeHeader {
        node_type,
        level,
        entries,
    })
}

fn chunk_key_size(rank: usize) -> usize {
    8 + 8 * (rank + 1)
}

/// Collect every chunk of the index rooted at `addr`. `rank` is the
/// dataspace rank; keys carry one more offset for the element dimension.
pub fn read_chunk_index(
    src: &dyn ReadAt,
    addr: u64,
    rank: usize,
) -> Result<Vec<ChunkEntry>, NativeError> {
    let mut out = Vec::new();
    if addr != UNDEF {
        read_chunk_node(src, addr, rank, None, &mut out)?;
    }
    Ok(out)
}

fn read_chunk_node(
    src: &dyn ReadAt,
    addr: u64,
    rank: usize,
    expect_level: Option<u8>,
    out: &mut Vec<ChunkEntry>,
) -> Result<(), NativeError> {
    let head = src.read_at(addr, NODE_HEADER)?;
    let header = node_header(&mut ByteCursor::new(&head))?;
    if header.node_type != 1 {
        return Err(NativeError::Malformed(format!(
            "chunk index node of type {}",
            header.node_type
        )));
    }
    if header.level >= MAX_DEPTH || expect_level.is_some_and(|l| l != header.level) {
        return Err(NativeError::Malformed(format!(
            "chunk index node at {addr} has level {}",
            header.level
        )));
    }
    let key_size = chunk_key_size(rank);
    let body = src.read_at(
        addr + NODE_HEADER as u64,
        header.entries * (key_size + 8) + key_size,
    )?;
    let mut cur = ByteCursor::new(&body);
    for _ in 0..header.entries {
        let size = cur.u32()? as u64;
        let filter_mask = cur.u32()?;
        let mut offsets = Vec::with_capacity(rank);
        for _ in 0..rank {
            offsets.push(cur.u64()?);
        }
        cur.skip(8)?; // element dimension
        let child = cur.u64()?;
        if header.level == 0 {
            out.push(ChunkEntry {
                offsets,
                addr: child,
                size,
                filter_mask,
            });
        } else {
            read_chunk_node(src, child, rank, Some(header.level - 1), out)?;
        }
    }
    Ok(())
}

/// Write a chunk index for `entries` and return its root address, or
/// [`UNDEF`] when there are no chunks. Nodes hold up to `2k` children.
pub fn write_chunk_index(
    dst: &mut dyn WriteAt,
    entries: &[ChunkEntry],
    chunk_dims: &[u64],
    k: u16,
) -> Result<u64, NativeError> {
    if entries.is_empty() {
        return Ok(UNDEF);
    }
    let rank = chunk_dims.len();
    let fanout = 2 * usize::from(k.max(1));
    let key_size = chunk_key_size(rank);
    let node_size = (NODE_HEADER + fanout * 8 + (fanout + 1) * key_size) as u64;

    let mut sorted: Vec<&ChunkEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.offsets.cmp(&b.offsets));

    // Children of the level being written: (first key, child address)
    let mut children: Vec<(Vec<u8>, u64)> = sorted
        .iter()
        .map(|e| (encode_key(e.size, e.filter_mask, &e.offsets), e.addr))
        .collect();
    let last = &sorted[sorted.len() - 1];
    let end: Vec<u64> = last
        .offsets
        .iter()
        .zip(chunk_dims)
        .map(|(o, d)| o + d)
        .collect();
    let final_key = encode_key(0, 0, &end);

    let mut level = 0u8;
    loop {
        let groups: Vec<&[(Vec<u8>, u64)]> = children.chunks(fanout).collect();
        let addrs: Vec<u64> = groups.iter().map(|_| dst.allocate(node_size)).collect();
        let mut parents = Vec::with_capacity(groups.len());
        for (i, group) in groups.iter().enumerate() {
            let left = if i == 0 { UNDEF } else { addrs[i - 1] };
            let right = addrs.get(i + 1).copied().unwrap_or(UNDEF);
            let mut node = Vec::with_capacity(node_size as usize);
            node.extend_from_slice(b"TREE");
            node.push(1);
            node.push(level);
            node.extend_from_slice(&(group.len() as u16).to_le_bytes());
            node.extend_from_slice(&left.to_le_bytes());
            node.extend_from_slice(&right.to_le_bytes());
            for (key, child) in group.iter() {
                node.extend_from_slice(key);
                node.extend_from_slice(&child.to_le_bytes());
            }
            match groups.get(i + 1) {
                Some(next) => node.extend_from_slice(&next[0].0),
                None => node.extend_from_slice(&final_key),
            }
            node.resize(node_size as usize, 0);
            dst.write_at(addrs[i], &node)?;
            parents.push((group[0].0.clone(), addrs[i]));
        }
        if parents.len() == 1 {
            return Ok(parents[0].1);
        }
        children = parents;
        level += 1;
    }
}

fn encode_key(size: u64, filter_mask: u32, offsets: &[u64]) -> Vec<u8> {
    let mut key = Vec::with_capacity(chunk_key_size(offsets.len()));
    key.extend_from_slice(&(size as u32).to_le_bytes());
    key.extend_from_slice(&filter_mask.to_le_bytes());
    for o in offsets {
        key.extend_from_slice(&o.to_le_bytes());
    }
    key.extend_from_slice(&0u64.to_le_bytes());
    key
}

/// Symbol table node addresses reachable from a group index.
pub fn read_group_index(src: &dyn ReadAt, addr: u64) -> Result<Vec<u64>, NativeError> {
    let mut out = Vec::new();
    read_group_node(src, addr, None, &mut out)?;
    Ok(out)
}

fn read_group_node(
    src: &dyn ReadAt,
    addr: u64,
    expect_level: Option<u8>,
    out: &mut Vec<u64>,
) -> Result<(), NativeError> {
    let head = src.read_at(addr, NODE_HEADER)?;
    let header = node_header(&mut ByteCursor::new(&head))?;
    if header.node_type != 0
        || header.level >= MAX_DEPTH
        || expect_level.is_some_and(|l| l != header.level)
    {
        return Err(NativeError::Malformed(format!("group index node at {addr}")));
    }
    let body = src.read_at(addr + NODE_HEADER as u64, header.entries * 16 + 8)?;
    let mut cur = ByteCursor::new(&body);
    for _ in 0..header.entries {
        cur.skip(8)?; // heap offset key
        let child = cur.u64()?;
        if header.level == 0 {
            out.push(child);
        } else {
            read_group_node(src, child, Some(header.level - 1), out)?;
        }
    }
    Ok(())
}

/// One entry of a symbol table node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    /// Link name offset in the group's local heap.
    pub name_offset: u64,
    pub header: u64,
    /// Local heap offset of the link value when the entry is a soft link.
    pub soft_value: Option<u64>,
}

pub fn read_symbol_node(src: &dyn ReadAt, addr: u64) -> Result<Vec<SymbolEntry>, NativeError> {
    let head = src.read_at(addr, 8)?;
    let mut cur = ByteCursor::new(&head);
    cur.signature(b"SNOD")?;
    cur.skip(2)?; // version, reserved
    let count = cur.u16()? as usize;
    let body = src.read_at(addr + 8, count * 40)?;
    let mut cur = ByteCursor::new(&body);
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let name_offset = cur.u64()?;
        let header = cur.u64()?;
        let cache = cur.u32()?;
        cur.skip(4)?;
        let scratch = cur.take(16)?;
        let soft_value = (cache == 2).then(|| {
            u64::from(u32::from_le_bytes([scratch[0], scratch[1], scratch[2], scratch[3]]))
        });
        entries.push(SymbolEntry {
            name_offset,
            header,
            soft_value,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(offsets: Vec<u64>, addr: u64) -> ChunkEntry {
        ChunkEntry {
            offsets,
            addr,
            size: 64,
            filter_mask: 0,
        }
    }

    #[test]
    fn single_leaf_index() {
        let mut file = vec![0u8; 8];
        let entries = vec![entry(vec![4, 0], 2000), entry(vec![0, 0], 1000)];
        let root = write_chunk_index(&mut file, &entries, &[4, 8], 32).unwrap();
        assert_eq!(&file[root as usize..root as usize + 4], b"TREE");
        let read = read_chunk_index(&file, root, 2).unwrap();
        assert_eq!(read, vec![entry(vec![0, 0], 1000), entry(vec![4, 0], 2000)]);
    }

    #[test]
    fn deep_index_with_small_k() {
        let mut file = Vec::new();
        let entries: Vec<ChunkEntry> = (0..50).map(|i| entry(vec![i * 2], 10_000 + i)).collect();
        let root = write_chunk_index(&mut file, &entries, &[2], 2).unwrap();
        // 50 chunks with 4 per node: 13 leaves, 4 internal nodes, one root
        assert_eq!(file[root as usize + 5], 2);
        assert_eq!(read_chunk_index(&file, root, 1).unwrap(), entries);
    }

    #[test]
    fn empty_index_is_undefined() {
        let mut file = Vec::new();
        assert_eq!(write_chunk_index(&mut file, &[], &[4], 32).unwrap(), UNDEF);
        assert!(read_chunk_index(&file, UNDEF, 1).unwrap().is_empty());
    }

    #[test]
    fn wrong_node_type_is_malformed() {
        let mut file = Vec::new();
        let root = write_chunk_index(&mut file, &[entry(vec![0], 64)], &[4], 32).unwrap();
        assert!(matches!(
            read_group_index(&file, root),
            Err(NativeError::Malformed(_))
        ));
    }

    #[test]
    fn group_index_and_symbol_node() {
        let mut file = vec![0u8; 64];
        let mut snod = b"SNOD".to_vec();
        snod.extend_from_slice(&[1, 0]);
        snod.extend_from_slice(&2u16.to_le_bytes());
        for (name, header, cache, scratch) in [(8u64, 800u64, 0u32, 0u32), (16, UNDEF, 2, 24)] {
            snod.extend_from_slice(&name.to_le_bytes());
            snod.extend_from_slice(&header.to_le_bytes());
            snod.extend_from_slice(&cache.to_le_bytes());
            snod.extend_from_slice(&[0; 4]);
            snod.extend_from_slice(&scratch.to_le_bytes());
            snod.extend_from_slice(&[0; 12]);
        }
        let snod_addr = WriteAt::append(&mut file, &snod).unwrap();

        let mut tree = b"TREE".to_vec();
        tree.extend_from_slice(&[0, 0]);
        tree.extend_from_slice(&1u16.to_le_bytes());
        tree.extend_from_slice(&UNDEF.to_le_bytes());
        tree.extend_from_slice(&UNDEF.to_le_bytes());
        tree.extend_from_slice(&0u64.to_le_bytes());
        tree.extend_from_slice(&snod_addr.to_le_bytes());
        tree.extend_from_slice(&16u64.to_le_bytes());
        let tree_addr = WriteAt::append(&mut file, &tree).unwrap();

        assert_eq!(read_group_index(&file, tree_addr).unwrap(), vec![snod_addr]);
        let entries = read_symbol_node(&file, snod_addr).unwrap();
        assert_eq!(entries[0].header, 800);
        assert_eq!(entries[0].soft_value, None);
        assert_eq!(entries[1].soft_value, Some(24));
    }
}
