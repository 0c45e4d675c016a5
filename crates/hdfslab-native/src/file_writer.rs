//! Write changed parts of an object tree back to its file.
//!
//! A flush walks the tree children first. Dirty chunks are written in
//! place when their stored block can hold them and appended otherwise.
//! Headers are rewritten in place when they fit their reserved capacity;
//! a header that moves marks its parent group for rewriting. Freed space is
//! not reused, so a file only grows.

use std::collections::BTreeMap;
use std::path::Path;

use crate::btree::{write_chunk_index, ChunkEntry};
use crate::disk::Disk;
use crate::error::NativeError;
use crate::filters::{encode_chunk, encode_pipeline};
use crate::heap::write_vlen;
use crate::io::{WriteAt, UNDEF};
use crate::messages::{
    fill_value_encode, group_info_encode, link_info_encode, AttributeMessage, ChunkIndex,
    LayoutMessage, Link, LinkTarget,
};
use crate::object::{AttrData, Attribute, DatasetNode, GroupNode, HeaderSlot, Layout, Node};
use crate::object_header::{capacity_for, encode, encoded_size, kind, RawMessage, FLAG_CONSTANT};
use crate::storage::{ChunkData, ChunkStore, Slot, StoredChunk};

/// Write every changed object below `root`, then point the superblock at
/// the root header.
pub fn flush(disk: &mut Disk, root: &mut GroupNode) -> Result<(), NativeError> {
    let chunk_k = disk.superblock().chunk_k;
    write_group(disk, root, chunk_k)?;
    let root_addr = root
        .header
        .addr
        .ok_or_else(|| NativeError::Malformed("root group has no header".into()))?;
    disk.commit(root_addr)
}

fn write_group(disk: &mut Disk, group: &mut GroupNode, chunk_k: u16) -> Result<(), NativeError> {
    for child in group.children.values_mut() {
        let moved = match child {
            Node::Group(g) => {
                let before = g.header.addr;
                write_group(disk, g, chunk_k)?;
                before != g.header.addr
            }
            Node::Dataset(d) => {
                let before = d.header.addr;
                write_dataset(disk, d, chunk_k)?;
                before != d.header.addr
            }
            Node::Soft(_) | Node::External(_) => false,
        };
        if moved {
            group.header.dirty = true;
        }
    }
    if !group.header.needs_write() {
        return Ok(());
    }
    let mut messages = vec![
        RawMessage::new(kind::LINK_INFO, 0, link_info_encode()),
        RawMessage::new(kind::GROUP_INFO, 0, group_info_encode()),
    ];
    for (name, child) in &group.children {
        let target = match child {
            Node::Group(g) => LinkTarget::Hard(header_addr(&g.header)?),
            Node::Dataset(d) => LinkTarget::Hard(header_addr(&d.header)?),
            Node::Soft(path) => LinkTarget::Soft(path.clone()),
            Node::External(link) => LinkTarget::External {
                file: path_string(&link.file),
                path: link.path.clone(),
            },
        };
        let link = Link {
            name: name.clone(),
            target,
        };
        messages.push(RawMessage::new(kind::LINK, 0, link.encode()));
    }
    attribute_messages(disk, &group.attrs, &mut messages)?;
    write_header(disk, &mut group.header, &messages)
}

fn header_addr(slot: &HeaderSlot) -> Result<u64, NativeError> {
    slot.addr
        .ok_or_else(|| NativeError::Malformed("child header was not written".into()))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn attribute_messages(
    disk: &mut Disk,
    attrs: &BTreeMap<String, Attribute>,
    messages: &mut Vec<RawMessage>,
) -> Result<(), NativeError> {
    for (name, attr) in attrs {
        let raw = match &attr.data {
            AttrData::Fixed(bytes) => bytes.clone(),
            AttrData::VarLen(cells) => {
                let base = attr.datatype.vlen_base_size().unwrap_or(1);
                write_vlen(disk, cells, base)?
            }
        };
        let msg = AttributeMessage {
            name: name.clone(),
            datatype: attr.datatype.clone(),
            space: attr.space.clone(),
            raw,
        };
        messages.push(RawMessage::new(kind::ATTRIBUTE, 0, msg.encode()));
    }
    Ok(())
}

/// Write `messages` as the header in `slot`, in place when they fit.
fn write_header(
    disk: &mut Disk,
    slot: &mut HeaderSlot,
    messages: &[RawMessage],
) -> Result<(), NativeError> {
    let size = encoded_size(messages);
    match slot.addr {
        Some(addr) if size <= slot.capacity => {
            let bytes = encode(messages, slot.capacity)?;
            disk.write_at(addr, &bytes)?;
        }
        _ => {
            let capacity = capacity_for(size);
            let bytes = encode(messages, capacity)?;
            slot.addr = Some(disk.append(&bytes)?);
            slot.capacity = capacity;
        }
    }
    slot.dirty = false;
    Ok(())
}

fn write_dataset(disk: &mut Disk, ds: &mut DatasetNode, chunk_k: u16) -> Result<(), NativeError> {
    if ds.layout == Layout::Compact && (ds.store.has_dirty() || ds.header.needs_write()) {
        ds.store.dirty_resident();
        ds.layout = Layout::Contiguous;
        ds.store.mark_index_dirty();
    }
    for key in ds.store.dirty_keys() {
        let chunk = write_chunk(disk, &mut ds.store, &key)?;
        ds.store.settle(&key, chunk);
    }
    let rebuild = ds.layout == Layout::Chunked
        && (ds.store.index_dirty()
            || (ds.header.needs_write() && ds.store.index_addr().is_none()));
    if rebuild {
        let chunk_dims = ds.store.chunk_dims().to_vec();
        let entries: Vec<ChunkEntry> = ds
            .store
            .stored()
            .into_iter()
            .map(|(key, c)| ChunkEntry {
                offsets: key.iter().zip(&chunk_dims).map(|(k, d)| k * d).collect(),
                addr: c.addr,
                size: c.size,
                filter_mask: c.filter_mask,
            })
            .collect();
        let root = write_chunk_index(disk, &entries, &chunk_dims, chunk_k)?;
        ds.store.set_index_addr(Some(root));
    }
    if ds.store.index_dirty() || rebuild {
        ds.header.dirty = true;
    }
    ds.store.mark_clean();
    if !ds.header.needs_write() {
        return Ok(());
    }
    let messages = dataset_messages(disk, ds)?;
    write_header(disk, &mut ds.header, &messages)
}

/// Encode, filter and place one dirty chunk.
fn write_chunk(
    disk: &mut Disk,
    store: &mut ChunkStore,
    key: &[u64],
) -> Result<StoredChunk, NativeError> {
    let Some(Slot::Dirty { data, previous }) = store.slots().get(key) else {
        return Err(NativeError::Malformed(format!("chunk {key:?} is not dirty")));
    };
    let previous = *previous;
    let raw = match data {
        ChunkData::Fixed(bytes) => bytes.clone(),
        ChunkData::VarLen(cells) => write_vlen(disk, cells, store.vlen_base())?,
    };
    let bytes = encode_chunk(store.filters(), &raw, store.item_size())?;
    let size = bytes.len() as u64;
    let filtered = !store.filters().is_empty();
    let addr = match previous {
        Some(p) if size == p.size && !filtered => p.addr,
        Some(p) if size <= p.size && filtered => {
            store.mark_index_dirty();
            p.addr
        }
        _ => {
            store.mark_index_dirty();
            disk.allocate(size)
        }
    };
    disk.write_at(addr, &bytes)?;
    Ok(StoredChunk {
        addr,
        size,
        filter_mask: 0,
    })
}

fn dataset_messages(disk: &mut Disk, ds: &DatasetNode) -> Result<Vec<RawMessage>, NativeError> {
    let item_size = ds.datatype.type_size();
    let chunked = ds.layout == Layout::Chunked;
    let layout = if chunked {
        LayoutMessage::Chunked {
            dims: ds.store.chunk_dims().to_vec(),
            index: ChunkIndex::BTree(ds.store.index_addr().unwrap_or(UNDEF)),
        }
    } else {
        let addr = ds
            .store
            .stored()
            .first()
            .map(|(_, c)| c.addr)
            .unwrap_or(UNDEF);
        LayoutMessage::Contiguous(addr)
    };
    let data_size = ds.space.num_elements() * u64::from(item_size);

    let mut messages = vec![
        RawMessage::new(kind::DATASPACE, 0, ds.space.serialize()),
        RawMessage::new(kind::DATATYPE, FLAG_CONSTANT, ds.datatype.serialize()),
        RawMessage::new(
            kind::FILL_VALUE,
            FLAG_CONSTANT,
            fill_value_encode(ds.store.fill(), chunked),
        ),
        RawMessage::new(kind::LAYOUT, 0, layout.encode(item_size, data_size)?),
    ];
    if !ds.store.filters().is_empty() {
        messages.push(RawMessage::new(
            kind::FILTER_PIPELINE,
            FLAG_CONSTANT,
            encode_pipeline(ds.store.filters()),
        ));
    }
    attribute_messages(disk, &ds.attrs, &mut messages)?;
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataspace::Dataspace;
    use crate::datatype::Datatype;
    use crate::file_reader::load_root;
    use crate::filters::deflate_pipeline;
    use crate::io::ReadAt;
    use crate::object::ExternalLink;
    use crate::selection::Selection;

    fn dataset(dims: &[u64], chunk: Option<&[u64]>) -> DatasetNode {
        let (layout, chunk_dims) = match chunk {
            Some(c) => (Layout::Chunked, c.to_vec()),
            None => (Layout::Contiguous, dims.to_vec()),
        };
        DatasetNode {
            datatype: Datatype::native_int(4, true),
            space: Dataspace::simple(dims, None).unwrap(),
            layout,
            store: ChunkStore::new(&chunk_dims, 4, false, None),
            attrs: BTreeMap::new(),
            header: HeaderSlot::default(),
        }
    }

    fn i32_bytes(vals: impl IntoIterator<Item = i32>) -> Vec<u8> {
        vals.into_iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn read_all(disk: &Disk, ds: &DatasetNode) -> Vec<u8> {
        let n = ds.space.num_elements() as usize;
        let mut out = vec![0u8; n * 4];
        ds.store
            .read(disk, &Selection::All, &ds.space.dimensions, &mut out)
            .unwrap();
        out
    }

    fn get<'a>(root: &'a GroupNode, name: &str) -> &'a DatasetNode {
        match &root.children[name] {
            Node::Dataset(d) => d,
            other => panic!("{name} is {:?}", other.kind()),
        }
    }

    #[test]
    fn tree_survives_flush_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.h5");
        let mut disk = Disk::create(&path).unwrap();
        let mut root = GroupNode::default();

        let mut contiguous = dataset(&[6], None);
        contiguous
            .store
            .write(&disk, &Selection::All, &[6], &i32_bytes(0..6))
            .unwrap();
        let mut chunked = dataset(&[10], Some(&[4]));
        chunked.store = chunked.store.clone().with_filters(deflate_pipeline(6));
        chunked
            .store
            .write(&disk, &Selection::All, &[10], &i32_bytes(100..110))
            .unwrap();
        root.insert(&["flat"], "/flat", Node::Dataset(contiguous)).unwrap();
        root.insert(&["packed"], "/packed", Node::Dataset(chunked)).unwrap();
        root.insert(&["alias"], "/alias", Node::Soft("/flat".into())).unwrap();
        root.insert(
            &["ext"],
            "/ext",
            Node::External(ExternalLink {
                file: "other.h5".into(),
                path: "/x".into(),
            }),
        )
        .unwrap();
        flush(&mut disk, &mut root).unwrap();
        drop(disk);

        let disk = Disk::open(&path, false).unwrap();
        let loaded = load_root(&disk).unwrap();
        assert_eq!(read_all(&disk, get(&loaded, "flat")), i32_bytes(0..6));
        let packed = get(&loaded, "packed");
        assert_eq!(packed.deflate_level(), Some(6));
        assert_eq!(packed.store.slots().len(), 3);
        assert_eq!(read_all(&disk, packed), i32_bytes(100..110));
        assert!(matches!(&loaded.children["alias"], Node::Soft(p) if p == "/flat"));
        assert!(matches!(&loaded.children["ext"], Node::External(l) if l.path == "/x"));
    }

    #[test]
    fn unchanged_tree_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idle.h5");
        let mut disk = Disk::create(&path).unwrap();
        let mut root = GroupNode::default();
        root.insert(&["d"], "/d", Node::Dataset(dataset(&[4], Some(&[2]))))
            .unwrap();
        flush(&mut disk, &mut root).unwrap();
        let eof = disk.eof();
        flush(&mut disk, &mut root).unwrap();
        assert_eq!(disk.eof(), eof);
    }

    #[test]
    fn same_size_chunk_rewrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inplace.h5");
        let mut disk = Disk::create(&path).unwrap();
        let mut root = GroupNode::default();
        let mut ds = dataset(&[8], Some(&[4]));
        ds.store
            .write(&disk, &Selection::All, &[8], &i32_bytes(0..8))
            .unwrap();
        root.insert(&["d"], "/d", Node::Dataset(ds)).unwrap();
        flush(&mut disk, &mut root).unwrap();
        let eof = disk.eof();

        let Node::Dataset(ds) = root.children.get_mut("d").unwrap() else {
            unreachable!()
        };
        let sel = Selection::hyperslab(&[5], &[1], &[1], &[1]).unwrap();
        ds.store.write(&disk, &sel, &[8], &i32_bytes([-5])).unwrap();
        flush(&mut disk, &mut root).unwrap();
        assert_eq!(disk.eof(), eof, "no new space for an unfiltered rewrite");

        let Node::Dataset(ds) = &root.children["d"] else {
            unreachable!()
        };
        assert_eq!(read_all(&disk, ds), i32_bytes([0, 1, 2, 3, 4, -5, 6, 7]));
    }

    #[test]
    fn growing_header_moves_and_parent_follows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.h5");
        let mut disk = Disk::create(&path).unwrap();
        let mut root = GroupNode::default();
        root.insert(&["g"], "/g", Node::Group(GroupNode::default()))
            .unwrap();
        flush(&mut disk, &mut root).unwrap();
        let Node::Group(g) = &root.children["g"] else {
            unreachable!()
        };
        let first = g.header.addr;

        let Node::Group(g) = root.children.get_mut("g").unwrap() else {
            unreachable!()
        };
        g.attrs_mut().insert(
            "note".into(),
            Attribute {
                datatype: Datatype::native_int(1, false),
                space: Dataspace::simple(&[512], None).unwrap(),
                data: AttrData::Fixed(vec![7; 512]),
            },
        );
        flush(&mut disk, &mut root).unwrap();
        let Node::Group(g) = &root.children["g"] else {
            unreachable!()
        };
        assert_ne!(g.header.addr, first);

        let loaded = load_root(&disk).unwrap();
        let Node::Group(g) = &loaded.children["g"] else {
            panic!("expected group");
        };
        assert_eq!(g.attrs["note"].data, AttrData::Fixed(vec![7; 512]));
    }

    #[test]
    fn vlen_attribute_and_dataset_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vlen.h5");
        let mut disk = Disk::create(&path).unwrap();
        let mut root = GroupNode::default();
        root.attrs_mut().insert(
            "title".into(),
            Attribute {
                datatype: Datatype::var_string(),
                space: Dataspace::scalar(),
                data: AttrData::VarLen(vec![b"run 7".to_vec()]),
            },
        );
        let mut ds = DatasetNode {
            datatype: Datatype::var_string(),
            space: Dataspace::simple(&[3], None).unwrap(),
            layout: Layout::Chunked,
            store: ChunkStore::new(&[2], 16, true, None),
            attrs: BTreeMap::new(),
            header: HeaderSlot::default(),
        };
        let cells = vec![b"a".to_vec(), Vec::new(), b"ccc".to_vec()];
        ds.store.write_vlen(&disk, &Selection::All, &[3], &cells).unwrap();
        root.insert(&["names"], "/names", Node::Dataset(ds)).unwrap();
        flush(&mut disk, &mut root).unwrap();

        let loaded = load_root(&disk).unwrap();
        assert_eq!(
            loaded.attrs["title"].data,
            AttrData::VarLen(vec![b"run 7".to_vec()])
        );
        let names = get(&loaded, "names");
        assert_eq!(
            names.store.read_vlen(&disk, &Selection::All, &[3]).unwrap(),
            cells
        );
        assert_eq!(disk.read_at(0, 8).unwrap()[1..4], *b"HDF");
    }
}
