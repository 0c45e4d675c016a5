//! Build the object tree of a file from its headers.
//!
//! Groups, links, attributes and dataset metadata are read eagerly from
//! the root down. Chunk data is not read; each dataset's store records
//! where its chunks live and loads them when a selection touches them.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::btree::{read_chunk_index, read_group_index, read_symbol_node};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::disk::Disk;
use crate::error::NativeError;
use crate::filters::{decode_pipeline, Filter};
use crate::heap::{read_vlen, LocalHeap};
use crate::io::UNDEF;
use crate::messages::{
    fill_value_decode, shared_address, symbol_table_decode, uses_dense_storage,
    AttributeMessage, ChunkIndex, LayoutMessage, Link, LinkTarget,
};
use crate::object::{
    AttrData, Attribute, DatasetNode, ExternalLink, GroupNode, HeaderSlot, Layout, Node,
};
use crate::object_header::{kind, ObjectHeader, RawMessage, FLAG_SHARED};
use crate::storage::{ChunkData, ChunkStore, StoredChunk};

/// Read the whole object tree below the superblock's root group.
pub fn load_root(disk: &Disk) -> Result<GroupNode, NativeError> {
    let root = disk.superblock().root;
    let mut loader = Loader {
        disk,
        seen: HashMap::new(),
    };
    loader.seen.insert(root, "/".to_string());
    let header = ObjectHeader::read(disk, root)?;
    loader.group(root, &header, "")
}

struct Loader<'a> {
    disk: &'a Disk,
    /// Header address to the first path it was reached by.
    seen: HashMap<u64, String>,
}

impl Loader<'_> {
    fn object(&mut self, addr: u64, path: &str) -> Result<Option<Node>, NativeError> {
        if let Some(first) = self.seen.get(&addr) {
            return Ok(Some(Node::Soft(first.clone())));
        }
        self.seen.insert(addr, path.to_string());
        let header = ObjectHeader::read(self.disk, addr)?;
        if header.find(kind::LAYOUT).is_some() {
            return dataset(self.disk, addr, &header).map(|d| Some(Node::Dataset(d)));
        }
        if header.find(kind::DATATYPE).is_some() {
            // A committed datatype; only reachable through shared messages
            return Ok(None);
        }
        self.group(addr, &header, path).map(|g| Some(Node::Group(g)))
    }

    fn group(
        &mut self,
        addr: u64,
        header: &ObjectHeader,
        path: &str,
    ) -> Result<GroupNode, NativeError> {
        let mut links = Vec::new();
        if let Some(info) = header.find(kind::LINK_INFO) {
            if uses_dense_storage(kind::LINK_INFO, &info.data)? {
                return Err(NativeError::Unsupported(format!(
                    "links of {} stored in a fractal heap",
                    display(path)
                )));
            }
            for msg in header.all(kind::LINK) {
                links.push(Link::decode(&msg.data)?);
            }
        } else if let Some(table) = header.find(kind::SYMBOL_TABLE) {
            links = symbol_table_links(self.disk, &table.data)?;
        } else {
            for msg in header.all(kind::LINK) {
                links.push(Link::decode(&msg.data)?);
            }
        }

        let mut children = BTreeMap::new();
        for link in links {
            let child_path = format!("{path}/{}", link.name);
            let node = match link.target {
                LinkTarget::Hard(target) => match self.object(target, &child_path)? {
                    Some(node) => node,
                    None => continue,
                },
                LinkTarget::Soft(target) => Node::Soft(target),
                LinkTarget::External { file, path } => Node::External(ExternalLink {
                    file: PathBuf::from(file),
                    path,
                }),
            };
            children.insert(link.name, node);
        }

        Ok(GroupNode {
            children,
            attrs: attributes(self.disk, header)?,
            header: HeaderSlot::at(addr, header.capacity),
        })
    }
}

fn display(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

fn symbol_table_links(disk: &Disk, data: &[u8]) -> Result<Vec<Link>, NativeError> {
    let (btree, heap_addr) = symbol_table_decode(data)?;
    let heap = LocalHeap::read(disk, heap_addr)?;
    let mut links = Vec::new();
    for node in read_group_index(disk, btree)? {
        for entry in read_symbol_node(disk, node)? {
            let name = heap.string_at(entry.name_offset)?;
            let target = match entry.soft_value {
                Some(offset) => LinkTarget::Soft(heap.string_at(offset)?),
                None => LinkTarget::Hard(entry.header),
            };
            links.push(Link { name, target });
        }
    }
    Ok(links)
}

fn is_null_space(err: &NativeError) -> bool {
    matches!(err, NativeError::Unsupported(msg) if msg == "null dataspace")
}

fn attributes(
    disk: &Disk,
    header: &ObjectHeader,
) -> Result<BTreeMap<String, Attribute>, NativeError> {
    if let Some(info) = header.find(kind::ATTRIBUTE_INFO) {
        if uses_dense_storage(kind::ATTRIBUTE_INFO, &info.data)? {
            return Err(NativeError::Unsupported(
                "attributes stored in a fractal heap".into(),
            ));
        }
    }
    let mut attrs = BTreeMap::new();
    for msg in header.all(kind::ATTRIBUTE) {
        let attr = match AttributeMessage::decode(&msg.data) {
            Ok(attr) => attr,
            Err(e) if is_null_space(&e) => continue,
            Err(e) => return Err(e),
        };
        let data = match attr.datatype.vlen_base_size() {
            Some(base) => AttrData::VarLen(read_vlen(disk, &attr.raw, base)?),
            None => AttrData::Fixed(attr.raw),
        };
        attrs.insert(
            attr.name,
            Attribute {
                datatype: attr.datatype,
                space: attr.space,
                data,
            },
        );
    }
    Ok(attrs)
}

fn datatype(disk: &Disk, msg: &RawMessage) -> Result<Datatype, NativeError> {
    if msg.flags & FLAG_SHARED == 0 {
        return Ok(Datatype::parse(&msg.data)?.0);
    }
    let committed = ObjectHeader::read(disk, shared_address(&msg.data)?)?;
    let inner = committed
        .find(kind::DATATYPE)
        .ok_or_else(|| NativeError::Malformed("shared datatype without a datatype".into()))?;
    Ok(Datatype::parse(&inner.data)?.0)
}

fn required<'h>(header: &'h ObjectHeader, msg_kind: u16) -> Result<&'h RawMessage, NativeError> {
    header
        .find(msg_kind)
        .ok_or_else(|| NativeError::Malformed(format!("dataset without message {msg_kind:#x}")))
}

fn dataset(disk: &Disk, addr: u64, header: &ObjectHeader) -> Result<DatasetNode, NativeError> {
    let space = Dataspace::parse(&required(header, kind::DATASPACE)?.data)?.0;
    let datatype = datatype(disk, required(header, kind::DATATYPE)?)?;
    let rank = space.rank();
    let item_size = datatype.type_size() as usize;
    let vlen_base = datatype.vlen_base_size();

    let fill_msg = header
        .find(kind::FILL_VALUE)
        .or_else(|| header.find(kind::FILL_VALUE_OLD));
    let fill = match fill_msg {
        Some(msg) => fill_value_decode(msg.kind, &msg.data)?
            .filter(|bytes| vlen_base.is_none() && bytes.len() == item_size),
        None => None,
    };
    let filters: Vec<Filter> = match header.find(kind::FILTER_PIPELINE) {
        Some(msg) => decode_pipeline(&msg.data)?,
        None => Vec::new(),
    };
    let store_for = |chunk_dims: &[u64]| {
        ChunkStore::new(chunk_dims, item_size, vlen_base.is_some(), fill.clone())
            .with_filters(filters.clone())
            .with_vlen_base(vlen_base.unwrap_or(1))
    };

    let (layout, store) = match LayoutMessage::decode(&required(header, kind::LAYOUT)?.data, rank)? {
        LayoutMessage::Compact(bytes) => {
            let mut store = store_for(&space.dimensions);
            let data = match vlen_base {
                Some(base) => ChunkData::VarLen(read_vlen(disk, &bytes, base)?),
                None => ChunkData::Fixed(bytes),
            };
            store.insert_resident(vec![0; rank], data);
            (Layout::Compact, store)
        }
        LayoutMessage::Contiguous(data_addr) => {
            let mut store = store_for(&space.dimensions);
            let size = space.num_elements() * item_size as u64;
            if data_addr != UNDEF && size > 0 {
                store.insert_stored(
                    vec![0; rank],
                    StoredChunk {
                        addr: data_addr,
                        size,
                        filter_mask: 0,
                    },
                );
            }
            (Layout::Contiguous, store)
        }
        LayoutMessage::Chunked { dims, index } => {
            let mut store = store_for(&dims);
            let chunk_bytes = (store.elements_per_chunk() * item_size) as u64;
            match index {
                ChunkIndex::BTree(root) => {
                    for entry in read_chunk_index(disk, root, rank)? {
                        let key = entry
                            .offsets
                            .iter()
                            .zip(store.chunk_dims())
                            .map(|(o, d)| o / d)
                            .collect();
                        store.insert_stored(
                            key,
                            StoredChunk {
                                addr: entry.addr,
                                size: entry.size,
                                filter_mask: entry.filter_mask,
                            },
                        );
                    }
                    store.set_index_addr(Some(root));
                }
                ChunkIndex::Single {
                    addr: chunk_addr,
                    size,
                    filter_mask,
                } => {
                    if chunk_addr != UNDEF {
                        store.insert_stored(
                            vec![0; rank],
                            StoredChunk {
                                addr: chunk_addr,
                                size: size.unwrap_or(chunk_bytes),
                                filter_mask,
                            },
                        );
                    }
                }
                ChunkIndex::Implicit(base) => {
                    if base != UNDEF {
                        let grid: Vec<u64> = space
                            .dimensions
                            .iter()
                            .zip(store.chunk_dims())
                            .map(|(&d, &c)| (d + c - 1) / c)
                            .collect();
                        let mut n = 0u64;
                        for_each_grid_coord(&grid, |key| {
                            store.insert_stored(
                                key,
                                StoredChunk {
                                    addr: base + n * chunk_bytes,
                                    size: chunk_bytes,
                                    filter_mask: 0,
                                },
                            );
                            n += 1;
                        });
                    }
                }
            }
            (Layout::Chunked, store)
        }
    };

    Ok(DatasetNode {
        datatype,
        space,
        layout,
        store,
        attrs: attributes(disk, header)?,
        header: HeaderSlot::at(addr, header.capacity),
    })
}

/// Visit grid coordinates in row-major order.
fn for_each_grid_coord(grid: &[u64], mut f: impl FnMut(Vec<u64>)) {
    if grid.iter().any(|&g| g == 0) {
        return;
    }
    let mut coord = vec![0u64; grid.len()];
    loop {
        f(coord.clone());
        let mut d = grid.len();
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            coord[d] += 1;
            if coord[d] < grid[d] {
                break;
            }
            coord[d] = 0;
        }
    }
}
