//! In-memory object tree of one file: groups, datasets, attributes, soft
//! links and external links.
//!
//! Every group and dataset remembers where its object header lives so that
//! a flush only rewrites headers that changed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::NativeError;
use crate::filters;
use crate::storage::ChunkStore;

/// Location and state of an object's header on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSlot {
    /// Header address, `None` until first written.
    pub addr: Option<u64>,
    /// Bytes reserved at `addr` for in-place rewrites.
    pub capacity: u64,
    /// The header's messages changed since it was written.
    pub dirty: bool,
}

impl HeaderSlot {
    pub fn at(addr: u64, capacity: u64) -> Self {
        HeaderSlot {
            addr: Some(addr),
            capacity,
            dirty: false,
        }
    }

    pub fn needs_write(&self) -> bool {
        self.dirty || self.addr.is_none()
    }
}

/// Attribute payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrData {
    /// Fixed-size elements.
    Fixed(Vec<u8>),
    /// Variable-length cells.
    VarLen(Vec<Vec<u8>>),
}

/// A small named array attached to a group or dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub datatype: Datatype,
    pub space: Dataspace,
    pub data: AttrData,
}

/// Dataset storage layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One block covering the whole (fixed) extent.
    Contiguous,
    /// Fixed-shape chunks; the only layout that can be extended.
    Chunked,
    /// Raw data kept inside the object header. Read from existing files
    /// only; rewritten as contiguous once modified.
    Compact,
}

/// A typed n-dimensional dataset.
#[derive(Debug, Clone)]
pub struct DatasetNode {
    pub datatype: Datatype,
    pub space: Dataspace,
    pub layout: Layout,
    pub store: ChunkStore,
    pub attrs: BTreeMap<String, Attribute>,
    pub header: HeaderSlot,
}

impl DatasetNode {
    /// Deflate level of the dataset's filter pipeline, if it has one.
    pub fn deflate_level(&self) -> Option<u32> {
        filters::deflate_level(self.store.filters())
    }
}

/// A link to an object inside another file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLink {
    pub file: PathBuf,
    pub path: String,
}

/// A group of named children.
#[derive(Debug, Clone, Default)]
pub struct GroupNode {
    pub children: BTreeMap<String, Node>,
    pub attrs: BTreeMap<String, Attribute>,
    pub header: HeaderSlot,
}

/// Any object in the tree.
#[derive(Debug, Clone)]
pub enum Node {
    Group(GroupNode),
    Dataset(DatasetNode),
    /// A path inside the same file, absolute or relative to the group
    /// holding the link.
    Soft(String),
    External(ExternalLink),
}

/// Kind of object found at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Group,
    Dataset,
    SoftLink,
    ExternalLink,
}

impl Node {
    /// Kind of this node.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Node::Group(_) => ObjectKind::Group,
            Node::Dataset(_) => ObjectKind::Dataset,
            Node::Soft(_) => ObjectKind::SoftLink,
            Node::External(_) => ObjectKind::ExternalLink,
        }
    }

    /// Attributes of a group or dataset.
    pub fn attrs(&self) -> Option<&BTreeMap<String, Attribute>> {
        match self {
            Node::Group(g) => Some(&g.attrs),
            Node::Dataset(d) => Some(&d.attrs),
            Node::Soft(_) | Node::External(_) => None,
        }
    }

    /// Mutable attributes of a group or dataset. The owner's header is
    /// marked for rewriting.
    pub fn attrs_mut(&mut self) -> Option<&mut BTreeMap<String, Attribute>> {
        match self {
            Node::Group(g) => Some(g.attrs_mut()),
            Node::Dataset(d) => {
                d.header.dirty = true;
                Some(&mut d.attrs)
            }
            Node::Soft(_) | Node::External(_) => None,
        }
    }
}

/// Split an absolute or relative '/'-separated path into components.
pub fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".").collect()
}

/// Join components back into an absolute path.
pub fn join(parts: &[&str]) -> String {
    format!("/{}", parts.join("/"))
}

/// Where a path walk ended.
pub enum Lookup<'a> {
    /// The object itself.
    Found(&'a Node),
    /// The walk reached a soft link; continue at its target. The link is
    /// the last component before `rest`.
    Soft { target: &'a str, rest: Vec<String> },
    /// The walk crossed an external link; continue in another file.
    External {
        link: &'a ExternalLink,
        rest: Vec<String>,
    },
}

impl GroupNode {
    /// Attributes, with the header marked for rewriting.
    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, Attribute> {
        self.header.dirty = true;
        &mut self.attrs
    }

    /// Resolve `parts` below this group, stopping at soft and external links.
    pub fn lookup<'a>(&'a self, parts: &[&str], full: &str) -> Result<Lookup<'a>, NativeError> {
        let (first, rest) = match parts.split_first() {
            Some(split) => split,
            None => return Err(NativeError::NotAGroup(full.to_string())),
        };
        let node = self
            .children
            .get(*first)
            .ok_or_else(|| NativeError::NotFound(full.to_string()))?;
        match node {
            Node::External(link) => Ok(Lookup::External {
                link,
                rest: rest.iter().map(|s| s.to_string()).collect(),
            }),
            Node::Soft(target) => Ok(Lookup::Soft {
                target,
                rest: rest.iter().map(|s| s.to_string()).collect(),
            }),
            _ if rest.is_empty() => Ok(Lookup::Found(node)),
            Node::Group(g) => g.lookup(rest, full),
            Node::Dataset(_) => Err(NativeError::NotAGroup(full.to_string())),
        }
    }

    /// Mutable node at `parts` (no link traversal).
    pub fn node_mut(&mut self, parts: &[&str], full: &str) -> Result<&mut Node, NativeError> {
        let (first, rest) = parts
            .split_first()
            .ok_or_else(|| NativeError::NotAGroup(full.to_string()))?;
        let node = self
            .children
            .get_mut(*first)
            .ok_or_else(|| NativeError::NotFound(full.to_string()))?;
        if rest.is_empty() {
            return Ok(node);
        }
        match node {
            Node::Group(g) => g.node_mut(rest, full),
            _ => Err(NativeError::NotAGroup(full.to_string())),
        }
    }

    /// Mutable group at `parts`; the empty path is this group.
    pub fn group_mut(&mut self, parts: &[&str], full: &str) -> Result<&mut GroupNode, NativeError> {
        if parts.is_empty() {
            return Ok(self);
        }
        match self.node_mut(parts, full)? {
            Node::Group(g) => Ok(g),
            _ => Err(NativeError::NotAGroup(full.to_string())),
        }
    }

    /// Insert `node` at `parts`, which must name a new child of an existing group.
    pub fn insert(&mut self, parts: &[&str], full: &str, node: Node) -> Result<(), NativeError> {
        let (name, parent) = parts
            .split_last()
            .ok_or_else(|| NativeError::AlreadyExists(full.to_string()))?;
        let group = self.group_mut(parent, full)?;
        if group.children.contains_key(*name) {
            return Err(NativeError::AlreadyExists(full.to_string()));
        }
        group.header.dirty = true;
        group.children.insert(name.to_string(), node);
        Ok(())
    }
}
