//! The id-based library API.
//!
//! Every open file, group, dataset, attribute, dataspace and datatype is
//! addressed by an integer id issued by a [`Library`]. Ids are never reused
//! and each must be closed with the matching `*_close` call. Objects keep
//! their file open: changes are flushed to the file and the file is closed
//! only when the last id referring to it is closed.
//!
//! All calls are serialized by one lock around the library state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::dataspace::Dataspace;
use crate::datatype::{Datatype, TypeClass};
use crate::disk::Disk;
use crate::error::NativeError;
use crate::file_image::FileImage;
use crate::filters::deflate_pipeline;
use crate::messages::attribute_message_size;
use crate::object::{
    components, join, AttrData, Attribute, DatasetNode, ExternalLink, GroupNode, Layout, Lookup,
    Node, ObjectKind,
};
use crate::property_list::{DatasetCreateProps, FileAccessProps};
use crate::selection::Selection;
use crate::storage::ChunkStore;

/// Library object identifier.
pub type Hid = i64;

type FileNo = u64;

/// Soft and external links are followed at most this many times per lookup.
const MAX_LINK_DEPTH: usize = 16;

/// A dataset holding more dirty chunk bytes than this is flushed after a write.
const FLUSH_THRESHOLD: u64 = 64 << 20;

#[derive(Debug)]
enum Entry {
    File { file: FileNo },
    Group { file: FileNo, path: Vec<String> },
    Dataset { file: FileNo, path: Vec<String> },
    Attribute {
        file: FileNo,
        object: Vec<String>,
        name: String,
    },
    Dataspace { space: Dataspace, selection: Selection },
    Datatype(Datatype),
}

impl Entry {
    fn file(&self) -> Option<FileNo> {
        match self {
            Entry::File { file }
            | Entry::Group { file, .. }
            | Entry::Dataset { file, .. }
            | Entry::Attribute { file, .. } => Some(*file),
            Entry::Dataspace { .. } | Entry::Datatype(_) => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Entry::File { .. } => "file",
            Entry::Group { .. } => "group",
            Entry::Dataset { .. } => "dataset",
            Entry::Attribute { .. } => "attribute",
            Entry::Dataspace { .. } => "dataspace",
            Entry::Datatype(_) => "datatype",
        }
    }
}

#[derive(Debug)]
struct OpenFile {
    image: FileImage,
    refs: usize,
}

#[derive(Debug, Default)]
struct State {
    next_id: Hid,
    next_file: FileNo,
    ids: HashMap<Hid, Entry>,
    files: HashMap<FileNo, OpenFile>,
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn parts_of(path: &str, base: &[String]) -> Vec<String> {
    let mut parts: Vec<String> = if path.starts_with('/') {
        Vec::new()
    } else {
        base.to_vec()
    };
    parts.extend(components(path).into_iter().map(str::to_string));
    parts
}

fn as_strs(parts: &[String]) -> Vec<&str> {
    parts.iter().map(String::as_str).collect()
}

impl State {
    fn issue(&mut self, entry: Entry) -> Hid {
        if let Some(file) = entry.file() {
            if let Some(open) = self.files.get_mut(&file) {
                open.refs += 1;
            }
        }
        self.next_id += 1;
        let id = self.next_id;
        self.ids.insert(id, entry);
        id
    }

    fn entry(&self, id: Hid) -> Result<&Entry, NativeError> {
        self.ids.get(&id).ok_or(NativeError::InvalidId(id))
    }

    fn release(&mut self, id: Hid, expected: &'static str) -> Result<(), NativeError> {
        let entry = self.entry(id)?;
        if entry.kind() != expected {
            return Err(NativeError::WrongIdKind { id, expected });
        }
        let entry = self.ids.remove(&id).ok_or(NativeError::InvalidId(id))?;
        if let Some(file) = entry.file() {
            let last = match self.files.get_mut(&file) {
                Some(open) => {
                    open.refs = open.refs.saturating_sub(1);
                    open.refs == 0
                }
                None => false,
            };
            if last {
                if let Some(mut open) = self.files.remove(&file) {
                    if open.image.dirty && !open.image.read_only {
                        open.image.flush()?;
                    }
                    debug!(path = %open.image.path.display(), "closed file");
                }
            }
        }
        Ok(())
    }

    /// Drop images loaded for link traversal that no id refers to.
    fn sweep(&mut self) {
        self.files.retain(|_, open| open.refs > 0);
    }

    fn image(&self, file: FileNo) -> Result<&FileImage, NativeError> {
        self.files
            .get(&file)
            .map(|open| &open.image)
            .ok_or(NativeError::InvalidId(file as Hid))
    }

    fn image_mut(&mut self, file: FileNo) -> Result<&mut FileImage, NativeError> {
        let image = self
            .files
            .get_mut(&file)
            .map(|open| &mut open.image)
            .ok_or(NativeError::InvalidId(file as Hid))?;
        if image.read_only {
            return Err(NativeError::ReadOnly(image.path.clone()));
        }
        image.dirty = true;
        Ok(image)
    }

    /// Location (file, group path) of a file or group id.
    fn location(&self, loc: Hid) -> Result<(FileNo, Vec<String>), NativeError> {
        match self.entry(loc)? {
            Entry::File { file } => Ok((*file, Vec::new())),
            Entry::Group { file, path } => Ok((*file, path.clone())),
            _ => Err(NativeError::WrongIdKind {
                id: loc,
                expected: "file or group",
            }),
        }
    }

    /// Object (file, path) of a file, group or dataset id.
    fn object(&self, obj: Hid) -> Result<(FileNo, Vec<String>), NativeError> {
        match self.entry(obj)? {
            Entry::File { file } => Ok((*file, Vec::new())),
            Entry::Group { file, path } | Entry::Dataset { file, path } => {
                Ok((*file, path.clone()))
            }
            _ => Err(NativeError::WrongIdKind {
                id: obj,
                expected: "file, group or dataset",
            }),
        }
    }

    fn find_open(&self, path: &Path) -> Option<FileNo> {
        self.files
            .iter()
            .find(|(_, open)| same_file(&open.image.path, path))
            .map(|(&no, _)| no)
    }

    fn register(&mut self, image: FileImage) -> FileNo {
        self.next_file += 1;
        let no = self.next_file;
        self.files.insert(no, OpenFile { image, refs: 0 });
        no
    }

    /// Open the target of an external link read-only with SWMR-read access,
    /// reusing an image that is already open.
    fn open_linked(&mut self, from: FileNo, link: &ExternalLink) -> Result<FileNo, NativeError> {
        let base = self.image(from)?.path.clone();
        let target = if link.file.is_absolute() {
            link.file.clone()
        } else {
            base.parent()
                .map(|dir| dir.join(&link.file))
                .unwrap_or_else(|| link.file.clone())
        };
        if let Some(no) = self.find_open(&target) {
            return Ok(no);
        }
        let image = FileImage::open(&target, true, true)?;
        Ok(self.register(image))
    }

    /// Resolve a path to the (file, path) that holds the object, following
    /// soft and external links. The object itself must exist.
    fn resolve(
        &mut self,
        file: FileNo,
        parts: Vec<String>,
    ) -> Result<(FileNo, Vec<String>), NativeError> {
        let mut file = file;
        let mut parts = parts;
        for _ in 0..MAX_LINK_DEPTH {
            if parts.is_empty() {
                return Ok((file, parts));
            }
            let full = join(&as_strs(&parts));
            let step = match self.image(file)?.root.lookup(&as_strs(&parts), &full)? {
                Lookup::Found(_) => None,
                Lookup::Soft { target, rest } => {
                    // Relative targets start at the group holding the link
                    let link_at = parts.len() - rest.len() - 1;
                    let mut next = parts_of(target, &parts[..link_at]);
                    next.extend(rest);
                    Some((None, next))
                }
                Lookup::External { link, rest } => {
                    let mut next = parts_of(&link.path, &[]);
                    next.extend(rest);
                    Some((Some(link.clone()), next))
                }
            };
            match step {
                None => return Ok((file, parts)),
                Some((link, next)) => {
                    if let Some(link) = link {
                        file = self.open_linked(file, &link)?;
                    }
                    parts = next;
                }
            }
        }
        Err(NativeError::NotFound(format!(
            "too many links resolving {}",
            join(&as_strs(&parts))
        )))
    }

    /// Resolve the parent of `parts` and return it with the final name.
    fn resolve_parent(
        &mut self,
        file: FileNo,
        mut parts: Vec<String>,
    ) -> Result<(FileNo, Vec<String>), NativeError> {
        let name = parts
            .pop()
            .ok_or_else(|| NativeError::AlreadyExists("/".into()))?;
        let (file, mut parent) = self.resolve(file, parts)?;
        parent.push(name);
        Ok((file, parent))
    }

    fn node(&self, file: FileNo, parts: &[String]) -> Result<&Node, NativeError> {
        let full = join(&as_strs(parts));
        match self.image(file)?.root.lookup(&as_strs(parts), &full)? {
            Lookup::Found(node) => Ok(node),
            Lookup::Soft { .. } | Lookup::External { .. } => Err(NativeError::NotFound(full)),
        }
    }

    fn dataset(&self, file: FileNo, parts: &[String]) -> Result<&DatasetNode, NativeError> {
        match self.node(file, parts)? {
            Node::Dataset(d) => Ok(d),
            _ => Err(NativeError::TypeMismatch(format!(
                "{} is not a dataset",
                join(&as_strs(parts))
            ))),
        }
    }

    /// A dataset with the disk its stored chunks load from.
    fn dataset_on_disk(
        &self,
        file: FileNo,
        parts: &[String],
    ) -> Result<(&DatasetNode, &Disk), NativeError> {
        let disk = &self.image(file)?.disk;
        Ok((self.dataset(file, parts)?, disk))
    }

    fn dataset_mut(
        &mut self,
        file: FileNo,
        parts: &[String],
    ) -> Result<(&mut DatasetNode, &Disk), NativeError> {
        let full = join(&as_strs(parts));
        let image = self.image_mut(file)?;
        let disk = &image.disk;
        match image.root.node_mut(&as_strs(parts), &full)? {
            Node::Dataset(d) => Ok((d, disk)),
            _ => Err(NativeError::TypeMismatch(format!("{full} is not a dataset"))),
        }
    }

    /// Flush a file whose dataset holds too much unwritten data.
    fn flush_if_large(&mut self, file: FileNo, dirty_bytes: u64) -> Result<(), NativeError> {
        if dirty_bytes > FLUSH_THRESHOLD {
            let image = self.image_mut(file)?;
            debug!(path = %image.path.display(), dirty_bytes, "flushing large write");
            image.flush()?;
        }
        Ok(())
    }

    fn attrs(
        &self,
        file: FileNo,
        parts: &[String],
    ) -> Result<&std::collections::BTreeMap<String, Attribute>, NativeError> {
        if parts.is_empty() {
            return Ok(&self.image(file)?.root.attrs);
        }
        self.node(file, parts)?
            .attrs()
            .ok_or_else(|| NativeError::NotFound(join(&as_strs(parts))))
    }

    fn attrs_mut(
        &mut self,
        file: FileNo,
        parts: &[String],
    ) -> Result<&mut std::collections::BTreeMap<String, Attribute>, NativeError> {
        let full = join(&as_strs(parts));
        let image = self.image_mut(file)?;
        if parts.is_empty() {
            return Ok(image.root.attrs_mut());
        }
        image
            .root
            .node_mut(&as_strs(parts), &full)?
            .attrs_mut()
            .ok_or(NativeError::NotFound(full))
    }

    fn attribute(&self, id: Hid) -> Result<&Attribute, NativeError> {
        match self.entry(id)? {
            Entry::Attribute { file, object, name } => self
                .attrs(*file, object)?
                .get(name)
                .ok_or_else(|| NativeError::NotFound(name.clone())),
            _ => Err(NativeError::WrongIdKind {
                id,
                expected: "attribute",
            }),
        }
    }

    fn attribute_mut(&mut self, id: Hid) -> Result<&mut Attribute, NativeError> {
        let (file, object, name) = match self.entry(id)? {
            Entry::Attribute { file, object, name } => (*file, object.clone(), name.clone()),
            _ => {
                return Err(NativeError::WrongIdKind {
                    id,
                    expected: "attribute",
                })
            }
        };
        self.attrs_mut(file, &object)?
            .get_mut(&name)
            .ok_or(NativeError::NotFound(name))
    }

    fn space(&self, id: Hid) -> Result<(&Dataspace, &Selection), NativeError> {
        match self.entry(id)? {
            Entry::Dataspace { space, selection } => Ok((space, selection)),
            _ => Err(NativeError::WrongIdKind {
                id,
                expected: "dataspace",
            }),
        }
    }

    fn datatype(&self, id: Hid) -> Result<&Datatype, NativeError> {
        match self.entry(id)? {
            Entry::Datatype(dt) => Ok(dt),
            _ => Err(NativeError::WrongIdKind {
                id,
                expected: "datatype",
            }),
        }
    }

    fn dataset_id(&self, id: Hid) -> Result<(FileNo, Vec<String>), NativeError> {
        match self.entry(id)? {
            Entry::Dataset { file, path } => Ok((*file, path.clone())),
            _ => Err(NativeError::WrongIdKind {
                id,
                expected: "dataset",
            }),
        }
    }

    /// Selection of a file dataspace id, or all elements when absent.
    fn selection(&self, space: Option<Hid>) -> Result<Selection, NativeError> {
        match space {
            Some(id) => Ok(self.space(id)?.1.clone()),
            None => Ok(Selection::All),
        }
    }
}

/// A native library instance: the id table plus every open file.
#[derive(Debug, Default)]
pub struct Library {
    state: Mutex<State>,
}

impl Library {
    /// Create a library with no open ids.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the id table consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut State) -> Result<R, NativeError>,
    ) -> Result<R, NativeError> {
        let mut state = self.lock();
        let result = f(&mut *state);
        state.sweep();
        result
    }

    /// Number of ids currently open.
    pub fn open_id_count(&self) -> usize {
        self.lock().ids.len()
    }

    /// Number of files currently held open.
    pub fn open_file_count(&self) -> usize {
        self.lock().files.len()
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    /// Create (or truncate) a file and open it read-write.
    pub fn file_create(&self, path: &Path, fapl: &FileAccessProps) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            if st.find_open(path).is_some() {
                return Err(NativeError::AlreadyExists(path.display().to_string()));
            }
            let image = FileImage::create(path, fapl.swmr)?;
            debug!(path = %path.display(), swmr = fapl.swmr, "created file");
            let file = st.register(image);
            Ok(st.issue(Entry::File { file }))
        })
    }

    /// Open an existing file.
    pub fn file_open(&self, path: &Path, fapl: &FileAccessProps) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let file = match st.find_open(path) {
                Some(no) => {
                    if let Some(open) = st.files.get_mut(&no) {
                        if !fapl.is_read_only() && open.image.read_only {
                            open.image.reopen_writable()?;
                        }
                        open.image.swmr |= fapl.swmr;
                    }
                    no
                }
                None => {
                    let image = FileImage::open(path, fapl.is_read_only(), fapl.swmr)?;
                    st.register(image)
                }
            };
            Ok(st.issue(Entry::File { file }))
        })
    }

    /// Write a file's pending changes to disk. No-op for read-only files.
    pub fn file_flush(&self, id: Hid) -> Result<(), NativeError> {
        self.with_state(|st| {
            let file = match st.entry(id)? {
                Entry::File { file } => *file,
                _ => {
                    return Err(NativeError::WrongIdKind {
                        id,
                        expected: "file",
                    })
                }
            };
            let open = st
                .files
                .get_mut(&file)
                .ok_or(NativeError::InvalidId(id))?;
            if open.image.read_only {
                return Ok(());
            }
            open.image.flush()
        })
    }

    /// Path of the file holding an object.
    pub fn file_path(&self, id: Hid) -> Result<PathBuf, NativeError> {
        self.with_state(|st| {
            let file = st.entry(id)?.file().ok_or(NativeError::WrongIdKind {
                id,
                expected: "file object",
            })?;
            Ok(st.image(file)?.path.clone())
        })
    }

    /// True when the file holding an object was opened with SWMR access.
    pub fn file_is_swmr(&self, id: Hid) -> Result<bool, NativeError> {
        self.with_state(|st| {
            let file = st.entry(id)?.file().ok_or(NativeError::WrongIdKind {
                id,
                expected: "file object",
            })?;
            Ok(st.image(file)?.swmr)
        })
    }

    /// Close a file id.
    pub fn file_close(&self, id: Hid) -> Result<(), NativeError> {
        self.with_state(|st| st.release(id, "file"))
    }

    // -----------------------------------------------------------------------
    // Groups, links and objects
    // -----------------------------------------------------------------------

    /// Create a group. Its parent must exist.
    pub fn group_create(&self, loc: Hid, path: &str) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let (file, base) = st.location(loc)?;
            let (file, parts) = st.resolve_parent(file, parts_of(path, &base))?;
            let full = join(&as_strs(&parts));
            st.image_mut(file)?
                .root
                .insert(&as_strs(&parts), &full, Node::Group(GroupNode::default()))?;
            Ok(st.issue(Entry::Group { file, path: parts }))
        })
    }

    /// Open a group.
    pub fn group_open(&self, loc: Hid, path: &str) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let (file, base) = st.location(loc)?;
            let (file, parts) = st.resolve(file, parts_of(path, &base))?;
            if !parts.is_empty() && !matches!(st.node(file, &parts)?, Node::Group(_)) {
                return Err(NativeError::NotAGroup(join(&as_strs(&parts))));
            }
            Ok(st.issue(Entry::Group { file, path: parts }))
        })
    }

    /// Close a group id.
    pub fn group_close(&self, id: Hid) -> Result<(), NativeError> {
        self.with_state(|st| st.release(id, "group"))
    }

    /// Kind of object at `path` (following external links), or `None` when
    /// nothing exists there.
    pub fn object_kind(&self, loc: Hid, path: &str) -> Result<Option<ObjectKind>, NativeError> {
        self.with_state(|st| {
            let (file, base) = st.location(loc)?;
            match st.resolve(file, parts_of(path, &base)) {
                Ok((_, parts)) if parts.is_empty() => Ok(Some(ObjectKind::Group)),
                Ok((file, parts)) => Ok(Some(st.node(file, &parts)?.kind())),
                Err(NativeError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    /// True when a link named by the last component of `path` exists in its
    /// parent group. The link itself is not followed.
    pub fn link_exists(&self, loc: Hid, path: &str) -> Result<bool, NativeError> {
        self.with_state(|st| {
            let (file, base) = st.location(loc)?;
            let mut parts = parts_of(path, &base);
            let Some(name) = parts.pop() else {
                return Ok(true);
            };
            let (file, parent) = match st.resolve(file, parts) {
                Ok(found) => found,
                Err(NativeError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e),
            };
            let group = if parent.is_empty() {
                &st.image(file)?.root
            } else {
                match st.node(file, &parent)? {
                    Node::Group(g) => g,
                    _ => return Ok(false),
                }
            };
            Ok(group.children.contains_key(&name))
        })
    }

    /// Create an external link at `link_path` pointing to `target_path`
    /// inside `target_file`. The link's parent group must exist.
    pub fn link_external_create(
        &self,
        target_file: &Path,
        target_path: &str,
        loc: Hid,
        link_path: &str,
    ) -> Result<(), NativeError> {
        self.with_state(|st| {
            let (file, base) = st.location(loc)?;
            let (file, parts) = st.resolve_parent(file, parts_of(link_path, &base))?;
            let full = join(&as_strs(&parts));
            let link = ExternalLink {
                file: target_file.to_path_buf(),
                path: target_path.to_string(),
            };
            st.image_mut(file)?
                .root
                .insert(&as_strs(&parts), &full, Node::External(link))
        })
    }

    /// Open a group or dataset by path (for attribute access).
    pub fn object_open(&self, loc: Hid, path: &str) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let (file, base) = st.location(loc)?;
            let (file, parts) = st.resolve(file, parts_of(path, &base))?;
            if parts.is_empty() {
                return Ok(st.issue(Entry::Group { file, path: parts }));
            }
            let entry = match st.node(file, &parts)? {
                Node::Dataset(_) => Entry::Dataset { file, path: parts },
                _ => Entry::Group { file, path: parts },
            };
            Ok(st.issue(entry))
        })
    }

    /// Close a group or dataset id opened with [`Library::object_open`].
    pub fn object_close(&self, id: Hid) -> Result<(), NativeError> {
        self.with_state(|st| {
            let kind = st.entry(id)?.kind();
            match kind {
                "group" | "dataset" => st.release(id, kind),
                _ => Err(NativeError::WrongIdKind {
                    id,
                    expected: "group or dataset",
                }),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Datasets
    // -----------------------------------------------------------------------

    /// Create a dataset. Extendible dataspaces and compression require a
    /// chunked layout; scalar dataspaces cannot be chunked.
    pub fn dataset_create(
        &self,
        loc: Hid,
        path: &str,
        type_id: Hid,
        space_id: Hid,
        dcpl: &DatasetCreateProps,
    ) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let datatype = st.datatype(type_id)?.clone();
            let space = st.space(space_id)?.0.clone();
            let rank = space.rank();
            let item_size = datatype.type_size() as usize;
            let var_len = datatype.is_variable_length();

            let (layout, chunk_dims) = match &dcpl.chunk_dims {
                Some(chunk) => {
                    if rank == 0 {
                        return Err(NativeError::TypeMismatch(
                            "scalar datasets cannot be chunked".into(),
                        ));
                    }
                    if chunk.len() != rank {
                        return Err(NativeError::RankMismatch {
                            expected: rank,
                            actual: chunk.len(),
                        });
                    }
                    if chunk.iter().any(|&c| c == 0) {
                        return Err(NativeError::TypeMismatch(format!(
                            "chunk dims must be positive: {chunk:?}"
                        )));
                    }
                    if chunk.iter().any(|&c| c > u64::from(u32::MAX)) {
                        return Err(NativeError::Unsupported(format!(
                            "chunk dims must fit in 32 bits: {chunk:?}"
                        )));
                    }
                    (Layout::Chunked, chunk.clone())
                }
                None => {
                    if space.max_dims() != space.dimensions {
                        return Err(NativeError::CannotExtend(
                            "extendible dataspace requires a chunked layout".into(),
                        ));
                    }
                    if dcpl.deflate_level.is_some() {
                        return Err(NativeError::Compression(
                            "compression requires a chunked layout".into(),
                        ));
                    }
                    (Layout::Contiguous, space.dimensions.clone())
                }
            };
            let fill = match &dcpl.fill_value {
                Some(_) if var_len => {
                    return Err(NativeError::TypeMismatch(
                        "variable-length data has no fill value".into(),
                    ))
                }
                Some(bytes) if bytes.len() != item_size => {
                    return Err(NativeError::BufferSizeMismatch {
                        expected: item_size,
                        actual: bytes.len(),
                    })
                }
                other => other.clone(),
            };

            let (loc_file, base) = st.location(loc)?;
            let (file, parts) = st.resolve_parent(loc_file, parts_of(path, &base))?;
            let full = join(&as_strs(&parts));
            let store = ChunkStore::new(&chunk_dims, item_size, var_len, fill)
                .with_filters(dcpl.deflate_level.map(deflate_pipeline).unwrap_or_default())
                .with_vlen_base(datatype.vlen_base_size().unwrap_or(1));
            let node = DatasetNode {
                store,
                datatype,
                space,
                layout,
                attrs: Default::default(),
                header: Default::default(),
            };
            st.image_mut(file)?
                .root
                .insert(&as_strs(&parts), &full, Node::Dataset(node))?;
            Ok(st.issue(Entry::Dataset { file, path: parts }))
        })
    }

    /// Open a dataset by path, following external links.
    pub fn dataset_open(&self, loc: Hid, path: &str) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let (file, base) = st.location(loc)?;
            let (file, parts) = st.resolve(file, parts_of(path, &base))?;
            st.dataset(file, &parts)?;
            Ok(st.issue(Entry::Dataset { file, path: parts }))
        })
    }

    /// Close a dataset id.
    pub fn dataset_close(&self, id: Hid) -> Result<(), NativeError> {
        self.with_state(|st| st.release(id, "dataset"))
    }

    /// A new dataspace id holding the dataset's current extent, all selected.
    pub fn dataset_get_space(&self, id: Hid) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let (file, path) = st.dataset_id(id)?;
            let space = st.dataset(file, &path)?.space.clone();
            Ok(st.issue(Entry::Dataspace {
                space,
                selection: Selection::All,
            }))
        })
    }

    /// A new datatype id holding the dataset's element type.
    pub fn dataset_get_type(&self, id: Hid) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let (file, path) = st.dataset_id(id)?;
            let datatype = st.dataset(file, &path)?.datatype.clone();
            Ok(st.issue(Entry::Datatype(datatype)))
        })
    }

    /// Creation properties of a dataset.
    pub fn dataset_get_create_props(&self, id: Hid) -> Result<DatasetCreateProps, NativeError> {
        self.with_state(|st| {
            let (file, path) = st.dataset_id(id)?;
            let ds = st.dataset(file, &path)?;
            Ok(DatasetCreateProps {
                chunk_dims: match ds.layout {
                    Layout::Chunked => Some(ds.store.chunk_dims().to_vec()),
                    Layout::Contiguous | Layout::Compact => None,
                },
                deflate_level: ds.deflate_level(),
                fill_value: ds.store.fill().map(<[u8]>::to_vec),
            })
        })
    }

    /// Change the extent of a chunked dataset within its maximum dims.
    pub fn dataset_set_extent(&self, id: Hid, dims: &[u64]) -> Result<(), NativeError> {
        self.with_state(|st| {
            let (file, path) = st.dataset_id(id)?;
            let (ds, disk) = st.dataset_mut(file, &path)?;
            if ds.layout != Layout::Chunked {
                return Err(NativeError::CannotExtend(format!(
                    "{} is not chunked",
                    join(&as_strs(&path))
                )));
            }
            let max = ds.space.max_dims();
            let space = Dataspace::simple(dims, Some(max.as_slice()))?;
            let shrinks = dims.iter().zip(&ds.space.dimensions).any(|(n, o)| n < o);
            if shrinks {
                ds.store.truncate(disk, dims)?;
            }
            ds.space = space;
            ds.header.dirty = true;
            Ok(())
        })
    }

    /// Read the elements selected in `file_space` (all when `None`) into
    /// `buf`, in the dataset's own element type.
    pub fn dataset_read(
        &self,
        id: Hid,
        file_space: Option<Hid>,
        buf: &mut [u8],
    ) -> Result<(), NativeError> {
        self.with_state(|st| {
            let (file, path) = st.dataset_id(id)?;
            let selection = st.selection(file_space)?;
            let (ds, disk) = st.dataset_on_disk(file, &path)?;
            ds.store.read(disk, &selection, &ds.space.dimensions, buf)
        })
    }

    /// Write `data` into the elements selected in `file_space`.
    pub fn dataset_write(
        &self,
        id: Hid,
        file_space: Option<Hid>,
        data: &[u8],
    ) -> Result<(), NativeError> {
        self.with_state(|st| {
            let (file, path) = st.dataset_id(id)?;
            let selection = st.selection(file_space)?;
            let (ds, disk) = st.dataset_mut(file, &path)?;
            let dims = ds.space.dimensions.clone();
            ds.store.write(disk, &selection, &dims, data)?;
            let dirty_bytes = ds.store.dirty_bytes();
            st.flush_if_large(file, dirty_bytes)
        })
    }

    /// Read variable-length cells from the selection.
    pub fn dataset_read_vlen(
        &self,
        id: Hid,
        file_space: Option<Hid>,
    ) -> Result<Vec<Vec<u8>>, NativeError> {
        self.with_state(|st| {
            let (file, path) = st.dataset_id(id)?;
            let selection = st.selection(file_space)?;
            let (ds, disk) = st.dataset_on_disk(file, &path)?;
            ds.store.read_vlen(disk, &selection, &ds.space.dimensions)
        })
    }

    /// Write variable-length cells into the selection.
    pub fn dataset_write_vlen(
        &self,
        id: Hid,
        file_space: Option<Hid>,
        cells: &[Vec<u8>],
    ) -> Result<(), NativeError> {
        self.with_state(|st| {
            let (file, path) = st.dataset_id(id)?;
            let selection = st.selection(file_space)?;
            let (ds, disk) = st.dataset_mut(file, &path)?;
            let dims = ds.space.dimensions.clone();
            ds.store.write_vlen(disk, &selection, &dims, cells)?;
            let dirty_bytes = ds.store.dirty_bytes();
            st.flush_if_large(file, dirty_bytes)
        })
    }

    // -----------------------------------------------------------------------
    // Dataspaces
    // -----------------------------------------------------------------------

    /// Create a scalar dataspace.
    pub fn space_create_scalar(&self) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            Ok(st.issue(Entry::Dataspace {
                space: Dataspace::scalar(),
                selection: Selection::All,
            }))
        })
    }

    /// Create a simple dataspace.
    pub fn space_create_simple(
        &self,
        dims: &[u64],
        max: Option<&[u64]>,
    ) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let space = Dataspace::simple(dims, max)?;
            Ok(st.issue(Entry::Dataspace {
                space,
                selection: Selection::All,
            }))
        })
    }

    /// Current and maximum dimensions.
    pub fn space_get_dims(&self, id: Hid) -> Result<(Vec<u64>, Vec<u64>), NativeError> {
        self.with_state(|st| {
            let (space, _) = st.space(id)?;
            Ok((space.dimensions.clone(), space.max_dims()))
        })
    }

    /// Replace the selection with a hyperslab. Checked against the extent.
    pub fn space_select_hyperslab(
        &self,
        id: Hid,
        start: &[u64],
        stride: &[u64],
        count: &[u64],
        block: &[u64],
    ) -> Result<(), NativeError> {
        self.with_state(|st| {
            let selection = Selection::hyperslab(start, stride, count, block)?;
            match st.ids.get_mut(&id) {
                Some(Entry::Dataspace {
                    space,
                    selection: current,
                }) => {
                    selection.check_bounds(&space.dimensions)?;
                    *current = selection;
                    Ok(())
                }
                Some(_) => Err(NativeError::WrongIdKind {
                    id,
                    expected: "dataspace",
                }),
                None => Err(NativeError::InvalidId(id)),
            }
        })
    }

    /// Select every element.
    pub fn space_select_all(&self, id: Hid) -> Result<(), NativeError> {
        self.with_state(|st| match st.ids.get_mut(&id) {
            Some(Entry::Dataspace { selection, .. }) => {
                *selection = Selection::All;
                Ok(())
            }
            Some(_) => Err(NativeError::WrongIdKind {
                id,
                expected: "dataspace",
            }),
            None => Err(NativeError::InvalidId(id)),
        })
    }

    /// Number of selected elements.
    pub fn space_get_select_npoints(&self, id: Hid) -> Result<u64, NativeError> {
        self.with_state(|st| {
            let (space, selection) = st.space(id)?;
            match space.space_type {
                crate::dataspace::DataspaceType::Scalar => Ok(1),
                crate::dataspace::DataspaceType::Simple => {
                    selection.num_elements(&space.dimensions)
                }
            }
        })
    }

    /// Close a dataspace id.
    pub fn space_close(&self, id: Hid) -> Result<(), NativeError> {
        self.with_state(|st| st.release(id, "dataspace"))
    }

    // -----------------------------------------------------------------------
    // Datatypes
    // -----------------------------------------------------------------------

    /// Register a datatype descriptor and return its id.
    pub fn type_register(&self, datatype: Datatype) -> Result<Hid, NativeError> {
        self.with_state(|st| Ok(st.issue(Entry::Datatype(datatype))))
    }

    /// Copy of the descriptor behind a datatype id.
    pub fn type_describe(&self, id: Hid) -> Result<Datatype, NativeError> {
        self.with_state(|st| Ok(st.datatype(id)?.clone()))
    }

    /// Class of a datatype.
    pub fn type_get_class(&self, id: Hid) -> Result<TypeClass, NativeError> {
        self.with_state(|st| Ok(st.datatype(id)?.class()))
    }

    /// Element size in bytes.
    pub fn type_get_size(&self, id: Hid) -> Result<usize, NativeError> {
        self.with_state(|st| Ok(st.datatype(id)?.type_size() as usize))
    }

    /// Signedness of an integer (or enum base) type.
    pub fn type_get_sign(&self, id: Hid) -> Result<bool, NativeError> {
        self.with_state(|st| match st.datatype(id)? {
            Datatype::FixedPoint { signed, .. } => Ok(*signed),
            Datatype::Enumeration { base_type, .. } => match base_type.as_ref() {
                Datatype::FixedPoint { signed, .. } => Ok(*signed),
                _ => Ok(false),
            },
            other => Err(NativeError::TypeMismatch(format!(
                "{:?} has no sign",
                other.class()
            ))),
        })
    }

    /// True for variable-length string types.
    pub fn type_is_variable_str(&self, id: Hid) -> Result<bool, NativeError> {
        self.with_state(|st| {
            Ok(matches!(
                st.datatype(id)?,
                Datatype::VariableLength {
                    is_string: true,
                    ..
                }
            ))
        })
    }

    /// Number of members of a compound or enum type.
    pub fn type_get_nmembers(&self, id: Hid) -> Result<usize, NativeError> {
        self.with_state(|st| match st.datatype(id)? {
            Datatype::Compound { members, .. } => Ok(members.len()),
            Datatype::Enumeration { members, .. } => Ok(members.len()),
            other => Err(NativeError::TypeMismatch(format!(
                "{:?} has no members",
                other.class()
            ))),
        })
    }

    fn compound_member<R>(
        &self,
        id: Hid,
        idx: usize,
        f: impl FnOnce(&crate::datatype::CompoundMember) -> R,
    ) -> Result<R, NativeError> {
        self.with_state(|st| match st.datatype(id)? {
            Datatype::Compound { members, .. } => members
                .get(idx)
                .map(f)
                .ok_or(NativeError::NotFound(format!("member {idx}"))),
            other => Err(NativeError::TypeMismatch(format!(
                "{:?} is not compound",
                other.class()
            ))),
        })
    }

    /// Name of compound member `idx`.
    pub fn type_get_member_name(&self, id: Hid, idx: usize) -> Result<String, NativeError> {
        self.compound_member(id, idx, |m| m.name.clone())
    }

    /// Byte offset of compound member `idx`.
    pub fn type_get_member_offset(&self, id: Hid, idx: usize) -> Result<usize, NativeError> {
        self.compound_member(id, idx, |m| m.byte_offset as usize)
    }

    /// A new datatype id for compound member `idx`.
    pub fn type_get_member_type(&self, id: Hid, idx: usize) -> Result<Hid, NativeError> {
        let member = self.compound_member(id, idx, |m| m.datatype.clone())?;
        self.type_register(member)
    }

    /// A new datatype id for the base of an array, enum or variable-length type.
    pub fn type_get_super(&self, id: Hid) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let base = match st.datatype(id)? {
                Datatype::Array { base_type, .. }
                | Datatype::Enumeration { base_type, .. }
                | Datatype::VariableLength { base_type, .. } => base_type.as_ref().clone(),
                other => {
                    return Err(NativeError::TypeMismatch(format!(
                        "{:?} has no base type",
                        other.class()
                    )))
                }
            };
            Ok(st.issue(Entry::Datatype(base)))
        })
    }

    /// Dimensions of an array type.
    pub fn type_get_array_dims(&self, id: Hid) -> Result<Vec<u32>, NativeError> {
        self.with_state(|st| match st.datatype(id)? {
            Datatype::Array { dimensions, .. } => Ok(dimensions.clone()),
            other => Err(NativeError::TypeMismatch(format!(
                "{:?} is not an array",
                other.class()
            ))),
        })
    }

    /// Close a datatype id.
    pub fn type_close(&self, id: Hid) -> Result<(), NativeError> {
        self.with_state(|st| st.release(id, "datatype"))
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    /// Create a zero-filled attribute on a file (root group), group or dataset.
    pub fn attr_create(
        &self,
        obj: Hid,
        name: &str,
        type_id: Hid,
        space_id: Hid,
    ) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let datatype = st.datatype(type_id)?.clone();
            let space = st.space(space_id)?.0.clone();
            if attribute_message_size(name, &datatype, &space) > usize::from(u16::MAX) {
                return Err(NativeError::Unsupported(format!(
                    "attribute {name} does not fit in an object header message"
                )));
            }
            let n = space.num_elements() as usize;
            let data = if datatype.is_variable_length() {
                AttrData::VarLen(vec![Vec::new(); n])
            } else {
                AttrData::Fixed(vec![0u8; n * datatype.type_size() as usize])
            };
            let (file, object) = st.object(obj)?;
            let attrs = st.attrs_mut(file, &object)?;
            if attrs.contains_key(name) {
                return Err(NativeError::AlreadyExists(name.to_string()));
            }
            attrs.insert(
                name.to_string(),
                Attribute {
                    datatype,
                    space,
                    data,
                },
            );
            Ok(st.issue(Entry::Attribute {
                file,
                object,
                name: name.to_string(),
            }))
        })
    }

    /// Open an attribute by name.
    pub fn attr_open(&self, obj: Hid, name: &str) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let (file, object) = st.object(obj)?;
            if !st.attrs(file, &object)?.contains_key(name) {
                return Err(NativeError::NotFound(name.to_string()));
            }
            Ok(st.issue(Entry::Attribute {
                file,
                object,
                name: name.to_string(),
            }))
        })
    }

    /// Open the `idx`-th attribute in name order.
    pub fn attr_open_by_idx(&self, obj: Hid, idx: usize) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let (file, object) = st.object(obj)?;
            let name = st
                .attrs(file, &object)?
                .keys()
                .nth(idx)
                .cloned()
                .ok_or_else(|| NativeError::NotFound(format!("attribute {idx}")))?;
            Ok(st.issue(Entry::Attribute { file, object, name }))
        })
    }

    /// True when the object has an attribute called `name`.
    pub fn attr_exists(&self, obj: Hid, name: &str) -> Result<bool, NativeError> {
        self.with_state(|st| {
            let (file, object) = st.object(obj)?;
            Ok(st.attrs(file, &object)?.contains_key(name))
        })
    }

    /// Delete an attribute by name.
    pub fn attr_delete(&self, obj: Hid, name: &str) -> Result<(), NativeError> {
        self.with_state(|st| {
            let (file, object) = st.object(obj)?;
            st.attrs_mut(file, &object)?
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| NativeError::NotFound(name.to_string()))
        })
    }

    /// Number of attributes on the object.
    pub fn attr_count(&self, obj: Hid) -> Result<usize, NativeError> {
        self.with_state(|st| {
            let (file, object) = st.object(obj)?;
            Ok(st.attrs(file, &object)?.len())
        })
    }

    /// Name of an open attribute.
    pub fn attr_name(&self, id: Hid) -> Result<String, NativeError> {
        self.with_state(|st| match st.entry(id)? {
            Entry::Attribute { name, .. } => Ok(name.clone()),
            _ => Err(NativeError::WrongIdKind {
                id,
                expected: "attribute",
            }),
        })
    }

    /// A new datatype id for the attribute's element type.
    pub fn attr_get_type(&self, id: Hid) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let datatype = st.attribute(id)?.datatype.clone();
            Ok(st.issue(Entry::Datatype(datatype)))
        })
    }

    /// A new dataspace id for the attribute's extent.
    pub fn attr_get_space(&self, id: Hid) -> Result<Hid, NativeError> {
        self.with_state(|st| {
            let space = st.attribute(id)?.space.clone();
            Ok(st.issue(Entry::Dataspace {
                space,
                selection: Selection::All,
            }))
        })
    }

    /// Read all fixed-size attribute elements.
    pub fn attr_read(&self, id: Hid, buf: &mut [u8]) -> Result<(), NativeError> {
        self.with_state(|st| match &st.attribute(id)?.data {
            AttrData::Fixed(bytes) => {
                if bytes.len() != buf.len() {
                    return Err(NativeError::BufferSizeMismatch {
                        expected: bytes.len(),
                        actual: buf.len(),
                    });
                }
                buf.copy_from_slice(bytes);
                Ok(())
            }
            AttrData::VarLen(_) => Err(NativeError::TypeMismatch(
                "fixed-size read of variable-length attribute".into(),
            )),
        })
    }

    /// Write all fixed-size attribute elements.
    pub fn attr_write(&self, id: Hid, data: &[u8]) -> Result<(), NativeError> {
        self.with_state(|st| match &mut st.attribute_mut(id)?.data {
            AttrData::Fixed(bytes) => {
                if bytes.len() != data.len() {
                    return Err(NativeError::BufferSizeMismatch {
                        expected: bytes.len(),
                        actual: data.len(),
                    });
                }
                bytes.copy_from_slice(data);
                Ok(())
            }
            AttrData::VarLen(_) => Err(NativeError::TypeMismatch(
                "fixed-size write of variable-length attribute".into(),
            )),
        })
    }

    /// Read variable-length attribute cells.
    pub fn attr_read_vlen(&self, id: Hid) -> Result<Vec<Vec<u8>>, NativeError> {
        self.with_state(|st| match &st.attribute(id)?.data {
            AttrData::VarLen(cells) => Ok(cells.clone()),
            AttrData::Fixed(_) => Err(NativeError::TypeMismatch(
                "variable-length read of fixed-size attribute".into(),
            )),
        })
    }

    /// Write variable-length attribute cells.
    pub fn attr_write_vlen(&self, id: Hid, cells: &[Vec<u8>]) -> Result<(), NativeError> {
        self.with_state(|st| match &mut st.attribute_mut(id)?.data {
            AttrData::VarLen(current) => {
                if current.len() != cells.len() {
                    return Err(NativeError::BufferSizeMismatch {
                        expected: current.len(),
                        actual: cells.len(),
                    });
                }
                current.clone_from_slice(cells);
                Ok(())
            }
            AttrData::Fixed(_) => Err(NativeError::TypeMismatch(
                "variable-length write of fixed-size attribute".into(),
            )),
        })
    }

    /// Close an attribute id.
    pub fn attr_close(&self, id: Hid) -> Result<(), NativeError> {
        self.with_state(|st| st.release(id, "attribute"))
    }
}
