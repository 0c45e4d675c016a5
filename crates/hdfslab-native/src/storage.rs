//! Element storage for datasets: a grid of fixed-shape chunks.
//!
//! Contiguous datasets use a single chunk covering the whole extent.
//! Chunks already on disk are loaded through a [`ChunkSource`] when a
//! selection touches them; written chunks stay in memory, marked dirty,
//! until the file is flushed. Chunks that were never written read back as
//! the fill value (or zeros).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::NativeError;
use crate::filters::Filter;
use crate::selection::Selection;

/// Payload of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkData {
    /// Fixed-size elements, row-major within the chunk.
    Fixed(Vec<u8>),
    /// Variable-length cells, row-major within the chunk.
    VarLen(Vec<Vec<u8>>),
}

/// Where a chunk lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredChunk {
    pub addr: u64,
    /// Stored bytes, after filtering.
    pub size: u64,
    pub filter_mask: u32,
}

/// State of one chunk of the grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// On disk and not loaded.
    Stored(StoredChunk),
    /// In memory and identical to what the file holds.
    Resident(ChunkData),
    /// Modified since the last flush. `previous` is the block it was loaded
    /// from, if any.
    Dirty {
        data: ChunkData,
        previous: Option<StoredChunk>,
    },
}

/// Loads chunks that are on disk.
pub trait ChunkSource {
    fn load(&self, store: &ChunkStore, chunk: &StoredChunk) -> Result<ChunkData, NativeError>;
}

/// Chunk grid plus the chunks written so far.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    chunk_dims: Vec<u64>,
    item_size: usize,
    var_len: bool,
    vlen_base: usize,
    fill: Option<Vec<u8>>,
    filters: Vec<Filter>,
    slots: BTreeMap<Vec<u64>, Slot>,
    /// Root of the chunk B-tree on disk, when there is one.
    index_addr: Option<u64>,
    index_dirty: bool,
    dirty_bytes: u64,
}

impl ChunkStore {
    /// Create an empty store. Zero chunk dimensions are clamped to 1.
    pub fn new(chunk_dims: &[u64], item_size: usize, var_len: bool, fill: Option<Vec<u8>>) -> Self {
        ChunkStore {
            chunk_dims: chunk_dims.iter().map(|&d| d.max(1)).collect(),
            item_size,
            var_len,
            vlen_base: 1,
            fill,
            filters: Vec::new(),
            slots: BTreeMap::new(),
            index_addr: None,
            index_dirty: false,
            dirty_bytes: 0,
        }
    }

    /// Set the filter pipeline applied to stored chunks.
    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    /// Set the byte size of one sequence element of variable-length cells.
    pub fn with_vlen_base(mut self, base: usize) -> Self {
        self.vlen_base = base.max(1);
        self
    }

    /// Chunk grid dimensions.
    pub fn chunk_dims(&self) -> &[u64] {
        &self.chunk_dims
    }

    /// Bytes per stored element (a heap reference for variable-length data).
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// True when elements are variable-length cells.
    pub fn is_var_len(&self) -> bool {
        self.var_len
    }

    pub fn vlen_base(&self) -> usize {
        self.vlen_base
    }

    /// Fill value bytes, if any.
    pub fn fill(&self) -> Option<&[u8]> {
        self.fill.as_deref()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Chunk slots keyed by grid coordinate.
    pub fn slots(&self) -> &BTreeMap<Vec<u64>, Slot> {
        &self.slots
    }

    /// Record a chunk that is on disk.
    pub fn insert_stored(&mut self, key: Vec<u64>, chunk: StoredChunk) {
        self.slots.insert(key, Slot::Stored(chunk));
    }

    /// Record a chunk whose data is already in memory and on disk.
    pub fn insert_resident(&mut self, key: Vec<u64>, data: ChunkData) {
        let data = self.normalize(data);
        self.slots.insert(key, Slot::Resident(data));
    }

    pub fn index_addr(&self) -> Option<u64> {
        self.index_addr
    }

    pub fn set_index_addr(&mut self, addr: Option<u64>) {
        self.index_addr = addr;
    }

    /// True when chunks were added, moved or removed since the index was
    /// last written.
    pub fn index_dirty(&self) -> bool {
        self.index_dirty
    }

    pub fn mark_index_dirty(&mut self) {
        self.index_dirty = true;
    }

    /// Approximate bytes held by dirty chunks.
    pub fn dirty_bytes(&self) -> u64 {
        self.dirty_bytes
    }

    pub fn has_dirty(&self) -> bool {
        self.slots.values().any(|s| matches!(s, Slot::Dirty { .. }))
    }

    /// Keys of the dirty chunks.
    pub fn dirty_keys(&self) -> Vec<Vec<u64>> {
        self.slots
            .iter()
            .filter(|(_, s)| matches!(s, Slot::Dirty { .. }))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Mark resident chunks dirty so the next flush writes them out.
    pub fn dirty_resident(&mut self) {
        for slot in self.slots.values_mut() {
            if let Slot::Resident(data) = slot {
                let data = std::mem::replace(data, ChunkData::Fixed(Vec::new()));
                *slot = Slot::Dirty {
                    data,
                    previous: None,
                };
            }
        }
    }

    /// Replace a flushed dirty chunk with its new location.
    pub fn settle(&mut self, key: &[u64], chunk: StoredChunk) {
        if let Some(slot) = self.slots.get_mut(key) {
            *slot = Slot::Stored(chunk);
        }
    }

    /// Called after every dirty chunk was settled and the index written.
    pub fn mark_clean(&mut self) {
        self.index_dirty = false;
        self.dirty_bytes = 0;
    }

    /// Chunks on disk, keyed by grid coordinate.
    pub fn stored(&self) -> Vec<(Vec<u64>, StoredChunk)> {
        self.slots
            .iter()
            .filter_map(|(k, s)| match s {
                Slot::Stored(c) => Some((k.clone(), *c)),
                Slot::Dirty {
                    previous: Some(c), ..
                } => Some((k.clone(), *c)),
                _ => None,
            })
            .collect()
    }

    /// Elements in one chunk.
    pub fn elements_per_chunk(&self) -> usize {
        self.chunk_dims.iter().product::<u64>() as usize
    }

    /// Pad or cut decoded chunk data to exactly one chunk.
    pub fn normalize(&self, data: ChunkData) -> ChunkData {
        let n = self.elements_per_chunk();
        match data {
            ChunkData::Fixed(mut bytes) => {
                let want = n * self.item_size;
                if bytes.len() < want {
                    let have = bytes.len() / self.item_size.max(1);
                    bytes.truncate(have * self.item_size);
                    for _ in have..n {
                        match &self.fill {
                            Some(fill) => bytes.extend_from_slice(fill),
                            None => bytes.resize(bytes.len() + self.item_size, 0),
                        }
                    }
                }
                bytes.truncate(want);
                ChunkData::Fixed(bytes)
            }
            ChunkData::VarLen(mut cells) => {
                cells.resize(n, Vec::new());
                ChunkData::VarLen(cells)
            }
        }
    }

    fn locate(&self, coord: &[u64]) -> (Vec<u64>, usize) {
        let mut key = Vec::with_capacity(coord.len());
        let mut linear = 0usize;
        for (d, &c) in coord.iter().enumerate() {
            let cd = self.chunk_dims[d];
            key.push(c / cd);
            linear = linear * cd as usize + (c % cd) as usize;
        }
        (key, linear)
    }

    fn blank_chunk(&self) -> ChunkData {
        let n = self.elements_per_chunk();
        if self.var_len {
            ChunkData::VarLen(vec![Vec::new(); n])
        } else {
            match &self.fill {
                Some(fill) => ChunkData::Fixed(fill.repeat(n)),
                None => ChunkData::Fixed(vec![0u8; n * self.item_size]),
            }
        }
    }

    fn check_fixed(&self) -> Result<(), NativeError> {
        if self.var_len {
            return Err(NativeError::TypeMismatch(
                "fixed-size access to variable-length data".into(),
            ));
        }
        Ok(())
    }

    fn check_var_len(&self) -> Result<(), NativeError> {
        if !self.var_len {
            return Err(NativeError::TypeMismatch(
                "variable-length access to fixed-size data".into(),
            ));
        }
        Ok(())
    }

    /// Load every stored chunk the selection touches.
    fn load_touched(
        &self,
        src: &dyn ChunkSource,
        sel: &Selection,
        dims: &[u64],
    ) -> Result<HashMap<Vec<u64>, ChunkData>, NativeError> {
        let mut keys = BTreeSet::new();
        sel.for_each_coord(dims, |coord| {
            let (key, _) = self.locate(coord);
            if matches!(self.slots.get(&key), Some(Slot::Stored(_))) {
                keys.insert(key);
            }
        });
        let mut loaded = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(Slot::Stored(chunk)) = self.slots.get(&key) {
                let data = self.normalize(src.load(self, chunk)?);
                loaded.insert(key, data);
            }
        }
        Ok(loaded)
    }

    fn chunk<'a>(
        &'a self,
        loaded: &'a HashMap<Vec<u64>, ChunkData>,
        key: &[u64],
    ) -> Option<&'a ChunkData> {
        match self.slots.get(key)? {
            Slot::Stored(_) => loaded.get(key),
            Slot::Resident(data) | Slot::Dirty { data, .. } => Some(data),
        }
    }

    /// Make the chunk at `key` dirty, loading or creating it first.
    fn make_dirty(&mut self, src: &dyn ChunkSource, key: &[u64]) -> Result<(), NativeError> {
        let chunk_bytes = (self.elements_per_chunk() * self.item_size) as u64;
        let slot = match self.slots.remove(key) {
            Some(Slot::Stored(chunk)) => Slot::Dirty {
                data: self.normalize(src.load(self, &chunk)?),
                previous: Some(chunk),
            },
            Some(Slot::Resident(data)) => Slot::Dirty {
                data,
                previous: None,
            },
            Some(dirty @ Slot::Dirty { .. }) => {
                self.slots.insert(key.to_vec(), dirty);
                return Ok(());
            }
            None => {
                self.index_dirty = true;
                Slot::Dirty {
                    data: self.blank_chunk(),
                    previous: None,
                }
            }
        };
        self.dirty_bytes += chunk_bytes;
        self.slots.insert(key.to_vec(), slot);
        Ok(())
    }

    fn dirty_data(&mut self, key: &[u64]) -> Option<&mut ChunkData> {
        match self.slots.get_mut(key) {
            Some(Slot::Dirty { data, .. }) => Some(data),
            _ => None,
        }
    }

    /// Copy the selected elements into `out` in row-major selection order.
    pub fn read(
        &self,
        src: &dyn ChunkSource,
        sel: &Selection,
        dims: &[u64],
        out: &mut [u8],
    ) -> Result<(), NativeError> {
        self.check_fixed()?;
        sel.check_bounds(dims)?;
        let expected = sel.num_elements(dims)? as usize * self.item_size;
        if out.len() != expected {
            return Err(NativeError::BufferSizeMismatch {
                expected,
                actual: out.len(),
            });
        }
        let loaded = self.load_touched(src, sel, dims)?;
        let size = self.item_size;
        let mut cursor = 0usize;
        sel.for_each_coord(dims, |coord| {
            let (key, idx) = self.locate(coord);
            let dst = &mut out[cursor..cursor + size];
            match self.chunk(&loaded, &key) {
                Some(ChunkData::Fixed(bytes)) => {
                    dst.copy_from_slice(&bytes[idx * size..(idx + 1) * size]);
                }
                _ => match &self.fill {
                    Some(fill) => dst.copy_from_slice(fill),
                    None => dst.fill(0),
                },
            }
            cursor += size;
        });
        Ok(())
    }

    /// Store `data` into the selected elements.
    pub fn write(
        &mut self,
        src: &dyn ChunkSource,
        sel: &Selection,
        dims: &[u64],
        data: &[u8],
    ) -> Result<(), NativeError> {
        self.check_fixed()?;
        sel.check_bounds(dims)?;
        let expected = sel.num_elements(dims)? as usize * self.item_size;
        if data.len() != expected {
            return Err(NativeError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let size = self.item_size;
        let mut coords = Vec::new();
        sel.for_each_coord(dims, |coord| coords.push(self.locate(coord)));
        let keys: BTreeSet<&Vec<u64>> = coords.iter().map(|(k, _)| k).collect();
        for key in keys {
            self.make_dirty(src, key)?;
        }
        for (n, (key, idx)) in coords.iter().enumerate() {
            if let Some(ChunkData::Fixed(bytes)) = self.dirty_data(key) {
                bytes[idx * size..(idx + 1) * size].copy_from_slice(&data[n * size..(n + 1) * size]);
            }
        }
        Ok(())
    }

    /// Read the selected variable-length cells. Unwritten cells are empty.
    pub fn read_vlen(
        &self,
        src: &dyn ChunkSource,
        sel: &Selection,
        dims: &[u64],
    ) -> Result<Vec<Vec<u8>>, NativeError> {
        self.check_var_len()?;
        sel.check_bounds(dims)?;
        let loaded = self.load_touched(src, sel, dims)?;
        let mut out = Vec::with_capacity(sel.num_elements(dims)? as usize);
        sel.for_each_coord(dims, |coord| {
            let (key, idx) = self.locate(coord);
            match self.chunk(&loaded, &key) {
                Some(ChunkData::VarLen(cells)) => out.push(cells[idx].clone()),
                _ => out.push(Vec::new()),
            }
        });
        Ok(out)
    }

    /// Store variable-length cells into the selected elements.
    pub fn write_vlen(
        &mut self,
        src: &dyn ChunkSource,
        sel: &Selection,
        dims: &[u64],
        cells: &[Vec<u8>],
    ) -> Result<(), NativeError> {
        self.check_var_len()?;
        sel.check_bounds(dims)?;
        let expected = sel.num_elements(dims)? as usize;
        if cells.len() != expected {
            return Err(NativeError::BufferSizeMismatch {
                expected,
                actual: cells.len(),
            });
        }
        let mut coords = Vec::new();
        sel.for_each_coord(dims, |coord| coords.push(self.locate(coord)));
        let keys: BTreeSet<&Vec<u64>> = coords.iter().map(|(k, _)| k).collect();
        for key in keys {
            self.make_dirty(src, key)?;
        }
        for ((key, idx), cell) in coords.iter().zip(cells) {
            self.dirty_bytes += cell.len() as u64;
            if let Some(ChunkData::VarLen(slots)) = self.dirty_data(key) {
                slots[*idx] = cell.clone();
            }
        }
        Ok(())
    }

    /// Drop data outside a shrunken extent so that regrowing exposes fill.
    pub fn truncate(&mut self, src: &dyn ChunkSource, dims: &[u64]) -> Result<(), NativeError> {
        let chunk_dims = self.chunk_dims.clone();
        let before = self.slots.len();
        self.slots.retain(|key, _| {
            key.iter()
                .zip(&chunk_dims)
                .zip(dims)
                .all(|((&k, &cd), &d)| k * cd < d)
        });
        if self.slots.len() != before {
            self.index_dirty = true;
        }
        let straddling: Vec<Vec<u64>> = self
            .slots
            .keys()
            .filter(|key| {
                key.iter()
                    .zip(&chunk_dims)
                    .zip(dims)
                    .any(|((&k, &cd), &d)| (k + 1) * cd > d)
            })
            .cloned()
            .collect();
        let fill = self.fill.clone();
        let size = self.item_size;
        for key in straddling {
            self.make_dirty(src, &key)?;
            let origin: Vec<u64> = key.iter().zip(&chunk_dims).map(|(&k, &cd)| k * cd).collect();
            let Some(data) = self.dirty_data(&key) else {
                continue;
            };
            let mut idx = 0usize;
            Selection::All.for_each_coord(&chunk_dims, |local| {
                let out_of_range = local
                    .iter()
                    .zip(&origin)
                    .zip(dims)
                    .any(|((&l, &o), &d)| o + l >= d);
                if out_of_range {
                    match data {
                        ChunkData::Fixed(bytes) => {
                            let slot = &mut bytes[idx * size..(idx + 1) * size];
                            match &fill {
                                Some(f) => slot.copy_from_slice(f),
                                None => slot.fill(0),
                            }
                        }
                        ChunkData::VarLen(cells) => cells[idx].clear(),
                    }
                }
                idx += 1;
            });
        }
        Ok(())
    }
}
