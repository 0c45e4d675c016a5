//! Dataset creation, hyperslab reads and writes, row appends and queries.
//!
//! Every public operation holds the file's operation lock for its whole
//! duration. Native ids opened inside an operation are owned by guards and
//! released before it returns. Native failures are logged with the dataset
//! and file and re-raised as the configured [`FailureKind`].
//!
//! [`FailureKind`]: crate::config::FailureKind

use std::path::Path;

use hdfslab_native::{DatasetCreateProps, Hid, Library, ObjectKind, UNLIMITED};

use crate::array::TypedArray;
use crate::attribute::{read_string_attr, write_string_attr};
use crate::chunk::ChunkEstimator;
use crate::codec::{self, Encoded};
use crate::config::IoConfig;
use crate::error::{Error, Result};
use crate::guard::NativeGuard;
use crate::path::{ensure_groups, strip_classes, AugmentedPath};
use crate::registry::FileHandle;
use crate::shape::{checked_len, reconcile_max_shape, to_hyperslab, ShapeSpec};
use crate::types::{ElementKind, ResolvedType, TypeDescriptor, TypeResolver};

/// Attribute marking a byte dataset as boolean.
pub const BOOLEAN_ATTR: &str = "DLS_read_datatype";

/// Value of [`BOOLEAN_ATTR`] on boolean datasets.
pub const BOOLEAN_TAG: &str = "boolean";

/// Layout of a new dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSpec {
    /// Initial extent; empty for a scalar dataset.
    pub shape: Vec<u64>,
    /// Maximum extent; `None` keeps the initial extent fixed.
    pub max_shape: Option<Vec<u64>>,
    /// Chunk shape; estimated from the maximum extent when `None`.
    pub chunk: Option<Vec<u64>>,
    /// Value of unwritten elements. Ignored for strings.
    pub fill: Option<TypedArray>,
}

impl CreateSpec {
    pub fn new(shape: Vec<u64>) -> Self {
        CreateSpec {
            shape,
            ..Default::default()
        }
    }

    /// A rank-0 dataset.
    pub fn scalar() -> Self {
        Self::default()
    }

    /// Start empty along the first dimension and grow without bound.
    pub fn extendible(row_shape: &[u64]) -> Self {
        let mut shape = vec![0];
        shape.extend_from_slice(row_shape);
        let mut max = vec![UNLIMITED];
        max.extend_from_slice(row_shape);
        CreateSpec::new(shape).max_shape(max)
    }

    pub fn max_shape(mut self, max_shape: Vec<u64>) -> Self {
        self.max_shape = Some(max_shape);
        self
    }

    pub fn chunk(mut self, chunk: Vec<u64>) -> Self {
        self.chunk = Some(chunk);
        self
    }

    pub fn fill(mut self, fill: TypedArray) -> Self {
        self.fill = Some(fill);
        self
    }
}

/// Post-read conversions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Convert to this kind after reading.
    pub kind: Option<ElementKind>,
    /// Widen unsigned 8/16/32-bit data to the next signed kind.
    pub extend_unsigned: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_kind(mut self, kind: ElementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn extend_unsigned(mut self) -> Self {
        self.extend_unsigned = true;
        self
    }
}

/// Current and maximum extent of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetShape {
    pub dims: Vec<u64>,
    /// [`UNLIMITED`] marks unbounded dimensions.
    pub max_dims: Vec<u64>,
}

impl DatasetShape {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_extendible(&self) -> bool {
        self.dims != self.max_dims
    }
}

/// Dataset operations on open files.
#[derive(Debug, Clone, Copy)]
pub struct DatasetIo<'a> {
    lib: &'a Library,
    config: &'a IoConfig,
    resolver: TypeResolver<'static>,
}

impl<'a> DatasetIo<'a> {
    pub fn new(lib: &'a Library, config: &'a IoConfig) -> Self {
        DatasetIo {
            lib,
            config,
            resolver: TypeResolver::default(),
        }
    }

    fn run<T>(&self, handle: &FileHandle, op: &str, path: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _op = handle.lock();
        f().map_err(|e| e.at_boundary(self.config.failure_kind, op, path, handle.path()))
    }

    /// Create a dataset, along with any missing parent groups.
    pub fn create_dataset(
        &self,
        handle: &FileHandle,
        path: &str,
        descriptor: &TypeDescriptor,
        spec: &CreateSpec,
    ) -> Result<()> {
        self.run(handle, "create", path, || {
            self.create_locked(handle, path, descriptor, spec)
        })
    }

    /// Read `region` (everything when `None`) of a dataset.
    pub fn read_dataset(
        &self,
        handle: &FileHandle,
        path: &str,
        region: Option<&ShapeSpec>,
        options: ReadOptions,
    ) -> Result<TypedArray> {
        self.run(handle, "read", path, || {
            self.read_locked(handle, path, region, options)
        })
    }

    /// Read a whole dataset as stored.
    pub fn read_all(&self, handle: &FileHandle, path: &str) -> Result<TypedArray> {
        self.read_dataset(handle, path, None, ReadOptions::default())
    }

    /// Write `value` into `region`, growing the dataset first if the region
    /// reaches past its current extent.
    pub fn write_slice(
        &self,
        handle: &FileHandle,
        path: &str,
        region: &ShapeSpec,
        value: &TypedArray,
    ) -> Result<()> {
        self.run(handle, "write", path, || {
            self.write_locked(handle, path, Some(region), value)
        })
    }

    /// Write a whole scalar dataset or a region equal to the current extent.
    pub fn write_all(&self, handle: &FileHandle, path: &str, value: &TypedArray) -> Result<()> {
        self.run(handle, "write", path, || {
            self.write_locked(handle, path, None, value)
        })
    }

    /// Append `value` as a new leading row. The dataset is created with an
    /// unbounded first dimension on first use.
    pub fn append_row(&self, handle: &FileHandle, path: &str, value: &TypedArray) -> Result<()> {
        self.run(handle, "append", path, || self.append_locked(handle, path, value))
    }

    pub fn dataset_shape(&self, handle: &FileHandle, path: &str) -> Result<DatasetShape> {
        self.run(handle, "query shape of", path, || {
            let plain = self.dataset_path(handle, path)?;
            let ds = NativeGuard::dataset(self.lib, self.lib.dataset_open(handle.id(), &plain))?;
            self.shape_of(ds.id())
        })
    }

    /// True when `path` names a dataset (groups do not count).
    pub fn dataset_exists(&self, handle: &FileHandle, path: &str) -> Result<bool> {
        self.run(handle, "query", path, || {
            let plain = strip_classes(path)?;
            Ok(self.lib.object_kind(handle.id(), &plain)? == Some(ObjectKind::Dataset))
        })
    }

    /// Element descriptor of a dataset, honoring the boolean convention.
    pub fn resolve_type(&self, handle: &FileHandle, path: &str) -> Result<TypeDescriptor> {
        self.run(handle, "resolve type of", path, || {
            let plain = self.dataset_path(handle, path)?;
            let ds = NativeGuard::dataset(self.lib, self.lib.dataset_open(handle.id(), &plain))?;
            let resolved = self.resolve_dataset(ds.id())?;
            if self.is_boolean(ds.id(), &resolved)? {
                return Ok(TypeDescriptor::of(ElementKind::Bool));
            }
            Ok(resolved.descriptor)
        })
    }

    /// Chunk shape of a dataset, or `None` for contiguous storage.
    pub fn chunk_shape(&self, handle: &FileHandle, path: &str) -> Result<Option<Vec<u64>>> {
        self.run(handle, "query chunks of", path, || {
            let plain = self.dataset_path(handle, path)?;
            let ds = NativeGuard::dataset(self.lib, self.lib.dataset_open(handle.id(), &plain))?;
            Ok(self.lib.dataset_get_create_props(ds.id())?.chunk_dims)
        })
    }

    /// Link `dest_path` in this file to `source_path` in `source_file`.
    /// The destination's parent groups are created when absent.
    pub fn create_external_link(
        &self,
        handle: &FileHandle,
        source_file: &Path,
        source_path: &str,
        dest_path: &str,
    ) -> Result<()> {
        self.run(handle, "link", dest_path, || {
            let dest = AugmentedPath::parse(dest_path)?;
            if dest.is_root() {
                return Err(Error::InvalidArgument("cannot link the root group".into()));
            }
            ensure_groups(self.lib, handle.id(), &dest.parent())?;
            let source = strip_classes(source_path)?;
            tracing::debug!(
                dest = %dest.plain(),
                source_file = %source_file.display(),
                source = %source,
                "creating external link"
            );
            self.lib
                .link_external_create(source_file, &source, handle.id(), &dest.plain())?;
            if handle.is_swmr() {
                self.lib.file_flush(handle.id())?;
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Operation bodies; callers hold the operation lock.
    // ------------------------------------------------------------------

    fn dataset_path(&self, handle: &FileHandle, path: &str) -> Result<String> {
        let plain = strip_classes(path)?;
        match self.lib.object_kind(handle.id(), &plain)? {
            Some(ObjectKind::Dataset) => Ok(plain),
            _ => Err(Error::NotADataset(plain)),
        }
    }

    fn shape_of(&self, ds: Hid) -> Result<DatasetShape> {
        let space = NativeGuard::dataspace(self.lib, self.lib.dataset_get_space(ds))?;
        let (dims, max_dims) = self.lib.space_get_dims(space.id())?;
        Ok(DatasetShape { dims, max_dims })
    }

    fn resolve_dataset(&self, ds: Hid) -> Result<ResolvedType> {
        let dtype = NativeGuard::datatype(self.lib, self.lib.dataset_get_type(ds))?;
        self.resolver.resolve_layout(self.lib, dtype.id())
    }

    fn is_boolean(&self, ds: Hid, resolved: &ResolvedType) -> Result<bool> {
        if resolved.descriptor.kind != ElementKind::UInt8 || resolved.descriptor.arity != 1 {
            return Ok(false);
        }
        let tag = read_string_attr(self.lib, ds, BOOLEAN_ATTR)?;
        Ok(tag.map_or(false, |t| t.first().map(String::as_str) == Some(BOOLEAN_TAG)))
    }

    fn estimate_chunk(&self, spec: &CreateSpec, max: &[u64], item_size: usize) -> Result<Vec<u64>> {
        if let Some(chunk) = &spec.chunk {
            if chunk.len() != max.len() {
                return Err(Error::ShapeViolation(format!(
                    "chunk {chunk:?} does not match rank {}",
                    max.len()
                )));
            }
            if chunk.iter().any(|&c| c == 0) {
                return Err(Error::InvalidArgument(format!("chunk {chunk:?} has a zero dimension")));
            }
            return Ok(chunk.clone());
        }
        let expected: Vec<u64> = spec
            .shape
            .iter()
            .zip(max)
            .map(|(&s, &m)| {
                if m == UNLIMITED {
                    s.max(self.config.append_rows_hint)
                } else {
                    m.max(1)
                }
            })
            .collect();
        ChunkEstimator::from_config(self.config).estimate(&expected, item_size.max(1), None)
    }

    fn create_locked(
        &self,
        handle: &FileHandle,
        path: &str,
        descriptor: &TypeDescriptor,
        spec: &CreateSpec,
    ) -> Result<()> {
        let lib = self.lib;
        let target = AugmentedPath::parse(path)?;
        if target.is_root() {
            return Err(Error::InvalidArgument("cannot create a dataset at the root".into()));
        }
        let plain = target.plain();
        ensure_groups(lib, handle.id(), &target.parent())?;
        if let Some(kind) = lib.object_kind(handle.id(), &plain)? {
            return Err(Error::InvalidArgument(format!("{plain} already exists as {kind:?}")));
        }

        let rank = spec.shape.len();
        let max = reconcile_max_shape(&spec.shape, spec.max_shape.as_deref())?;
        let space = if rank == 0 {
            NativeGuard::dataspace(lib, lib.space_create_scalar())?
        } else {
            NativeGuard::dataspace(lib, lib.space_create_simple(&spec.shape, Some(max.as_slice())))?
        };
        let dtype = NativeGuard::datatype(lib, lib.type_register(descriptor.to_native()))?;

        let mut dcpl = DatasetCreateProps::new();
        if rank > 0 {
            let item_size = lib.type_get_size(dtype.id())?;
            let chunk = self.estimate_chunk(spec, &max, item_size)?;
            tracing::debug!(path = %plain, ?chunk, "chunked layout");
            dcpl = dcpl.chunk(&chunk);
            if let Some(level) = self.config.compression.deflate_level() {
                dcpl = dcpl.deflate(level);
            }
        }
        match &spec.fill {
            Some(_) if descriptor.kind == ElementKind::String => {
                tracing::debug!(path = %plain, "ignoring fill value for strings");
            }
            Some(fill) => {
                if fill.len() != 1 {
                    return Err(Error::ShapeViolation(format!(
                        "fill value must hold one element, got {}",
                        fill.len()
                    )));
                }
                let resolved = self.resolver.resolve_layout(lib, dtype.id())?;
                if let Encoded::Fixed(bytes) = codec::encode(&resolved, fill)? {
                    dcpl = dcpl.fill_value(&bytes);
                }
            }
            None => {}
        }

        let ds = NativeGuard::dataset(
            lib,
            lib.dataset_create(handle.id(), &plain, dtype.id(), space.id(), &dcpl),
        )?;
        if descriptor.kind == ElementKind::Bool && read_string_attr(lib, ds.id(), BOOLEAN_ATTR)?.is_none() {
            write_string_attr(lib, ds.id(), BOOLEAN_ATTR, &[BOOLEAN_TAG])?;
        }
        if handle.is_swmr() {
            lib.file_flush(handle.id())?;
        }
        tracing::debug!(path = %plain, shape = ?spec.shape, max = ?max, "created dataset");
        Ok(())
    }

    fn read_locked(
        &self,
        handle: &FileHandle,
        path: &str,
        region: Option<&ShapeSpec>,
        options: ReadOptions,
    ) -> Result<TypedArray> {
        let lib = self.lib;
        let plain = self.dataset_path(handle, path)?;
        let ds = NativeGuard::dataset(lib, lib.dataset_open(handle.id(), &plain))?;
        let resolved = self.resolve_dataset(ds.id())?;
        let space = NativeGuard::dataspace(lib, lib.dataset_get_space(ds.id()))?;
        let (dims, _) = lib.space_get_dims(space.id())?;

        let (shape, selection) = match region {
            None => (dims, None),
            Some(spec) if spec.rank() != dims.len() => {
                return Err(Error::ShapeViolation(format!(
                    "region rank {} differs from dataset rank {}",
                    spec.rank(),
                    dims.len()
                )))
            }
            Some(_) if dims.is_empty() => (dims, None),
            Some(spec) => {
                spec.stop()?;
                let slab = to_hyperslab(spec);
                lib.space_select_hyperslab(space.id(), &slab.start, &slab.stride, &slab.count, &slab.block)?;
                (spec.count.clone(), Some(space.id()))
            }
        };

        let mut value = if resolved.descriptor.is_variable_length {
            codec::decode_vlen(shape, lib.dataset_read_vlen(ds.id(), selection)?)?
        } else {
            let bytes = checked_len(&shape)?
                .checked_mul(resolved.record_size)
                .ok_or_else(|| Error::ShapeViolation(format!("{shape:?} records overflow a buffer")))?;
            let mut buf = vec![0u8; bytes];
            lib.dataset_read(ds.id(), selection, &mut buf)?;
            codec::decode_fixed(&resolved, shape, &buf)?
        };
        if self.is_boolean(ds.id(), &resolved)? {
            value = value.convert(ElementKind::Bool)?;
        } else if options.extend_unsigned && resolved.descriptor.is_unsigned {
            value = value.widen_unsigned()?;
        }
        match options.kind {
            Some(kind) if kind != value.kind() => value.convert(kind),
            _ => Ok(value),
        }
    }

    fn write_locked(
        &self,
        handle: &FileHandle,
        path: &str,
        region: Option<&ShapeSpec>,
        value: &TypedArray,
    ) -> Result<()> {
        let lib = self.lib;
        let plain = self.dataset_path(handle, path)?;
        let ds = NativeGuard::dataset(lib, lib.dataset_open(handle.id(), &plain))?;
        let resolved = self.resolve_dataset(ds.id())?;
        let current = self.shape_of(ds.id())?;

        let selection = if current.rank() == 0 {
            if value.rank() != 0 || region.map_or(false, |r| r.rank() != 0) {
                return Err(Error::ShapeViolation(format!(
                    "scalar dataset {plain} needs a scalar value, got shape {:?}",
                    value.shape()
                )));
            }
            None
        } else {
            let whole = ShapeSpec::whole(&current.dims);
            let region = region.unwrap_or(&whole);
            if region.rank() != current.rank() {
                return Err(Error::ShapeViolation(format!(
                    "region rank {} differs from dataset rank {}",
                    region.rank(),
                    current.rank()
                )));
            }
            if value.shape() != region.count.as_slice() {
                return Err(Error::ShapeViolation(format!(
                    "value shape {:?} differs from region count {:?}",
                    value.shape(),
                    region.count
                )));
            }
            if let Some(extent) = region.extension(&current.dims)? {
                tracing::debug!(path = %plain, from = ?current.dims, to = ?extent, "extending dataset");
                lib.dataset_set_extent(ds.id(), &extent)?;
            }
            let space = NativeGuard::dataspace(lib, lib.dataset_get_space(ds.id()))?;
            let slab = to_hyperslab(region);
            lib.space_select_hyperslab(space.id(), &slab.start, &slab.stride, &slab.count, &slab.block)?;
            Some(space)
        };

        let file_space = selection.as_ref().map(NativeGuard::id);
        match codec::encode(&resolved, value)? {
            Encoded::Fixed(bytes) => lib.dataset_write(ds.id(), file_space, &bytes)?,
            Encoded::VarLen(cells) => lib.dataset_write_vlen(ds.id(), file_space, &cells)?,
        }
        if handle.is_swmr() {
            lib.file_flush(handle.id())?;
        }
        Ok(())
    }

    fn append_locked(&self, handle: &FileHandle, path: &str, value: &TypedArray) -> Result<()> {
        let plain = strip_classes(path)?;
        match self.lib.object_kind(handle.id(), &plain)? {
            None => {
                let descriptor = match value.kind() {
                    ElementKind::String => TypeDescriptor::var_string(),
                    kind => TypeDescriptor::of(kind).with_arity(value.arity()),
                };
                self.create_locked(handle, path, &descriptor, &CreateSpec::extendible(value.shape()))?;
            }
            Some(ObjectKind::Dataset) => {}
            Some(_) => return Err(Error::NotADataset(plain)),
        }

        let ds = NativeGuard::dataset(self.lib, self.lib.dataset_open(handle.id(), &plain))?;
        let current = self.shape_of(ds.id())?;
        drop(ds);
        if current.rank() != value.rank() + 1 {
            return Err(Error::ShapeViolation(format!(
                "row of rank {} cannot extend {plain} of rank {}",
                value.rank(),
                current.rank()
            )));
        }
        let mut start = vec![0; current.rank()];
        start[0] = current.dims[0];
        let mut count = vec![1];
        count.extend_from_slice(value.shape());
        let row = value.clone().reshape(count.clone())?;
        let region = ShapeSpec::region(start, count)?;
        self.write_locked(handle, &plain, Some(&region), &row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extendible_spec() {
        let spec = CreateSpec::extendible(&[4]);
        assert_eq!(spec.shape, vec![0, 4]);
        assert_eq!(spec.max_shape, Some(vec![UNLIMITED, 4]));
        assert!(CreateSpec::scalar().shape.is_empty());
    }

    #[test]
    fn read_options_builder() {
        let o = ReadOptions::new().as_kind(ElementKind::Float64).extend_unsigned();
        assert_eq!(o.kind, Some(ElementKind::Float64));
        assert!(o.extend_unsigned);
        assert_eq!(ReadOptions::default().kind, None);
    }

    #[test]
    fn chunk_estimate_uses_append_hint() {
        let lib = Library::new();
        let config = IoConfig::default().append_rows_hint(64);
        let io = DatasetIo::new(&lib, &config);
        let spec = CreateSpec::extendible(&[4]);
        let chunk = io.estimate_chunk(&spec, &[UNLIMITED, 4], 8).unwrap();
        assert_eq!(chunk, vec![64, 4]);

        let spec = CreateSpec::new(vec![2, 2]).chunk(vec![1, 2]);
        assert_eq!(io.estimate_chunk(&spec, &[2, 2], 8).unwrap(), vec![1, 2]);
        let spec = CreateSpec::new(vec![2, 2]).chunk(vec![1]);
        assert!(matches!(
            io.estimate_chunk(&spec, &[2, 2], 8),
            Err(Error::ShapeViolation(_))
        ));
    }

    #[test]
    fn dataset_shape_extendibility() {
        let s = DatasetShape {
            dims: vec![3, 4],
            max_dims: vec![UNLIMITED, 4],
        };
        assert_eq!(s.rank(), 2);
        assert!(s.is_extendible());
    }
}
