//! Named metadata on groups and datasets.
//!
//! Attributes are small typed arrays. They cannot be updated in place: a
//! write replaces any attribute of the same name. Strings are stored as
//! fixed-width UTF-8 sized to the longest value plus a terminator.

use hdfslab_native::{Hid, Library};

use crate::array::TypedArray;
use crate::codec::{self, Encoded};
use crate::config::IoConfig;
use crate::error::Result;
use crate::guard::NativeGuard;
use crate::path::strip_classes;
use crate::registry::FileHandle;
use crate::types::{ElementKind, TypeDescriptor, TypeResolver};

/// One decoded attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValue {
    pub name: String,
    pub value: TypedArray,
}

fn read_open(lib: &Library, resolver: &TypeResolver<'_>, attr: Hid) -> Result<TypedArray> {
    let space = NativeGuard::dataspace(lib, lib.attr_get_space(attr))?;
    let dtype = NativeGuard::datatype(lib, lib.attr_get_type(attr))?;
    let (dims, _) = lib.space_get_dims(space.id())?;
    let resolved = resolver.resolve_layout(lib, dtype.id())?;
    if resolved.descriptor.is_variable_length {
        return codec::decode_vlen(dims, lib.attr_read_vlen(attr)?);
    }
    let n: u64 = dims.iter().product();
    let mut buf = vec![0u8; n as usize * resolved.record_size];
    lib.attr_read(attr, &mut buf)?;
    codec::decode_fixed(&resolved, dims, &buf)
}

fn descriptor_for(value: &TypedArray) -> TypeDescriptor {
    match value.kind() {
        ElementKind::String => {
            let longest = value
                .as_strings()
                .map_or(0, |s| s.iter().map(String::len).max().unwrap_or(0));
            TypeDescriptor::fixed_string(longest + 1)
        }
        kind => TypeDescriptor::of(kind).with_arity(value.arity()),
    }
}

/// Replace attribute `name` on `obj` with `value`.
pub(crate) fn write_value(
    lib: &Library,
    resolver: &TypeResolver<'_>,
    obj: Hid,
    name: &str,
    value: &TypedArray,
) -> Result<()> {
    if lib.attr_exists(obj, name)? {
        tracing::debug!(name, "replacing attribute");
        lib.attr_delete(obj, name)?;
    }
    let space = if value.rank() == 0 {
        NativeGuard::dataspace(lib, lib.space_create_scalar())?
    } else {
        NativeGuard::dataspace(lib, lib.space_create_simple(value.shape(), None))?
    };
    let dtype = NativeGuard::datatype(lib, lib.type_register(descriptor_for(value).to_native()))?;
    let resolved = resolver.resolve_layout(lib, dtype.id())?;
    let attr = NativeGuard::attribute(lib, lib.attr_create(obj, name, dtype.id(), space.id()))?;
    match codec::encode(&resolved, value)? {
        Encoded::Fixed(bytes) => lib.attr_write(attr.id(), &bytes)?,
        Encoded::VarLen(cells) => lib.attr_write_vlen(attr.id(), &cells)?,
    }
    Ok(())
}

/// Strings of attribute `name` on `obj`, or `None` when it is absent.
/// A non-string attribute reads as an empty list.
pub(crate) fn read_string_attr(lib: &Library, obj: Hid, name: &str) -> Result<Option<Vec<String>>> {
    if !lib.attr_exists(obj, name)? {
        return Ok(None);
    }
    let attr = NativeGuard::attribute(lib, lib.attr_open(obj, name))?;
    let value = read_open(lib, &TypeResolver::default(), attr.id())?;
    Ok(Some(value.as_strings().map(<[String]>::to_vec).unwrap_or_default()))
}

/// Write string attribute `name`; a single value is stored as a scalar.
pub(crate) fn write_string_attr(lib: &Library, obj: Hid, name: &str, values: &[&str]) -> Result<()> {
    let shape = if values.len() == 1 {
        Vec::new()
    } else {
        vec![values.len() as u64]
    };
    let value = TypedArray::from_strings(shape, values.iter().copied())?;
    write_value(lib, &TypeResolver::default(), obj, name, &value)
}

/// Attribute operations on objects inside open files.
#[derive(Debug, Clone, Copy)]
pub struct AttributeIo<'a> {
    lib: &'a Library,
    config: &'a IoConfig,
    resolver: TypeResolver<'static>,
}

impl<'a> AttributeIo<'a> {
    pub fn new(lib: &'a Library, config: &'a IoConfig) -> Self {
        AttributeIo {
            lib,
            config,
            resolver: TypeResolver::default(),
        }
    }

    fn run<T>(
        &self,
        handle: &FileHandle,
        op: &str,
        path: &str,
        f: impl FnOnce(&Library, Hid) -> Result<T>,
    ) -> Result<T> {
        let _op = handle.lock();
        let lib = self.lib;
        strip_classes(path)
            .and_then(|plain| {
                let obj = NativeGuard::object(lib, lib.object_open(handle.id(), &plain))?;
                f(lib, obj.id())
            })
            .map_err(|e| e.at_boundary(self.config.failure_kind, op, path, handle.path()))
    }

    /// Every attribute of the object at `object_path`, in name order.
    pub fn read_attributes(&self, handle: &FileHandle, object_path: &str) -> Result<Vec<AttributeValue>> {
        self.run(handle, "read attributes of", object_path, |lib, obj| {
            let count = lib.attr_count(obj)?;
            let mut out = Vec::with_capacity(count);
            for idx in 0..count {
                let attr = NativeGuard::attribute(lib, lib.attr_open_by_idx(obj, idx))?;
                out.push(AttributeValue {
                    name: lib.attr_name(attr.id())?,
                    value: read_open(lib, &self.resolver, attr.id())?,
                });
            }
            Ok(out)
        })
    }

    /// One attribute by name.
    pub fn read_attribute(&self, handle: &FileHandle, object_path: &str, name: &str) -> Result<TypedArray> {
        self.run(handle, "read attribute of", object_path, |lib, obj| {
            let attr = NativeGuard::attribute(lib, lib.attr_open(obj, name))?;
            read_open(lib, &self.resolver, attr.id())
        })
    }

    /// Create or replace attribute `name`.
    pub fn write_attribute(
        &self,
        handle: &FileHandle,
        object_path: &str,
        name: &str,
        value: &TypedArray,
    ) -> Result<()> {
        self.run(handle, "write attribute of", object_path, |lib, obj| {
            write_value(lib, &self.resolver, obj, name, value)?;
            if handle.is_swmr() {
                lib.file_flush(handle.id())?;
            }
            Ok(())
        })
    }

    pub fn attribute_exists(&self, handle: &FileHandle, object_path: &str, name: &str) -> Result<bool> {
        self.run(handle, "query attribute of", object_path, |lib, obj| {
            Ok(lib.attr_exists(obj, name)?)
        })
    }

    /// Remove attribute `name`; absent attributes are ignored.
    pub fn delete_attribute(&self, handle: &FileHandle, object_path: &str, name: &str) -> Result<()> {
        self.run(handle, "delete attribute of", object_path, |lib, obj| {
            if lib.attr_exists(obj, name)? {
                lib.attr_delete(obj, name)?;
            }
            Ok(())
        })
    }
}
