//! Canonical element kinds and native type resolution.
//!
//! Native datatypes are mapped onto a small closed set of [`ElementKind`]s.
//! Compound and array types are flattened into their primitive members; a
//! record is representable only when every member has the same native class.
//! Two float members named `r...`/`i...` are read as a complex number.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use hdfslab_native::{Datatype, Hid, Library, TypeClass};

use crate::error::{Error, Result};
use crate::guard::NativeGuard;

/// Canonical element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Stored as a single unsigned byte.
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Pair of 32-bit floats.
    Complex64,
    /// Pair of 64-bit floats.
    Complex128,
    String,
}

impl ElementKind {
    /// Every kind, in declaration order.
    pub const ALL: [ElementKind; 14] = [
        ElementKind::Bool,
        ElementKind::Int8,
        ElementKind::Int16,
        ElementKind::Int32,
        ElementKind::Int64,
        ElementKind::UInt8,
        ElementKind::UInt16,
        ElementKind::UInt32,
        ElementKind::UInt64,
        ElementKind::Float32,
        ElementKind::Float64,
        ElementKind::Complex64,
        ElementKind::Complex128,
        ElementKind::String,
    ];

    /// Bytes per element; `None` for strings.
    pub fn item_size(self) -> Option<usize> {
        match self {
            ElementKind::Bool | ElementKind::Int8 | ElementKind::UInt8 => Some(1),
            ElementKind::Int16 | ElementKind::UInt16 => Some(2),
            ElementKind::Int32 | ElementKind::UInt32 | ElementKind::Float32 => Some(4),
            ElementKind::Int64
            | ElementKind::UInt64
            | ElementKind::Float64
            | ElementKind::Complex64 => Some(8),
            ElementKind::Complex128 => Some(16),
            ElementKind::String => None,
        }
    }

    pub fn is_unsigned(self) -> bool {
        TypeTable::global().unsigned.contains(&self)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ElementKind::Int8
                | ElementKind::Int16
                | ElementKind::Int32
                | ElementKind::Int64
                | ElementKind::UInt8
                | ElementKind::UInt16
                | ElementKind::UInt32
                | ElementKind::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementKind::Float32 | ElementKind::Float64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, ElementKind::Complex64 | ElementKind::Complex128)
    }

    /// The signed kind that holds the full range of an unsigned kind.
    /// `UInt64` has none and maps to itself, as do all other kinds.
    pub fn signed_extension(self) -> ElementKind {
        match self {
            ElementKind::UInt8 => ElementKind::Int16,
            ElementKind::UInt16 => ElementKind::Int32,
            ElementKind::UInt32 => ElementKind::Int64,
            other => other,
        }
    }

    /// Complex kind whose components are this float kind.
    pub(crate) fn complex_of(self) -> Option<ElementKind> {
        match self {
            ElementKind::Float32 => Some(ElementKind::Complex64),
            ElementKind::Float64 => Some(ElementKind::Complex128),
            _ => None,
        }
    }

    /// Float kind of one component of a complex kind.
    pub(crate) fn component(self) -> Option<ElementKind> {
        match self {
            ElementKind::Complex64 => Some(ElementKind::Float32),
            ElementKind::Complex128 => Some(ElementKind::Float64),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ElementKind::Bool => "bool",
            ElementKind::Int8 => "i8",
            ElementKind::Int16 => "i16",
            ElementKind::Int32 => "i32",
            ElementKind::Int64 => "i64",
            ElementKind::UInt8 => "u8",
            ElementKind::UInt16 => "u16",
            ElementKind::UInt32 => "u32",
            ElementKind::UInt64 => "u64",
            ElementKind::Float32 => "f32",
            ElementKind::Float64 => "f64",
            ElementKind::Complex64 => "c64",
            ElementKind::Complex128 => "c128",
            ElementKind::String => "string",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable width/signedness tables, built once per process.
#[derive(Debug)]
pub struct TypeTable {
    integers: HashMap<(usize, bool), ElementKind>,
    floats: HashMap<usize, ElementKind>,
    unsigned: Vec<ElementKind>,
}

impl TypeTable {
    fn build() -> Self {
        let integers = [
            ((1, true), ElementKind::Int8),
            ((2, true), ElementKind::Int16),
            ((4, true), ElementKind::Int32),
            ((8, true), ElementKind::Int64),
            ((1, false), ElementKind::UInt8),
            ((2, false), ElementKind::UInt16),
            ((4, false), ElementKind::UInt32),
            ((8, false), ElementKind::UInt64),
        ]
        .into_iter()
        .collect();
        let floats = [(4, ElementKind::Float32), (8, ElementKind::Float64)]
            .into_iter()
            .collect();
        TypeTable {
            integers,
            floats,
            unsigned: vec![
                ElementKind::UInt8,
                ElementKind::UInt16,
                ElementKind::UInt32,
                ElementKind::UInt64,
            ],
        }
    }

    /// The process-wide table.
    pub fn global() -> &'static TypeTable {
        static TABLE: OnceLock<TypeTable> = OnceLock::new();
        TABLE.get_or_init(TypeTable::build)
    }

    /// Integer kind for a byte width and signedness.
    pub fn integer(&self, size: usize, signed: bool) -> Option<ElementKind> {
        self.integers.get(&(size, signed)).copied()
    }

    /// Float kind for a byte width.
    pub fn float(&self, size: usize) -> Option<ElementKind> {
        self.floats.get(&size).copied()
    }
}

/// Resolved description of a dataset or attribute element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub kind: ElementKind,
    /// Bytes of one element of `kind` (the string width for fixed strings).
    pub item_size: usize,
    pub is_variable_length: bool,
    pub is_complex: bool,
    pub is_unsigned: bool,
    /// Elements per record; greater than one for homogeneous arrays.
    pub arity: usize,
    /// Bit width of one primitive component.
    pub bit_width: u32,
}

impl TypeDescriptor {
    /// Descriptor of a single numeric or boolean element. Strings need
    /// [`TypeDescriptor::fixed_string`] or [`TypeDescriptor::var_string`].
    pub fn of(kind: ElementKind) -> Self {
        let item_size = kind.item_size().unwrap_or(0);
        let component = kind.component().and_then(ElementKind::item_size).unwrap_or(item_size);
        TypeDescriptor {
            kind,
            item_size,
            is_variable_length: false,
            is_complex: kind.is_complex(),
            is_unsigned: kind.is_unsigned(),
            arity: 1,
            bit_width: (component * 8) as u32,
        }
    }

    /// Fixed-width string of `width` bytes including the terminator.
    pub fn fixed_string(width: usize) -> Self {
        TypeDescriptor {
            kind: ElementKind::String,
            item_size: width,
            is_variable_length: false,
            is_complex: false,
            is_unsigned: false,
            arity: 1,
            bit_width: (width * 8) as u32,
        }
    }

    /// Variable-length string.
    pub fn var_string() -> Self {
        TypeDescriptor {
            is_variable_length: true,
            bit_width: 0,
            ..Self::fixed_string(0)
        }
    }

    /// Same element with `arity` elements per record.
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = arity.max(1);
        self
    }

    /// Native datatype that stores this descriptor.
    pub fn to_native(&self) -> Datatype {
        let element = match self.kind {
            ElementKind::Bool => Datatype::native_int(1, false),
            ElementKind::String if self.is_variable_length => Datatype::var_string(),
            ElementKind::String => Datatype::fixed_string(self.item_size.max(1) as u32),
            ElementKind::Complex64 | ElementKind::Complex128 => {
                let size = (self.item_size / 2) as u32;
                Datatype::packed_compound(vec![
                    ("r".into(), Datatype::native_float(size)),
                    ("i".into(), Datatype::native_float(size)),
                ])
            }
            kind if kind.is_float() => Datatype::native_float(self.item_size as u32),
            kind => Datatype::native_int(self.item_size as u32, !kind.is_unsigned()),
        };
        if self.arity > 1 {
            Datatype::Array {
                base_type: Box::new(element),
                dimensions: vec![self.arity as u32],
            }
        } else {
            element
        }
    }
}

/// One flattened primitive member of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLayout {
    pub name: String,
    pub class: TypeClass,
    pub kind: ElementKind,
    pub offset: usize,
    pub size: usize,
}

/// A descriptor plus the byte layout needed to decode native records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub descriptor: TypeDescriptor,
    /// Flattened members; one entry at offset 0 for primitive types.
    pub members: Vec<MemberLayout>,
    /// Bytes per native record.
    pub record_size: usize,
    /// Kind every member is converted to; the component kind for complex.
    pub common_kind: ElementKind,
}

/// Maps native datatypes onto canonical element kinds.
#[derive(Debug, Clone, Copy)]
pub struct TypeResolver<'t> {
    table: &'t TypeTable,
}

impl Default for TypeResolver<'static> {
    fn default() -> Self {
        TypeResolver::new(TypeTable::global())
    }
}

fn trimmed_leaf(name: &str) -> String {
    name.trim()
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Kind that holds every member's values. The widest member wins and ties
/// keep the first; integers mixing signedness widen to a signed kind that
/// covers the widest unsigned member.
fn common_member_kind(members: &[MemberLayout]) -> Result<ElementKind> {
    let Some(first) = members.first() else {
        return Err(Error::UnsupportedType("record with no members".into()));
    };
    let widest = members
        .iter()
        .fold(first.kind, |acc, m| match (m.kind.item_size(), acc.item_size()) {
            (Some(a), Some(b)) if a > b => m.kind,
            _ => acc,
        });
    let widest_of = |unsigned: bool| {
        members
            .iter()
            .map(|m| m.kind)
            .filter(|k| k.is_integer() && k.is_unsigned() == unsigned)
            .max_by_key(|k| k.item_size())
    };
    let (Some(unsigned), Some(signed)) = (widest_of(true), widest_of(false)) else {
        return Ok(widest);
    };
    if signed.item_size() > unsigned.item_size() {
        return Ok(widest);
    }
    match unsigned.signed_extension() {
        kind if kind != unsigned => Ok(kind),
        _ => Err(Error::UnsupportedType(format!(
            "record mixes signed integers with {unsigned}, which no signed kind holds"
        ))),
    }
}

impl<'t> TypeResolver<'t> {
    pub fn new(table: &'t TypeTable) -> Self {
        TypeResolver { table }
    }

    /// Resolve a native type id to a descriptor.
    pub fn resolve(&self, lib: &Library, type_id: Hid) -> Result<TypeDescriptor> {
        Ok(self.resolve_layout(lib, type_id)?.descriptor)
    }

    /// Resolve a native type id to a descriptor and its record layout.
    pub fn resolve_layout(&self, lib: &Library, type_id: Hid) -> Result<ResolvedType> {
        let class = lib.type_get_class(type_id)?;
        let record_size = lib.type_get_size(type_id)?;
        if !matches!(class, TypeClass::Compound | TypeClass::Array) {
            let descriptor = self.primitive(lib, type_id)?;
            let member = MemberLayout {
                name: String::new(),
                class,
                kind: descriptor.kind,
                offset: 0,
                size: record_size,
            };
            return Ok(ResolvedType {
                common_kind: descriptor.kind,
                descriptor,
                members: vec![member],
                record_size,
            });
        }

        let mut members = Vec::new();
        self.flatten(lib, type_id, "", 0, &mut members)?;
        let first = members
            .first()
            .ok_or_else(|| Error::UnsupportedType("record with no members".into()))?;
        if let Some(odd) = members.iter().find(|m| m.class != first.class) {
            return Err(Error::UnsupportedType(format!(
                "record mixes {:?} and {:?} members",
                first.class, odd.class
            )));
        }
        if first.kind == ElementKind::String {
            return Err(Error::UnsupportedType("record of strings".into()));
        }
        let common_kind = common_member_kind(&members)?;

        let is_complex = members.len() == 2
            && first.class == TypeClass::Float
            && trimmed_leaf(&members[0].name).starts_with('r')
            && trimmed_leaf(&members[1].name).starts_with('i');
        let descriptor = match common_kind.complex_of() {
            Some(kind) if is_complex => TypeDescriptor::of(kind),
            _ => TypeDescriptor::of(common_kind).with_arity(members.len()),
        };
        Ok(ResolvedType {
            descriptor,
            members,
            record_size,
            common_kind,
        })
    }

    fn flatten(
        &self,
        lib: &Library,
        type_id: Hid,
        name: &str,
        base: usize,
        out: &mut Vec<MemberLayout>,
    ) -> Result<()> {
        match lib.type_get_class(type_id)? {
            TypeClass::Compound => {
                for idx in 0..lib.type_get_nmembers(type_id)? {
                    let member_name = lib.type_get_member_name(type_id, idx)?;
                    let offset = lib.type_get_member_offset(type_id, idx)?;
                    let member = NativeGuard::datatype(lib, lib.type_get_member_type(type_id, idx))?;
                    self.flatten(lib, member.id(), &member_name, base + offset, out)?;
                }
            }
            TypeClass::Array => {
                let len: usize = lib
                    .type_get_array_dims(type_id)?
                    .iter()
                    .map(|&d| d as usize)
                    .product();
                let element = NativeGuard::datatype(lib, lib.type_get_super(type_id))?;
                let stride = lib.type_get_size(element.id())?;
                for i in 0..len {
                    self.flatten(lib, element.id(), name, base + i * stride, out)?;
                }
            }
            class => {
                let descriptor = self.primitive(lib, type_id)?;
                out.push(MemberLayout {
                    name: name.to_string(),
                    class,
                    kind: descriptor.kind,
                    offset: base,
                    size: lib.type_get_size(type_id)?,
                });
            }
        }
        Ok(())
    }

    fn primitive(&self, lib: &Library, type_id: Hid) -> Result<TypeDescriptor> {
        let class = lib.type_get_class(type_id)?;
        let size = lib.type_get_size(type_id)?;
        match class {
            TypeClass::Integer => {
                let signed = lib.type_get_sign(type_id)?;
                self.table
                    .integer(size, signed)
                    .map(TypeDescriptor::of)
                    .ok_or_else(|| Error::UnsupportedType(format!("{size}-byte integer")))
            }
            TypeClass::BitField => self
                .table
                .integer(size, false)
                .map(TypeDescriptor::of)
                .ok_or_else(|| Error::UnsupportedType(format!("{size}-byte bitfield"))),
            TypeClass::Float => self
                .table
                .float(size)
                .map(TypeDescriptor::of)
                .ok_or_else(|| Error::UnsupportedType(format!("{size}-byte float"))),
            TypeClass::Enum => {
                let base = NativeGuard::datatype(lib, lib.type_get_super(type_id))?;
                self.primitive(lib, base.id())
            }
            TypeClass::String => Ok(TypeDescriptor::fixed_string(size)),
            TypeClass::VarLen if lib.type_is_variable_str(type_id)? => {
                Ok(TypeDescriptor::var_string())
            }
            TypeClass::VarLen => Err(Error::UnsupportedType(
                "variable-length sequence".into(),
            )),
            TypeClass::Reference => Err(Error::UnsupportedType("reference".into())),
            TypeClass::Opaque => Err(Error::UnsupportedType("opaque".into())),
            TypeClass::Compound | TypeClass::Array => Err(Error::UnsupportedType(format!(
                "{class:?} is not a primitive"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdfslab_native::{CharacterSet, Datatype};

    fn resolve(dt: Datatype) -> Result<ResolvedType> {
        let lib = Library::new();
        let id = lib.type_register(dt).unwrap();
        let out = TypeResolver::default().resolve_layout(&lib, id);
        lib.type_close(id).unwrap();
        assert_eq!(lib.open_id_count(), 0);
        out
    }

    #[test]
    fn width_table() {
        let t = TypeTable::global();
        assert_eq!(t.integer(2, false), Some(ElementKind::UInt16));
        assert_eq!(t.integer(8, true), Some(ElementKind::Int64));
        assert_eq!(t.integer(3, true), None);
        assert_eq!(t.float(4), Some(ElementKind::Float32));
        assert_eq!(t.float(2), None);
    }

    #[test]
    fn signed_extension_table() {
        assert_eq!(ElementKind::UInt8.signed_extension(), ElementKind::Int16);
        assert_eq!(ElementKind::UInt16.signed_extension(), ElementKind::Int32);
        assert_eq!(ElementKind::UInt32.signed_extension(), ElementKind::Int64);
        assert_eq!(ElementKind::UInt64.signed_extension(), ElementKind::UInt64);
        assert_eq!(ElementKind::Float32.signed_extension(), ElementKind::Float32);
    }

    #[test]
    fn primitive_kinds() {
        let r = resolve(Datatype::native_int(2, false)).unwrap();
        assert_eq!(r.descriptor.kind, ElementKind::UInt16);
        assert!(r.descriptor.is_unsigned);
        assert_eq!(r.descriptor.bit_width, 16);

        let r = resolve(Datatype::native_float(8)).unwrap();
        assert_eq!(r.descriptor, TypeDescriptor::of(ElementKind::Float64));

        let r = resolve(Datatype::BitField { size: 4 }).unwrap();
        assert_eq!(r.descriptor.kind, ElementKind::UInt32);
    }

    #[test]
    fn strings() {
        let r = resolve(Datatype::fixed_string(12)).unwrap();
        assert_eq!(r.descriptor, TypeDescriptor::fixed_string(12));
        let r = resolve(Datatype::var_string()).unwrap();
        assert!(r.descriptor.is_variable_length);
        assert_eq!(r.descriptor.kind, ElementKind::String);
    }

    #[test]
    fn enum_uses_base_integer() {
        let r = resolve(Datatype::Enumeration {
            base_type: Box::new(Datatype::native_int(1, true)),
            members: Vec::new(),
        })
        .unwrap();
        assert_eq!(r.descriptor.kind, ElementKind::Int8);
    }

    #[test]
    fn unsupported_classes() {
        for dt in [
            Datatype::Reference {
                size: 8,
                ref_type: hdfslab_native::datatype::ReferenceType::Object,
            },
            Datatype::Opaque {
                size: 4,
                tag: b"raw".to_vec(),
            },
            Datatype::VariableLength {
                is_string: false,
                charset: CharacterSet::Ascii,
                base_type: Box::new(Datatype::native_int(4, true)),
            },
            Datatype::native_int(3, true),
        ] {
            assert!(matches!(resolve(dt), Err(Error::UnsupportedType(_))));
        }
    }

    #[test]
    fn array_multiplies_arity() {
        let r = resolve(Datatype::Array {
            base_type: Box::new(Datatype::native_int(4, true)),
            dimensions: vec![2, 3],
        })
        .unwrap();
        assert_eq!(r.descriptor.kind, ElementKind::Int32);
        assert_eq!(r.descriptor.arity, 6);
        assert_eq!(r.members[5].offset, 20);
        assert_eq!(r.record_size, 24);
    }

    #[test]
    fn mixed_compound_is_unsupported() {
        let dt = Datatype::packed_compound(vec![
            ("a".into(), Datatype::native_int(4, true)),
            ("b".into(), Datatype::native_int(4, true)),
            ("c".into(), Datatype::native_float(8)),
        ]);
        assert!(matches!(resolve(dt), Err(Error::UnsupportedType(_))));
    }

    #[test]
    fn mixed_signedness_widens_to_signed() {
        let mixed = |signed: u32, unsigned: u32| {
            resolve(Datatype::packed_compound(vec![
                ("a".into(), Datatype::native_int(signed, true)),
                ("b".into(), Datatype::native_int(unsigned, false)),
            ]))
        };
        assert_eq!(mixed(2, 2).unwrap().common_kind, ElementKind::Int32);
        assert_eq!(mixed(4, 4).unwrap().common_kind, ElementKind::Int64);
        assert_eq!(mixed(1, 2).unwrap().common_kind, ElementKind::Int32);
        assert_eq!(mixed(4, 2).unwrap().common_kind, ElementKind::Int32);
        assert_eq!(mixed(8, 4).unwrap().common_kind, ElementKind::Int64);
        assert!(matches!(mixed(8, 8), Err(Error::UnsupportedType(_))));

        let unsigned_only = resolve(Datatype::packed_compound(vec![
            ("a".into(), Datatype::native_int(1, false)),
            ("b".into(), Datatype::native_int(2, false)),
        ]))
        .unwrap();
        assert_eq!(unsigned_only.common_kind, ElementKind::UInt16);
    }

    #[test]
    fn complex_by_member_names() {
        let dt = Datatype::packed_compound(vec![
            ("r_val".into(), Datatype::native_float(8)),
            ("i_val".into(), Datatype::native_float(8)),
        ]);
        let r = resolve(dt).unwrap();
        assert_eq!(r.descriptor.kind, ElementKind::Complex128);
        assert!(r.descriptor.is_complex);
        assert_eq!(r.descriptor.arity, 1);
        assert_eq!(r.common_kind, ElementKind::Float64);

        let dt = Datatype::packed_compound(vec![
            (" entry:Real ".into(), Datatype::native_float(4)),
            ("Imag".into(), Datatype::native_float(4)),
        ]);
        assert_eq!(resolve(dt).unwrap().descriptor.kind, ElementKind::Complex64);
    }

    #[test]
    fn ambiguous_names_stay_arrays() {
        let dt = Datatype::packed_compound(vec![
            ("x".into(), Datatype::native_float(8)),
            ("y".into(), Datatype::native_float(8)),
        ]);
        let r = resolve(dt).unwrap();
        assert_eq!(r.descriptor.kind, ElementKind::Float64);
        assert!(!r.descriptor.is_complex);
        assert_eq!(r.descriptor.arity, 2);
    }

    #[test]
    fn to_native_round_trips_through_resolver() {
        let lib = Library::new();
        let resolver = TypeResolver::default();
        for kind in ElementKind::ALL {
            let desc = match kind {
                ElementKind::String => TypeDescriptor::fixed_string(8),
                ElementKind::Bool => continue,
                k => TypeDescriptor::of(k),
            };
            let id = lib.type_register(desc.to_native()).unwrap();
            assert_eq!(resolver.resolve(&lib, id).unwrap(), desc, "{kind}");
            lib.type_close(id).unwrap();
        }
        let id = lib
            .type_register(TypeDescriptor::of(ElementKind::Int16).with_arity(3).to_native())
            .unwrap();
        assert_eq!(resolver.resolve(&lib, id).unwrap().arity, 3);
        lib.type_close(id).unwrap();
    }
}
