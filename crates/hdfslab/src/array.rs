//! Typed n-dimensional buffers.
//!
//! A [`TypedArray`] is a row-major buffer of one [`ElementKind`] with a shape
//! and an arity (elements per record). Numeric payloads cast to and from
//! native little-endian bytes with `bytemuck`.

use bytemuck::Zeroable;

use crate::error::{Error, Result};
use crate::shape::checked_len;
use crate::types::ElementKind;

/// Element storage, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Complex64(Vec<[f32; 2]>),
    Complex128(Vec<[f64; 2]>),
    String(Vec<String>),
}

/// Applies `$body` to the vector inside every numeric variant.
macro_rules! with_numeric {
    ($data:expr, $v:ident => $body:expr, $other:pat => $fallback:expr) => {
        match $data {
            ArrayData::Int8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::UInt16($v) => $body,
            ArrayData::UInt32($v) => $body,
            ArrayData::UInt64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
            ArrayData::Complex64($v) => $body,
            ArrayData::Complex128($v) => $body,
            $other => $fallback,
        }
    };
}

impl ArrayData {
    /// Element kind of the payload.
    pub fn kind(&self) -> ElementKind {
        match self {
            ArrayData::Bool(_) => ElementKind::Bool,
            ArrayData::Int8(_) => ElementKind::Int8,
            ArrayData::Int16(_) => ElementKind::Int16,
            ArrayData::Int32(_) => ElementKind::Int32,
            ArrayData::Int64(_) => ElementKind::Int64,
            ArrayData::UInt8(_) => ElementKind::UInt8,
            ArrayData::UInt16(_) => ElementKind::UInt16,
            ArrayData::UInt32(_) => ElementKind::UInt32,
            ArrayData::UInt64(_) => ElementKind::UInt64,
            ArrayData::Float32(_) => ElementKind::Float32,
            ArrayData::Float64(_) => ElementKind::Float64,
            ArrayData::Complex64(_) => ElementKind::Complex64,
            ArrayData::Complex128(_) => ElementKind::Complex128,
            ArrayData::String(_) => ElementKind::String,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::String(v) => v.len(),
            data => with_numeric!(data, v => v.len(), _ => 0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scalar used while converting between kinds.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i128),
    Float(f64),
    Complex(f64, f64),
}

impl Num {
    fn as_i128(self) -> i128 {
        match self {
            Num::Int(i) => i,
            Num::Float(f) | Num::Complex(f, _) => f as i128,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) | Num::Complex(f, _) => f,
        }
    }

    fn as_pair(self) -> (f64, f64) {
        match self {
            Num::Complex(re, im) => (re, im),
            other => (other.as_f64(), 0.0),
        }
    }
}

fn to_nums(data: &ArrayData) -> Vec<Num> {
    match data {
        ArrayData::Bool(v) => v.iter().map(|&b| Num::Int(b as i128)).collect(),
        ArrayData::Int8(v) => v.iter().map(|&x| Num::Int(x as i128)).collect(),
        ArrayData::Int16(v) => v.iter().map(|&x| Num::Int(x as i128)).collect(),
        ArrayData::Int32(v) => v.iter().map(|&x| Num::Int(x as i128)).collect(),
        ArrayData::Int64(v) => v.iter().map(|&x| Num::Int(x as i128)).collect(),
        ArrayData::UInt8(v) => v.iter().map(|&x| Num::Int(x as i128)).collect(),
        ArrayData::UInt16(v) => v.iter().map(|&x| Num::Int(x as i128)).collect(),
        ArrayData::UInt32(v) => v.iter().map(|&x| Num::Int(x as i128)).collect(),
        ArrayData::UInt64(v) => v.iter().map(|&x| Num::Int(x as i128)).collect(),
        ArrayData::Float32(v) => v.iter().map(|&x| Num::Float(x as f64)).collect(),
        ArrayData::Float64(v) => v.iter().map(|&x| Num::Float(x)).collect(),
        ArrayData::Complex64(v) => v
            .iter()
            .map(|&[re, im]| Num::Complex(re as f64, im as f64))
            .collect(),
        ArrayData::Complex128(v) => v.iter().map(|&[re, im]| Num::Complex(re, im)).collect(),
        ArrayData::String(_) => Vec::new(),
    }
}

fn from_nums(nums: &[Num], kind: ElementKind) -> ArrayData {
    macro_rules! ints {
        ($variant:ident, $t:ty) => {
            ArrayData::$variant(nums.iter().map(|n| n.as_i128() as $t).collect())
        };
    }
    match kind {
        ElementKind::Bool => ArrayData::Bool(nums.iter().map(|n| n.as_f64() != 0.0).collect()),
        ElementKind::Int8 => ints!(Int8, i8),
        ElementKind::Int16 => ints!(Int16, i16),
        ElementKind::Int32 => ints!(Int32, i32),
        ElementKind::Int64 => ints!(Int64, i64),
        ElementKind::UInt8 => ints!(UInt8, u8),
        ElementKind::UInt16 => ints!(UInt16, u16),
        ElementKind::UInt32 => ints!(UInt32, u32),
        ElementKind::UInt64 => ints!(UInt64, u64),
        ElementKind::Float32 => {
            ArrayData::Float32(nums.iter().map(|n| n.as_f64() as f32).collect())
        }
        ElementKind::Float64 => ArrayData::Float64(nums.iter().map(|n| n.as_f64()).collect()),
        ElementKind::Complex64 => ArrayData::Complex64(
            nums.iter()
                .map(|n| {
                    let (re, im) = n.as_pair();
                    [re as f32, im as f32]
                })
                .collect(),
        ),
        ElementKind::Complex128 => ArrayData::Complex128(
            nums.iter()
                .map(|n| {
                    let (re, im) = n.as_pair();
                    [re, im]
                })
                .collect(),
        ),
        ElementKind::String => ArrayData::String(Vec::new()),
    }
}

fn cast_from_bytes<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    let mut out = vec![T::zeroed(); bytes.len() / std::mem::size_of::<T>()];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    out
}

/// Rust element types that map onto one [`ElementKind`].
pub trait Element: Copy + Sized {
    const KIND: ElementKind;
    fn wrap(values: Vec<Self>) -> ArrayData;
    fn slice(data: &ArrayData) -> Option<&[Self]>;
}

macro_rules! element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const KIND: ElementKind = ElementKind::$variant;

            fn wrap(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn slice(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

element!(bool, Bool);
element!(i8, Int8);
element!(i16, Int16);
element!(i32, Int32);
element!(i64, Int64);
element!(u8, UInt8);
element!(u16, UInt16);
element!(u32, UInt32);
element!(u64, UInt64);
element!(f32, Float32);
element!(f64, Float64);
element!([f32; 2], Complex64);
element!([f64; 2], Complex128);

/// A typed row-major n-dimensional buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    shape: Vec<u64>,
    arity: usize,
    data: ArrayData,
}

/// Elements needed for `shape` with `per_position` values each.
fn element_count(shape: &[u64], per_position: usize) -> Result<usize> {
    checked_len(shape)?
        .checked_mul(per_position)
        .ok_or_else(|| Error::ShapeViolation(format!("shape {shape:?} x {per_position} overflows")))
}

impl TypedArray {
    /// Wrap `data` with `shape`; the element count must match.
    pub fn new(shape: Vec<u64>, data: ArrayData) -> Result<Self> {
        Self::with_arity(shape, 1, data)
    }

    /// Wrap `data` holding `arity` elements per position of `shape`.
    pub fn with_arity(shape: Vec<u64>, arity: usize, data: ArrayData) -> Result<Self> {
        let arity = arity.max(1);
        let expected = element_count(&shape, arity)?;
        if data.len() != expected {
            return Err(Error::ShapeViolation(format!(
                "shape {shape:?} x {arity} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(TypedArray { shape, arity, data })
    }

    /// Rank-0 value.
    pub fn scalar<T: Element>(value: T) -> Self {
        TypedArray {
            shape: Vec::new(),
            arity: 1,
            data: T::wrap(vec![value]),
        }
    }

    /// Build from a vector of Rust values.
    pub fn from_vec<T: Element>(shape: Vec<u64>, values: Vec<T>) -> Result<Self> {
        Self::new(shape, T::wrap(values))
    }

    /// Build from strings.
    pub fn from_strings<S: Into<String>>(
        shape: Vec<u64>,
        values: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        Self::new(
            shape,
            ArrayData::String(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    /// Number of positions in the shape (1 for scalars).
    pub fn len(&self) -> usize {
        self.data.len() / self.arity
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values as a slice of `T`, if the kind matches.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }

    /// Strings, if the kind is `String`.
    pub fn as_strings(&self) -> Option<&[String]> {
        match &self.data {
            ArrayData::String(v) => Some(v),
            _ => None,
        }
    }

    /// Same data under a new shape with the same element count.
    pub fn reshape(self, shape: Vec<u64>) -> Result<Self> {
        Self::with_arity(shape, self.arity, self.data)
    }

    /// Element-wise conversion between numeric and boolean kinds. Strings
    /// convert only to strings; complex values do not convert to real kinds.
    pub fn convert(&self, kind: ElementKind) -> Result<TypedArray> {
        let from = self.kind();
        if from == kind {
            return Ok(self.clone());
        }
        if from == ElementKind::String || kind == ElementKind::String {
            return Err(Error::InvalidArgument(format!(
                "cannot convert {from} to {kind}"
            )));
        }
        if from.is_complex() && !kind.is_complex() {
            return Err(Error::InvalidArgument(format!(
                "cannot convert complex {from} to real {kind}"
            )));
        }
        Ok(TypedArray {
            shape: self.shape.clone(),
            arity: self.arity,
            data: from_nums(&to_nums(&self.data), kind),
        })
    }

    /// Widen unsigned 8/16/32-bit values to the next signed kind.
    pub fn widen_unsigned(self) -> Result<TypedArray> {
        let kind = self.kind();
        let wider = kind.signed_extension();
        if wider == kind {
            return Ok(self);
        }
        self.convert(wider)
    }

    /// Complex values split into (re, im) component pairs of arity 2.
    pub(crate) fn into_components(self) -> TypedArray {
        let arity = self.arity * 2;
        let data = match self.data {
            ArrayData::Complex64(v) => ArrayData::Float32(v.into_iter().flatten().collect()),
            ArrayData::Complex128(v) => ArrayData::Float64(v.into_iter().flatten().collect()),
            other => {
                return TypedArray {
                    shape: self.shape,
                    arity: self.arity,
                    data: other,
                }
            }
        };
        TypedArray {
            shape: self.shape,
            arity,
            data,
        }
    }

    /// Inverse of [`TypedArray::into_components`].
    pub(crate) fn from_components(self) -> Result<TypedArray> {
        if self.arity % 2 != 0 {
            return Err(Error::ShapeViolation(format!(
                "complex values need an even arity, got {}",
                self.arity
            )));
        }
        let data = match self.data {
            ArrayData::Float32(v) => {
                ArrayData::Complex64(v.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
            }
            ArrayData::Float64(v) => {
                ArrayData::Complex128(v.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "complex components must be floats, got {}",
                    other.kind()
                )))
            }
        };
        Ok(TypedArray {
            shape: self.shape,
            arity: self.arity / 2,
            data,
        })
    }

    /// Native bytes of a numeric or boolean payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match &self.data {
            ArrayData::Bool(v) => Ok(v.iter().map(|&b| b as u8).collect()),
            ArrayData::String(_) => Err(Error::InvalidArgument(
                "strings have no fixed byte encoding".into(),
            )),
            data => Ok(with_numeric!(
                data,
                v => bytemuck::cast_slice::<_, u8>(v.as_slice()).to_vec(),
                _ => Vec::new()
            )),
        }
    }

    /// Decode native bytes of `kind`.
    pub fn from_bytes(kind: ElementKind, shape: Vec<u64>, arity: usize, bytes: &[u8]) -> Result<Self> {
        let size = kind.item_size().ok_or_else(|| {
            Error::InvalidArgument("strings have no fixed byte encoding".into())
        })?;
        let expected = element_count(&shape, arity.max(1))?
            .checked_mul(size)
            .ok_or_else(|| Error::ShapeViolation(format!("{kind} {shape:?} overflows a buffer")))?;
        if bytes.len() != expected {
            return Err(Error::ShapeViolation(format!(
                "expected {expected} bytes for {kind} {shape:?}, got {}",
                bytes.len()
            )));
        }
        let data = match kind {
            ElementKind::Bool => ArrayData::Bool(bytes.iter().map(|&b| b != 0).collect()),
            ElementKind::Int8 => ArrayData::Int8(cast_from_bytes(bytes)),
            ElementKind::Int16 => ArrayData::Int16(cast_from_bytes(bytes)),
            ElementKind::Int32 => ArrayData::Int32(cast_from_bytes(bytes)),
            ElementKind::Int64 => ArrayData::Int64(cast_from_bytes(bytes)),
            ElementKind::UInt8 => ArrayData::UInt8(bytes.to_vec()),
            ElementKind::UInt16 => ArrayData::UInt16(cast_from_bytes(bytes)),
            ElementKind::UInt32 => ArrayData::UInt32(cast_from_bytes(bytes)),
            ElementKind::UInt64 => ArrayData::UInt64(cast_from_bytes(bytes)),
            ElementKind::Float32 => ArrayData::Float32(cast_from_bytes(bytes)),
            ElementKind::Float64 => ArrayData::Float64(cast_from_bytes(bytes)),
            ElementKind::Complex64 => ArrayData::Complex64(cast_from_bytes(bytes)),
            ElementKind::Complex128 => ArrayData::Complex128(cast_from_bytes(bytes)),
            ElementKind::String => {
                return Err(Error::InvalidArgument(
                    "strings have no fixed byte encoding".into(),
                ))
            }
        };
        Self::with_arity(shape, arity, data)
    }
}
