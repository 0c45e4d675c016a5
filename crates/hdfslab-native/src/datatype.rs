//! Native datatype descriptors.
//!
//! A [`Datatype`] covers the native type classes (integer, float, string,
//! bitfield, opaque, compound, reference, enum, variable-length, array).
//! Descriptors are persisted in the datatype message layout: one byte of
//! class and version, a 24-bit class flag field, a 32-bit element size,
//! then class-specific properties. All numeric data is little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::NativeError;

/// Native type class, as reported by [`crate::Library::type_get_class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Integer,
    Float,
    String,
    BitField,
    Opaque,
    Compound,
    Reference,
    Enum,
    VarLen,
    Array,
}

impl TypeClass {
    /// Class code used in the persisted datatype message.
    pub fn code(self) -> u8 {
        match self {
            TypeClass::Integer => 0,
            TypeClass::Float => 1,
            TypeClass::String => 3,
            TypeClass::BitField => 4,
            TypeClass::Opaque => 5,
            TypeClass::Compound => 6,
            TypeClass::Reference => 7,
            TypeClass::Enum => 8,
            TypeClass::VarLen => 9,
            TypeClass::Array => 10,
        }
    }
}

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

/// Reference type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    Object,
    DatasetRegion,
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    /// Member name.
    pub name: String,
    /// Byte offset within the compound.
    pub byte_offset: u32,
    /// Member datatype.
    pub datatype: Datatype,
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    /// Member name.
    pub name: String,
    /// Raw value bytes (length = base type size).
    pub value: Vec<u8>,
}

/// Native datatype descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    /// Fixed-point (integer) type.
    FixedPoint { size: u32, signed: bool },
    /// IEEE floating-point type.
    FloatingPoint { size: u32 },
    /// Fixed-length string.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Bit field.
    BitField { size: u32 },
    /// Opaque bytes with a tag.
    Opaque { size: u32, tag: Vec<u8> },
    /// Compound record.
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Object or region reference.
    Reference { size: u32, ref_type: ReferenceType },
    /// Enumeration over an integer base type.
    Enumeration {
        base_type: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Variable-length sequence or string.
    VariableLength {
        is_string: bool,
        charset: CharacterSet,
        base_type: Box<Datatype>,
    },
    /// Fixed-size array of a base type.
    Array {
        base_type: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

/// Storage size of one variable-length element (length + heap address).
pub const VLEN_ELEMENT_SIZE: u32 = 16;

fn ensure_len(data: &[u8], offset: usize, needed: usize) -> Result<(), NativeError> {
    if offset + needed > data.len() {
        Err(NativeError::UnexpectedEof {
            expected: offset + needed,
            available: data.len(),
        })
    } else {
        Ok(())
    }
}

fn parse_string_padding(val: u8) -> Result<StringPadding, NativeError> {
    match val {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        _ => Err(NativeError::InvalidStringPadding(val)),
    }
}

fn padding_code(p: StringPadding) -> u8 {
    match p {
        StringPadding::NullTerminate => 0,
        StringPadding::NullPad => 1,
        StringPadding::SpacePad => 2,
    }
}

fn parse_charset(val: u8) -> Result<CharacterSet, NativeError> {
    match val {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        _ => Err(NativeError::InvalidCharacterSet(val)),
    }
}

fn charset_code(c: CharacterSet) -> u8 {
    match c {
        CharacterSet::Ascii => 0,
        CharacterSet::Utf8 => 1,
    }
}

/// Read a null-terminated string from `data` starting at `offset`.
/// Returns (string, bytes consumed including the terminator).
fn read_null_terminated_string(data: &[u8], offset: usize) -> Result<(String, usize), NativeError> {
    let remaining = data.get(offset..).unwrap_or(&[]);
    let null_pos = remaining
        .iter()
        .position(|&b| b == 0)
        .ok_or(NativeError::UnexpectedEof {
            expected: offset + 1,
            available: data.len(),
        })?;
    let name = String::from_utf8_lossy(&remaining[..null_pos]).into_owned();
    Ok((name, null_pos + 1))
}

/// Length of a name field padded to a multiple of 8 bytes.
fn padded8(len: usize) -> usize {
    (len + 7) & !7
}

/// Numeric data is accepted in little-endian order only.
fn check_little_endian(class: u8, order_bits: u8) -> Result<(), NativeError> {
    if order_bits != 0 {
        return Err(NativeError::Unsupported(format!(
            "non little-endian byte order for datatype class {class}"
        )));
    }
    Ok(())
}

/// Bytes needed to encode a member offset inside a compound of `size` bytes.
fn offset_bytes_for_size(compound_size: u32) -> usize {
    if compound_size <= 0xFF {
        1
    } else if compound_size <= 0xFFFF {
        2
    } else {
        4
    }
}

fn read_uint(data: &[u8], offset: usize, nbytes: usize) -> Result<u32, NativeError> {
    ensure_len(data, offset, nbytes)?;
    let slice = &data[offset..offset + nbytes];
    Ok(match nbytes {
        1 => slice[0] as u32,
        2 => LittleEndian::read_u16(slice) as u32,
        _ => LittleEndian::read_u32(slice),
    })
}

/// IEEE 754 field layout: (exponent location, exponent size, mantissa size, bias).
fn ieee_fields(size: u32) -> (u8, u8, u8, u32) {
    match size {
        2 => (10, 5, 10, 15),
        4 => (23, 8, 23, 127),
        _ => (52, 11, 52, 1023),
    }
}

impl Datatype {
    /// Little-endian native integer.
    pub fn native_int(size: u32, signed: bool) -> Self {
        Datatype::FixedPoint { size, signed }
    }

    /// Little-endian IEEE float.
    pub fn native_float(size: u32) -> Self {
        Datatype::FloatingPoint { size }
    }

    /// Null-terminated fixed-width UTF-8 string.
    pub fn fixed_string(size: u32) -> Self {
        Datatype::String {
            size,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Utf8,
        }
    }

    /// Variable-length UTF-8 string.
    pub fn var_string() -> Self {
        Datatype::VariableLength {
            is_string: true,
            charset: CharacterSet::Utf8,
            base_type: Box::new(Datatype::native_int(1, false)),
        }
    }

    /// Compound with members packed in order.
    pub fn packed_compound(members: Vec<(String, Datatype)>) -> Self {
        let mut offset = 0u32;
        let members: Vec<CompoundMember> = members
            .into_iter()
            .map(|(name, datatype)| {
                let m = CompoundMember {
                    name,
                    byte_offset: offset,
                    datatype,
                };
                offset += m.datatype.type_size();
                m
            })
            .collect();
        Datatype::Compound {
            size: offset,
            members,
        }
    }

    /// The class of this datatype.
    pub fn class(&self) -> TypeClass {
        match self {
            Datatype::FixedPoint { .. } => TypeClass::Integer,
            Datatype::FloatingPoint { .. } => TypeClass::Float,
            Datatype::String { .. } => TypeClass::String,
            Datatype::BitField { .. } => TypeClass::BitField,
            Datatype::Opaque { .. } => TypeClass::Opaque,
            Datatype::Compound { .. } => TypeClass::Compound,
            Datatype::Reference { .. } => TypeClass::Reference,
            Datatype::Enumeration { .. } => TypeClass::Enum,
            Datatype::VariableLength { .. } => TypeClass::VarLen,
            Datatype::Array { .. } => TypeClass::Array,
        }
    }

    /// Return the size in bytes of one element of this type.
    pub fn type_size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. } => *size,
            Datatype::FloatingPoint { size } => *size,
            Datatype::String { size, .. } => *size,
            Datatype::BitField { size } => *size,
            Datatype::Opaque { size, .. } => *size,
            Datatype::Compound { size, .. } => *size,
            Datatype::Reference { size, .. } => *size,
            Datatype::Enumeration { base_type, .. } => base_type.type_size(),
            Datatype::VariableLength { .. } => VLEN_ELEMENT_SIZE,
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                let elem_count: u32 = dimensions.iter().product();
                base_type.type_size() * elem_count
            }
        }
    }

    /// True for variable-length element storage (strings or sequences).
    pub fn is_variable_length(&self) -> bool {
        matches!(self, Datatype::VariableLength { .. })
    }

    /// Bytes per sequence element of a variable-length type: 1 for strings,
    /// the base type size for sequences.
    pub fn vlen_base_size(&self) -> Option<usize> {
        match self {
            Datatype::VariableLength {
                is_string: true, ..
            } => Some(1),
            Datatype::VariableLength { base_type, .. } => Some(base_type.type_size() as usize),
            _ => None,
        }
    }

    /// Parse a datatype message from raw bytes.
    ///
    /// Returns `(Datatype, bytes_consumed)` for recursive parsing.
    pub fn parse(data: &[u8]) -> Result<(Datatype, usize), NativeError> {
        ensure_len(data, 0, 8)?;

        let class_id = data[0] & 0x0F;
        let version = (data[0] >> 4) & 0x0F;
        let bf0 = data[1];
        let bf1 = data[2];
        let size = LittleEndian::read_u32(&data[4..8]);
        let mut pos = 8;

        match class_id {
            0 => {
                check_little_endian(class_id, bf0 & 0x01)?;
                ensure_len(data, pos, 4)?;
                let signed = (bf0 >> 3) & 0x01 == 1;
                pos += 4;
                Ok((Datatype::FixedPoint { size, signed }, pos))
            }
            1 => {
                check_little_endian(class_id, bf0 & 0x41)?;
                ensure_len(data, pos, 12)?;
                pos += 12;
                Ok((Datatype::FloatingPoint { size }, pos))
            }
            3 => {
                let padding = parse_string_padding(bf0 & 0x0F)?;
                let charset = parse_charset((bf0 >> 4) & 0x0F)?;
                Ok((
                    Datatype::String {
                        size,
                        padding,
                        charset,
                    },
                    pos,
                ))
            }
            4 => {
                check_little_endian(class_id, bf0 & 0x01)?;
                ensure_len(data, pos, 4)?;
                pos += 4;
                Ok((Datatype::BitField { size }, pos))
            }
            5 => {
                let tag_len = bf0 as usize;
                ensure_len(data, pos, tag_len)?;
                let tag = data[pos..pos + tag_len].to_vec();
                // Tags are padded to a multiple of 8 bytes
                let padded = (tag_len + 7) & !7;
                Ok((Datatype::Opaque { size, tag }, pos + padded))
            }
            6 => {
                if !(1..=3).contains(&version) {
                    return Err(NativeError::InvalidDatatypeVersion {
                        class: class_id,
                        version,
                    });
                }
                let num_members = (bf0 as u16) | ((bf1 as u16) << 8);
                let mut members = Vec::with_capacity(num_members as usize);
                let ob = offset_bytes_for_size(size);
                for _ in 0..num_members {
                    let (name, name_len) = read_null_terminated_string(data, pos)?;
                    if version == 3 {
                        pos += name_len;
                        let byte_offset = read_uint(data, pos, ob)?;
                        pos += ob;
                        let (datatype, consumed) = Datatype::parse(&data[pos..])?;
                        pos += consumed;
                        members.push(CompoundMember {
                            name,
                            byte_offset,
                            datatype,
                        });
                        continue;
                    }
                    // Versions 1 and 2 pad names to 8 bytes and use 4-byte offsets
                    pos += padded8(name_len);
                    let byte_offset = read_uint(data, pos, 4)?;
                    pos += 4;
                    let mut dims = Vec::new();
                    if version == 1 {
                        ensure_len(data, pos, 28)?;
                        let ndims = (data[pos] as usize).min(4);
                        for d in 0..ndims {
                            dims.push(LittleEndian::read_u32(&data[pos + 12 + d * 4..]));
                        }
                        pos += 28;
                    }
                    let (base, consumed) = Datatype::parse(&data[pos..])?;
                    pos += consumed;
                    let datatype = if dims.is_empty() {
                        base
                    } else {
                        Datatype::Array {
                            base_type: Box::new(base),
                            dimensions: dims,
                        }
                    };
                    members.push(CompoundMember {
                        name,
                        byte_offset,
                        datatype,
                    });
                }
                Ok((Datatype::Compound { size, members }, pos))
            }
            7 => {
                let ref_type = match bf0 & 0x0F {
                    0 => ReferenceType::Object,
                    1 => ReferenceType::DatasetRegion,
                    other => return Err(NativeError::InvalidReferenceType(other)),
                };
                Ok((Datatype::Reference { size, ref_type }, pos))
            }
            8 => {
                let num_members = (bf0 as u16) | ((bf1 as u16) << 8);
                let (base_type, consumed) = Datatype::parse(&data[pos..])?;
                pos += consumed;
                let base_size = base_type.type_size() as usize;
                // Names first, then all values
                let mut names = Vec::with_capacity(num_members as usize);
                for _ in 0..num_members {
                    let (name, name_len) = read_null_terminated_string(data, pos)?;
                    pos += if version < 3 { padded8(name_len) } else { name_len };
                    names.push(name);
                }
                let mut members = Vec::with_capacity(names.len());
                for name in names {
                    ensure_len(data, pos, base_size)?;
                    members.push(EnumMember {
                        name,
                        value: data[pos..pos + base_size].to_vec(),
                    });
                    pos += base_size;
                }
                Ok((
                    Datatype::Enumeration {
                        base_type: Box::new(base_type),
                        members,
                    },
                    pos,
                ))
            }
            9 => {
                let is_string = bf0 & 0x0F == 1;
                let charset = parse_charset(bf1 & 0x0F)?;
                let (base_type, consumed) = Datatype::parse(&data[pos..])?;
                pos += consumed;
                Ok((
                    Datatype::VariableLength {
                        is_string,
                        charset,
                        base_type: Box::new(base_type),
                    },
                    pos,
                ))
            }
            10 => {
                if version != 2 && version != 3 {
                    return Err(NativeError::InvalidDatatypeVersion {
                        class: class_id,
                        version,
                    });
                }
                ensure_len(data, pos, 1)?;
                let ndims = data[pos] as usize;
                pos += if version == 2 { 4 } else { 1 };
                ensure_len(data, pos, ndims * 4)?;
                let mut dimensions = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dimensions.push(LittleEndian::read_u32(&data[pos..pos + 4]));
                    pos += 4;
                }
                if version == 2 {
                    // Permutation indices, never used
                    ensure_len(data, pos, ndims * 4)?;
                    pos += ndims * 4;
                }
                let (base_type, consumed) = Datatype::parse(&data[pos..])?;
                pos += consumed;
                Ok((
                    Datatype::Array {
                        base_type: Box::new(base_type),
                        dimensions,
                    },
                    pos,
                ))
            }
            _ => Err(NativeError::InvalidDatatypeClass(class_id)),
        }
    }

    /// Serialize to datatype message bytes.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Datatype::FixedPoint { size, signed } => {
                let bf0 = if *signed { 0x08 } else { 0x00 };
                let mut buf = Self::build_header(TypeClass::Integer, 1, [bf0, 0, 0], *size);
                buf.extend_from_slice(&0u16.to_le_bytes());
                buf.extend_from_slice(&((*size * 8) as u16).to_le_bytes());
                buf
            }
            Datatype::FloatingPoint { size } => {
                let (exp_loc, exp_size, mant_size, bias) = ieee_fields(*size);
                // bit 5: sign location; bf1: sign bit position
                let sign_bit = (*size * 8).saturating_sub(1) as u8;
                let mut buf = Self::build_header(TypeClass::Float, 1, [0x20, sign_bit, 0], *size);
                buf.extend_from_slice(&0u16.to_le_bytes());
                buf.extend_from_slice(&((*size * 8) as u16).to_le_bytes());
                buf.push(exp_loc);
                buf.push(exp_size);
                buf.push(0);
                buf.push(mant_size);
                buf.extend_from_slice(&bias.to_le_bytes());
                buf
            }
            Datatype::String {
                size,
                padding,
                charset,
            } => {
                let bf0 = padding_code(*padding) | (charset_code(*charset) << 4);
                Self::build_header(TypeClass::String, 1, [bf0, 0, 0], *size)
            }
            Datatype::BitField { size } => {
                let mut buf = Self::build_header(TypeClass::BitField, 1, [0, 0, 0], *size);
                buf.extend_from_slice(&0u16.to_le_bytes());
                buf.extend_from_slice(&((*size * 8) as u16).to_le_bytes());
                buf
            }
            Datatype::Opaque { size, tag } => {
                let mut buf =
                    Self::build_header(TypeClass::Opaque, 1, [tag.len() as u8, 0, 0], *size);
                buf.extend_from_slice(tag);
                let padded = (tag.len() + 7) & !7;
                buf.resize(8 + padded, 0);
                buf
            }
            Datatype::Compound { size, members } => {
                let n = members.len() as u16;
                let mut buf = Self::build_header(
                    TypeClass::Compound,
                    3,
                    [(n & 0xFF) as u8, (n >> 8) as u8, 0],
                    *size,
                );
                let ob = offset_bytes_for_size(*size);
                for m in members {
                    buf.extend_from_slice(m.name.as_bytes());
                    buf.push(0);
                    buf.extend_from_slice(&m.byte_offset.to_le_bytes()[..ob]);
                    buf.extend_from_slice(&m.datatype.serialize());
                }
                buf
            }
            Datatype::Reference { size, ref_type } => {
                let bf0 = match ref_type {
                    ReferenceType::Object => 0,
                    ReferenceType::DatasetRegion => 1,
                };
                Self::build_header(TypeClass::Reference, 1, [bf0, 0, 0], *size)
            }
            Datatype::Enumeration { base_type, members } => {
                let n = members.len() as u16;
                let mut buf = Self::build_header(
                    TypeClass::Enum,
                    3,
                    [(n & 0xFF) as u8, (n >> 8) as u8, 0],
                    base_type.type_size(),
                );
                buf.extend_from_slice(&base_type.serialize());
                for m in members {
                    buf.extend_from_slice(m.name.as_bytes());
                    buf.push(0);
                }
                for m in members {
                    buf.extend_from_slice(&m.value);
                }
                buf
            }
            Datatype::VariableLength {
                is_string,
                charset,
                base_type,
            } => {
                let bf0 = if *is_string { 0x01 } else { 0x00 };
                let bf1 = charset_code(*charset);
                let mut buf =
                    Self::build_header(TypeClass::VarLen, 1, [bf0, bf1, 0], VLEN_ELEMENT_SIZE);
                buf.extend_from_slice(&base_type.serialize());
                buf
            }
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                let mut buf =
                    Self::build_header(TypeClass::Array, 3, [0, 0, 0], self.type_size());
                buf.push(dimensions.len() as u8);
                for d in dimensions {
                    buf.extend_from_slice(&d.to_le_bytes());
                }
                buf.extend_from_slice(&base_type.serialize());
                buf
            }
        }
    }

    fn build_header(class: TypeClass, version: u8, bf: [u8; 3], size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 8];
        buf[0] = (class.code() & 0x0F) | ((version & 0x0F) << 4);
        buf[1] = bf[0];
        buf[2] = bf[1];
        buf[3] = bf[2];
        LittleEndian::write_u32(&mut buf[4..8], size);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(dt: &Datatype) -> Datatype {
        let bytes = dt.serialize();
        let (parsed, consumed) = Datatype::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        parsed
    }

    #[test]
    fn fixed_point_sign_flag() {
        let bytes = Datatype::native_int(2, true).serialize();
        assert_eq!(bytes[0] & 0x0F, 0);
        assert_eq!(bytes[1] & 0x08, 0x08);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 2);
        assert_eq!(reparse(&Datatype::native_int(8, false)), Datatype::native_int(8, false));
    }

    #[test]
    fn float_ieee_fields() {
        let bytes = Datatype::native_float(4).serialize();
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes[12], 23); // exponent location
        assert_eq!(bytes[13], 8); // exponent size
        assert_eq!(LittleEndian::read_u32(&bytes[16..20]), 127);
    }

    #[test]
    fn compound_with_complex_members() {
        let dt = Datatype::packed_compound(vec![
            ("r".into(), Datatype::native_float(8)),
            ("i".into(), Datatype::native_float(8)),
        ]);
        assert_eq!(dt.type_size(), 16);
        let parsed = reparse(&dt);
        match &parsed {
            Datatype::Compound { size, members } => {
                assert_eq!(*size, 16);
                assert_eq!(members[1].name, "i");
                assert_eq!(members[1].byte_offset, 8);
            }
            other => panic!("expected compound, got {other:?}"),
        }
    }

    #[test]
    fn enum_keeps_member_values() {
        let dt = Datatype::Enumeration {
            base_type: Box::new(Datatype::native_int(1, false)),
            members: vec![
                EnumMember { name: "OFF".into(), value: vec![0] },
                EnumMember { name: "ON".into(), value: vec![1] },
            ],
        };
        assert_eq!(dt.type_size(), 1);
        assert_eq!(reparse(&dt), dt);
    }

    #[test]
    fn nested_array_of_strings() {
        let dt = Datatype::Array {
            base_type: Box::new(Datatype::fixed_string(5)),
            dimensions: vec![2, 3],
        };
        assert_eq!(dt.type_size(), 30);
        assert_eq!(reparse(&dt), dt);
    }

    #[test]
    fn var_string_and_opaque() {
        let vs = Datatype::var_string();
        assert!(vs.is_variable_length());
        assert_eq!(vs.type_size(), VLEN_ELEMENT_SIZE);
        assert_eq!(reparse(&vs), vs);

        let op = Datatype::Opaque { size: 4, tag: b"raw".to_vec() };
        assert_eq!(op.serialize().len(), 16);
        assert_eq!(reparse(&op), op);
    }

    #[test]
    fn error_invalid_class() {
        let mut bytes = Datatype::native_int(4, true).serialize();
        bytes[0] = (bytes[0] & 0xF0) | 0x0F;
        assert!(matches!(
            Datatype::parse(&bytes),
            Err(NativeError::InvalidDatatypeClass(15))
        ));
    }

    #[test]
    fn error_truncated_data() {
        let bytes = Datatype::native_float(8).serialize();
        assert!(matches!(
            Datatype::parse(&bytes[..10]),
            Err(NativeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn big_endian_integers_unsupported() {
        let mut bytes = Datatype::native_int(4, true).serialize();
        bytes[1] |= 0x01;
        assert!(matches!(Datatype::parse(&bytes), Err(NativeError::Unsupported(_))));
    }

    fn padded_name(buf: &mut Vec<u8>, name: &str) {
        let start = buf.len();
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        while (buf.len() - start) % 8 != 0 {
            buf.push(0);
        }
    }

    #[test]
    fn compound_version1_with_array_member() {
        // {x: i32 at 0, v: f64[2] at 8}, 24 bytes
        let mut bytes = vec![0x16, 2, 0, 0];
        bytes.extend_from_slice(&24u32.to_le_bytes());
        padded_name(&mut bytes, "x");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 28]);
        bytes.extend_from_slice(&Datatype::native_int(4, true).serialize());
        padded_name(&mut bytes, "v");
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&[0u8; 11]);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(&Datatype::native_float(8).serialize());

        let (parsed, used) = Datatype::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        match parsed {
            Datatype::Compound { size, members } => {
                assert_eq!(size, 24);
                assert_eq!(members[0].datatype, Datatype::native_int(4, true));
                assert_eq!(members[1].byte_offset, 8);
                assert_eq!(
                    members[1].datatype,
                    Datatype::Array {
                        base_type: Box::new(Datatype::native_float(8)),
                        dimensions: vec![2],
                    }
                );
            }
            other => panic!("expected compound, got {other:?}"),
        }
    }

    #[test]
    fn enum_version1_pads_names() {
        let mut bytes = vec![0x18, 2, 0, 0];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&Datatype::native_int(1, false).serialize());
        padded_name(&mut bytes, "LOW");
        padded_name(&mut bytes, "HIGH");
        bytes.extend_from_slice(&[0, 1]);
        let (parsed, used) = Datatype::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        match parsed {
            Datatype::Enumeration { members, .. } => {
                assert_eq!(members[1].name, "HIGH");
                assert_eq!(members[1].value, vec![1]);
            }
            other => panic!("expected enum, got {other:?}"),
        }
    }

    #[test]
    fn array_version2_skips_permutation() {
        let mut bytes = vec![0x2A, 0, 0, 0];
        bytes.extend_from_slice(&12u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 0, 0, 0]);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&Datatype::native_int(4, false).serialize());
        let (parsed, used) = Datatype::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(parsed.type_size(), 12);
    }
}
