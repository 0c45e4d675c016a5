//! Conversion between typed arrays and native record bytes.

use crate::array::{ArrayData, TypedArray};
use crate::error::{Error, Result};
use crate::shape::checked_len;
use crate::types::{ElementKind, ResolvedType};

/// Bytes ready for a native write.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Encoded {
    Fixed(Vec<u8>),
    VarLen(Vec<Vec<u8>>),
}

fn is_packed(resolved: &ResolvedType, component: usize) -> bool {
    resolved
        .members
        .iter()
        .enumerate()
        .all(|(i, m)| m.kind == resolved.common_kind && m.offset == i * component)
        && resolved.record_size == resolved.members.len() * component
}

fn component_size(resolved: &ResolvedType) -> Result<usize> {
    resolved.common_kind.item_size().ok_or_else(|| {
        Error::UnsupportedType(format!("{} records", resolved.common_kind))
    })
}

/// Decode fixed-size records read from a dataset or attribute.
pub(crate) fn decode_fixed(resolved: &ResolvedType, shape: Vec<u64>, bytes: &[u8]) -> Result<TypedArray> {
    let n = checked_len(&shape)?;
    let record = resolved.record_size;
    let expected = n
        .checked_mul(record)
        .ok_or_else(|| Error::ShapeViolation(format!("{n} records of {record} bytes overflow")))?;
    if bytes.len() != expected {
        return Err(Error::ShapeViolation(format!(
            "expected {expected} bytes for {n} records, got {}",
            bytes.len()
        )));
    }
    if resolved.descriptor.kind == ElementKind::String {
        let strings = bytes
            .chunks(record.max(1))
            .take(n)
            .map(|slot| {
                let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
                String::from_utf8_lossy(&slot[..end]).into_owned()
            })
            .collect::<Vec<_>>();
        return TypedArray::new(shape, ArrayData::String(strings));
    }

    let common = resolved.common_kind;
    let csize = component_size(resolved)?;
    let members = resolved.members.len();
    let packed = if is_packed(resolved, csize) {
        bytes.to_vec()
    } else {
        let mut columns = Vec::with_capacity(members);
        for m in &resolved.members {
            let raw: Vec<u8> = (0..n)
                .flat_map(|r| bytes[r * record + m.offset..r * record + m.offset + m.size].iter().copied())
                .collect();
            let column = TypedArray::from_bytes(m.kind, vec![n as u64], 1, &raw)?.convert(common)?;
            columns.push(column.to_bytes()?);
        }
        let mut packed = Vec::with_capacity(n * members * csize);
        for r in 0..n {
            for column in &columns {
                packed.extend_from_slice(&column[r * csize..(r + 1) * csize]);
            }
        }
        packed
    };
    let values = TypedArray::from_bytes(common, shape, members, &packed)?;
    if resolved.descriptor.is_complex {
        values.from_components()
    } else {
        Ok(values)
    }
}

/// Decode variable-length string cells.
pub(crate) fn decode_vlen(shape: Vec<u64>, cells: Vec<Vec<u8>>) -> Result<TypedArray> {
    let strings = cells
        .into_iter()
        .map(|c| String::from_utf8_lossy(&c).into_owned())
        .collect::<Vec<_>>();
    TypedArray::new(shape, ArrayData::String(strings))
}

/// Longest prefix of `s` that fits in `max` bytes on a char boundary.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Encode `value` for the native layout described by `resolved`.
pub(crate) fn encode(resolved: &ResolvedType, value: &TypedArray) -> Result<Encoded> {
    let desc = &resolved.descriptor;
    if desc.kind == ElementKind::String {
        let strings = value.as_strings().ok_or_else(|| {
            Error::InvalidArgument(format!("cannot write {} to a string target", value.kind()))
        })?;
        if desc.is_variable_length {
            return Ok(Encoded::VarLen(
                strings.iter().map(|s| s.as_bytes().to_vec()).collect(),
            ));
        }
        let width = resolved.record_size;
        let mut out = vec![0u8; strings.len() * width];
        for (i, s) in strings.iter().enumerate() {
            let kept = truncate_utf8(s, width.saturating_sub(1));
            if kept.len() < s.len() {
                tracing::warn!(
                    width,
                    length = s.len(),
                    "string longer than fixed width; truncating"
                );
            }
            out[i * width..i * width + kept.len()].copy_from_slice(kept.as_bytes());
        }
        return Ok(Encoded::Fixed(out));
    }

    if value.arity() != desc.arity {
        return Err(Error::ShapeViolation(format!(
            "value has {} elements per record, target has {}",
            value.arity(),
            desc.arity
        )));
    }
    let converted = value.convert(desc.kind)?;
    let parts = if desc.is_complex {
        converted.into_components()
    } else {
        converted
    };
    let csize = component_size(resolved)?;
    if is_packed(resolved, csize) {
        return Ok(Encoded::Fixed(parts.to_bytes()?));
    }

    let n = parts.len();
    let members = resolved.members.len();
    let packed = parts.to_bytes()?;
    let record = resolved.record_size;
    let mut out = vec![0u8; n * record];
    for (i, m) in resolved.members.iter().enumerate() {
        let raw: Vec<u8> = (0..n)
            .flat_map(|r| {
                let at = (r * members + i) * csize;
                packed[at..at + csize].iter().copied()
            })
            .collect();
        let column = TypedArray::from_bytes(resolved.common_kind, vec![n as u64], 1, &raw)?
            .convert(m.kind)?
            .to_bytes()?;
        for r in 0..n {
            out[r * record + m.offset..r * record + m.offset + m.size]
                .copy_from_slice(&column[r * m.size..(r + 1) * m.size]);
        }
    }
    Ok(Encoded::Fixed(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemberLayout, TypeDescriptor};
    use hdfslab_native::TypeClass;

    fn primitive(kind: ElementKind) -> ResolvedType {
        let size = kind.item_size().unwrap();
        ResolvedType {
            descriptor: TypeDescriptor::of(kind),
            members: vec![MemberLayout {
                name: String::new(),
                class: TypeClass::Integer,
                kind,
                offset: 0,
                size,
            }],
            record_size: size,
            common_kind: kind,
        }
    }

    #[test]
    fn packed_values() {
        let r = primitive(ElementKind::Int32);
        let v = TypedArray::from_vec(vec![2], vec![1i32, -1]).unwrap();
        let Encoded::Fixed(bytes) = encode(&r, &v).unwrap() else {
            panic!("expected fixed bytes");
        };
        assert_eq!(decode_fixed(&r, vec![2], &bytes).unwrap(), v);
    }

    #[test]
    fn mixed_width_members_use_widest_kind() {
        let r = ResolvedType {
            descriptor: TypeDescriptor::of(ElementKind::Int32).with_arity(2),
            members: vec![
                MemberLayout {
                    name: "a".into(),
                    class: TypeClass::Integer,
                    kind: ElementKind::Int16,
                    offset: 0,
                    size: 2,
                },
                MemberLayout {
                    name: "b".into(),
                    class: TypeClass::Integer,
                    kind: ElementKind::Int32,
                    offset: 2,
                    size: 4,
                },
            ],
            record_size: 6,
            common_kind: ElementKind::Int32,
        };
        let v = TypedArray::with_arity(vec![2], 2, ArrayData::Int32(vec![1, 2, -3, 4])).unwrap();
        let Encoded::Fixed(bytes) = encode(&r, &v).unwrap() else {
            panic!("expected fixed bytes");
        };
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..2], &1i16.to_le_bytes());
        assert_eq!(decode_fixed(&r, vec![2], &bytes).unwrap(), v);
    }

    #[test]
    fn fixed_strings_truncate_and_trim() {
        let mut r = primitive(ElementKind::UInt8);
        r.descriptor = TypeDescriptor::fixed_string(4);
        r.record_size = 4;
        let v = TypedArray::from_strings(vec![2], ["ab", "toolong"]).unwrap();
        let Encoded::Fixed(bytes) = encode(&r, &v).unwrap() else {
            panic!("expected fixed bytes");
        };
        assert_eq!(bytes, b"ab\0\0too\0".to_vec());
        let back = decode_fixed(&r, vec![2], &bytes).unwrap();
        assert_eq!(back.as_strings().unwrap(), &["ab".to_string(), "too".to_string()]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("abc", 8), "abc");
    }

    #[test]
    fn strings_rejected_for_numeric_targets() {
        let r = primitive(ElementKind::Float64);
        let v = TypedArray::from_strings(vec![1], ["1.0"]).unwrap();
        assert!(matches!(encode(&r, &v), Err(Error::InvalidArgument(_))));
    }
}
