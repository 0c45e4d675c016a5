//! Codecs for the header messages this library reads and writes.

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::NativeError;
use crate::io::{ByteCursor, UNDEF};
use crate::object_header::kind;

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Where a link points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Object header address in this file.
    Hard(u64),
    /// Path inside this file.
    Soft(String),
    /// Object path inside another file.
    External { file: String, path: String },
}

/// A named link stored in a group header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub target: LinkTarget,
}

const LINK_SOFT: u8 = 1;
const LINK_EXTERNAL: u8 = 64;

impl Link {
    pub fn decode(data: &[u8]) -> Result<Link, NativeError> {
        let mut cur = ByteCursor::new(data);
        let version = cur.u8()?;
        if version != 1 {
            return Err(NativeError::Unsupported(format!("link message version {version}")));
        }
        let flags = cur.u8()?;
        let link_type = if flags & 0x08 != 0 { cur.u8()? } else { 0 };
        if flags & 0x04 != 0 {
            cur.skip(8)?; // creation order
        }
        if flags & 0x10 != 0 {
            cur.skip(1)?; // name character set
        }
        let name_len = cur.uint(1 << (flags & 0x03))? as usize;
        let name = String::from_utf8_lossy(cur.take(name_len)?).into_owned();
        let target = match link_type {
            0 => LinkTarget::Hard(cur.u64()?),
            LINK_SOFT => {
                let len = cur.u16()? as usize;
                LinkTarget::Soft(String::from_utf8_lossy(cur.take(len)?).into_owned())
            }
            LINK_EXTERNAL => {
                let len = cur.u16()? as usize;
                let mut info = ByteCursor::new(cur.take(len)?);
                info.skip(1)?; // version and flags
                let file = info.cstr()?;
                let path = info.cstr()?;
                LinkTarget::External { file, path }
            }
            other => {
                return Err(NativeError::Unsupported(format!("link type {other}")));
            }
        };
        Ok(Link { name, target })
    }

    pub fn encode(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let (width_bits, width) = if name.len() <= 0xFF {
            (0u8, 1usize)
        } else if name.len() <= 0xFFFF {
            (1, 2)
        } else {
            (2, 4)
        };
        let utf8 = !self.name.is_ascii();
        let mut flags = width_bits;
        if !matches!(self.target, LinkTarget::Hard(_)) {
            flags |= 0x08;
        }
        if utf8 {
            flags |= 0x10;
        }
        let mut buf = vec![1, flags];
        match &self.target {
            LinkTarget::Hard(_) => {}
            LinkTarget::Soft(_) => buf.push(LINK_SOFT),
            LinkTarget::External { .. } => buf.push(LINK_EXTERNAL),
        }
        if utf8 {
            buf.push(1);
        }
        buf.extend_from_slice(&(name.len() as u32).to_le_bytes()[..width]);
        buf.extend_from_slice(name);
        match &self.target {
            LinkTarget::Hard(addr) => buf.extend_from_slice(&addr.to_le_bytes()),
            LinkTarget::Soft(path) => {
                buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
                buf.extend_from_slice(path.as_bytes());
            }
            LinkTarget::External { file, path } => {
                let len = 1 + file.len() + 1 + path.len() + 1;
                buf.extend_from_slice(&(len as u16).to_le_bytes());
                buf.push(0);
                buf.extend_from_slice(file.as_bytes());
                buf.push(0);
                buf.extend_from_slice(path.as_bytes());
                buf.push(0);
            }
        }
        buf
    }
}

/// Link info message for a group whose links live in its header.
pub fn link_info_encode() -> Vec<u8> {
    let mut buf = vec![0, 0];
    buf.extend_from_slice(&UNDEF.to_le_bytes());
    buf.extend_from_slice(&UNDEF.to_le_bytes());
    buf
}

/// True when a link info (or attribute info) message points at a fractal
/// heap, i.e. the links or attributes are not in the header.
pub fn uses_dense_storage(msg_kind: u16, data: &[u8]) -> Result<bool, NativeError> {
    let mut cur = ByteCursor::new(data);
    cur.skip(1)?;
    let flags = cur.u8()?;
    if flags & 0x01 != 0 {
        // Maximum creation index: 8 bytes for links, 2 for attributes
        cur.skip(if msg_kind == kind::LINK_INFO { 8 } else { 2 })?;
    }
    Ok(cur.u64()? != UNDEF)
}

/// Group info message with default phase change and size estimates.
pub fn group_info_encode() -> Vec<u8> {
    vec![0, 0]
}

/// Symbol table message of an old-style group: (B-tree, local heap).
pub fn symbol_table_decode(data: &[u8]) -> Result<(u64, u64), NativeError> {
    let mut cur = ByteCursor::new(data);
    Ok((cur.u64()?, cur.u64()?))
}

/// Address of the committed object a shared message points at.
pub fn shared_address(data: &[u8]) -> Result<u64, NativeError> {
    let mut cur = ByteCursor::new(data);
    let version = cur.u8()?;
    let shared_type = cur.u8()?;
    match version {
        1 => {
            cur.skip(6)?;
            cur.u64()
        }
        2 => cur.u64(),
        3 if shared_type == 2 => cur.u64(),
        3 => Err(NativeError::Unsupported(
            "messages in the shared message heap".into(),
        )),
        v => Err(NativeError::Unsupported(format!("shared message version {v}"))),
    }
}

// ---------------------------------------------------------------------------
// Fill value
// ---------------------------------------------------------------------------

/// Fill value bytes from an old (0x04) or new (0x05) fill value message.
pub fn fill_value_decode(msg_kind: u16, data: &[u8]) -> Result<Option<Vec<u8>>, NativeError> {
    let mut cur = ByteCursor::new(data);
    if msg_kind == kind::FILL_VALUE_OLD {
        let size = cur.u32()? as usize;
        return Ok((size > 0).then(|| cur.take(size).map(<[u8]>::to_vec)).transpose()?);
    }
    let version = cur.u8()?;
    let defined = match version {
        1 | 2 => {
            cur.skip(2)?; // allocation and write times
            let defined = cur.u8()? != 0;
            if version == 2 && !defined {
                return Ok(None);
            }
            defined
        }
        3 => {
            let flags = cur.u8()?;
            if flags & 0x20 == 0 {
                return Ok(None);
            }
            true
        }
        v => return Err(NativeError::Unsupported(format!("fill value version {v}"))),
    };
    if cur.remaining() < 4 {
        return Ok(None);
    }
    let size = cur.u32()? as usize;
    if !defined || size == 0 {
        return Ok(None);
    }
    Ok(Some(cur.take(size)?.to_vec()))
}

/// Version 3 fill value message. Space is allocated late for contiguous
/// and incrementally for chunked datasets; the fill is written if set.
pub fn fill_value_encode(fill: Option<&[u8]>, chunked: bool) -> Vec<u8> {
    let alloc_time: u8 = if chunked { 3 } else { 2 };
    let mut flags = alloc_time | (2 << 2);
    if fill.is_some() {
        flags |= 0x20;
    }
    let mut buf = vec![3, flags];
    if let Some(fill) = fill {
        buf.extend_from_slice(&(fill.len() as u32).to_le_bytes());
        buf.extend_from_slice(fill);
    }
    buf
}

// ---------------------------------------------------------------------------
// Data layout
// ---------------------------------------------------------------------------

/// How a chunked dataset finds its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkIndex {
    /// Version 1 B-tree rooted at the address ([`UNDEF`] when empty).
    BTree(u64),
    /// One chunk covering the dataset.
    Single { addr: u64, size: Option<u64>, filter_mask: u32 },
    /// Chunks stored back to back in grid order.
    Implicit(u64),
}

/// Decoded data layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutMessage {
    /// Raw data inside the header.
    Compact(Vec<u8>),
    /// One block at the address ([`UNDEF`] when not yet allocated).
    Contiguous(u64),
    /// Chunk grid dims (without the element-size dimension) and index.
    Chunked { dims: Vec<u64>, index: ChunkIndex },
}

impl LayoutMessage {
    /// Decode versions 1 through 4. `rank` is the dataspace rank.
    pub fn decode(data: &[u8], rank: usize) -> Result<LayoutMessage, NativeError> {
        let mut cur = ByteCursor::new(data);
        let version = cur.u8()?;
        match version {
            1 | 2 => {
                let ndims = cur.u8()? as usize;
                let class = cur.u8()?;
                cur.skip(5)?;
                let addr = if class != 0 { cur.u64()? } else { UNDEF };
                let mut dims = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dims.push(u64::from(cur.u32()?));
                }
                match class {
                    0 if cur.remaining() >= 4 => {
                        let size = cur.u32()? as usize;
                        Ok(LayoutMessage::Compact(cur.take(size)?.to_vec()))
                    }
                    0 => Ok(LayoutMessage::Compact(Vec::new())),
                    1 => Ok(LayoutMessage::Contiguous(addr)),
                    2 => Ok(LayoutMessage::Chunked {
                        dims: chunk_dims(&dims, rank)?,
                        index: ChunkIndex::BTree(addr),
                    }),
                    c => Err(NativeError::Unsupported(format!("layout class {c}"))),
                }
            }
            3 | 4 => {
                let class = cur.u8()?;
                match class {
                    0 => {
                        let size = cur.u16()? as usize;
                        Ok(LayoutMessage::Compact(cur.take(size)?.to_vec()))
                    }
                    1 => Ok(LayoutMessage::Contiguous(cur.u64()?)),
                    2 if version == 3 => {
                        let ndims = cur.u8()? as usize;
                        let addr = cur.u64()?;
                        let mut dims = Vec::with_capacity(ndims);
                        for _ in 0..ndims {
                            dims.push(u64::from(cur.u32()?));
                        }
                        Ok(LayoutMessage::Chunked {
                            dims: chunk_dims(&dims, rank)?,
                            index: ChunkIndex::BTree(addr),
                        })
                    }
                    2 => decode_v4_chunked(&mut cur, rank),
                    c => Err(NativeError::Unsupported(format!("layout class {c}"))),
                }
            }
            v => Err(NativeError::Unsupported(format!("layout version {v}"))),
        }
    }

    /// Encode as a version 3 message. `item_size` is the element size and
    /// `data_size` the byte size of a contiguous block.
    pub fn encode(&self, item_size: u32, data_size: u64) -> Result<Vec<u8>, NativeError> {
        let mut buf = vec![3];
        match self {
            LayoutMessage::Compact(data) => {
                let size = u16::try_from(data.len()).map_err(|_| {
                    NativeError::Unsupported(format!("compact data of {} bytes", data.len()))
                })?;
                buf.push(0);
                buf.extend_from_slice(&size.to_le_bytes());
                buf.extend_from_slice(data);
            }
            LayoutMessage::Contiguous(addr) => {
                buf.push(1);
                buf.extend_from_slice(&addr.to_le_bytes());
                buf.extend_from_slice(&data_size.to_le_bytes());
            }
            LayoutMessage::Chunked { dims, index } => {
                let ChunkIndex::BTree(addr) = index else {
                    return Err(NativeError::Unsupported(
                        "writing chunk indexes other than B-trees".into(),
                    ));
                };
                buf.push(2);
                buf.push(dims.len() as u8 + 1);
                buf.extend_from_slice(&addr.to_le_bytes());
                for &d in dims {
                    let d = u32::try_from(d).map_err(|_| {
                        NativeError::Unsupported(format!("chunk dimension {d}"))
                    })?;
                    buf.extend_from_slice(&d.to_le_bytes());
                }
                buf.extend_from_slice(&item_size.to_le_bytes());
            }
        }
        Ok(buf)
    }
}

fn chunk_dims(dims: &[u64], rank: usize) -> Result<Vec<u64>, NativeError> {
    if dims.len() < rank {
        return Err(NativeError::RankMismatch {
            expected: rank,
            actual: dims.len(),
        });
    }
    Ok(dims[..rank].to_vec())
}

fn decode_v4_chunked(cur: &mut ByteCursor<'_>, rank: usize) -> Result<LayoutMessage, NativeError> {
    let flags = cur.u8()?;
    let ndims = cur.u8()? as usize;
    let width = cur.u8()? as usize;
    let mut dims = Vec::with_capacity(ndims);
    for _ in 0..ndims {
        dims.push(cur.uint(width)?);
    }
    let dims = chunk_dims(&dims, rank)?;
    let index = match cur.u8()? {
        1 => {
            let (size, filter_mask) = if flags & 0x02 != 0 {
                (Some(cur.u64()?), cur.u32()?)
            } else {
                (None, 0)
            };
            ChunkIndex::Single {
                addr: cur.u64()?,
                size,
                filter_mask,
            }
        }
        2 => ChunkIndex::Implicit(cur.u64()?),
        3 => return Err(NativeError::Unsupported("fixed array chunk index".into())),
        4 => return Err(NativeError::Unsupported("extensible array chunk index".into())),
        5 => return Err(NativeError::Unsupported("version 2 B-tree chunk index".into())),
        t => return Err(NativeError::Malformed(format!("chunk index type {t}"))),
    };
    Ok(LayoutMessage::Chunked { dims, index })
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// A decoded attribute message. `raw` holds the element bytes as stored;
/// variable-length elements are heap references.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMessage {
    pub name: String,
    pub datatype: Datatype,
    pub space: Dataspace,
    pub raw: Vec<u8>,
}

fn padded8(n: usize) -> usize {
    (n + 7) & !7
}

impl AttributeMessage {
    /// Decode versions 1 through 3. Null dataspaces surface as
    /// [`NativeError::Unsupported`].
    pub fn decode(data: &[u8]) -> Result<AttributeMessage, NativeError> {
        let mut cur = ByteCursor::new(data);
        let version = cur.u8()?;
        let flags = cur.u8()?;
        let name_size = cur.u16()? as usize;
        let type_size = cur.u16()? as usize;
        let space_size = cur.u16()? as usize;
        if version >= 2 && flags & 0x03 != 0 {
            return Err(NativeError::Unsupported("shared attribute datatype".into()));
        }
        let pad = |n: usize| if version == 1 { padded8(n) } else { n };
        match version {
            1 | 2 => {}
            3 => cur.skip(1)?, // name encoding
            v => return Err(NativeError::Unsupported(format!("attribute version {v}"))),
        }
        let name_bytes = cur.take(pad(name_size))?;
        let name_end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_size.min(name_bytes.len()));
        let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();
        let (datatype, _) = Datatype::parse(cur.take(pad(type_size))?)?;
        let (space, _) = Dataspace::parse(cur.take(pad(space_size))?)?;
        let needed = space.num_elements() as usize * datatype.type_size() as usize;
        let raw = cur.take(needed.min(cur.remaining()))?.to_vec();
        if raw.len() != needed {
            return Err(NativeError::UnexpectedEof {
                expected: needed,
                available: raw.len(),
            });
        }
        Ok(AttributeMessage {
            name,
            datatype,
            space,
            raw,
        })
    }

    /// Encode as a version 3 message.
    pub fn encode(&self) -> Vec<u8> {
        let dt = self.datatype.serialize();
        let ds = self.space.serialize();
        let mut buf = vec![3, 0];
        buf.extend_from_slice(&((self.name.len() + 1) as u16).to_le_bytes());
        buf.extend_from_slice(&(dt.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(ds.len() as u16).to_le_bytes());
        buf.push(u8::from(!self.name.is_ascii()));
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&dt);
        buf.extend_from_slice(&ds);
        buf.extend_from_slice(&self.raw);
        buf
    }
}

/// Encoded size of an attribute message, for checking the header limit
/// before an attribute is created.
pub fn attribute_message_size(name: &str, datatype: &Datatype, space: &Dataspace) -> usize {
    9 + name.len()
        + 1
        + datatype.serialize().len()
        + space.serialize().len()
        + space.num_elements() as usize * datatype.type_size() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_kinds() {
        let links = [
            Link {
                name: "data".into(),
                target: LinkTarget::Hard(4096),
            },
            Link {
                name: "alias".into(),
                target: LinkTarget::Soft("/entry/data".into()),
            },
            Link {
                name: "ext".into(),
                target: LinkTarget::External {
                    file: "raw.h5".into(),
                    path: "/entry".into(),
                },
            },
        ];
        for link in &links {
            assert_eq!(&Link::decode(&link.encode()).unwrap(), link);
        }
        // Hard links carry no link type byte
        assert_eq!(links[0].encode()[1] & 0x08, 0);
    }

    #[test]
    fn utf8_link_name_sets_charset() {
        let link = Link {
            name: "détecteur".into(),
            target: LinkTarget::Hard(8),
        };
        let bytes = link.encode();
        assert_eq!(bytes[1] & 0x10, 0x10);
        assert_eq!(Link::decode(&bytes).unwrap(), link);
    }

    #[test]
    fn link_info_is_compact() {
        let bytes = link_info_encode();
        assert!(!uses_dense_storage(kind::LINK_INFO, &bytes).unwrap());
        let mut dense = bytes.clone();
        dense[2..10].copy_from_slice(&512u64.to_le_bytes());
        assert!(uses_dense_storage(kind::LINK_INFO, &dense).unwrap());
    }

    #[test]
    fn fill_value_versions() {
        let v3 = fill_value_encode(Some(&[1, 2]), true);
        assert_eq!(v3[1], 3 | (2 << 2) | 0x20);
        assert_eq!(fill_value_decode(kind::FILL_VALUE, &v3).unwrap(), Some(vec![1, 2]));
        let unset = fill_value_encode(None, false);
        assert_eq!(fill_value_decode(kind::FILL_VALUE, &unset).unwrap(), None);

        let v2 = [2, 2, 2, 1, 4, 0, 0, 0, 9, 9, 9, 9];
        assert_eq!(fill_value_decode(kind::FILL_VALUE, &v2).unwrap(), Some(vec![9; 4]));
        let old = [2, 0, 0, 0, 7, 7];
        assert_eq!(fill_value_decode(kind::FILL_VALUE_OLD, &old).unwrap(), Some(vec![7, 7]));
    }

    #[test]
    fn layout_v3_roundtrip() {
        let chunked = LayoutMessage::Chunked {
            dims: vec![16, 4],
            index: ChunkIndex::BTree(800),
        };
        let bytes = chunked.encode(8, 0).unwrap();
        assert_eq!(bytes[2], 3); // rank + 1
        assert_eq!(LayoutMessage::decode(&bytes, 2).unwrap(), chunked);

        let contiguous = LayoutMessage::Contiguous(UNDEF);
        let bytes = contiguous.encode(4, 40).unwrap();
        assert_eq!(LayoutMessage::decode(&bytes, 1).unwrap(), contiguous);

        let compact = LayoutMessage::Compact(vec![1, 2, 3]);
        let bytes = compact.encode(1, 3).unwrap();
        assert_eq!(LayoutMessage::decode(&bytes, 1).unwrap(), compact);
    }

    #[test]
    fn layout_v4_indexes() {
        // implicit index, dims [10, 8] with 1-byte encoding
        let mut bytes = vec![4, 2, 0, 3, 1, 10, 8, 4, 2];
        bytes.extend_from_slice(&2048u64.to_le_bytes());
        assert_eq!(
            LayoutMessage::decode(&bytes, 2).unwrap(),
            LayoutMessage::Chunked {
                dims: vec![10, 8],
                index: ChunkIndex::Implicit(2048)
            }
        );
        bytes[8] = 4;
        assert!(matches!(
            LayoutMessage::decode(&bytes, 2),
            Err(NativeError::Unsupported(_))
        ));
    }

    #[test]
    fn chunk_dims_must_fit_32_bits() {
        let layout = LayoutMessage::Chunked {
            dims: vec![1 << 33],
            index: ChunkIndex::BTree(UNDEF),
        };
        assert!(matches!(layout.encode(1, 0), Err(NativeError::Unsupported(_))));
    }

    #[test]
    fn attribute_v3_roundtrip_and_v1_padding() {
        let attr = AttributeMessage {
            name: "units".into(),
            datatype: Datatype::fixed_string(2),
            space: Dataspace::scalar(),
            raw: b"mm".to_vec(),
        };
        let bytes = attr.encode();
        assert_eq!(bytes.len(), attribute_message_size("units", &attr.datatype, &attr.space));
        assert_eq!(AttributeMessage::decode(&bytes).unwrap(), attr);

        let dt = attr.datatype.serialize();
        let ds = attr.space.serialize();
        let mut v1 = vec![1, 0];
        v1.extend_from_slice(&6u16.to_le_bytes());
        v1.extend_from_slice(&(dt.len() as u16).to_le_bytes());
        v1.extend_from_slice(&(ds.len() as u16).to_le_bytes());
        v1.extend_from_slice(b"units\0\0\0");
        v1.extend_from_slice(&dt);
        v1.resize(v1.len() + padded8(dt.len()) - dt.len(), 0);
        v1.extend_from_slice(&ds);
        v1.resize(v1.len() + padded8(ds.len()) - ds.len(), 0);
        v1.extend_from_slice(b"mm");
        assert_eq!(AttributeMessage::decode(&v1).unwrap(), attr);
    }

    #[test]
    fn shared_reference_versions() {
        let mut v1 = vec![1, 0, 0, 0, 0, 0, 0, 0];
        v1.extend_from_slice(&96u64.to_le_bytes());
        assert_eq!(shared_address(&v1).unwrap(), 96);
        let mut v3 = vec![3, 2];
        v3.extend_from_slice(&128u64.to_le_bytes());
        assert_eq!(shared_address(&v3).unwrap(), 128);
        v3[1] = 1;
        assert!(shared_address(&v3).is_err());
    }
}
