//! Object headers: the message lists that describe groups and datasets.
//!
//! Version 1 and version 2 headers are read, following continuation
//! blocks. Headers are always written as version 2 with a 4-byte chunk
//! size, padded to a fixed capacity so later rewrites can stay in place.

use crate::checksum::lookup3;
use crate::error::NativeError;
use crate::io::{align8, ByteCursor, ReadAt};

/// Header message type codes.
pub mod kind {
    pub const NIL: u16 = 0x00;
    pub const DATASPACE: u16 = 0x01;
    pub const LINK_INFO: u16 = 0x02;
    pub const DATATYPE: u16 = 0x03;
    pub const FILL_VALUE_OLD: u16 = 0x04;
    pub const FILL_VALUE: u16 = 0x05;
    pub const LINK: u16 = 0x06;
    pub const LAYOUT: u16 = 0x08;
    pub const GROUP_INFO: u16 = 0x0A;
    pub const FILTER_PIPELINE: u16 = 0x0B;
    pub const ATTRIBUTE: u16 = 0x0C;
    pub const CONTINUATION: u16 = 0x10;
    pub const SYMBOL_TABLE: u16 = 0x11;
    pub const BTREE_K: u16 = 0x13;
    pub const ATTRIBUTE_INFO: u16 = 0x15;
}

/// Message flag: the message data is a shared-message reference.
pub const FLAG_SHARED: u8 = 0x02;
/// Message flag: the message may not be changed.
pub const FLAG_CONSTANT: u8 = 0x01;

const LAST_KNOWN_KIND: u16 = 0x18;

const OHDR: &[u8; 4] = b"OHDR";
const OCHK: &[u8; 4] = b"OCHK";

/// Prefix of a written header: signature, version, flags, 4-byte chunk size.
const V2_PREFIX: usize = 10;
const V2_MSG_HEADER: usize = 4;

/// One header message with its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub kind: u16,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl RawMessage {
    pub fn new(kind: u16, flags: u8, data: Vec<u8>) -> Self {
        RawMessage { kind, flags, data }
    }
}

/// A header read from disk.
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    pub version: u8,
    pub messages: Vec<RawMessage>,
    /// Bytes available for an in-place rewrite; zero when the header spans
    /// continuation blocks.
    pub capacity: u64,
}

impl ObjectHeader {
    /// Read the header at `addr`, collecting messages from every chunk.
    pub fn read(src: &dyn ReadAt, addr: u64) -> Result<ObjectHeader, NativeError> {
        let head = src.read_at(addr, 6)?;
        if &head[..4] == OHDR {
            read_v2(src, addr, &head)
        } else if head[0] == 1 {
            read_v1(src, addr, &src.read_at(addr, 16)?)
        } else {
            Err(NativeError::Malformed(format!(
                "no object header at address {addr}"
            )))
        }
    }

    /// First message of `kind`.
    pub fn find(&self, kind: u16) -> Option<&RawMessage> {
        self.messages.iter().find(|m| m.kind == kind)
    }

    /// Every message of `kind`, in header order.
    pub fn all(&self, kind: u16) -> impl Iterator<Item = &RawMessage> {
        self.messages.iter().filter(move |m| m.kind == kind)
    }
}

fn continuation(msg: &RawMessage) -> Result<(u64, u64), NativeError> {
    let mut cur = ByteCursor::new(&msg.data);
    Ok((cur.u64()?, cur.u64()?))
}

fn check_unknown(kind: u16, flags: u8) -> Result<(), NativeError> {
    // Bit 3: fail if the message type is not understood
    if flags & 0x08 != 0 && kind > LAST_KNOWN_KIND {
        return Err(NativeError::Unsupported(format!(
            "required header message type {kind:#06x}"
        )));
    }
    Ok(())
}

fn read_v1(src: &dyn ReadAt, addr: u64, head: &[u8]) -> Result<ObjectHeader, NativeError> {
    let mut cur = ByteCursor::new(head);
    cur.skip(8)?; // version, reserved, message count, reference count
    let size = u64::from(cur.u32()?);
    let body = src.read_at(addr + 16, size as usize)?;
    let mut messages = Vec::new();
    let mut pending = Vec::new();
    parse_v1_messages(&body, &mut messages, &mut pending)?;
    let capacity = if pending.is_empty() { 16 + size } else { 0 };
    while let Some((cont_addr, cont_len)) = pending.pop() {
        let block = src.read_at(cont_addr, cont_len as usize)?;
        parse_v1_messages(&block, &mut messages, &mut pending)?;
    }
    Ok(ObjectHeader {
        version: 1,
        messages,
        capacity,
    })
}

fn parse_v1_messages(
    block: &[u8],
    messages: &mut Vec<RawMessage>,
    pending: &mut Vec<(u64, u64)>,
) -> Result<(), NativeError> {
    let mut cur = ByteCursor::new(block);
    while cur.remaining() >= 8 {
        let kind = cur.u16()?;
        let size = cur.u16()? as usize;
        let flags = cur.u8()?;
        cur.skip(3)?;
        let data = cur.take(size)?.to_vec();
        let aligned = align8(cur.pos() as u64) as usize;
        cur.seek(aligned.min(block.len()))?;
        check_unknown(kind, flags)?;
        let msg = RawMessage { kind, flags, data };
        match kind {
            kind::NIL => {}
            kind::CONTINUATION => pending.push(continuation(&msg)?),
            _ => messages.push(msg),
        }
    }
    Ok(())
}

fn read_v2(src: &dyn ReadAt, addr: u64, head: &[u8]) -> Result<ObjectHeader, NativeError> {
    let version = head[4];
    if version != 2 {
        return Err(NativeError::Unsupported(format!(
            "object header version {version}"
        )));
    }
    let flags = head[5];
    let mut prefix = 6usize;
    if flags & 0x20 != 0 {
        prefix += 16; // access, modification, change and birth times
    }
    if flags & 0x10 != 0 {
        prefix += 4; // attribute phase change values
    }
    let width = 1usize << (flags & 0x03);
    let sizes = src.read_at(addr + prefix as u64, width)?;
    let chunk0 = ByteCursor::new(&sizes).uint(width)? as usize;
    let body_start = prefix + width;
    let total = body_start + chunk0 + 4;
    let block = src.read_at(addr, total)?;
    verify(&block)?;

    let crt_order = flags & 0x04 != 0;
    let mut messages = Vec::new();
    let mut pending = Vec::new();
    parse_v2_messages(
        &block[body_start..total - 4],
        crt_order,
        &mut messages,
        &mut pending,
    )?;
    let capacity = if pending.is_empty() { total as u64 } else { 0 };
    while let Some((cont_addr, cont_len)) = pending.pop() {
        let chunk = src.read_at(cont_addr, cont_len as usize)?;
        if chunk.len() < 8 {
            return Err(NativeError::Malformed(format!(
                "continuation block of {} bytes",
                chunk.len()
            )));
        }
        verify(&chunk)?;
        let mut cur = ByteCursor::new(&chunk);
        cur.signature(OCHK)?;
        parse_v2_messages(
            &chunk[4..chunk.len() - 4],
            crt_order,
            &mut messages,
            &mut pending,
        )?;
    }
    Ok(ObjectHeader {
        version: 2,
        messages,
        capacity,
    })
}

fn verify(block: &[u8]) -> Result<(), NativeError> {
    if block.len() < 4 {
        return Err(NativeError::UnexpectedEof {
            expected: 4,
            available: block.len(),
        });
    }
    let end = block.len() - 4;
    let stored = u32::from_le_bytes([block[end], block[end + 1], block[end + 2], block[end + 3]]);
    let computed = lookup3(&block[..end]);
    if stored != computed {
        return Err(NativeError::ChecksumMismatch {
            expected: stored,
            computed,
        });
    }
    Ok(())
}

fn parse_v2_messages(
    body: &[u8],
    crt_order: bool,
    messages: &mut Vec<RawMessage>,
    pending: &mut Vec<(u64, u64)>,
) -> Result<(), NativeError> {
    let header = V2_MSG_HEADER + if crt_order { 2 } else { 0 };
    let mut cur = ByteCursor::new(body);
    // A tail shorter than a message header is a gap
    while cur.remaining() >= header {
        let kind = u16::from(cur.u8()?);
        let size = cur.u16()? as usize;
        let flags = cur.u8()?;
        if crt_order {
            cur.skip(2)?;
        }
        let data = cur.take(size)?.to_vec();
        check_unknown(kind, flags)?;
        let msg = RawMessage { kind, flags, data };
        match kind {
            kind::NIL => {}
            kind::CONTINUATION => pending.push(continuation(&msg)?),
            _ => messages.push(msg),
        }
    }
    Ok(())
}

/// Bytes a version 2 header holding `messages` needs at minimum.
pub fn encoded_size(messages: &[RawMessage]) -> u64 {
    let body: usize = messages.iter().map(|m| V2_MSG_HEADER + m.data.len()).sum();
    (V2_PREFIX + body + 4) as u64
}

/// Encode a version 2 header that fills exactly `capacity` bytes, which
/// must be at least [`encoded_size`]. Slack becomes NIL messages, or a gap
/// when it is too small to hold one.
pub fn encode(messages: &[RawMessage], capacity: u64) -> Result<Vec<u8>, NativeError> {
    let min = encoded_size(messages);
    if capacity < min {
        return Err(NativeError::Malformed(format!(
            "object header needs {min} bytes, slot holds {capacity}"
        )));
    }
    let chunk0 = capacity as usize - V2_PREFIX - 4;
    let mut buf = Vec::with_capacity(capacity as usize);
    buf.extend_from_slice(OHDR);
    buf.push(2);
    buf.push(0x02); // 4-byte chunk size, no times, no creation order
    buf.extend_from_slice(&(chunk0 as u32).to_le_bytes());
    for msg in messages {
        let kind = u8::try_from(msg.kind)
            .map_err(|_| NativeError::Malformed(format!("message type {:#x}", msg.kind)))?;
        let size = u16::try_from(msg.data.len()).map_err(|_| {
            NativeError::Unsupported(format!(
                "header message of {} bytes exceeds 65535",
                msg.data.len()
            ))
        })?;
        buf.push(kind);
        buf.extend_from_slice(&size.to_le_bytes());
        buf.push(msg.flags);
        buf.extend_from_slice(&msg.data);
    }
    let mut slack = (capacity - min) as usize;
    while slack >= V2_MSG_HEADER {
        let nil = (slack - V2_MSG_HEADER).min(u16::MAX as usize);
        buf.push(kind::NIL as u8);
        buf.extend_from_slice(&(nil as u16).to_le_bytes());
        buf.push(0);
        buf.resize(buf.len() + nil, 0);
        slack -= V2_MSG_HEADER + nil;
    }
    buf.resize(buf.len() + slack, 0);
    let sum = lookup3(&buf);
    buf.extend_from_slice(&sum.to_le_bytes());
    Ok(buf)
}

/// Capacity to allocate for a header that needs `size` bytes, leaving room
/// to grow in place.
pub fn capacity_for(size: u64) -> u64 {
    let slack = (size / 2 + 64).min(u16::MAX as u64);
    align8(size + slack)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<RawMessage> {
        vec![
            RawMessage::new(kind::DATASPACE, 0, vec![2, 1, 0, 1, 4, 0, 0, 0, 0, 0, 0, 0]),
            RawMessage::new(kind::ATTRIBUTE, 0, vec![0xAA; 40]),
        ]
    }

    #[test]
    fn encode_then_read_with_slack() {
        let msgs = sample();
        let cap = capacity_for(encoded_size(&msgs));
        let bytes = encode(&msgs, cap).unwrap();
        assert_eq!(bytes.len() as u64, cap);
        assert_eq!(&bytes[..4], b"OHDR");
        let hdr = ObjectHeader::read(&bytes, 0).unwrap();
        assert_eq!(hdr.version, 2);
        assert_eq!(hdr.messages, msgs);
        assert_eq!(hdr.capacity, cap);
    }

    #[test]
    fn small_slack_is_a_gap() {
        let msgs = sample();
        let cap = encoded_size(&msgs) + 3;
        let hdr = ObjectHeader::read(&encode(&msgs, cap).unwrap(), 0).unwrap();
        assert_eq!(hdr.messages.len(), 2);
        assert!(encode(&msgs, encoded_size(&msgs) - 1).is_err());
    }

    #[test]
    fn checksum_failure() {
        let msgs = sample();
        let mut bytes = encode(&msgs, encoded_size(&msgs)).unwrap();
        bytes[14] ^= 0xFF;
        assert!(matches!(
            ObjectHeader::read(&bytes, 0),
            Err(NativeError::ChecksumMismatch { .. })
        ));
    }

    fn v1_message(buf: &mut Vec<u8>, kind: u16, data: &[u8]) {
        buf.extend_from_slice(&kind.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.extend_from_slice(data);
    }

    #[test]
    fn v1_with_continuation() {
        // header at 0 (16-byte prefix + 40 bytes of messages), continuation at 64
        let mut body = Vec::new();
        v1_message(&mut body, kind::DATASPACE, &[1u8; 8]);
        let mut cont = Vec::new();
        cont.extend_from_slice(&64u64.to_le_bytes());
        cont.extend_from_slice(&16u64.to_le_bytes());
        v1_message(&mut body, kind::CONTINUATION, &cont);

        let mut file = vec![1u8, 0];
        file.extend_from_slice(&2u16.to_le_bytes());
        file.extend_from_slice(&1u32.to_le_bytes());
        file.extend_from_slice(&(body.len() as u32).to_le_bytes());
        file.extend_from_slice(&[0u8; 4]);
        file.extend_from_slice(&body);
        file.resize(64, 0);
        v1_message(&mut file, kind::SYMBOL_TABLE, &[2u8; 8]);

        let hdr = ObjectHeader::read(&file, 0).unwrap();
        assert_eq!(hdr.version, 1);
        assert_eq!(hdr.capacity, 0);
        let kinds: Vec<u16> = hdr.messages.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![kind::DATASPACE, kind::SYMBOL_TABLE]);
        assert_eq!(hdr.find(kind::SYMBOL_TABLE).unwrap().data, vec![2u8; 8]);
    }

    #[test]
    fn oversized_message_rejected() {
        let msgs = vec![RawMessage::new(kind::ATTRIBUTE, 0, vec![0; 70_000])];
        assert!(matches!(
            encode(&msgs, encoded_size(&msgs)),
            Err(NativeError::Unsupported(_))
        ));
    }
}
