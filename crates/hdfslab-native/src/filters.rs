//! The chunk filter pipeline: message codec and the deflate, shuffle and
//! Fletcher-32 filters.

use std::io::{Read, Write};

use crate::checksum::fletcher32;
use crate::error::NativeError;
use crate::io::{align8, ByteCursor};

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;

/// Filter flag: the chunk may be stored unfiltered when this filter fails.
pub const FLAG_OPTIONAL: u16 = 1;

/// One filter of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub id: u16,
    pub flags: u16,
    pub client_data: Vec<u32>,
}

/// A pipeline with a single deflate filter.
pub fn deflate_pipeline(level: u32) -> Vec<Filter> {
    vec![Filter {
        id: FILTER_DEFLATE,
        flags: 0,
        client_data: vec![level.min(9)],
    }]
}

/// Deflate level of the pipeline, if it deflates.
pub fn deflate_level(filters: &[Filter]) -> Option<u32> {
    filters
        .iter()
        .find(|f| f.id == FILTER_DEFLATE)
        .map(|f| f.client_data.first().copied().unwrap_or(6))
}

/// Decode a filter pipeline message (versions 1 and 2).
pub fn decode_pipeline(data: &[u8]) -> Result<Vec<Filter>, NativeError> {
    let mut cur = ByteCursor::new(data);
    let version = cur.u8()?;
    let count = cur.u8()? as usize;
    match version {
        1 => cur.skip(6)?,
        2 => {}
        v => return Err(NativeError::Unsupported(format!("filter pipeline version {v}"))),
    }
    let mut filters = Vec::with_capacity(count);
    for _ in 0..count {
        let id = cur.u16()?;
        let name_len = if version == 1 || id >= 256 {
            cur.u16()? as usize
        } else {
            0
        };
        let flags = cur.u16()?;
        let values = cur.u16()? as usize;
        if name_len > 0 {
            let padded = if version == 1 {
                align8(name_len as u64) as usize
            } else {
                name_len
            };
            cur.skip(padded)?;
        }
        let mut client_data = Vec::with_capacity(values);
        for _ in 0..values {
            client_data.push(cur.u32()?);
        }
        if version == 1 && values % 2 == 1 {
            cur.skip(4)?;
        }
        filters.push(Filter {
            id,
            flags,
            client_data,
        });
    }
    Ok(filters)
}

/// Encode a version 2 filter pipeline message.
pub fn encode_pipeline(filters: &[Filter]) -> Vec<u8> {
    let mut buf = vec![2, filters.len() as u8];
    for f in filters {
        buf.extend_from_slice(&f.id.to_le_bytes());
        if f.id >= 256 {
            buf.extend_from_slice(&0u16.to_le_bytes());
        }
        buf.extend_from_slice(&f.flags.to_le_bytes());
        buf.extend_from_slice(&(f.client_data.len() as u16).to_le_bytes());
        for v in &f.client_data {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }
    buf
}

/// Run `data` through the pipeline in order.
pub fn encode_chunk(
    filters: &[Filter],
    data: &[u8],
    element_size: usize,
) -> Result<Vec<u8>, NativeError> {
    let mut out = data.to_vec();
    for f in filters {
        out = match f.id {
            FILTER_DEFLATE => deflate(&out, f.client_data.first().copied().unwrap_or(6))?,
            FILTER_SHUFFLE => shuffle(&out, element_size),
            FILTER_FLETCHER32 => {
                let sum = fletcher32(&out);
                out.extend_from_slice(&sum.to_le_bytes());
                out
            }
            id => return Err(NativeError::UnsupportedFilter(id)),
        };
    }
    Ok(out)
}

/// Undo the pipeline in reverse order. Bit `i` of `mask` marks filter `i`
/// as skipped when the chunk was written.
pub fn decode_chunk(
    filters: &[Filter],
    data: Vec<u8>,
    mask: u32,
    element_size: usize,
) -> Result<Vec<u8>, NativeError> {
    let mut out = data;
    for (i, f) in filters.iter().enumerate().rev() {
        if i < 32 && mask & (1 << i) != 0 {
            continue;
        }
        out = match f.id {
            FILTER_DEFLATE => inflate(&out)?,
            FILTER_SHUFFLE => unshuffle(&out, element_size),
            FILTER_FLETCHER32 => verify_fletcher32(out)?,
            id => return Err(NativeError::UnsupportedFilter(id)),
        };
    }
    Ok(out)
}

fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>, NativeError> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .map_err(|e| NativeError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| NativeError::Compression(e.to_string()))
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, NativeError> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| NativeError::Compression(e.to_string()))?;
    Ok(out)
}

/// Group byte `j` of every element together. A trailing partial element
/// is left in place.
fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let n = data.len() / element_size;
    let mut out = Vec::with_capacity(data.len());
    for j in 0..element_size {
        out.extend((0..n).map(|i| data[i * element_size + j]));
    }
    out.extend_from_slice(&data[n * element_size..]);
    out
}

fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let n = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for j in 0..element_size {
        for i in 0..n {
            out[i * element_size + j] = data[j * n + i];
        }
    }
    out[n * element_size..].copy_from_slice(&data[n * element_size..]);
    out
}

fn verify_fletcher32(mut data: Vec<u8>) -> Result<Vec<u8>, NativeError> {
    if data.len() < 4 {
        return Err(NativeError::Malformed("fletcher32 chunk shorter than checksum".into()));
    }
    let split = data.len() - 4;
    let stored = u32::from_le_bytes([data[split], data[split + 1], data[split + 2], data[split + 3]]);
    data.truncate(split);
    let computed = fletcher32(&data);
    // Older writers stored the sum byte-swapped
    if stored != computed && stored != computed.swap_bytes() {
        return Err(NativeError::ChecksumMismatch {
            expected: stored,
            computed,
        });
    }
    Ok(data)
}
