//! Dataspaces: the extent (current and maximum dimensions) of a dataset or
//! attribute.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::NativeError;

/// Maximum-dimension sentinel for a dimension that may grow without bound.
pub const UNLIMITED: u64 = u64::MAX;

/// Type of dataspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    /// Scalar (single element).
    Scalar,
    /// Simple (N-dimensional array).
    Simple,
}

/// Dataspace extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    /// The type of this dataspace.
    pub space_type: DataspaceType,
    /// Current dimension sizes (empty for scalar).
    pub dimensions: Vec<u64>,
    /// Maximum dimension sizes, if present. [`UNLIMITED`] means unlimited.
    pub max_dimensions: Option<Vec<u64>>,
}

impl Dataspace {
    /// A scalar dataspace.
    pub fn scalar() -> Self {
        Dataspace {
            space_type: DataspaceType::Scalar,
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    /// A simple dataspace. Fails if `max` has a different rank or is smaller
    /// than `dims` in any dimension.
    pub fn simple(dims: &[u64], max: Option<&[u64]>) -> Result<Self, NativeError> {
        if let Some(max) = max {
            if max.len() != dims.len() {
                return Err(NativeError::RankMismatch {
                    expected: dims.len(),
                    actual: max.len(),
                });
            }
            if dims.iter().zip(max).any(|(&d, &m)| m != UNLIMITED && d > m) {
                return Err(NativeError::CannotExtend(format!(
                    "dims {dims:?} exceed max dims {max:?}"
                )));
            }
        }
        Ok(Dataspace {
            space_type: DataspaceType::Simple,
            dimensions: dims.to_vec(),
            max_dimensions: max.map(|m| m.to_vec()),
        })
    }

    /// Number of dimensions (0 for scalar).
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Maximum dims, defaulting to the current dims when none were given.
    pub fn max_dims(&self) -> Vec<u64> {
        self.max_dimensions
            .clone()
            .unwrap_or_else(|| self.dimensions.clone())
    }

    /// Total number of elements. Scalar = 1.
    pub fn num_elements(&self) -> u64 {
        match self.space_type {
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => self.dimensions.iter().product(),
        }
    }

    /// Parse a dataspace message (version 1 or 2). Returns
    /// `(Dataspace, bytes_consumed)`. Null dataspaces are reported as
    /// [`NativeError::Unsupported`].
    pub fn parse(data: &[u8]) -> Result<(Dataspace, usize), NativeError> {
        if data.len() < 4 {
            return Err(NativeError::UnexpectedEof {
                expected: 4,
                available: data.len(),
            });
        }
        let version = data[0];
        let rank = data[1] as usize;
        let has_max = data[2] & 0x01 != 0;
        let (space_type, header) = match version {
            1 => {
                let space_type = if rank == 0 {
                    DataspaceType::Scalar
                } else {
                    DataspaceType::Simple
                };
                (space_type, 8)
            }
            2 => match data[3] {
                0 => (DataspaceType::Scalar, 4),
                1 => (DataspaceType::Simple, 4),
                2 => return Err(NativeError::Unsupported("null dataspace".into())),
                t => {
                    return Err(NativeError::Malformed(format!("dataspace type {t}")));
                }
            },
            v => return Err(NativeError::InvalidDataspaceVersion(v)),
        };
        let needed = header + rank * 8 * if has_max { 2 } else { 1 };
        if data.len() < needed {
            return Err(NativeError::UnexpectedEof {
                expected: needed,
                available: data.len(),
            });
        }
        let mut pos = header;
        let mut read_dims = || {
            let dims: Vec<u64> = (0..rank)
                .map(|i| LittleEndian::read_u64(&data[pos + i * 8..pos + i * 8 + 8]))
                .collect();
            pos += rank * 8;
            dims
        };
        let dimensions = read_dims();
        let max_dimensions = if has_max { Some(read_dims()) } else { None };
        Ok((
            Dataspace {
                space_type,
                dimensions,
                max_dimensions,
            },
            needed,
        ))
    }

    /// Serialize as a version 2 record with 8-byte lengths.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![
            2,
            self.dimensions.len() as u8,
            u8::from(self.max_dimensions.is_some()),
            match self.space_type {
                DataspaceType::Scalar => 0,
                DataspaceType::Simple => 1,
            },
        ];
        for &dim in &self.dimensions {
            buf.extend_from_slice(&dim.to_le_bytes());
        }
        if let Some(ref max_dims) = self.max_dimensions {
            for &md in max_dims {
                buf.extend_from_slice(&md.to_le_bytes());
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_has_one_element() {
        let s = Dataspace::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), 1);
    }

    #[test]
    fn simple_with_unlimited_max() {
        let s = Dataspace::simple(&[0, 4], Some(&[UNLIMITED, 4][..])).unwrap();
        assert_eq!(s.num_elements(), 0);
        assert_eq!(s.max_dims(), vec![UNLIMITED, 4]);
        let (parsed, used) = Dataspace::parse(&s.serialize()).unwrap();
        assert_eq!(used, 4 + 2 * 16);
        assert_eq!(parsed, s);
    }

    #[test]
    fn simple_rejects_dims_beyond_max() {
        assert!(matches!(
            Dataspace::simple(&[5], Some(&[4][..])),
            Err(NativeError::CannotExtend(_))
        ));
        assert!(matches!(
            Dataspace::simple(&[5, 1], Some(&[8][..])),
            Err(NativeError::RankMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn parse_rejects_other_versions() {
        let mut bytes = Dataspace::scalar().serialize();
        bytes[0] = 3;
        assert!(matches!(
            Dataspace::parse(&bytes),
            Err(NativeError::InvalidDataspaceVersion(3))
        ));
    }

    #[test]
    fn parse_version1_with_max() {
        let mut bytes = vec![1, 2, 1, 0, 0, 0, 0, 0];
        for v in [3u64, 4, UNLIMITED, 4] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let (space, used) = Dataspace::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(space.dimensions, vec![3, 4]);
        assert_eq!(space.max_dims(), vec![UNLIMITED, 4]);

        let (scalar, _) = Dataspace::parse(&[1, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(scalar.space_type, DataspaceType::Scalar);
    }

    #[test]
    fn null_dataspace_unsupported() {
        assert!(matches!(
            Dataspace::parse(&[2, 0, 0, 2]),
            Err(NativeError::Unsupported(_))
        ));
    }
}
