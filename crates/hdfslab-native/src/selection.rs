//! Hyperslab selection for partial dataset I/O.
//!
//! A [`Selection`] describes which elements of a dataspace take part in a
//! read or write. The common form is a hyperslab: a regular, strided
//! sub-region given per dimension by start, stride, count and block.

use crate::error::NativeError;

/// A selection over a dataspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Select all elements (equivalent to the entire dataspace).
    All,

    /// Select no elements.
    None,

    /// A regular hyperslab selection.
    ///
    /// For each dimension:
    /// - `start[d]`: first element index
    /// - `stride[d]`: step between blocks (must be >= block[d])
    /// - `count[d]`: number of blocks
    /// - `block[d]`: number of consecutive elements per block
    Hyperslab {
        start: Vec<u64>,
        stride: Vec<u64>,
        count: Vec<u64>,
        block: Vec<u64>,
    },
}

impl Selection {
    /// Build a hyperslab, checking rank agreement and stride/block rules.
    pub fn hyperslab(
        start: &[u64],
        stride: &[u64],
        count: &[u64],
        block: &[u64],
    ) -> Result<Self, NativeError> {
        let rank = start.len();
        for len in [stride.len(), count.len(), block.len()] {
            if len != rank {
                return Err(NativeError::RankMismatch {
                    expected: rank,
                    actual: len,
                });
            }
        }
        if stride.iter().zip(block).any(|(&s, &b)| s == 0 || b == 0 || s < b) {
            return Err(NativeError::TypeMismatch(format!(
                "invalid hyperslab stride {stride:?} / block {block:?}"
            )));
        }
        Ok(Selection::Hyperslab {
            start: start.to_vec(),
            stride: stride.to_vec(),
            count: count.to_vec(),
            block: block.to_vec(),
        })
    }

    /// Number of selected elements for a given dataspace shape. Counts that
    /// do not fit in a `u64` are out of bounds for any extent.
    pub fn num_elements(&self, dims: &[u64]) -> Result<u64, NativeError> {
        let overflow = || NativeError::SelectionOutOfBounds {
            stop: vec![u64::MAX; dims.len()],
            dims: dims.to_vec(),
        };
        match self {
            Selection::All => dims
                .iter()
                .try_fold(1u64, |n, &d| n.checked_mul(d))
                .ok_or_else(overflow),
            Selection::None => Ok(0),
            Selection::Hyperslab { count, block, .. } => count
                .iter()
                .zip(block)
                .try_fold(1u64, |n, (&c, &b)| c.checked_mul(b).and_then(|cb| n.checked_mul(cb)))
                .ok_or_else(overflow),
        }
    }

    /// Check that the selection lies inside `dims`. A stop that overflows
    /// is reported as `u64::MAX`.
    pub fn check_bounds(&self, dims: &[u64]) -> Result<(), NativeError> {
        let Selection::Hyperslab {
            start,
            stride,
            count,
            block,
        } = self
        else {
            return Ok(());
        };
        if start.len() != dims.len() {
            return Err(NativeError::RankMismatch {
                expected: dims.len(),
                actual: start.len(),
            });
        }
        let stop: Vec<u64> = (0..start.len())
            .map(|d| {
                if count[d] == 0 {
                    return start[d];
                }
                (count[d] - 1)
                    .checked_mul(stride[d])
                    .and_then(|span| span.checked_add(start[d]))
                    .and_then(|last| last.checked_add(block[d]))
                    .unwrap_or(u64::MAX)
            })
            .collect();
        let overflowed = stop.iter().any(|&s| s == u64::MAX);
        if overflowed || stop.iter().zip(dims).any(|(&s, &d)| s > d) {
            return Err(NativeError::SelectionOutOfBounds {
                stop,
                dims: dims.to_vec(),
            });
        }
        Ok(())
    }

    /// Selected indices along each dimension, in increasing order.
    fn axis_indices(&self, dims: &[u64]) -> Vec<Vec<u64>> {
        match self {
            Selection::All => dims.iter().map(|&d| (0..d).collect()).collect(),
            Selection::None => vec![Vec::new(); dims.len()],
            Selection::Hyperslab {
                start,
                stride,
                count,
                block,
            } => (0..start.len())
                .map(|d| {
                    (0..count[d])
                        .flat_map(|b| {
                            let base = start[d] + b * stride[d];
                            (0..block[d]).map(move |k| base + k)
                        })
                        .collect()
                })
                .collect(),
        }
    }

    /// Visit every selected coordinate in row-major order.
    ///
    /// A scalar dataspace (empty `dims`) yields one empty coordinate unless
    /// the selection is `None`.
    pub fn for_each_coord<F: FnMut(&[u64])>(&self, dims: &[u64], mut f: F) {
        if dims.is_empty() {
            if !matches!(self, Selection::None) {
                f(&[]);
            }
            return;
        }
        let axes = self.axis_indices(dims);
        if axes.iter().any(|a| a.is_empty()) {
            return;
        }
        let rank = axes.len();
        let mut pos = vec![0usize; rank];
        let mut coord: Vec<u64> = axes.iter().map(|a| a[0]).collect();
        loop {
            f(&coord);
            // Odometer increment, innermost dimension fastest
            let mut d = rank;
            loop {
                if d == 0 {
                    return;
                }
                d -= 1;
                pos[d] += 1;
                if pos[d] < axes[d].len() {
                    coord[d] = axes[d][pos[d]];
                    break;
                }
                pos[d] = 0;
                coord[d] = axes[d][0];
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(sel: &Selection, dims: &[u64]) -> Vec<Vec<u64>> {
        let mut out = Vec::new();
        sel.for_each_coord(dims, |c| out.push(c.to_vec()));
        out
    }

    #[test]
    fn selection_all_num_elements() {
        assert_eq!(Selection::All.num_elements(&[100, 200]).unwrap(), 20000);
        assert_eq!(Selection::None.num_elements(&[100, 200]).unwrap(), 0);
    }

    #[test]
    fn hyperslab_row_major_order() {
        let sel = Selection::hyperslab(&[1, 0], &[1, 2], &[2, 2], &[1, 1]).unwrap();
        assert_eq!(sel.num_elements(&[4, 4]).unwrap(), 4);
        assert_eq!(
            collect(&sel, &[4, 4]),
            vec![vec![1, 0], vec![1, 2], vec![2, 0], vec![2, 2]]
        );
    }

    #[test]
    fn hyperslab_blocks() {
        // every other pair: 0,1,4,5
        let sel = Selection::hyperslab(&[0], &[4], &[2], &[2]).unwrap();
        assert_eq!(sel.num_elements(&[8]).unwrap(), 4);
        assert_eq!(
            collect(&sel, &[8]),
            vec![vec![0], vec![1], vec![4], vec![5]]
        );
    }

    #[test]
    fn hyperslab_rejects_bad_stride() {
        assert!(Selection::hyperslab(&[0], &[0], &[1], &[1]).is_err());
        assert!(Selection::hyperslab(&[0], &[1], &[1], &[2]).is_err());
        assert!(matches!(
            Selection::hyperslab(&[0, 0], &[1], &[1, 1], &[1, 1]),
            Err(NativeError::RankMismatch { .. })
        ));
    }

    #[test]
    fn bounds_check() {
        let sel = Selection::hyperslab(&[2], &[3], &[3], &[1]).unwrap();
        // stop = 2 + 2*3 + 1 = 9
        assert!(sel.check_bounds(&[9]).is_ok());
        assert!(matches!(
            sel.check_bounds(&[8]),
            Err(NativeError::SelectionOutOfBounds { .. })
        ));
    }

    #[test]
    fn overflowing_hyperslab_is_out_of_bounds() {
        let far = Selection::hyperslab(&[u64::MAX], &[1], &[2], &[1]).unwrap();
        assert!(matches!(
            far.check_bounds(&[4]),
            Err(NativeError::SelectionOutOfBounds { .. })
        ));
        let wide = Selection::hyperslab(&[0], &[u64::MAX], &[3], &[1]).unwrap();
        assert!(wide.check_bounds(&[u64::MAX]).is_err());
        let huge = Selection::hyperslab(&[0, 0], &[1, 1], &[u64::MAX, 2], &[1, 1]).unwrap();
        assert!(huge.num_elements(&[4, 4]).is_err());
        assert!(Selection::All.num_elements(&[u64::MAX, 2]).is_err());
    }

    #[test]
    fn scalar_and_empty() {
        assert_eq!(collect(&Selection::All, &[]), vec![Vec::<u64>::new()]);
        let empty = Selection::hyperslab(&[0, 0], &[1, 1], &[0, 3], &[1, 1]).unwrap();
        assert!(collect(&empty, &[3, 3]).is_empty());
    }
}
