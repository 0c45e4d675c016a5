//! Chunk shape estimation.
//!
//! Starting from the expected maximum shape, free dimensions are halved
//! until one chunk fits the byte target or every free dimension is 1.

use crate::config::{ChunkStrategy, IoConfig, DEFAULT_CHUNK_TARGET_BYTES};
use crate::error::{Error, Result};

/// Proposes chunk shapes under a byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEstimator {
    target_bytes: u64,
    strategy: ChunkStrategy,
}

impl Default for ChunkEstimator {
    fn default() -> Self {
        ChunkEstimator::new(ChunkStrategy::default())
    }
}

fn chunk_bytes(chunk: &[u64], item_size: usize) -> u128 {
    chunk
        .iter()
        .fold(item_size as u128, |acc, &d| acc.saturating_mul(d as u128))
}

impl ChunkEstimator {
    /// Estimator with the default 1 MiB target.
    pub fn new(strategy: ChunkStrategy) -> Self {
        ChunkEstimator {
            target_bytes: DEFAULT_CHUNK_TARGET_BYTES,
            strategy,
        }
    }

    pub fn from_config(config: &IoConfig) -> Self {
        ChunkEstimator {
            target_bytes: config.chunk_target_bytes.max(1),
            strategy: config.chunk_strategy,
        }
    }

    /// Override the byte target.
    pub fn with_target(mut self, bytes: u64) -> Self {
        self.target_bytes = bytes.max(1);
        self
    }

    pub fn target_bytes(&self) -> u64 {
        self.target_bytes
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    /// Chunk shape for a dataset expected to reach `max_shape`.
    ///
    /// `fixed` pins dimensions: `Some(n)` keeps that dimension at `n`
    /// (at least 1), `None` leaves it free for reduction.
    pub fn estimate(
        &self,
        max_shape: &[u64],
        item_size: usize,
        fixed: Option<&[Option<u64>]>,
    ) -> Result<Vec<u64>> {
        if let Some(d) = max_shape.iter().position(|&d| d == 0) {
            return Err(Error::InvalidArgument(format!(
                "expected shape {max_shape:?} has a zero dimension at {d}"
            )));
        }
        if let Some(fixed) = fixed {
            if fixed.len() != max_shape.len() {
                return Err(Error::InvalidArgument(format!(
                    "fixed dims rank {} differs from shape rank {}",
                    fixed.len(),
                    max_shape.len()
                )));
            }
        }
        if item_size == 0 {
            return Err(Error::InvalidArgument("item size must be positive".into()));
        }

        let mut chunk = max_shape.to_vec();
        let mut free = Vec::with_capacity(chunk.len());
        for d in 0..chunk.len() {
            match fixed.and_then(|f| f[d]) {
                Some(n) => chunk[d] = n.max(1),
                None => free.push(d),
            }
        }

        let target = self.target_bytes as u128;
        match self.strategy {
            ChunkStrategy::Balanced => {
                let mut next = 0usize;
                while chunk_bytes(&chunk, item_size) > target {
                    if free.iter().all(|&d| chunk[d] <= 1) {
                        break;
                    }
                    // Round-robin over free dimensions that can still shrink.
                    let d = loop {
                        let d = free[next % free.len()];
                        next += 1;
                        if chunk[d] > 1 {
                            break d;
                        }
                    };
                    chunk[d] = (chunk[d] + 1) / 2;
                }
            }
            ChunkStrategy::SkewLast => {
                for &d in &free {
                    while chunk[d] > 1 && chunk_bytes(&chunk, item_size) > target {
                        chunk[d] = (chunk[d] + 1) / 2;
                    }
                }
            }
        }
        Ok(chunk)
    }
}

/// Estimate with the default target.
pub fn estimate(
    max_shape: &[u64],
    item_size: usize,
    fixed: Option<&[Option<u64>]>,
    strategy: ChunkStrategy,
) -> Result<Vec<u64>> {
    ChunkEstimator::new(strategy).estimate(max_shape, item_size, fixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u128 = 1024 * 1024;

    #[test]
    fn small_shapes_are_unchanged() {
        for strategy in [ChunkStrategy::Balanced, ChunkStrategy::SkewLast] {
            assert_eq!(estimate(&[10, 10], 8, None, strategy).unwrap(), vec![10, 10]);
        }
    }

    #[test]
    fn skew_last_reduces_outer_dimensions_first() {
        let chunk = estimate(&[1024, 1024, 8], 8, None, ChunkStrategy::SkewLast).unwrap();
        assert_eq!(chunk[2], 8);
        assert_eq!(chunk[1], 1024);
        assert!(chunk_bytes(&chunk, 8) <= MIB);
        assert_eq!(chunk, vec![16, 1024, 8]);
    }

    #[test]
    fn balanced_spreads_reduction() {
        let chunk = estimate(&[1024, 1024], 8, None, ChunkStrategy::Balanced).unwrap();
        assert!(chunk_bytes(&chunk, 8) <= MIB);
        assert_eq!(chunk, vec![256, 512]);
    }

    #[test]
    fn fixed_dimensions_are_kept() {
        let fixed = [None, Some(2048)];
        for strategy in [ChunkStrategy::Balanced, ChunkStrategy::SkewLast] {
            let chunk = estimate(&[100_000, 4096], 8, Some(&fixed[..]), strategy).unwrap();
            assert_eq!(chunk[1], 2048);
            assert!(chunk_bytes(&chunk, 8) <= MIB);
        }
    }

    #[test]
    fn floor_when_target_unreachable() {
        let fixed = [Some(4096), None];
        let chunk = estimate(&[4096, 4096], 512, Some(&fixed[..]), ChunkStrategy::Balanced).unwrap();
        assert_eq!(chunk, vec![4096, 1]);
        let chunk = ChunkEstimator::new(ChunkStrategy::SkewLast)
            .with_target(4)
            .estimate(&[3, 3], 8, None)
            .unwrap();
        assert_eq!(chunk, vec![1, 1]);
    }

    #[test]
    fn preconditions() {
        assert!(matches!(
            estimate(&[4, 0], 8, None, ChunkStrategy::SkewLast),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            estimate(&[4, 4], 8, Some(&[None][..]), ChunkStrategy::Balanced),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn bounds_hold_for_ranks_and_item_sizes() {
        let shapes: [&[u64]; 6] = [
            &[5_000_000],
            &[3000, 3001],
            &[1, 700_000],
            &[64, 513, 257],
            &[17, 33, 65, 129],
            &[2, 2, 2, 2],
        ];
        for strategy in [ChunkStrategy::Balanced, ChunkStrategy::SkewLast] {
            for shape in shapes {
                for item in [1usize, 4, 8] {
                    let chunk = estimate(shape, item, None, strategy).unwrap();
                    assert_eq!(chunk.len(), shape.len());
                    assert!(chunk.iter().all(|&c| c >= 1));
                    assert!(chunk.iter().zip(shape).all(|(c, s)| c <= s));
                    let all_one = chunk.iter().all(|&c| c == 1);
                    assert!(chunk_bytes(&chunk, item) <= MIB || all_one);
                }
            }
        }
    }
}
