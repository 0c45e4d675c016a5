//! Shape and slice arithmetic.
//!
//! Pure functions over start/count/step tuples: hyperslab construction,
//! the extension decision for extendible datasets and max-shape checks.

use hdfslab_native::UNLIMITED;

use crate::error::{Error, Result};

/// A strided rectangular region of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeSpec {
    pub start: Vec<u64>,
    pub count: Vec<u64>,
    pub step: Vec<u64>,
    pub max_shape: Option<Vec<u64>>,
    /// Grow (or shrink) the dataset to exactly this extent before writing,
    /// instead of taking the per-dimension maximum.
    pub expanded_to: Option<Vec<u64>>,
}

/// Native hyperslab parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperslab {
    pub start: Vec<u64>,
    pub stride: Vec<u64>,
    pub count: Vec<u64>,
    pub block: Vec<u64>,
}

impl ShapeSpec {
    /// Region of `count` elements per dimension from `start`, `step` apart.
    pub fn new(start: Vec<u64>, count: Vec<u64>, step: Vec<u64>) -> Result<Self> {
        let rank = start.len();
        if count.len() != rank || step.len() != rank {
            return Err(Error::ShapeViolation(format!(
                "start/count/step ranks differ: {}/{}/{}",
                rank,
                count.len(),
                step.len()
            )));
        }
        if step.iter().any(|&s| s == 0) {
            return Err(Error::InvalidArgument(format!("step must be >= 1: {step:?}")));
        }
        Ok(ShapeSpec {
            start,
            count,
            step,
            max_shape: None,
            expanded_to: None,
        })
    }

    /// Contiguous region with unit steps.
    pub fn region(start: Vec<u64>, count: Vec<u64>) -> Result<Self> {
        let step = vec![1; start.len()];
        Self::new(start, count, step)
    }

    /// The whole of an extent.
    pub fn whole(shape: &[u64]) -> Self {
        ShapeSpec {
            start: vec![0; shape.len()],
            count: shape.to_vec(),
            step: vec![1; shape.len()],
            max_shape: None,
            expanded_to: None,
        }
    }

    /// Attach a max shape; every bounded entry must cover the region.
    pub fn with_max_shape(mut self, max_shape: Vec<u64>) -> Result<Self> {
        if max_shape.len() != self.rank() {
            return Err(Error::ShapeViolation(format!(
                "max shape rank {} differs from region rank {}",
                max_shape.len(),
                self.rank()
            )));
        }
        let stop = self.stop()?;
        if let Some(d) = (0..self.rank()).find(|&d| max_shape[d] != UNLIMITED && max_shape[d] < stop[d]) {
            return Err(Error::ShapeViolation(format!(
                "max shape {max_shape:?} does not cover stop {} in dimension {d}",
                stop[d]
            )));
        }
        self.max_shape = Some(max_shape);
        Ok(self)
    }

    /// Resize the target to exactly `shape` before writing.
    pub fn expanded(mut self, shape: Vec<u64>) -> Self {
        self.expanded_to = Some(shape);
        self
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    /// One past the last index touched in each dimension. Regions whose
    /// end does not fit in a `u64` are rejected.
    pub fn stop(&self) -> Result<Vec<u64>> {
        self.start
            .iter()
            .zip(&self.count)
            .zip(&self.step)
            .map(|((&s, &c), &st)| {
                if c == 0 {
                    return Ok(s);
                }
                (c - 1)
                    .checked_mul(st)
                    .and_then(|span| span.checked_add(s))
                    .and_then(|last| last.checked_add(1))
                    .ok_or_else(|| {
                        Error::ShapeViolation(format!(
                            "region from {:?} by {:?} x {:?} overflows",
                            self.start, self.count, self.step
                        ))
                    })
            })
            .collect()
    }

    /// Number of selected elements.
    pub fn num_elements(&self) -> Result<u64> {
        checked_product(&self.count)
    }

    /// New extent the target needs before this region can be written, or
    /// `None` when `current` already holds it.
    pub fn extension(&self, current: &[u64]) -> Result<Option<Vec<u64>>> {
        match &self.expanded_to {
            Some(target) if target.as_slice() != current => Ok(Some(target.clone())),
            Some(_) => Ok(None),
            None => Ok(needs_extension(current, &self.stop()?)),
        }
    }
}

/// Product of `dims`, or a shape violation when it overflows.
pub fn checked_product(dims: &[u64]) -> Result<u64> {
    dims.iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::ShapeViolation(format!("element count of {dims:?} overflows")))
}

/// Element count of `dims` as an in-memory length.
pub fn checked_len(dims: &[u64]) -> Result<usize> {
    let n = checked_product(dims)?;
    usize::try_from(n)
        .map_err(|_| Error::ShapeViolation(format!("{n} elements do not fit in memory")))
}

/// Translate a region into native hyperslab parameters (unit blocks).
pub fn to_hyperslab(spec: &ShapeSpec) -> Hyperslab {
    Hyperslab {
        start: spec.start.clone(),
        stride: spec.step.clone(),
        count: spec.count.clone(),
        block: vec![1; spec.rank()],
    }
}

/// Per-dimension maximum of `current` and `requested_stop` when any
/// requested dimension exceeds the current extent.
pub fn needs_extension(current: &[u64], requested_stop: &[u64]) -> Option<Vec<u64>> {
    let grows = requested_stop.iter().zip(current).any(|(r, c)| r > c);
    if !grows {
        return None;
    }
    Some(
        current
            .iter()
            .zip(requested_stop)
            .map(|(&c, &r)| c.max(r))
            .collect(),
    )
}

/// Check a max shape against an initial shape; `None` means fixed size.
pub fn reconcile_max_shape(shape: &[u64], max_shape: Option<&[u64]>) -> Result<Vec<u64>> {
    let Some(max) = max_shape else {
        return Ok(shape.to_vec());
    };
    if max.len() != shape.len() {
        return Err(Error::ShapeViolation(format!(
            "max shape {max:?} and shape {shape:?} differ in rank"
        )));
    }
    if shape.iter().zip(max).any(|(&s, &m)| m != UNLIMITED && m < s) {
        return Err(Error::ShapeViolation(format!(
            "max shape {max:?} is smaller than shape {shape:?}"
        )));
    }
    Ok(max.to_vec())
}
