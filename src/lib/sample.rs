//! The pileup sample: a contiguous slice of encoded columns ready for inference.
//!
//! A sample owns its feature matrix (`[L, F]`), the `(major, minor)` position
//! vectors that tie each column back to the draft, and the per-column depth.
//! `major` is a zero-based draft coordinate; `minor` is the insertion offset
//! after that draft base (0 for a non-insertion column). Samples are
//! immutable once emitted; sample surgery produces new samples.

use ndarray::{Array1, Array2, s};

use crate::errors::{BurnishError, Result};
use crate::tensor;

/// One pileup-encoded window of columns.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    /// Per-column features, shape `[len, num_features]`.
    pub features: Array2<f32>,
    /// Draft coordinate of each column.
    pub positions_major: Vec<i64>,
    /// Insertion offset of each column (0 = on the draft).
    pub positions_minor: Vec<i64>,
    /// Effective coverage of each column.
    pub depth: Array1<f32>,
    /// Index of the draft sequence the columns come from.
    pub seq_id: i32,
    /// Index of the parent BAM region; used as a merge-equivalence key.
    pub region_id: i32,
}

impl Sample {
    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions_major.len()
    }

    /// Whether the sample holds no columns (no reads overlapped its window).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions_major.is_empty()
    }

    /// Draft coordinate of the first column, or -1 when empty.
    #[must_use]
    pub fn start(&self) -> i64 {
        self.positions_major.first().copied().unwrap_or(-1)
    }

    /// One past the draft coordinate of the last column, or -1 when empty.
    #[must_use]
    pub fn end(&self) -> i64 {
        self.positions_major.last().map_or(-1, |p| p + 1)
    }

    /// `(major, minor)` of the column at `idx`, or `(-1, -1)` out of bounds.
    #[must_use]
    pub fn position(&self, idx: usize) -> (i64, i64) {
        if idx >= self.len() {
            return (-1, -1);
        }
        (self.positions_major[idx], self.positions_minor[idx])
    }

    /// `(major, minor)` of the final column, or `(-1, -1)` when empty.
    #[must_use]
    pub fn last_position(&self) -> (i64, i64) {
        if self.is_empty() { (-1, -1) } else { self.position(self.len() - 1) }
    }

    /// Copies out the columns `[idx_start, idx_end)` as a new sample.
    pub fn slice(&self, idx_start: usize, idx_end: usize) -> Result<Sample> {
        if idx_start >= idx_end || idx_end > self.len() {
            return Err(BurnishError::SampleInvariant {
                reason: format!(
                    "slice [{idx_start}, {idx_end}) out of range for sample of {} columns",
                    self.len()
                ),
            });
        }
        Ok(Sample {
            features: self.features.slice(s![idx_start..idx_end, ..]).to_owned(),
            positions_major: self.positions_major[idx_start..idx_end].to_vec(),
            positions_minor: self.positions_minor[idx_start..idx_end].to_vec(),
            depth: self.depth.slice(s![idx_start..idx_end]).to_owned(),
            seq_id: self.seq_id,
            region_id: self.region_id,
        })
    }

    /// Whether `next` continues this sample without a gap: its first column
    /// is either the next draft base or the next insertion slot.
    #[must_use]
    pub fn is_contiguous_with(&self, next: &Sample) -> bool {
        if self.is_empty() || next.is_empty() {
            return false;
        }
        let (last_major, last_minor) = self.last_position();
        let (next_major, next_minor) = next.position(0);
        (next_major == last_major + 1 && next_minor == 0)
            || (next_major == last_major && next_minor == last_minor + 1)
    }

    /// Appends the columns of `other` to this sample.
    ///
    /// Callers are responsible for only joining samples that are contiguous
    /// and share `seq_id`/`region_id`.
    pub fn extend(&mut self, other: &Sample) -> Result<()> {
        let features = std::mem::take(&mut self.features);
        self.features = tensor::cat_rows(vec![features, other.features.clone()])?;
        let depth = std::mem::take(&mut self.depth);
        self.depth = tensor::cat_vecs(vec![depth, other.depth.clone()])?;
        self.positions_major.extend_from_slice(&other.positions_major);
        self.positions_minor.extend_from_slice(&other.positions_minor);
        Ok(())
    }

    /// Checks the structural invariants: vector lengths agree and positions
    /// are properly ordered.
    pub fn validate(&self) -> Result<()> {
        let len = self.positions_major.len();
        if self.positions_minor.len() != len
            || self.features.nrows() != len
            || self.depth.len() != len
        {
            return Err(BurnishError::SampleInvariant {
                reason: format!(
                    "length mismatch: major = {}, minor = {}, features = {}, depth = {}",
                    len,
                    self.positions_minor.len(),
                    self.features.nrows(),
                    self.depth.len()
                ),
            });
        }

        for i in 1..len {
            let (pm, cm) = (self.positions_major[i - 1], self.positions_major[i]);
            let (pn, cn) = (self.positions_minor[i - 1], self.positions_minor[i]);
            let ok = if cm == pm {
                cn == pn + 1
            } else {
                cm > pm && cn == 0
            };
            if !ok {
                return Err(BurnishError::SampleInvariant {
                    reason: format!(
                        "position order broken at column {i}: ({pm}, {pn}) -> ({cm}, {cn})"
                    ),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    /// Builds a sample with uniform features from explicit position vectors.
    pub(crate) fn sample_from_positions(
        major: Vec<i64>,
        minor: Vec<i64>,
        seq_id: i32,
        region_id: i32,
    ) -> Sample {
        let len = major.len();
        Sample {
            features: Array2::zeros((len, 10)),
            positions_major: major,
            positions_minor: minor,
            depth: Array1::ones(len),
            seq_id,
            region_id,
        }
    }

    #[test]
    fn test_start_end_positions() {
        let s = sample_from_positions(vec![5, 6, 6, 7], vec![0, 0, 1, 0], 0, 0);
        assert_eq!(s.start(), 5);
        assert_eq!(s.end(), 8);
        assert_eq!(s.position(2), (6, 1));
        assert_eq!(s.last_position(), (7, 0));
        assert_eq!(s.position(10), (-1, -1));
    }

    #[test]
    fn test_empty_sample() {
        let s = Sample::default();
        assert!(s.is_empty());
        assert_eq!(s.start(), -1);
        assert_eq!(s.end(), -1);
        assert_eq!(s.last_position(), (-1, -1));
    }

    #[test]
    fn test_slice() {
        let s = sample_from_positions(vec![5, 6, 6, 7], vec![0, 0, 1, 0], 3, 2);
        let sliced = s.slice(1, 3).unwrap();
        assert_eq!(sliced.positions_major, vec![6, 6]);
        assert_eq!(sliced.positions_minor, vec![0, 1]);
        assert_eq!(sliced.features.nrows(), 2);
        assert_eq!(sliced.depth.len(), 2);
        assert_eq!(sliced.seq_id, 3);
        assert_eq!(sliced.region_id, 2);
    }

    #[test]
    fn test_slice_out_of_range() {
        let s = sample_from_positions(vec![5, 6], vec![0, 0], 0, 0);
        assert!(s.slice(1, 1).is_err());
        assert!(s.slice(0, 3).is_err());
    }

    #[test]
    fn test_is_contiguous_with() {
        let a = sample_from_positions(vec![5, 6], vec![0, 0], 0, 0);
        let next_major = sample_from_positions(vec![7, 8], vec![0, 0], 0, 0);
        let next_insert = sample_from_positions(vec![6, 7], vec![1, 0], 0, 0);
        let gapped = sample_from_positions(vec![9], vec![0], 0, 0);
        assert!(a.is_contiguous_with(&next_major));
        assert!(a.is_contiguous_with(&next_insert));
        assert!(!a.is_contiguous_with(&gapped));
    }

    #[test]
    fn test_extend() {
        let mut a = sample_from_positions(vec![5, 6], vec![0, 0], 0, 0);
        let b = sample_from_positions(vec![7, 7], vec![0, 1], 0, 0);
        a.extend(&b).unwrap();
        assert_eq!(a.positions_major, vec![5, 6, 7, 7]);
        assert_eq!(a.positions_minor, vec![0, 0, 0, 1]);
        assert_eq!(a.features.nrows(), 4);
        assert_eq!(a.depth.len(), 4);
        a.validate().unwrap();
    }

    #[test]
    fn test_validate_accepts_inserts() {
        let s = sample_from_positions(vec![5, 5, 5, 6], vec![0, 1, 2, 0], 0, 0);
        s.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_order_violations() {
        // minor must restart at zero on a new major
        let s = sample_from_positions(vec![5, 6], vec![0, 1], 0, 0);
        assert!(s.validate().is_err());
        // minor must be strictly sequential within a major
        let s = sample_from_positions(vec![5, 5], vec![0, 2], 0, 0);
        assert!(s.validate().is_err());
        // major must not decrease
        let s = sample_from_positions(vec![6, 5], vec![0, 0], 0, 0);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_length_mismatch() {
        let mut s = sample_from_positions(vec![5, 6], vec![0, 0], 0, 0);
        s.positions_minor.push(0);
        assert!(s.validate().is_err());
    }
}
