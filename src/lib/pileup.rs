//! Column-wise pileup construction over a draft interval.
//!
//! Walks the CIGAR of every read overlapping `[start, end)` and produces one
//! count row per `(major, minor)` column: `major` is the draft coordinate,
//! `minor > 0` columns exist where at least one read carries an insertion
//! after that draft base. Counts are stratified by base and strand; the
//! feature encoder turns them into normalised model inputs.

use std::collections::HashMap;

use ndarray::Array2;

use crate::alignment::{AlignmentRecord, CigarOpKind};

/// Number of count features per column: {A, C, G, T, del} x {fwd, rev}.
pub const NUM_FEATURES: usize = 10;

/// Feature index of a forward-strand deletion.
pub const FEAT_FWD_DEL: usize = 4;

/// Feature index of a reverse-strand deletion.
pub const FEAT_REV_DEL: usize = 9;

/// Feature index for a base observation, or `None` for non-ACGT bases.
#[must_use]
pub fn base_feature_index(base: u8, is_reverse: bool) -> Option<usize> {
    let offset = if is_reverse { 5 } else { 0 };
    match base.to_ascii_uppercase() {
        b'A' => Some(offset),
        b'C' => Some(offset + 1),
        b'G' => Some(offset + 2),
        b'T' => Some(offset + 3),
        _ => None,
    }
}

/// Feature index of the deletion slot for a strand.
#[must_use]
pub fn del_feature_index(is_reverse: bool) -> usize {
    if is_reverse { FEAT_REV_DEL } else { FEAT_FWD_DEL }
}

/// Per-strand feature groups, used for normalisation and symmetric indels.
///
/// Each entry is `(is_reverse, feature indices of that strand)`.
#[must_use]
pub fn strand_feature_groups() -> [(bool, [usize; 5]); 2] {
    [(false, [0, 1, 2, 3, 4]), (true, [5, 6, 7, 8, 9])]
}

/// Raw pileup counts for one window, one row per `(major, minor)` column.
#[derive(Debug, Clone, Default)]
pub struct PileupCounts {
    /// Count matrix, shape `[num_columns, NUM_FEATURES]`.
    pub counts: Array2<i64>,
    /// Draft coordinate per column.
    pub positions_major: Vec<i64>,
    /// Insertion offset per column.
    pub positions_minor: Vec<i64>,
}

impl PileupCounts {
    /// Whether no column was produced (no reads overlapped the window).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions_major.is_empty()
    }
}

/// Builds the pileup for `[start, end)` from the given overlapping reads.
///
/// Only draft positions covered by at least one aligned base or deletion get
/// a column; uncovered stretches are simply absent and show up downstream as
/// discontinuities in `major`.
#[must_use]
pub fn calculate_pileup(reads: &[AlignmentRecord], start: i64, end: i64) -> PileupCounts {
    let region_len = (end - start).max(0) as usize;
    let mut covered = vec![false; region_len];
    let mut max_ins = vec![0usize; region_len];

    // First pass: which draft positions are covered, and how long is the
    // longest insertion after each one.
    for read in reads {
        let mut ref_pos = read.ref_start;
        for op in &read.cigar {
            match op.kind {
                CigarOpKind::Match | CigarOpKind::SequenceMatch | CigarOpKind::SequenceMismatch | CigarOpKind::Deletion => {
                    for p in ref_pos..ref_pos + op.len as i64 {
                        if p >= start && p < end {
                            covered[(p - start) as usize] = true;
                        }
                    }
                    ref_pos += op.len as i64;
                }
                CigarOpKind::Insertion => {
                    let anchor = ref_pos - 1;
                    if anchor >= read.ref_start && anchor >= start && anchor < end {
                        let slot = &mut max_ins[(anchor - start) as usize];
                        *slot = (*slot).max(op.len);
                    }
                }
                CigarOpKind::Skip => ref_pos += op.len as i64,
                CigarOpKind::SoftClip | CigarOpKind::HardClip | CigarOpKind::Pad => {}
            }
        }
    }

    // Materialise the column set and its index.
    let mut positions_major = Vec::new();
    let mut positions_minor = Vec::new();
    let mut column_index: HashMap<(i64, i64), usize> = HashMap::new();
    for offset in 0..region_len {
        if !covered[offset] {
            continue;
        }
        let major = start + offset as i64;
        for minor in 0..=max_ins[offset] as i64 {
            column_index.insert((major, minor), positions_major.len());
            positions_major.push(major);
            positions_minor.push(minor);
        }
    }

    if positions_major.is_empty() {
        return PileupCounts::default();
    }

    let mut counts = Array2::<i64>::zeros((positions_major.len(), NUM_FEATURES));

    // Second pass: accumulate base and deletion observations.
    for read in reads {
        let mut ref_pos = read.ref_start;
        let mut query_pos = 0usize;
        for op in &read.cigar {
            match op.kind {
                CigarOpKind::Match | CigarOpKind::SequenceMatch | CigarOpKind::SequenceMismatch => {
                    for i in 0..op.len {
                        let p = ref_pos + i as i64;
                        if p < start || p >= end {
                            continue;
                        }
                        let col = column_index[&(p, 0)];
                        if let Some(feat) =
                            base_feature_index(read.seq[query_pos + i], read.is_reverse)
                        {
                            counts[[col, feat]] += 1;
                        }
                    }
                    ref_pos += op.len as i64;
                    query_pos += op.len;
                }
                CigarOpKind::Deletion => {
                    for p in ref_pos..ref_pos + op.len as i64 {
                        if p >= start && p < end {
                            let col = column_index[&(p, 0)];
                            counts[[col, del_feature_index(read.is_reverse)]] += 1;
                        }
                    }
                    ref_pos += op.len as i64;
                }
                CigarOpKind::Insertion => {
                    let anchor = ref_pos - 1;
                    if anchor >= read.ref_start && anchor >= start && anchor < end {
                        for k in 0..op.len {
                            // The anchor may be uncovered (e.g. an insertion
                            // right after a reference skip); such columns
                            // were never materialised.
                            let Some(&col) = column_index.get(&(anchor, k as i64 + 1)) else {
                                break;
                            };
                            if let Some(feat) =
                                base_feature_index(read.seq[query_pos + k], read.is_reverse)
                            {
                                counts[[col, feat]] += 1;
                            }
                        }
                    }
                    query_pos += op.len;
                }
                CigarOpKind::Skip => ref_pos += op.len as i64,
                CigarOpKind::SoftClip => query_pos += op.len,
                CigarOpKind::HardClip | CigarOpKind::Pad => {}
            }
        }
    }

    PileupCounts { counts, positions_major, positions_minor }
}
