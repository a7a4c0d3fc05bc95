//! Trim planning: computing per-sample splice windows so that neighbouring
//! samples contribute each draft column exactly once.
//!
//! Neighbouring samples usually overlap (window overlap, or the full-length
//! tail chunk from sample splitting). For each adjacent pair the planner
//! classifies the relationship between their position ranges and picks cut
//! points; the stitcher then emits only the `[start, end)` slice of every
//! sample.

use crate::errors::{BurnishError, Result};
use crate::sample::Sample;
use crate::windowing::RegionInt;

/// Minimum number of distinct major positions required on both sides before
/// the overlap heuristic will search for a junction.
const UNIQ_MAJ: i64 = 3;

/// Per-sample splice window `[start, end)` into the sample's columns.
///
/// `start == -1` marks a sample that is dropped entirely (contained in a
/// neighbour or clipped away by a region).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimInfo {
    pub start: i64,
    pub end: i64,
    /// The cut point came from the streak heuristic rather than a clean
    /// structural match.
    pub heuristic: bool,
    /// No sample continues this one; the stitcher fills any following gap
    /// from the draft.
    pub is_last_in_contig: bool,
}

impl Default for TrimInfo {
    fn default() -> Self {
        Self { start: 0, end: -1, heuristic: false, is_last_in_contig: false }
    }
}

impl TrimInfo {
    /// Whether the sample is excluded from stitching altogether.
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.start < 0 || self.end <= self.start
    }
}

/// How two samples relate on the draft, after ordering them by start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    DifferentRef,
    ForwardOverlap,
    ReverseOverlap,
    ForwardAbutted,
    ReverseAbutted,
    ForwardGapped,
    ReverseGapped,
    S2WithinS1,
    S1WithinS2,
    Unknown,
}

/// First column index of `s` whose position is greater than `target`.
fn upper_bound(s: &Sample, target: (i64, i64)) -> usize {
    let mut lo = 0;
    let mut hi = s.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if s.position(mid) <= target { lo = mid + 1 } else { hi = mid }
    }
    lo
}

/// First index of `values` that is `>= target`.
fn lower_bound(values: &[i64], target: i64) -> usize {
    values.partition_point(|&v| v < target)
}

/// Number of distinct values in `values[start..end]`.
fn count_unique(values: &[i64], start: usize, end: usize) -> i64 {
    let end = end.min(values.len());
    if start >= end {
        return 0;
    }
    let mut prev = values[start];
    let mut ret = 1;
    for &v in &values[start + 1..end] {
        if v != prev {
            prev = v;
            ret += 1;
        }
    }
    ret
}

/// Length of the run of values equal to `values[start]`.
fn streak_count(values: &[i64], start: usize) -> i64 {
    if start >= values.len() {
        return 0;
    }
    values[start..].iter().take_while(|&&v| v == values[start]).count() as i64
}

/// Classifies the relationship between two samples.
#[must_use]
pub fn relative_position(s1: &Sample, s2: &Sample) -> Relationship {
    let ordered_abuts = |a: &Sample, b: &Sample| -> bool {
        let (a_end_maj, a_end_min) = a.last_position();
        let (b_start_maj, b_start_min) = b.position(0);
        (b_start_maj == a_end_maj + 1 && b_start_min == 0)
            || (b_start_maj == a_end_maj && b_start_min == a_end_min + 1)
    };
    let ordered_contained = |a: &Sample, b: &Sample| -> bool {
        b.position(0) >= a.position(0) && b.last_position() <= a.last_position()
    };
    let ordered_overlaps = |a: &Sample, b: &Sample| -> bool {
        let (a_end_maj, a_end_min) = a.last_position();
        let (b_start_maj, b_start_min) = b.position(0);
        b_start_maj < a_end_maj || (b_start_maj == a_end_maj && b_start_min < a_end_min + 1)
    };
    let ordered_gapped = |a: &Sample, b: &Sample| -> bool {
        let (a_end_maj, a_end_min) = a.last_position();
        let (b_start_maj, b_start_min) = b.position(0);
        b_start_maj > a_end_maj + 1
            || (b_start_maj > a_end_maj && b_start_min > 0)
            || (b_start_maj == a_end_maj && b_start_min > a_end_min + 1)
    };

    if s1.seq_id != s2.seq_id {
        return Relationship::DifferentRef;
    }

    // Order by first position, then by length descending.
    let is_ordered = (s1.position(0), -(s1.len() as i64)) <= (s2.position(0), -(s2.len() as i64));
    let (a, b) = if is_ordered { (s1, s2) } else { (s2, s1) };

    if ordered_contained(a, b) {
        if is_ordered { Relationship::S2WithinS1 } else { Relationship::S1WithinS2 }
    } else if ordered_abuts(a, b) {
        if is_ordered { Relationship::ForwardAbutted } else { Relationship::ReverseAbutted }
    } else if ordered_overlaps(a, b) {
        if is_ordered { Relationship::ForwardOverlap } else { Relationship::ReverseOverlap }
    } else if ordered_gapped(a, b) {
        if is_ordered { Relationship::ForwardGapped } else { Relationship::ReverseGapped }
    } else {
        Relationship::Unknown
    }
}

/// Computes the cut indices `(end_of_s1, start_of_s2, used_heuristic)` for a
/// forward-overlapping pair.
///
/// When the overlapping column runs have identical insertion structure the
/// overlap is split at its midpoint. Otherwise a heuristic scans outward from
/// the midpoint draft coordinate for an offset where the runs of equal major
/// positions have the same length on both sides; if none exists, the pair is
/// spliced exactly after the last position common to both samples.
fn overlap_indices(s1: &Sample, s2: &Sample) -> Result<(i64, i64, bool)> {
    let rel = relative_position(s1, s2);

    if rel == Relationship::ForwardAbutted {
        return Ok((s1.len() as i64, 0, false));
    }
    if rel != Relationship::ForwardOverlap {
        return Err(BurnishError::TrimInvariant {
            reason: format!("cannot overlap samples, relationship is {rel:?}"),
        });
    }

    let ovl_start_ind1 = upper_bound(s1, s2.position(0));
    if ovl_start_ind1 == 0 {
        return Err(BurnishError::TrimInvariant {
            reason: "overlapping samples share no coordinate".to_string(),
        });
    }
    let ovl_start_ind1 = ovl_start_ind1 - 1;
    let ovl_end_ind2 = upper_bound(s2, s1.last_position());

    // Identical insertion structure across the overlap: cut at the midpoint.
    let s1_tail = &s1.positions_minor[ovl_start_ind1..];
    let s2_head = &s2.positions_minor[..ovl_end_ind2];
    if s1_tail == s2_head {
        let overlap_len = ovl_end_ind2 as i64;
        let pad_1 = overlap_len / 2;
        let pad_2 = overlap_len - pad_1;
        return Ok((ovl_start_ind1 as i64 + pad_1, ovl_end_ind2 as i64 - pad_2, false));
    }

    // Structures differ, e.g. chunking changed which reads were seen on each
    // side. Look for a junction near the middle where both sides have the
    // same number of minor positions.
    let mut end_1_ind: i64 = -1;
    let mut start_2_ind: i64 = -1;

    let unique_s1 = count_unique(&s1.positions_major, ovl_start_ind1, s1.len());
    let unique_s2 = count_unique(&s2.positions_major, 0, ovl_end_ind2);

    if unique_s1 > UNIQ_MAJ && unique_s2 > UNIQ_MAJ {
        let start = s1.positions_major[ovl_start_ind1];
        let end = *s1.positions_major.last().expect("non-empty sample");
        let mid = start + (end - start) / 2;
        let mut offset = 1;

        'search: while end_1_ind < 0 {
            if mid + offset > end && mid - offset < start {
                break;
            }
            for test in [offset, -offset] {
                let left = lower_bound(&s1.positions_major, mid + test);
                let right = lower_bound(&s2.positions_major, mid + test);
                if left < s1.len()
                    && right < s2.len()
                    && streak_count(&s1.positions_major, left)
                        == streak_count(&s2.positions_major, right)
                {
                    end_1_ind = left as i64;
                    start_2_ind = right as i64;
                    break 'search;
                }
            }
            offset += 1;
        }
    }

    if end_1_ind < 0 {
        // No viable junction: splice exactly after the last column of s1 that
        // is positioned at or before s2's start, so nothing is emitted twice.
        end_1_ind = ovl_start_ind1 as i64 + 1;
        start_2_ind = upper_bound(s2, s1.position(ovl_start_ind1)) as i64;
    }

    debug_assert!(end_1_ind >= 0 && start_2_ind >= 0);

    Ok((end_1_ind, start_2_ind, true))
}

/// Computes splice windows for an ordered run of samples.
///
/// The caller is responsible for sorting by `(seq_id, start)`; only
/// neighbouring samples are compared. When a `region` is given, each trim is
/// additionally clipped to columns whose major position falls inside it;
/// samples clipped away completely get `start == end == -1`.
pub fn trim_samples(samples: &[&Sample], region: Option<RegionInt>) -> Result<Vec<TrimInfo>> {
    let mut result: Vec<TrimInfo> = vec![TrimInfo::default(); samples.len()];

    if samples.is_empty() {
        return Ok(result);
    }

    result[0].start = 0;
    result[0].end = samples[0].len() as i64;

    let mut idx_s1 = 0;
    for i in 1..samples.len() {
        let s1 = samples[idx_s1];
        let s2 = samples[i];

        let mut trim2 = TrimInfo { start: 0, end: s2.len() as i64, ..TrimInfo::default() };

        match relative_position(s1, s2) {
            Relationship::S2WithinS1 => {
                // s2 adds nothing; drop it and keep comparing against s1.
                result[i] = TrimInfo { start: 0, end: 0, ..TrimInfo::default() };
                continue;
            }
            Relationship::ForwardOverlap => {
                let (end1, start2, heuristic) = overlap_indices(s1, s2)?;
                result[idx_s1].end = end1;
                trim2.start = start2;
                trim2.heuristic = heuristic;
            }
            Relationship::ForwardAbutted => {}
            Relationship::ForwardGapped => {
                trim2.is_last_in_contig = true;
            }
            Relationship::DifferentRef => {
                // No trimming across draft sequences.
            }
            rel => {
                return Err(BurnishError::TrimInvariant {
                    reason: format!("unhandled overlap type whilst stitching chunks: {rel:?}"),
                });
            }
        }

        if trim2.start < 0 {
            return Err(BurnishError::TrimInvariant {
                reason: format!("negative trim start for sample {i}"),
            });
        }

        result[i] = trim2;
        idx_s1 = i;
    }

    if let Some(last) = result.last_mut() {
        if !last.is_dropped() {
            last.end = samples[samples.len() - 1].len() as i64;
        }
        last.is_last_in_contig = true;
    }

    if let Some(region) = region {
        clip_to_region(samples, &mut result, region);
    }

    Ok(result)
}

/// Constrains every trim to columns whose major position lies in the region.
fn clip_to_region(samples: &[&Sample], trims: &mut [TrimInfo], region: RegionInt) {
    for (sample, trim) in samples.iter().zip(trims.iter_mut()) {
        if trim.is_dropped() {
            continue;
        }
        let first_inside = lower_bound(&sample.positions_major, region.start) as i64;
        let first_outside = lower_bound(&sample.positions_major, region.end) as i64;
        let start = trim.start.max(first_inside);
        let end = trim.end.min(first_outside);
        if start >= end {
            trim.start = -1;
            trim.end = -1;
        } else {
            trim.start = start;
            trim.end = end;
        }
    }
}
