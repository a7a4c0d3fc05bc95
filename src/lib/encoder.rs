//! Turning raw pileup counts into model-ready feature samples.
//!
//! The counts encoder applies read filters, builds the pileup for a window,
//! propagates depth onto insertion columns, optionally symmetrises indel
//! counts, and normalises counts into the feature matrix the model consumes.

use anyhow::Result;
use log::warn;
use ndarray::{Array1, Array2};

use crate::alignment::{AlignmentRecord, AlignmentSource};
use crate::errors::BurnishError;
use crate::pileup::{self, PileupCounts, del_feature_index, strand_feature_groups};
use crate::sample::Sample;

/// How pileup counts are scaled into features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormaliseType {
    /// Divide every count by the column's total depth.
    #[default]
    Total,
    /// Divide each strand group by the column's depth.
    FwdRev,
    /// Leave the counts as they are (cast to float).
    None,
}

impl NormaliseType {
    /// Parses a normalisation name, case-insensitively.
    pub fn parse(name: &str) -> Result<Self, BurnishError> {
        match name.to_ascii_lowercase().as_str() {
            "total" => Ok(NormaliseType::Total),
            "fwd_rev" => Ok(NormaliseType::FwdRev),
            "none" => Ok(NormaliseType::None),
            _ => Err(BurnishError::InvalidParameter {
                parameter: "normalise".to_string(),
                reason: format!("unknown normalise type '{name}'"),
            }),
        }
    }
}

/// Read-level filters applied before pileup construction.
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    /// Minimum mapping quality; lower-mapq reads are dropped.
    pub min_mapq: u8,
    /// Required integer tag, e.g. haplotype tag `HP`.
    pub tag_name: Option<[u8; 2]>,
    /// Value the tag must carry.
    pub tag_value: i64,
    /// Keep reads that lack the tag entirely.
    pub tag_keep_missing: bool,
    /// Required read group, when set.
    pub read_group: Option<String>,
}

impl ReadFilter {
    /// Whether a read passes every configured filter.
    #[must_use]
    pub fn keep(&self, read: &AlignmentRecord) -> bool {
        if read.mapq < self.min_mapq {
            return false;
        }
        if let Some(rg) = &self.read_group {
            if read.read_group.as_deref() != Some(rg.as_str()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag_name {
            match read.int_tags.get(tag) {
                Some(value) => {
                    if *value != self.tag_value {
                        return false;
                    }
                }
                None => {
                    if !self.tag_keep_missing {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Pileup-counts feature encoder.
#[derive(Debug, Clone, Default)]
pub struct CountsFeatureEncoder {
    /// Count normalisation mode.
    pub normalise: NormaliseType,
    /// Read filters.
    pub filter: ReadFilter,
    /// Force insertion-column coverage to match the anchor column.
    pub symmetric_indels: bool,
}

impl CountsFeatureEncoder {
    /// Encodes the pileup of `[start, end)` on `seq_name` into a sample.
    ///
    /// Returns an empty sample when no read passes the filters; callers treat
    /// empties as coverage holes.
    pub fn encode_region(
        &self,
        source: &mut dyn AlignmentSource,
        seq_name: &str,
        start: i64,
        end: i64,
        seq_id: i32,
        region_id: i32,
    ) -> Result<Sample> {
        let mut reads = source.fetch(seq_name, start, end)?;
        reads.retain(|read| self.filter.keep(read));

        let pileup = pileup::calculate_pileup(&reads, start, end);

        if pileup.is_empty() {
            warn!(
                "Pileup is zero-length for {}:{}-{} indicating no reads in this region.",
                seq_name,
                start + 1,
                end
            );
            return Ok(Sample { seq_id, region_id, ..Sample::default() });
        }

        Ok(self.counts_to_features(pileup, seq_id, region_id))
    }

    /// Converts raw counts into the normalised feature sample.
    fn counts_to_features(&self, mut pileup: PileupCounts, seq_id: i32, region_id: i32) -> Sample {
        let num_rows = pileup.positions_major.len();

        // Insertion columns and the most recent on-draft column before each.
        let mut minor_inds = Vec::new();
        let mut major_ind_at_minor_inds = Vec::new();
        let mut last_non_minor_index: i64 = -1;
        for i in 0..num_rows {
            if pileup.positions_minor[i] > 0 {
                minor_inds.push(i);
                major_ind_at_minor_inds.push(last_non_minor_index);
            } else {
                last_non_minor_index = i as i64;
            }
        }

        // Total per-column depth, then inherit the anchor's depth at inserts.
        let mut depth: Vec<i64> =
            (0..num_rows).map(|i| pileup.counts.row(i).iter().sum()).collect();
        for (&minor_ind, &major_ind) in minor_inds.iter().zip(&major_ind_at_minor_inds) {
            if major_ind >= 0 {
                depth[minor_ind] = depth[major_ind as usize];
            }
        }

        if self.symmetric_indels {
            // Coverage at an insertion equals coverage at its anchor base;
            // the difference is recorded as strand-specific deletions.
            for (is_reverse, group) in strand_feature_groups() {
                let dt_depth: Vec<i64> = (0..num_rows)
                    .map(|i| group.iter().map(|&f| pileup.counts[[i, f]]).sum())
                    .collect();
                let del_feat = del_feature_index(is_reverse);
                for (&minor_ind, &major_ind) in minor_inds.iter().zip(&major_ind_at_minor_inds) {
                    if major_ind >= 0 {
                        pileup.counts[[minor_ind, del_feat]] =
                            dt_depth[major_ind as usize] - dt_depth[minor_ind];
                    }
                }
            }
        }

        let num_features = pileup.counts.ncols();
        let mut features = Array2::<f32>::zeros((num_rows, num_features));
        match self.normalise {
            NormaliseType::Total => {
                for i in 0..num_rows {
                    let denom = depth[i].max(1) as f32;
                    for f in 0..num_features {
                        features[[i, f]] = pileup.counts[[i, f]] as f32 / denom;
                    }
                }
            }
            NormaliseType::FwdRev => {
                for (_, group) in strand_feature_groups() {
                    for i in 0..num_rows {
                        let denom = depth[i].max(1) as f32;
                        for &f in &group {
                            features[[i, f]] = pileup.counts[[i, f]] as f32 / denom;
                        }
                    }
                }
            }
            NormaliseType::None => {
                for i in 0..num_rows {
                    for f in 0..num_features {
                        features[[i, f]] = pileup.counts[[i, f]] as f32;
                    }
                }
            }
        }

        let depth = Array1::from_iter(depth.into_iter().map(|d| d as f32));

        Sample {
            features,
            positions_major: std::mem::take(&mut pileup.positions_major),
            positions_minor: std::mem::take(&mut pileup.positions_minor),
            depth,
            seq_id,
            region_id,
        }
    }
}
