//! Variant calling from decoded samples and their class probabilities.
//!
//! Works on the same logits the consensus path produced. Samples for one
//! draft are trimmed to splice exactly once, re-joined so that every piece
//! begins and ends on a non-variant anchor column, and scanned for runs of
//! columns where the prediction disagrees with the draft. Each run becomes
//! one variant record scored from the class probabilities.

use ndarray::{Array2, s};

use crate::consensus::GAP;
use crate::decoder::Decoder;
use crate::errors::{BurnishError, Result};
use crate::phred::{VARIANT_QUAL_CAP, error_to_phred};
use crate::reference::DraftReader;
use crate::sample::Sample;
use crate::tensor;
use crate::trim;

/// One called variant against the draft.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Index of the draft sequence.
    pub seq_id: i32,
    /// Zero-based draft coordinate of the anchor column.
    pub pos: i64,
    /// Draft allele, gaps removed.
    pub ref_allele: String,
    /// Called allele, gaps removed.
    pub alt_allele: String,
    /// Filter column value.
    pub filter: String,
    /// Variant quality: called-allele score minus draft-allele score.
    pub qual: f64,
    /// Genotype fields, in output order.
    pub genotype: Vec<(String, String)>,
}

/// A sample paired with its per-column class logits, shape `[len, C]`.
#[derive(Debug, Clone)]
pub struct VariantCallingSample {
    pub sample: Sample,
    pub logits: Array2<f32>,
}

impl VariantCallingSample {
    /// Checks that the logits cover exactly the sample's columns.
    pub fn validate(&self) -> Result<()> {
        self.sample.validate()?;
        if self.logits.nrows() != self.sample.len() {
            return Err(BurnishError::SampleInvariant {
                reason: format!(
                    "logits cover {} columns but the sample has {}",
                    self.logits.nrows(),
                    self.sample.len()
                ),
            });
        }
        Ok(())
    }

    /// Copies out columns `[idx_start, idx_end)` with their logits.
    pub fn slice(&self, idx_start: usize, idx_end: usize) -> Result<VariantCallingSample> {
        Ok(VariantCallingSample {
            sample: self.sample.slice(idx_start, idx_end)?,
            logits: self.logits.slice(s![idx_start..idx_end, ..]).to_owned(),
        })
    }
}

/// Copies the draft bases under a sample, putting `*` at insertion columns.
pub fn extract_draft_with_gaps(
    draft: &[u8],
    positions_major: &[i64],
    positions_minor: &[i64],
) -> Result<Vec<u8>> {
    if positions_major.len() != positions_minor.len() {
        return Err(BurnishError::SampleInvariant {
            reason: format!(
                "major and minor positions differ in length: {} vs {}",
                positions_major.len(),
                positions_minor.len()
            ),
        });
    }

    positions_major
        .iter()
        .zip(positions_minor)
        .map(|(&major, &minor)| {
            if minor != 0 {
                return Ok(GAP);
            }
            draft.get(major as usize).copied().ok_or_else(|| BurnishError::SampleInvariant {
                reason: format!("major position {major} outside draft of length {}", draft.len()),
            })
        })
        .collect()
}

/// Run-length encodes a boolean mask into `(start, end, value)` runs.
#[must_use]
pub fn run_length_encode(mask: &[bool]) -> Vec<(usize, usize, bool)> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=mask.len() {
        if i == mask.len() || mask[i] != mask[start] {
            runs.push((start, i, mask[start]));
            start = i;
        }
    }
    runs
}

/// Marks candidate variant columns.
///
/// A column is a candidate where prediction and draft disagree; when any
/// column of an insertion run is a candidate, every column of that run is
/// marked.
pub fn variant_columns(minor: &[i64], reference: &[u8], prediction: &[u8]) -> Result<Vec<bool>> {
    if minor.len() != reference.len() || reference.len() != prediction.len() {
        return Err(BurnishError::SampleInvariant {
            reason: format!(
                "variant column inputs differ in length: minor = {}, reference = {}, prediction = {}",
                minor.len(),
                reference.len(),
                prediction.len()
            ),
        });
    }
    if minor.is_empty() {
        return Ok(Vec::new());
    }

    let len = minor.len();
    let mut ret = vec![false; len];

    let mut insert_length = 0;
    let mut is_var = reference[0] != prediction[0]; // samples begin on a major column
    ret[0] = is_var;

    for i in 1..len {
        if minor[i] == 0 {
            // Start of a new draft position: settle the previous insert run.
            if is_var {
                for slot in &mut ret[i - insert_length..i] {
                    *slot = true;
                }
            }
            is_var = reference[i] != prediction[i];
            ret[i] = is_var;
            insert_length = 0;
        } else {
            insert_length += 1;
            is_var = is_var || (reference[i] != prediction[i]);
        }
    }

    if is_var {
        for slot in &mut ret[len - insert_length..len] {
            *slot = true;
        }
    }

    Ok(ret)
}

/// Merges runs of contiguous variant-calling samples.
fn merge_vc_samples(vc_samples: Vec<VariantCallingSample>) -> Result<Vec<VariantCallingSample>> {
    let mut ret: Vec<VariantCallingSample> = Vec::new();

    for vc in vc_samples {
        match ret.last_mut() {
            Some(prev) if prev.sample.is_contiguous_with(&vc.sample) => {
                prev.sample.extend(&vc.sample)?;
                let logits = std::mem::take(&mut prev.logits);
                prev.logits = tensor::cat_rows(vec![logits, vc.logits])?;
            }
            _ => ret.push(vc),
        }
    }

    Ok(ret)
}

/// Restructures neighbouring samples so each piece starts and ends on a
/// non-variant anchor column.
///
/// A sample whose every column disagrees with the draft is deferred and
/// merged with its successor; otherwise the sample is split after its last
/// agreeing on-draft column and the head is flushed together with anything
/// deferred before it.
pub fn join_samples(
    vc_samples: Vec<VariantCallingSample>,
    draft: &[u8],
    decoder: &Decoder,
) -> Result<Vec<VariantCallingSample>> {
    let mut ret = Vec::new();
    let mut queue: Vec<VariantCallingSample> = Vec::new();

    let is_diff = |call: u8, draft_base: u8| -> bool {
        call != draft_base || (call == GAP && draft_base == GAP)
    };

    for vc_sample in vc_samples {
        vc_sample.validate()?;

        let call = decoder.decode_single(&vc_sample.logits.view(), VARIANT_QUAL_CAP)?.seq;
        let draft_with_gaps = extract_draft_with_gaps(
            draft,
            &vc_sample.sample.positions_major,
            &vc_sample.sample.positions_minor,
        )?;

        let num_positions = vc_sample.sample.len();
        let diff_count =
            call.iter().zip(&draft_with_gaps).filter(|&(&c, &d)| is_diff(c, d)).count();
        if diff_count == num_positions {
            // Not a single agreeing column; merge the whole sample forward.
            queue.push(vc_sample);
            continue;
        }

        // Split after the last agreeing on-draft column.
        let mut last_non_var_start = 0;
        for j in (0..num_positions).rev() {
            if vc_sample.sample.positions_minor[j] == 0 && !is_diff(call[j], draft_with_gaps[j]) {
                last_non_var_start = j;
                break;
            }
        }

        if last_non_var_start > 0 {
            queue.push(vc_sample.slice(0, last_non_var_start)?);
        }
        let right_slice = vc_sample.slice(last_non_var_start, num_positions)?;

        if !queue.is_empty() {
            ret.extend(merge_vc_samples(std::mem::take(&mut queue))?);
        }
        queue.push(right_slice);
    }

    if !queue.is_empty() {
        ret.extend(merge_vc_samples(queue)?);
    }

    Ok(ret)
}

/// Sums capped Phred scores of a sequence under the class probabilities.
///
/// `substitute_unknown` maps characters outside the label scheme (e.g. `N`
/// in the draft) to the gap class before lookup.
fn sequence_quality(
    decoder: &Decoder,
    class_probs: &Array2<f32>,
    offset: usize,
    seq: &[u8],
) -> f64 {
    let gap_class = decoder.scheme.class_of(GAP).unwrap_or(0);
    seq.iter()
        .enumerate()
        .map(|(i, &c)| {
            let class = decoder.scheme.class_of(c.to_ascii_uppercase()).unwrap_or(gap_class);
            let err = 1.0 - f64::from(class_probs[[offset + i, class]]);
            error_to_phred(err, VARIANT_QUAL_CAP)
        })
        .sum()
}

/// Extracts variant records from one joined sample.
pub fn decode_variants(
    decoder: &Decoder,
    vc_sample: &VariantCallingSample,
    draft: &[u8],
    ambig_ref: bool,
    _gvcf: bool,
) -> Result<Vec<Variant>> {
    if vc_sample.sample.is_empty() {
        return Ok(Vec::new());
    }

    // Samples must begin on a non-insertion column.
    if vc_sample.sample.positions_minor[0] != 0 {
        return Err(BurnishError::SampleInvariant {
            reason: format!(
                "the first position of a sample must not be an insertion (sample start {:?})",
                vc_sample.sample.position(0)
            ),
        });
    }
    vc_sample.validate()?;

    let prediction = decoder.decode_single(&vc_sample.logits.view(), VARIANT_QUAL_CAP)?.seq;
    let reference = extract_draft_with_gaps(
        draft,
        &vc_sample.sample.positions_major,
        &vc_sample.sample.positions_minor,
    )?;

    let is_variant = variant_columns(&vc_sample.sample.positions_minor, &reference, &prediction)?;
    let runs = run_length_encode(&is_variant);

    let class_probs = Decoder::class_probabilities(&vc_sample.logits.view());
    let remove_gaps =
        |seq: &[u8]| -> Vec<u8> { seq.iter().copied().filter(|&c| c != GAP).collect() };

    let mut variants = Vec::new();
    for (rstart, rend, is_var) in runs {
        if !is_var {
            continue;
        }

        let ref_with_gaps = &reference[rstart..rend];
        let pred_with_gaps = &prediction[rstart..rend];

        let mut var_ref = remove_gaps(ref_with_gaps);
        let mut var_pred = remove_gaps(pred_with_gaps);

        // A deletion followed by an insertion can cancel to a non-variant.
        if var_ref == var_pred {
            continue;
        }
        if !ambig_ref && !var_ref.iter().all(|&c| decoder.scheme.class_of(c).is_some()) {
            continue;
        }

        let ref_qv = sequence_quality(decoder, &class_probs, rstart, ref_with_gaps);
        let pred_qv = sequence_quality(decoder, &class_probs, rstart, pred_with_gaps);
        let qual = pred_qv - ref_qv;

        let mut var_pos = vc_sample.sample.positions_major[rstart];
        if vc_sample.sample.positions_minor[rstart] != 0 {
            // Run starts on an insert: anchor it on its draft base.
            var_ref.insert(0, draft[var_pos as usize]);
            var_pred.insert(0, draft[var_pos as usize]);
        } else if (var_ref.is_empty() || var_pred.is_empty()) && var_pos > 0 {
            // A pure insertion or deletion needs a base to anchor the record.
            var_pos -= 1;
            var_ref.insert(0, draft[var_pos as usize]);
            var_pred.insert(0, draft[var_pos as usize]);
        }

        let qual_str = format!("{qual:.3}");
        variants.push(Variant {
            seq_id: vc_sample.sample.seq_id,
            pos: var_pos,
            ref_allele: String::from_utf8_lossy(&var_ref).into_owned(),
            alt_allele: String::from_utf8_lossy(&var_pred).into_owned(),
            filter: "PASS".to_string(),
            qual,
            genotype: vec![("GT".to_string(), "1".to_string()), ("GQ".to_string(), qual_str)],
        });
    }

    Ok(variants)
}

/// Calls variants over all samples of a draft batch.
///
/// Groups samples by draft sequence, trims each group so overlapping samples
/// splice exactly once, rejoins on non-variant anchors and decodes the runs.
pub fn call_variants(
    vc_input_data: Vec<VariantCallingSample>,
    draft_reader: &DraftReader,
    draft_lens: &[(String, i64)],
    decoder: &Decoder,
    ambig_ref: bool,
) -> anyhow::Result<Vec<Variant>> {
    // Group sample indices by draft sequence.
    let mut groups: Vec<Vec<(i64, usize)>> = vec![Vec::new(); draft_lens.len()];
    for (i, vc) in vc_input_data.iter().enumerate() {
        let seq_id = vc.sample.seq_id;
        if seq_id < 0 || seq_id as usize >= groups.len() {
            continue;
        }
        groups[seq_id as usize].push((vc.sample.start(), i));
    }

    let mut all_variants = Vec::new();

    for (seq_id, mut group) in groups.into_iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        group.sort_unstable();

        let draft = draft_reader.fetch_all(&draft_lens[seq_id].0)?;

        let local_samples: Vec<&Sample> =
            group.iter().map(|&(_, id)| &vc_input_data[id].sample).collect();
        let trims = trim::trim_samples(&local_samples, None)?;

        // Apply the trims to samples and logits alike.
        let mut trimmed = Vec::with_capacity(group.len());
        for (&(_, id), t) in group.iter().zip(&trims) {
            if t.is_dropped() {
                continue;
            }
            trimmed.push(vc_input_data[id].slice(t.start as usize, t.end as usize)?);
        }

        let joined = join_samples(trimmed, draft, decoder)?;
        for vc_sample in &joined {
            all_variants.extend(decode_variants(decoder, vc_sample, draft, ambig_ref, false)?);
        }
    }

    Ok(all_variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::LabelScheme;
    use crate::sample::tests::sample_from_positions;

    /// Logits strongly favouring the given called sequence.
    fn logits_for(call: &[u8]) -> Array2<f32> {
        let scheme = LabelScheme::Haploid;
        let mut logits = Array2::<f32>::from_elem((call.len(), 5), -9.0);
        for (i, &c) in call.iter().enumerate() {
            logits[[i, scheme.class_of(c).expect("symbol in scheme")]] = 9.0;
        }
        logits
    }

    fn vc_sample(major: Vec<i64>, minor: Vec<i64>, call: &[u8]) -> VariantCallingSample {
        VariantCallingSample {
            sample: sample_from_positions(major, minor, 0, 0),
            logits: logits_for(call),
        }
    }

    #[test]
    fn test_extract_draft_with_gaps() {
        let draft = b"ACGT";
        let out = extract_draft_with_gaps(draft, &[0, 1, 1, 2], &[0, 0, 1, 0]).unwrap();
        assert_eq!(out, b"AC*G");
    }

    #[test]
    fn test_extract_draft_out_of_bounds() {
        assert!(extract_draft_with_gaps(b"AC", &[5], &[0]).is_err());
    }

    #[test]
    fn test_run_length_encode() {
        let runs = run_length_encode(&[false, false, true, true, false]);
        assert_eq!(runs, vec![(0, 2, false), (2, 4, true), (4, 5, false)]);
        assert!(run_length_encode(&[]).is_empty());
    }

    #[test]
    fn test_variant_columns_snv() {
        let cols = variant_columns(&[0, 0, 0], b"ACG", b"AGG").unwrap();
        assert_eq!(cols, vec![false, true, false]);
    }

    #[test]
    fn test_variant_columns_insert_run_marked_whole() {
        // Insertion run after position 0; one inserted column differs, so
        // the whole insert run is marked (the agreeing anchor is not).
        let minor = vec![0, 1, 2, 0];
        let reference = b"A**C";
        let prediction = b"AT*C";
        let cols = variant_columns(&minor, reference, prediction).unwrap();
        assert_eq!(cols, vec![false, true, true, false]);
    }

    #[test]
    fn test_variant_columns_trailing_insert() {
        let minor = vec![0, 1];
        let cols = variant_columns(&minor, b"A*", b"AT").unwrap();
        assert_eq!(cols, vec![true, true]);
    }

    #[test]
    fn test_variant_columns_length_mismatch() {
        assert!(variant_columns(&[0], b"AC", b"AC").is_err());
    }

    #[test]
    fn test_decode_variants_snv() {
        let draft = b"ACGTACGT";
        let vc = vc_sample((0..8).collect(), vec![0; 8], b"ACCTACGT");
        let decoder = Decoder::default();
        let variants = decode_variants(&decoder, &vc, draft, false, false).unwrap();
        assert_eq!(variants.len(), 1);
        let v = &variants[0];
        assert_eq!(v.pos, 2);
        assert_eq!(v.ref_allele, "G");
        assert_eq!(v.alt_allele, "C");
        assert!(v.qual > 0.0);
        assert_eq!(v.genotype[0], ("GT".to_string(), "1".to_string()));
    }

    #[test]
    fn test_decode_variants_insertion_prepends_anchor() {
        let draft = b"ACGTACGT";
        // Insert T after draft position 3.
        let mut major: Vec<i64> = (0..8).collect();
        major.insert(4, 3);
        let mut minor = vec![0i64; 8];
        minor.insert(4, 1);
        let vc = vc_sample(major, minor, b"ACGTTACGT");
        let decoder = Decoder::default();
        let variants = decode_variants(&decoder, &vc, draft, false, false).unwrap();
        assert_eq!(variants.len(), 1);
        let v = &variants[0];
        assert_eq!(v.pos, 3);
        assert_eq!(v.ref_allele, "T");
        assert_eq!(v.alt_allele, "TT");
    }

    #[test]
    fn test_decode_variants_deletion_anchors_on_previous_base() {
        let draft = b"ACGTACGT";
        // Draft position 3 deleted.
        let vc = vc_sample((0..8).collect(), vec![0; 8], b"ACG*ACGT");
        let decoder = Decoder::default();
        let variants = decode_variants(&decoder, &vc, draft, false, false).unwrap();
        assert_eq!(variants.len(), 1);
        let v = &variants[0];
        assert_eq!(v.pos, 2);
        assert_eq!(v.ref_allele, "GT");
        assert_eq!(v.alt_allele, "G");
    }

    #[test]
    fn test_decode_variants_matching_sample_yields_none() {
        let draft = b"ACGTACGT";
        let vc = vc_sample((0..8).collect(), vec![0; 8], b"ACGTACGT");
        let decoder = Decoder::default();
        let variants = decode_variants(&decoder, &vc, draft, false, false).unwrap();
        assert!(variants.is_empty());
    }

    #[test]
    fn test_decode_variants_ambiguous_ref_skipped() {
        let draft = b"ACNTACGT";
        let vc = vc_sample((0..8).collect(), vec![0; 8], b"ACGTACGT");
        let decoder = Decoder::default();
        // N in the draft allele and ambig_ref off: the run is skipped.
        let variants = decode_variants(&decoder, &vc, draft, false, false).unwrap();
        assert!(variants.is_empty());
        // With ambig_ref on it is reported.
        let variants = decode_variants(&decoder, &vc, draft, true, false).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].ref_allele, "N");
    }

    #[test]
    fn test_decode_variants_rejects_insert_start() {
        let draft = b"ACGT";
        let vc = vc_sample(vec![1, 2], vec![1, 0], b"CG");
        let decoder = Decoder::default();
        assert!(decode_variants(&decoder, &vc, draft, false, false).is_err());
    }

    #[test]
    fn test_variant_soundness() {
        let draft = b"ACGTACGT";
        let vc = vc_sample((0..8).collect(), vec![0; 8], b"TCGAACGT");
        let decoder = Decoder::default();
        for v in decode_variants(&decoder, &vc, draft, false, false).unwrap() {
            assert_ne!(v.ref_allele, v.alt_allele);
            assert!(v.pos >= 0 && (v.pos as usize) < draft.len());
        }
    }

    #[test]
    fn test_merge_vc_samples_joins_contiguous() {
        let a = vc_sample(vec![0, 1], vec![0, 0], b"AC");
        let b = vc_sample(vec![2, 3], vec![0, 0], b"GT");
        let merged = merge_vc_samples(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].sample.positions_major, vec![0, 1, 2, 3]);
        assert_eq!(merged[0].logits.nrows(), 4);
    }

    #[test]
    fn test_merge_vc_samples_keeps_gapped_apart() {
        let a = vc_sample(vec![0, 1], vec![0, 0], b"AC");
        let b = vc_sample(vec![5, 6], vec![0, 0], b"GT");
        let merged = merge_vc_samples(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_join_samples_splits_on_anchor() {
        let draft = b"ACGTACGT";
        // Disagreement at the last column only; the split lands after the
        // last agreeing on-draft column.
        let vc = vc_sample((0..8).collect(), vec![0; 8], b"ACGTACGA");
        let decoder = Decoder::default();
        let joined = join_samples(vec![vc], draft, &decoder).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].sample.positions_major, (0..6).collect::<Vec<i64>>());
        assert_eq!(joined[1].sample.positions_major, vec![6, 7]);
    }

    #[test]
    fn test_call_variants_end_to_end_group() {
        let draft_reader = crate::reference::DraftReader::from_sequences(vec![(
            "ctg".to_string(),
            b"ACGTACGT".to_vec(),
        )]);
        let draft_lens = draft_reader.draft_lens().to_vec();
        let decoder = Decoder::default();

        // Two overlapping samples, both calling the same SNV at position 2.
        let s1 = vc_sample((0..6).collect(), vec![0; 6], b"ACCTAC");
        let s2 = vc_sample((4..8).collect(), vec![0; 4], b"ACGT");
        let variants =
            call_variants(vec![s1, s2], &draft_reader, &draft_lens, &decoder, false).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].pos, 2);
        assert_eq!(variants[0].ref_allele, "G");
        assert_eq!(variants[0].alt_allele, "C");
    }
}
