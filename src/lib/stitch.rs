//! Stitching trimmed samples into a per-draft consensus.
//!
//! Samples arrive decoded and trimmed; the stitcher walks them in draft
//! order, splices the `[trim.start, trim.end)` slice of each, and fills
//! coverage gaps from the draft with `!` qualities. Deletion sentinels stay
//! in place here and are stripped just before output.

use crate::consensus::ConsensusResult;
use crate::errors::{BurnishError, Result};
use crate::sample::Sample;
use crate::trim::TrimInfo;

/// How gaps between samples are filled.
#[derive(Debug, Clone, Copy)]
pub struct StitchOptions {
    /// Fill uncovered draft stretches (from the draft or `fill_char`).
    pub fill_gaps: bool,
    /// Character to fill with instead of draft bases.
    pub fill_char: Option<u8>,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self { fill_gaps: true, fill_char: None }
    }
}

/// Splices the trimmed, decoded samples of one draft sequence.
///
/// `samples_for_seq` holds `(start, sample_index)` pairs sorted ascending by
/// start; indices address `samples`, `trims` and `sample_results` alike.
/// With no usable samples the draft itself is returned with all-`!`
/// qualities.
pub fn stitch_sequence(
    draft: &[u8],
    samples: &[Sample],
    trims: &[TrimInfo],
    sample_results: &[ConsensusResult],
    samples_for_seq: &[(i64, usize)],
    options: &StitchOptions,
) -> Result<ConsensusResult> {
    if samples.len() != trims.len() || samples.len() != sample_results.len() {
        return Err(BurnishError::TrimInvariant {
            reason: format!(
                "samples, trims and results differ in length: {} / {} / {}",
                samples.len(),
                trims.len(),
                sample_results.len()
            ),
        });
    }

    let mut result = ConsensusResult::default();

    // Inclusive draft coordinate of the last emitted base; -1 so a leading
    // draft chunk is not missed.
    let mut last_end: i64 = -1;

    for &(_, sample_index) in samples_for_seq {
        let trim = &trims[sample_index];
        if trim.is_dropped() {
            continue;
        }

        let sample = &samples[sample_index];
        let sample_result = &sample_results[sample_index];

        let (trim_start, trim_end) = (trim.start as usize, trim.end as usize);
        if trim_end > sample.len() || sample_result.len() != sample.len() {
            return Err(BurnishError::TrimInvariant {
                reason: format!(
                    "trim [{trim_start}, {trim_end}) does not fit sample of {} columns \
                     with {} decoded columns",
                    sample.len(),
                    sample_result.len()
                ),
            });
        }

        let start_pos = sample.positions_major[trim_start];
        let end_pos = *sample.positions_major.last().expect("non-empty stitched sample");

        if options.fill_gaps && start_pos > last_end + 1 {
            fill_from_draft(&mut result, draft, last_end + 1, start_pos, options.fill_char);
        }

        result.seq.extend_from_slice(&sample_result.seq[trim_start..trim_end]);
        result.quals.extend_from_slice(&sample_result.quals[trim_start..trim_end]);

        last_end = end_pos;
    }

    if result.is_empty() && last_end < 0 {
        // No sample contributed: the whole draft passes through unpolished.
        return Ok(ConsensusResult {
            seq: draft.to_vec(),
            quals: vec![b'!'; draft.len()],
        });
    }

    if options.fill_gaps && last_end + 1 < draft.len() as i64 {
        fill_from_draft(&mut result, draft, last_end + 1, draft.len() as i64, options.fill_char);
    }

    Ok(result)
}

fn fill_from_draft(
    result: &mut ConsensusResult,
    draft: &[u8],
    from: i64,
    to: i64,
    fill_char: Option<u8>,
) {
    let (from, to) = (from as usize, to as usize);
    match fill_char {
        Some(c) => result.seq.extend(std::iter::repeat_n(c, to - from)),
        None => result.seq.extend_from_slice(&draft[from..to]),
    }
    result.quals.extend(std::iter::repeat_n(b'!', to - from));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::tests::sample_from_positions;

    fn decoded(seq: &str) -> ConsensusResult {
        ConsensusResult { seq: seq.as_bytes().to_vec(), quals: vec![b'I'; seq.len()] }
    }

    fn full_trim(len: i64) -> TrimInfo {
        TrimInfo { start: 0, end: len, ..TrimInfo::default() }
    }

    #[test]
    fn test_stitch_no_samples_returns_draft() {
        let draft = b"ACGTACGT";
        let result =
            stitch_sequence(draft, &[], &[], &[], &[], &StitchOptions::default()).unwrap();
        assert_eq!(result.seq, draft);
        assert_eq!(result.quals, vec![b'!'; 8]);
    }

    #[test]
    fn test_stitch_single_full_sample() {
        let draft = b"ACGTACGT";
        let samples = vec![sample_from_positions((0..8).collect(), vec![0; 8], 0, 0)];
        let results = vec![decoded("ACGTACGT")];
        let trims = vec![full_trim(8)];
        let pairs = vec![(0i64, 0usize)];
        let result =
            stitch_sequence(draft, &samples, &trims, &results, &pairs, &StitchOptions::default())
                .unwrap();
        assert_eq!(result.seq, b"ACGTACGT");
        assert_eq!(result.quals, vec![b'I'; 8]);
    }

    #[test]
    fn test_stitch_fills_gap_from_draft() {
        let draft = b"ACGTACGT";
        // Coverage only over 0..4; tail filled from the draft.
        let samples = vec![sample_from_positions((0..4).collect(), vec![0; 4], 0, 0)];
        let results = vec![decoded("ACGT")];
        let trims = vec![full_trim(4)];
        let pairs = vec![(0i64, 0usize)];
        let result =
            stitch_sequence(draft, &samples, &trims, &results, &pairs, &StitchOptions::default())
                .unwrap();
        assert_eq!(result.seq, b"ACGTACGT");
        assert_eq!(&result.quals[..4], b"IIII");
        assert_eq!(&result.quals[4..], b"!!!!");
    }

    #[test]
    fn test_stitch_fills_leading_and_middle_gaps() {
        let draft = b"ACGTACGT";
        let samples = vec![
            sample_from_positions(vec![2, 3], vec![0, 0], 0, 0),
            sample_from_positions(vec![6, 7], vec![0, 0], 0, 0),
        ];
        let results = vec![decoded("GT"), decoded("GT")];
        let trims = vec![full_trim(2), full_trim(2)];
        let pairs = vec![(2i64, 0usize), (6i64, 1usize)];
        let result =
            stitch_sequence(draft, &samples, &trims, &results, &pairs, &StitchOptions::default())
                .unwrap();
        assert_eq!(result.seq, b"ACGTACGT");
        assert_eq!(result.quals, b"!!II!!II".to_vec());
    }

    #[test]
    fn test_stitch_respects_trims() {
        let draft = b"ACGTACGT";
        let samples = vec![
            sample_from_positions((0..6).collect(), vec![0; 6], 0, 0),
            sample_from_positions((4..8).collect(), vec![0; 4], 0, 0),
        ];
        // Splice at draft position 5: s1 contributes [0, 5), s2 [1, 4).
        let trims = vec![
            TrimInfo { start: 0, end: 5, ..TrimInfo::default() },
            TrimInfo { start: 1, end: 4, ..TrimInfo::default() },
        ];
        let results = vec![decoded("ACGTAC"), decoded("ACGT")];
        let pairs = vec![(0i64, 0usize), (4i64, 1usize)];
        let result =
            stitch_sequence(draft, &samples, &trims, &results, &pairs, &StitchOptions::default())
                .unwrap();
        assert_eq!(result.seq, b"ACGTACGT");
    }

    #[test]
    fn test_stitch_skips_dropped_samples() {
        let draft = b"ACGT";
        let samples = vec![sample_from_positions((0..4).collect(), vec![0; 4], 0, 0)];
        let trims = vec![TrimInfo { start: -1, end: -1, ..TrimInfo::default() }];
        let results = vec![decoded("ACGT")];
        let pairs = vec![(0i64, 0usize)];
        let result =
            stitch_sequence(draft, &samples, &trims, &results, &pairs, &StitchOptions::default())
                .unwrap();
        // Everything dropped falls back to the draft.
        assert_eq!(result.seq, b"ACGT");
        assert_eq!(result.quals, b"!!!!".to_vec());
    }

    #[test]
    fn test_stitch_fill_char_override() {
        let draft = b"ACGTACGT";
        let samples = vec![sample_from_positions((0..4).collect(), vec![0; 4], 0, 0)];
        let results = vec![decoded("ACGT")];
        let trims = vec![full_trim(4)];
        let pairs = vec![(0i64, 0usize)];
        let options = StitchOptions { fill_gaps: true, fill_char: Some(b'N') };
        let result =
            stitch_sequence(draft, &samples, &trims, &results, &pairs, &options).unwrap();
        assert_eq!(result.seq, b"ACGTNNNN");
    }

    #[test]
    fn test_stitch_bad_trim_is_error() {
        let draft = b"ACGT";
        let samples = vec![sample_from_positions((0..4).collect(), vec![0; 4], 0, 0)];
        let trims = vec![TrimInfo { start: 0, end: 9, ..TrimInfo::default() }];
        let results = vec![decoded("ACGT")];
        let pairs = vec![(0i64, 0usize)];
        assert!(
            stitch_sequence(draft, &samples, &trims, &results, &pairs, &StitchOptions::default())
                .is_err()
        );
    }
}
