//! Sample surgery: split on coverage gaps, merge fragments, re-split for inference.
//!
//! Sub-windows are encoded independently for parallelism, so a BAM region
//! comes back as many small samples. Surgery first cuts every sample at
//! coverage discontinuities, then joins contiguous fragments back into
//! region-sized samples, and finally slices those into fixed-length,
//! overlapping chunks the model can batch.

use crate::errors::{BurnishError, Result};
use crate::sample::Sample;
use crate::tensor;

/// Cuts a sample before every position where `major` jumps by more than one.
///
/// Each fragment keeps the parent's `seq_id` and `region_id`. A sample with
/// no gaps is returned unchanged.
pub fn split_on_discontinuities(sample: Sample) -> Result<Vec<Sample>> {
    let gaps: Vec<usize> = (1..sample.positions_major.len())
        .filter(|&i| sample.positions_major[i] - sample.positions_major[i - 1] > 1)
        .collect();

    if gaps.is_empty() {
        return Ok(vec![sample]);
    }

    let mut results = Vec::with_capacity(gaps.len() + 1);
    let mut start = 0;
    for gap in gaps {
        results.push(sample.slice(start, gap)?);
        start = gap;
    }
    if start < sample.len() {
        results.push(sample.slice(start, sample.len())?);
    }

    Ok(results)
}

/// Concatenates runs of contiguous fragments that share a draft sequence and
/// BAM region.
///
/// Two fragments join iff they have equal `seq_id` and `region_id` and the
/// second starts exactly where the first ends. Empty fragments are dropped.
/// A run of one fragment is moved, not copied.
pub fn merge_adjacent_samples(samples: Vec<Sample>) -> Result<Vec<Sample>> {
    let mut results = Vec::new();
    let mut buffer: Vec<Sample> = Vec::new();
    let mut last_end = -1i64;

    let flush = |buffer: &mut Vec<Sample>, results: &mut Vec<Sample>| -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        if buffer.len() == 1 {
            results.push(buffer.pop().expect("one sample"));
            return Ok(());
        }
        let parts = std::mem::take(buffer);
        let seq_id = parts[0].seq_id;
        let region_id = parts[0].region_id;
        let mut positions_major = Vec::new();
        let mut positions_minor = Vec::new();
        let mut features = Vec::with_capacity(parts.len());
        let mut depth = Vec::with_capacity(parts.len());
        for part in parts {
            positions_major.extend_from_slice(&part.positions_major);
            positions_minor.extend_from_slice(&part.positions_minor);
            features.push(part.features);
            depth.push(part.depth);
        }
        results.push(Sample {
            features: tensor::cat_rows(features)?,
            positions_major,
            positions_minor,
            depth: tensor::cat_vecs(depth)?,
            seq_id,
            region_id,
        });
        Ok(())
    };

    for sample in samples {
        if sample.is_empty() {
            continue;
        }

        let contiguous = buffer.last().is_some_and(|prev| {
            sample.seq_id == prev.seq_id
                && sample.region_id == prev.region_id
                && sample.start() - last_end == 0
        });

        if buffer.is_empty() || contiguous {
            last_end = sample.end();
            buffer.push(sample);
        } else {
            flush(&mut buffer, &mut results)?;
            last_end = sample.end();
            buffer.push(sample);
        }
    }
    flush(&mut buffer, &mut results)?;

    Ok(results)
}

/// Re-splits samples into chunks of `chunk_len` columns stepping by
/// `chunk_len - chunk_overlap`.
///
/// A sample already at or below `chunk_len` passes through unchanged. A
/// trailing remainder shorter than `chunk_len` is covered by one final chunk
/// anchored at `len - chunk_len`, producing a potentially large overlap with
/// the previous chunk rather than a short tail.
pub fn split_samples(
    samples: Vec<Sample>,
    chunk_len: usize,
    chunk_overlap: usize,
) -> Result<Vec<Sample>> {
    if chunk_overlap >= chunk_len {
        return Err(BurnishError::InvalidWindowing {
            window_len: chunk_len as i64,
            overlap: chunk_overlap as i64,
        });
    }

    let step = chunk_len - chunk_overlap;
    let mut results = Vec::with_capacity(samples.len());

    for sample in samples {
        let sample_len = sample.len();
        if sample_len <= chunk_len {
            results.push(sample);
            continue;
        }

        let mut end = 0;
        let mut start = 0;
        while start + chunk_len <= sample_len {
            end = start + chunk_len;
            results.push(sample.slice(start, end)?);
            start += step;
        }

        // Cover the tail with a full-length chunk rather than a short one.
        if end < sample_len {
            results.push(sample.slice(sample_len - chunk_len, sample_len)?);
        }
    }

    Ok(results)
}
