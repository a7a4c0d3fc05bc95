//! Region planning: splitting draft sequences into BAM regions and sub-windows.
//!
//! Drafts are tiled twice. The outer tiling produces overlapping *BAM
//! regions* (`bam_chunk` long, `window_overlap` of overlap) which bound how
//! much pileup data is in flight at once; the inner tiling splits each BAM
//! region into non-overlapping *sub-windows* that are pileup-encoded in
//! parallel and merged back together afterwards.

use crate::errors::{BurnishError, Result};

/// A planned window over one draft sequence.
///
/// `start_no_overlap..end_no_overlap` is the part of the window this window
/// "owns" once neighbouring windows are spliced; the remainder is overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Index of the draft sequence this window covers.
    pub seq_id: i32,
    /// Full length of that draft sequence.
    pub seq_length: i64,
    /// Window start, zero-based inclusive.
    pub start: i64,
    /// Window end, zero-based exclusive.
    pub end: i64,
    /// Index of the parent BAM region, or -1 for BAM regions themselves.
    pub region_id: i32,
    /// Start of the owned (non-overlapping) part.
    pub start_no_overlap: i64,
    /// End of the owned part.
    pub end_no_overlap: i64,
}

/// A half-open index interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

impl Interval {
    /// Number of indices covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the interval covers nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A half-open coordinate region on one draft sequence, used for trim clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInt {
    pub seq_id: i32,
    pub start: i64,
    pub end: i64,
}

/// Linearly tiles `[seq_start, seq_end)` into windows of `window_len` with
/// the given overlap between neighbours.
///
/// Windows for the same draft come out sorted by `start`; adjacent windows
/// overlap or touch. The final window is clamped to `seq_end`.
pub fn create_windows(
    seq_id: i32,
    seq_start: i64,
    seq_end: i64,
    seq_len: i64,
    window_len: i64,
    window_overlap: i64,
    region_id: i32,
) -> Result<Vec<Window>> {
    if window_overlap >= window_len {
        return Err(BurnishError::InvalidWindowing { window_len, overlap: window_overlap });
    }

    let mut ret = Vec::with_capacity(((seq_end - seq_start) / window_len + 1) as usize);

    let mut start = seq_start;
    while start < seq_end {
        let end = seq_end.min(start + window_len);
        let start_no_overlap =
            if start == seq_start { start } else { seq_end.min(start + window_overlap) };

        ret.push(Window {
            seq_id,
            seq_length: seq_len,
            start,
            end,
            region_id,
            start_no_overlap,
            end_no_overlap: end,
        });

        if end == seq_end {
            break;
        }
        start += window_len - window_overlap;
    }

    Ok(ret)
}

/// Parses a region string of the form `name`, `name:start-end`, `name:start-`
/// or `name:-end` with 1-based, inclusive-end coordinates.
///
/// Returns the name and zero-based half-open coordinates; either coordinate
/// is -1 when unspecified.
pub fn parse_region_string(region: &str) -> Result<(String, i64, i64)> {
    let Some((name, coords)) = region.split_once(':') else {
        return Ok((region.to_string(), -1, -1));
    };

    if coords.is_empty() {
        return Ok((name.to_string(), -1, -1));
    }

    let (start_str, end_str) = coords.split_once('-').unwrap_or((coords, ""));

    let parse = |s: &str, which: &str| -> Result<i64> {
        s.parse::<i64>().map_err(|_| BurnishError::InvalidRegion {
            region: region.to_string(),
            reason: format!("cannot parse {which} coordinate '{s}'"),
        })
    };

    let start = if start_str.is_empty() { -1 } else { parse(start_str, "start")? - 1 };
    let end = if end_str.is_empty() { -1 } else { parse(end_str, "end")? };

    Ok((name.to_string(), start, end))
}

/// Creates the outer BAM-region windows over the given drafts, or over a
/// single user-specified region when one is provided.
pub fn create_bam_regions(
    draft_lens: &[(String, i64)],
    bam_chunk_len: i64,
    window_overlap: i64,
    region_str: Option<&str>,
) -> Result<Vec<Window>> {
    let Some(region_str) = region_str else {
        // Canonical case: each draft is linearly split with an overlap.
        let mut windows = Vec::new();
        for (seq_id, (_, len)) in draft_lens.iter().enumerate() {
            let new_windows =
                create_windows(seq_id as i32, 0, *len, *len, bam_chunk_len, window_overlap, -1)?;
            windows.extend(new_windows);
        }
        return Ok(windows);
    };

    let (region_name, mut region_start, mut region_end) = parse_region_string(region_str)?;

    let Some((seq_id, seq_length)) = draft_lens
        .iter()
        .enumerate()
        .find(|(_, (name, _))| *name == region_name)
        .map(|(i, (_, len))| (i as i32, *len))
    else {
        return Err(BurnishError::InvalidRegion {
            region: region_str.to_string(),
            reason: format!("sequence '{region_name}' not found in the draft"),
        });
    };

    if region_start < 0 {
        region_start = 0;
    }
    if region_end <= 0 {
        region_end = seq_length;
    }
    if region_start >= region_end || region_end > seq_length {
        return Err(BurnishError::InvalidRegion {
            region: region_str.to_string(),
            reason: format!(
                "coordinates [{region_start}, {region_end}) out of range for sequence of length {seq_length}"
            ),
        });
    }

    create_windows(seq_id, region_start, region_end, seq_length, bam_chunk_len, window_overlap, -1)
}

/// Splits `num_items` indices into at most `num_chunks` near-equal intervals.
///
/// Used to hand contiguous index ranges to worker threads.
pub fn compute_chunks(num_items: usize, num_chunks: usize) -> Result<Vec<Interval>> {
    if num_chunks == 0 {
        return Err(BurnishError::InvalidParameter {
            parameter: "num_chunks".to_string(),
            reason: "must be >= 1".to_string(),
        });
    }

    let chunk_size = num_items / num_chunks;
    let remainder = num_items % num_chunks;

    let mut chunks = Vec::with_capacity(num_chunks);
    let mut sum = 0;
    for i in 0..num_chunks {
        let size = chunk_size + usize::from(i < remainder);
        if size == 0 {
            continue;
        }
        chunks.push(Interval { start: sum, end: sum + size });
        sum += size;
    }

    if sum != num_items {
        return Err(BurnishError::InvalidParameter {
            parameter: "num_items".to_string(),
            reason: format!("chunking covered {sum} of {num_items} items"),
        });
    }

    Ok(chunks)
}
