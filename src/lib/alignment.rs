//! The alignment-reader seam consumed by the pileup encoder.
//!
//! The encoder only needs to walk reads overlapping a draft interval; it does
//! not care where they come from. [`AlignmentSource`] is that contract, with
//! [`crate::bam::IndexedBamSource`] as the production implementation and
//! [`MemoryAlignmentSource`] as an in-memory implementation for tests and
//! small pipelines.
//!
//! Alignment handles are not assumed to be thread-safe: each encoder worker
//! opens its own source through an [`AlignmentSourceFactory`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};

/// CIGAR operation kinds, with SAM semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOpKind {
    /// M: alignment match or mismatch
    Match,
    /// I: insertion to the reference
    Insertion,
    /// D: deletion from the reference
    Deletion,
    /// N: skipped region of the reference
    Skip,
    /// S: soft clip
    SoftClip,
    /// H: hard clip
    HardClip,
    /// P: padding
    Pad,
    /// =: sequence match
    SequenceMatch,
    /// X: sequence mismatch
    SequenceMismatch,
}

impl CigarOpKind {
    /// Whether the operation advances through the read sequence.
    #[must_use]
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Insertion
                | CigarOpKind::SoftClip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }

    /// Whether the operation advances along the reference.
    #[must_use]
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Deletion
                | CigarOpKind::Skip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }
}

/// One CIGAR operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    pub kind: CigarOpKind,
    pub len: usize,
}

/// Parses a CIGAR string such as `"5S50M2D10M"`.
pub fn parse_cigar(cigar: &str) -> Result<Vec<CigarOp>> {
    let mut ops = Vec::new();
    let mut len = 0usize;
    let mut saw_digit = false;

    for c in cigar.chars() {
        if let Some(d) = c.to_digit(10) {
            len = len * 10 + d as usize;
            saw_digit = true;
            continue;
        }
        if !saw_digit {
            bail!("CIGAR operation '{c}' without a length in '{cigar}'");
        }
        let kind = match c {
            'M' => CigarOpKind::Match,
            'I' => CigarOpKind::Insertion,
            'D' => CigarOpKind::Deletion,
            'N' => CigarOpKind::Skip,
            'S' => CigarOpKind::SoftClip,
            'H' => CigarOpKind::HardClip,
            'P' => CigarOpKind::Pad,
            '=' => CigarOpKind::SequenceMatch,
            'X' => CigarOpKind::SequenceMismatch,
            _ => bail!("Unknown CIGAR operation '{c}' in '{cigar}'"),
        };
        ops.push(CigarOp { kind, len });
        len = 0;
        saw_digit = false;
    }

    if saw_digit {
        bail!("Trailing length without an operation in '{cigar}'");
    }

    Ok(ops)
}

/// The per-read view the pileup encoder walks.
#[derive(Debug, Clone)]
pub struct AlignmentRecord {
    /// Zero-based position of the first aligned base on the draft.
    pub ref_start: i64,
    /// Mapping quality.
    pub mapq: u8,
    /// Whether the read aligned to the reverse strand.
    pub is_reverse: bool,
    /// CIGAR operations.
    pub cigar: Vec<CigarOp>,
    /// Read bases (already reverse-complemented by the aligner when reverse).
    pub seq: Vec<u8>,
    /// Base qualities, one per sequence base.
    pub qual: Vec<u8>,
    /// Read group, when present.
    pub read_group: Option<String>,
    /// Integer-valued auxiliary tags, keyed by two-byte tag name.
    pub int_tags: HashMap<[u8; 2], i64>,
}

impl AlignmentRecord {
    /// One past the last draft position the read aligns to.
    #[must_use]
    pub fn ref_end(&self) -> i64 {
        let span: usize =
            self.cigar.iter().filter(|op| op.kind.consumes_reference()).map(|op| op.len).sum();
        self.ref_start + span as i64
    }

    /// Whether the read overlaps the half-open draft interval `[start, end)`.
    #[must_use]
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.ref_start < end && self.ref_end() > start
    }
}

/// Source of alignments overlapping a draft interval.
///
/// Implementations are not required to be shareable across threads; callers
/// obtain one source per worker through an [`AlignmentSourceFactory`].
pub trait AlignmentSource {
    /// Returns all reads overlapping `[start, end)` on the named sequence.
    fn fetch(&mut self, seq_name: &str, start: i64, end: i64) -> Result<Vec<AlignmentRecord>>;
}

/// Opens [`AlignmentSource`] handles, one per worker thread.
pub trait AlignmentSourceFactory: Send + Sync {
    /// Opens a fresh source.
    fn open(&self) -> Result<Box<dyn AlignmentSource + Send>>;
}

/// An in-memory alignment store, keyed by draft sequence name.
///
/// Used by the test suite and usable anywhere the reads already live in
/// memory. Cloning shares the underlying store.
#[derive(Debug, Clone, Default)]
pub struct MemoryAlignmentSource {
    reads: Arc<HashMap<String, Vec<AlignmentRecord>>>,
}

impl MemoryAlignmentSource {
    #[must_use]
    pub fn new(reads: HashMap<String, Vec<AlignmentRecord>>) -> Self {
        Self { reads: Arc::new(reads) }
    }
}

impl AlignmentSource for MemoryAlignmentSource {
    fn fetch(&mut self, seq_name: &str, start: i64, end: i64) -> Result<Vec<AlignmentRecord>> {
        Ok(self
            .reads
            .get(seq_name)
            .map(|reads| reads.iter().filter(|r| r.overlaps(start, end)).cloned().collect())
            .unwrap_or_default())
    }
}

impl AlignmentSourceFactory for MemoryAlignmentSource {
    fn open(&self) -> Result<Box<dyn AlignmentSource + Send>> {
        Ok(Box::new(self.clone()))
    }
}

/// Builds a simple mapped record for tests and examples.
#[must_use]
pub fn simple_record(ref_start: i64, cigar: &str, seq: &str, mapq: u8, is_reverse: bool) -> AlignmentRecord {
    let cigar = parse_cigar(cigar).expect("valid CIGAR");
    AlignmentRecord {
        ref_start,
        mapq,
        is_reverse,
        cigar,
        seq: seq.as_bytes().to_vec(),
        qual: vec![30; seq.len()],
        read_group: None,
        int_tags: HashMap::new(),
    }
}
