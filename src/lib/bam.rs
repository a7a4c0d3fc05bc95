//! Indexed BAM reading behind the [`AlignmentSource`] seam.
//!
//! Opens a coordinate-sorted, indexed BAM and serves region queries. BAM
//! handles are not thread-safe, so [`IndexedBamFactory`] opens one reader
//! per encoder worker.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use noodles::bam;
use noodles::core::{Position, Region};
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record_buf::data::field::Value;

use crate::alignment::{AlignmentRecord, AlignmentSource, AlignmentSourceFactory, CigarOp, CigarOpKind};
use crate::errors::BurnishError;

type IndexedReader = bam::io::IndexedReader<noodles::bgzf::io::Reader<File>>;

/// An indexed BAM file serving alignment queries for one worker.
pub struct IndexedBamSource {
    reader: IndexedReader,
    header: Header,
}

impl IndexedBamSource {
    /// Opens the BAM and its index (`.bai`, discovered next to the file).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = bam::io::indexed_reader::Builder::default()
            .build_from_path(path)
            .map_err(|e| BurnishError::InvalidFileFormat {
                file_type: "BAM".to_string(),
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let header = reader
            .read_header()
            .with_context(|| format!("Failed to read BAM header from '{}'", path.display()))?;
        Ok(Self { reader, header })
    }

    /// The SAM header of the opened file.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }
}

impl AlignmentSource for IndexedBamSource {
    fn fetch(&mut self, seq_name: &str, start: i64, end: i64) -> Result<Vec<AlignmentRecord>> {
        if end <= start {
            return Ok(Vec::new());
        }
        let region = Region::new(
            seq_name,
            Position::try_from((start + 1) as usize)?..=Position::try_from(end as usize)?,
        );
        let query = self.reader.query(&self.header, &region)?;

        let mut records = Vec::new();
        for result in query {
            let bam_record = result?;
            let record = RecordBuf::try_from_alignment_record(&self.header, &bam_record)?;
            if let Some(aln) = record_buf_to_alignment(&record)? {
                records.push(aln);
            }
        }
        Ok(records)
    }
}

/// Converts one decoded BAM record into the encoder's view of a read.
///
/// Returns `None` for records the pileup never uses: unmapped, secondary,
/// duplicate or QC-failed alignments.
pub fn record_buf_to_alignment(record: &RecordBuf) -> Result<Option<AlignmentRecord>> {
    let flags = record.flags();
    if flags.is_unmapped() || flags.is_secondary() || flags.is_duplicate() || flags.is_qc_fail() {
        return Ok(None);
    }

    let Some(alignment_start) = record.alignment_start() else {
        return Ok(None);
    };
    let ref_start = usize::from(alignment_start) as i64 - 1;

    let mut cigar = Vec::new();
    for op in record.cigar().as_ref() {
        let kind = match op.kind() {
            Kind::Match => CigarOpKind::Match,
            Kind::Insertion => CigarOpKind::Insertion,
            Kind::Deletion => CigarOpKind::Deletion,
            Kind::Skip => CigarOpKind::Skip,
            Kind::SoftClip => CigarOpKind::SoftClip,
            Kind::HardClip => CigarOpKind::HardClip,
            Kind::Pad => CigarOpKind::Pad,
            Kind::SequenceMatch => CigarOpKind::SequenceMatch,
            Kind::SequenceMismatch => CigarOpKind::SequenceMismatch,
        };
        cigar.push(CigarOp { kind, len: op.len() });
    }

    let mut read_group = None;
    let mut int_tags = HashMap::new();
    for (tag, value) in record.data().iter() {
        let name = [tag.as_ref()[0], tag.as_ref()[1]];
        match value {
            Value::String(s) if name == *b"RG" => {
                read_group = Some(String::from_utf8_lossy(s.as_ref()).into_owned());
            }
            Value::Int8(v) => {
                int_tags.insert(name, i64::from(*v));
            }
            Value::UInt8(v) => {
                int_tags.insert(name, i64::from(*v));
            }
            Value::Int16(v) => {
                int_tags.insert(name, i64::from(*v));
            }
            Value::UInt16(v) => {
                int_tags.insert(name, i64::from(*v));
            }
            Value::Int32(v) => {
                int_tags.insert(name, i64::from(*v));
            }
            Value::UInt32(v) => {
                int_tags.insert(name, i64::from(*v));
            }
            _ => {}
        }
    }

    Ok(Some(AlignmentRecord {
        ref_start,
        mapq: record.mapping_quality().map_or(255, u8::from),
        is_reverse: flags.is_reverse_complemented(),
        cigar,
        seq: record.sequence().as_ref().to_vec(),
        qual: record.quality_scores().as_ref().to_vec(),
        read_group,
        int_tags,
    }))
}

/// Opens a fresh [`IndexedBamSource`] per worker thread.
#[derive(Debug, Clone)]
pub struct IndexedBamFactory {
    path: PathBuf,
}

impl IndexedBamFactory {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl AlignmentSourceFactory for IndexedBamFactory {
    fn open(&self) -> Result<Box<dyn AlignmentSource + Send>> {
        Ok(Box::new(IndexedBamSource::open(&self.path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noodles::sam::alignment::record::Flags;
    use noodles::sam::alignment::record_buf::{Cigar, QualityScores, Sequence};
    use noodles::sam::alignment::record::cigar::Op;

    fn mapped_record() -> RecordBuf {
        RecordBuf::builder()
            .set_flags(Flags::empty())
            .set_alignment_start(Position::try_from(5).unwrap())
            .set_cigar(Cigar::from(vec![
                Op::new(Kind::SoftClip, 2),
                Op::new(Kind::Match, 4),
            ]))
            .set_sequence(Sequence::from(b"TTACGT".to_vec()))
            .set_quality_scores(QualityScores::from(vec![30; 6]))
            .build()
    }

    #[test]
    fn test_record_conversion() {
        let aln = record_buf_to_alignment(&mapped_record()).unwrap().unwrap();
        // 1-based alignment start 5 becomes 0-based 4.
        assert_eq!(aln.ref_start, 4);
        assert_eq!(aln.cigar.len(), 2);
        assert_eq!(aln.cigar[1], CigarOp { kind: CigarOpKind::Match, len: 4 });
        assert_eq!(aln.seq, b"TTACGT");
        assert!(!aln.is_reverse);
    }

    #[test]
    fn test_unmapped_record_skipped() {
        let record = RecordBuf::builder().set_flags(Flags::UNMAPPED).build();
        assert!(record_buf_to_alignment(&record).unwrap().is_none());
    }

    #[test]
    fn test_secondary_record_skipped() {
        let mut record = mapped_record();
        *record.flags_mut() = Flags::SECONDARY;
        assert!(record_buf_to_alignment(&record).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_record_skipped() {
        let mut record = mapped_record();
        *record.flags_mut() = Flags::DUPLICATE;
        assert!(record_buf_to_alignment(&record).unwrap().is_none());
    }

    #[test]
    fn test_qc_fail_record_skipped() {
        let mut record = mapped_record();
        *record.flags_mut() = Flags::QC_FAIL;
        assert!(record_buf_to_alignment(&record).unwrap().is_none());
    }

    #[test]
    fn test_record_without_alignment_start_skipped() {
        // Mapped flags but no alignment start: nothing to anchor a pileup on.
        let record = RecordBuf::builder()
            .set_flags(Flags::empty())
            .set_sequence(Sequence::from(b"ACGT".to_vec()))
            .set_quality_scores(QualityScores::from(vec![30; 4]))
            .build();
        assert!(record_buf_to_alignment(&record).unwrap().is_none());
    }

    #[test]
    fn test_open_missing_file_is_error() {
        assert!(IndexedBamSource::open("/definitely/not/here.bam").is_err());
    }
}
