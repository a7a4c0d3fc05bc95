//! Draft FASTA reading with all sequences loaded into memory.
//!
//! The stitcher and variant caller fetch draft sub-sequences constantly
//! (gap fill, draft-with-gaps extraction), so the whole draft is loaded up
//! front and every fetch is an O(1) lookup plus a slice. Draft assemblies
//! are small next to the read data; the simplicity is worth the memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;
use noodles::fasta;

use crate::errors::BurnishError;

/// A thread-safe draft reader with all sequences preloaded into memory.
///
/// Cloning is cheap and shares the underlying store.
#[derive(Clone)]
pub struct DraftReader {
    /// Sequence names in file order, with lengths.
    names: Arc<Vec<(String, i64)>>,
    /// Sequences keyed by name.
    sequences: Arc<HashMap<String, Vec<u8>>>,
}

impl DraftReader {
    /// Loads every sequence of a FASTA file into memory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BurnishError::InvalidFileFormat {
                file_type: "Draft FASTA".to_string(),
                path: path.display().to_string(),
                reason: "File does not exist".to_string(),
            }
            .into());
        }

        let file = File::open(path)
            .with_context(|| format!("Failed to open draft FASTA '{}'", path.display()))?;
        let mut reader = fasta::io::Reader::new(BufReader::new(file));

        let mut names = Vec::new();
        let mut sequences = HashMap::new();
        for result in reader.records() {
            let record = result
                .with_context(|| format!("Failed to parse draft FASTA '{}'", path.display()))?;
            let name_bytes: &[u8] = record.name().as_ref();
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            let raw_sequence: &[u8] = record.sequence().as_ref();
            let seq = raw_sequence.to_ascii_uppercase();
            names.push((name.clone(), seq.len() as i64));
            sequences.insert(name, seq);
        }

        debug!("Loaded {} draft sequences from {}", names.len(), path.display());

        Ok(Self { names: Arc::new(names), sequences: Arc::new(sequences) })
    }

    /// Builds a reader from in-memory `(name, sequence)` pairs.
    #[must_use]
    pub fn from_sequences(seqs: Vec<(String, Vec<u8>)>) -> Self {
        let names = seqs.iter().map(|(n, s)| (n.clone(), s.len() as i64)).collect();
        let sequences = seqs.into_iter().collect();
        Self { names: Arc::new(names), sequences: Arc::new(sequences) }
    }

    /// Sequence names and lengths, in input order.
    #[must_use]
    pub fn draft_lens(&self) -> &[(String, i64)] {
        &self.names
    }

    /// Fetches a whole sequence by name.
    pub fn fetch_all(&self, name: &str) -> Result<&[u8]> {
        self.sequences
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| BurnishError::ReferenceNotFound { ref_name: name.to_string() }.into())
    }

    /// Fetches the half-open interval `[start, end)` of the named sequence.
    pub fn fetch(&self, name: &str, start: i64, end: i64) -> Result<&[u8]> {
        let seq = self.fetch_all(name)?;
        let len = seq.len() as i64;
        let start = start.max(0);
        let end = end.min(len);
        if start >= end {
            return Err(BurnishError::InvalidRegion {
                region: format!("{name}:{}-{end}", start + 1),
                reason: format!("empty or inverted interval on sequence of length {len}"),
            }
            .into());
        }
        Ok(&seq[start as usize..end as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_reader() -> DraftReader {
        DraftReader::from_sequences(vec![
            ("ctg1".to_string(), b"ACGTACGT".to_vec()),
            ("ctg2".to_string(), b"TTTT".to_vec()),
        ])
    }

    #[test]
    fn test_draft_lens_preserve_order() {
        let reader = test_reader();
        assert_eq!(
            reader.draft_lens(),
            &[("ctg1".to_string(), 8), ("ctg2".to_string(), 4)]
        );
    }

    #[test]
    fn test_fetch_interval() {
        let reader = test_reader();
        assert_eq!(reader.fetch("ctg1", 2, 6).unwrap(), b"GTAC");
        // Out-of-range coordinates are clamped.
        assert_eq!(reader.fetch("ctg1", -5, 100).unwrap(), b"ACGTACGT");
    }

    #[test]
    fn test_fetch_unknown_sequence() {
        let reader = test_reader();
        assert!(reader.fetch("nope", 0, 4).is_err());
    }

    #[test]
    fn test_fetch_empty_interval() {
        let reader = test_reader();
        assert!(reader.fetch("ctg1", 4, 4).is_err());
        assert!(reader.fetch("ctg1", 6, 2).is_err());
    }

    #[test]
    fn test_from_path_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ">a desc\nacgt\nACGT\n>b\nTT").unwrap();
        file.flush().unwrap();

        let reader = DraftReader::from_path(file.path()).unwrap();
        assert_eq!(reader.draft_lens(), &[("a".to_string(), 8), ("b".to_string(), 2)]);
        // Lowercase input is normalised.
        assert_eq!(reader.fetch_all("a").unwrap(), b"ACGTACGT");
    }

    #[test]
    fn test_from_path_missing_file() {
        assert!(DraftReader::from_path("/definitely/not/here.fa").is_err());
    }
}
