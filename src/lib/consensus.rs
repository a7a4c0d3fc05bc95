//! Consensus sequences with per-base qualities, and their serialization.

use std::io::Write;

use anyhow::Result;

/// Sentinel base marking a deletion column; removed at output time.
pub const GAP: u8 = b'*';

/// A called sequence and its Phred+33 qualities, equal in length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusResult {
    pub seq: Vec<u8>,
    pub quals: Vec<u8>,
}

impl ConsensusResult {
    /// Number of called columns (including deletion sentinels).
    #[must_use]
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    /// Whether nothing was called.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Strips `*` columns from the sequence and the matching quality slots,
    /// in place.
    pub fn remove_deletions(&mut self) {
        debug_assert_eq!(self.seq.len(), self.quals.len());
        let mut n = 0;
        for j in 0..self.seq.len() {
            if self.seq[j] == GAP {
                continue;
            }
            self.seq[n] = self.seq[j];
            self.quals[n] = self.quals[j];
            n += 1;
        }
        self.seq.truncate(n);
        self.quals.truncate(n);
    }
}

/// Writes one FASTA record.
pub fn write_fasta<W: Write>(writer: &mut W, name: &str, seq: &[u8]) -> Result<()> {
    writer.write_all(b">")?;
    writer.write_all(name.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Writes one FASTQ record with Phred+33 qualities.
pub fn write_fastq<W: Write>(writer: &mut W, name: &str, seq: &[u8], quals: &[u8]) -> Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(name.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(quals)?;
    writer.write_all(b"\n")?;
    Ok(())
}
