//! Decoding class probabilities into called bases and qualities.
//!
//! The decoder is pure and stateless: argmax picks the class, softmax turns
//! logits into probabilities, and the chosen class's probability becomes a
//! capped Phred quality. Deletion sentinels (`*`) are kept; the stitcher
//! strips them at output time.

use ndarray::{Array2, Array3, ArrayView2};

use crate::consensus::ConsensusResult;
use crate::errors::{BurnishError, Result};
use crate::phred;
use crate::tensor;

/// The alphabet class indices decode into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelScheme {
    /// Single-haplotype calling over `*ACGT`.
    #[default]
    Haploid,
}

impl LabelScheme {
    /// Parses a label scheme name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "haploid" | "HaploidLabelScheme" => Ok(LabelScheme::Haploid),
            _ => Err(BurnishError::InvalidParameter {
                parameter: "label-scheme".to_string(),
                reason: format!("unknown label scheme '{name}'"),
            }),
        }
    }

    /// The symbols of the scheme, indexed by class.
    #[must_use]
    pub fn symbols(&self) -> &'static [u8] {
        match self {
            LabelScheme::Haploid => b"*ACGT",
        }
    }

    /// Class index of a symbol, if it is part of the scheme.
    #[must_use]
    pub fn class_of(&self, symbol: u8) -> Option<usize> {
        self.symbols().iter().position(|&s| s == symbol)
    }
}

/// Logits-to-bases decoder under a label scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    pub scheme: LabelScheme,
}

impl Decoder {
    #[must_use]
    pub fn new(scheme: LabelScheme) -> Self {
        Self { scheme }
    }

    /// Softmax class probabilities for one sample's logits.
    #[must_use]
    pub fn class_probabilities(logits: &ArrayView2<f32>) -> Array2<f32> {
        tensor::softmax_rows(logits)
    }

    /// Decodes one sample's `[L, C]` logits.
    pub fn decode_single(&self, logits: &ArrayView2<f32>, qual_cap: f64) -> Result<ConsensusResult> {
        let symbols = self.scheme.symbols();
        if logits.ncols() != symbols.len() {
            return Err(BurnishError::Inference {
                reason: format!(
                    "logits have {} classes but the label scheme has {}",
                    logits.ncols(),
                    symbols.len()
                ),
            });
        }

        let indices = tensor::argmax_rows(logits);
        let probs = tensor::softmax_rows(logits);
        let chosen = tensor::gather_rows(&probs.view(), &indices);

        let seq: Vec<u8> = indices.iter().map(|&c| symbols[c]).collect();
        let quals: Vec<u8> =
            chosen.iter().map(|&p| phred::prob_to_qual_char(f64::from(p), qual_cap)).collect();

        Ok(ConsensusResult { seq, quals })
    }

    /// Decodes a `[B, L, C]` batch, one result per sample.
    pub fn decode_batch(&self, logits: &Array3<f32>, qual_cap: f64) -> Result<Vec<ConsensusResult>> {
        logits
            .outer_iter()
            .map(|sample_logits| self.decode_single(&sample_logits, qual_cap))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    #[test]
    fn test_label_scheme_symbols() {
        assert_eq!(LabelScheme::Haploid.symbols(), b"*ACGT");
        assert_eq!(LabelScheme::Haploid.class_of(b'G'), Some(3));
        assert_eq!(LabelScheme::Haploid.class_of(b'N'), None);
    }

    #[test]
    fn test_label_scheme_parse() {
        assert_eq!(LabelScheme::parse("haploid").unwrap(), LabelScheme::Haploid);
        assert_eq!(LabelScheme::parse("HaploidLabelScheme").unwrap(), LabelScheme::Haploid);
        assert!(LabelScheme::parse("diploid").is_err());
    }

    #[test]
    fn test_decode_single_calls_argmax_base() {
        // Columns strongly favouring A, then '*'.
        let logits = array![[0.0, 5.0, 0.0, 0.0, 0.0], [5.0, 0.0, 0.0, 0.0, 0.0]];
        let decoder = Decoder::default();
        let result = decoder.decode_single(&logits.view(), 40.0).unwrap();
        assert_eq!(result.seq, b"A*");
        assert_eq!(result.seq.len(), result.quals.len());
        // Confident calls decode above the quality floor.
        assert!(result.quals.iter().all(|&q| q > b'!'));
    }

    #[test]
    fn test_decode_batch_shape() {
        let logits = Array3::<f32>::zeros((3, 4, 5));
        let decoder = Decoder::default();
        let results = decoder.decode_batch(&logits, 40.0).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.len() == 4));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let logits = array![[0.3, 1.2, 0.1, 2.2, 0.0], [1.0, 1.0, 1.0, 1.0, 1.0]];
        let decoder = Decoder::default();
        let a = decoder.decode_single(&logits.view(), 40.0).unwrap();
        let b = decoder.decode_single(&logits.view(), 40.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_rejects_wrong_class_count() {
        let logits = array![[0.0, 1.0]];
        let decoder = Decoder::default();
        assert!(decoder.decode_single(&logits.view(), 40.0).is_err());
    }

    #[test]
    fn test_quality_cap_respected() {
        let logits = array![[0.0, 100.0, 0.0, 0.0, 0.0]];
        let decoder = Decoder::default();
        let result = decoder.decode_single(&logits.view(), 40.0).unwrap();
        assert_eq!(result.quals[0], b'!' + 40);
        let result70 = decoder.decode_single(&logits.view(), 70.0).unwrap();
        assert_eq!(result70.quals[0], b'!' + 70);
    }
}
