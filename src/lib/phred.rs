//! Phred score utilities and probability conversions.
//!
//! Consensus qualities and variant scores are both derived from per-class
//! probabilities. Conversions here are capped: the consensus path caps at
//! Q40 and the variant path at Q70, which also bounds the error probability
//! from below so `log10` never sees zero.

/// Phred+33 offset used when rendering qualities as characters.
pub const PHRED_OFFSET: u8 = 33;

/// Quality cap applied on the consensus decoding path.
pub const CONSENSUS_QUAL_CAP: f64 = 40.0;

/// Quality cap applied on the variant scoring path.
pub const VARIANT_QUAL_CAP: f64 = 70.0;

/// Converts an error probability to a capped Phred score.
///
/// The error is clamped into `[10^(-cap/10), 1.0]` first, so the result is
/// always finite and within `[0, cap]`.
#[inline]
#[must_use]
pub fn error_to_phred(err: f64, cap: f64) -> f64 {
    let floor = 10f64.powf(-cap / 10.0);
    let err = err.clamp(floor, 1.0);
    let q = -10.0 * err.log10();
    q.min(cap)
}

/// Converts a probability of being correct to a Phred+33 quality character.
#[inline]
#[must_use]
pub fn prob_to_qual_char(prob_correct: f64, cap: f64) -> u8 {
    let q = error_to_phred(1.0 - prob_correct, cap);
    (q.floor() as u8) + PHRED_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_to_phred_basic() {
        assert!((error_to_phred(0.1, 70.0) - 10.0).abs() < 1e-9);
        assert!((error_to_phred(0.01, 70.0) - 20.0).abs() < 1e-9);
        assert!((error_to_phred(0.001, 70.0) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_to_phred_caps() {
        // Zero error hits the cap instead of producing infinity.
        assert!((error_to_phred(0.0, 40.0) - 40.0).abs() < 1e-9);
        assert!((error_to_phred(1e-30, 70.0) - 70.0).abs() < 1e-9);
        // Certain error floors at zero.
        assert!((error_to_phred(1.0, 40.0)).abs() < 1e-9);
    }

    #[test]
    fn test_prob_to_qual_char() {
        // Perfect call at the consensus cap: '!' + 40 = 'I'.
        assert_eq!(prob_to_qual_char(1.0, CONSENSUS_QUAL_CAP), b'I');
        // Coin-flip call: ~Q3.
        assert_eq!(prob_to_qual_char(0.5, CONSENSUS_QUAL_CAP), PHRED_OFFSET + 3);
        // Hopeless call floors at '!'.
        assert_eq!(prob_to_qual_char(0.0, CONSENSUS_QUAL_CAP), PHRED_OFFSET);
    }
}
