//! The inference seam: anything that can turn feature batches into logits.
//!
//! The pipeline only needs `predict([B, L, F]) -> [B, L, C]`, blocking and
//! thread-safe per instance. Learned models plug in behind [`Model`];
//! [`CountsDirectModel`] is the built-in deterministic implementation that
//! scores classes straight from the normalised pileup counts, which keeps
//! CPU-only runs and the test suite self-contained.

use std::sync::Arc;

use ndarray::Array3;

use crate::errors::{BurnishError, Result};
use crate::pileup::{FEAT_FWD_DEL, FEAT_REV_DEL, NUM_FEATURES};

/// Number of output classes (`*ACGT`).
pub const NUM_CLASSES: usize = 5;

/// A thread-safe batch predictor.
pub trait Model: Send + Sync {
    /// Runs inference on a `[B, L, F]` feature batch, returning `[B, L, C]`
    /// logits. Must be safe to call concurrently from one thread per replica.
    fn predict(&self, batch: &Array3<f32>) -> Result<Array3<f32>>;
}

/// Shared handle to a model replica.
pub type ModelHandle = Arc<dyn Model>;

/// Deterministic model that reads class evidence directly from the counts.
///
/// Per column, the evidence for each of `*ACGT` is the summed forward and
/// reverse feature mass of that base (deletion features for `*`). Logits are
/// log-evidence, so the decoder's softmax recovers the evidence fractions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountsDirectModel;

/// Floor keeping log-evidence finite for zero counts.
const EVIDENCE_FLOOR: f32 = 1e-6;

impl Model for CountsDirectModel {
    fn predict(&self, batch: &Array3<f32>) -> Result<Array3<f32>> {
        let (num_samples, num_columns, num_features) = batch.dim();
        if num_features != NUM_FEATURES {
            return Err(BurnishError::Inference {
                reason: format!(
                    "expected {NUM_FEATURES} features per column, got {num_features}"
                ),
            });
        }

        let mut logits = Array3::<f32>::zeros((num_samples, num_columns, NUM_CLASSES));
        for b in 0..num_samples {
            for l in 0..num_columns {
                let feat = |f: usize| batch[[b, l, f]];
                // Class order matches the haploid label scheme *ACGT.
                let evidence = [
                    feat(FEAT_FWD_DEL) + feat(FEAT_REV_DEL),
                    feat(0) + feat(5),
                    feat(1) + feat(6),
                    feat(2) + feat(7),
                    feat(3) + feat(8),
                ];
                for (c, &e) in evidence.iter().enumerate() {
                    logits[[b, l, c]] = e.max(EVIDENCE_FLOOR).ln();
                }
            }
        }

        Ok(logits)
    }
}
