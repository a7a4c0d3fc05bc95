//! Dense tensor helpers over `ndarray`.
//!
//! The pipeline moves per-window feature matrices (`[L, F]`), batched model
//! inputs (`[B, L, F]`) and class-probability outputs (`[B, L, C]`) between
//! stages. This module collects the small set of tensor operations those
//! stages need: row-axis concatenation, batch stacking, and the
//! argmax/softmax/gather trio used to decode logits.

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};

use crate::errors::{BurnishError, Result};

/// Concatenates 2-D feature matrices along the row axis.
///
/// A single part is moved out rather than copied; concatenation is only paid
/// for when there is really something to join.
pub fn cat_rows(mut parts: Vec<Array2<f32>>) -> Result<Array2<f32>> {
    match parts.len() {
        0 => Err(BurnishError::SampleInvariant { reason: "cannot concatenate zero parts".into() }),
        1 => Ok(parts.pop().expect("one part")),
        _ => {
            let views: Vec<ArrayView2<f32>> = parts.iter().map(ndarray::ArrayBase::view).collect();
            ndarray::concatenate(Axis(0), &views).map_err(|e| BurnishError::SampleInvariant {
                reason: format!("feature concatenation failed: {e}"),
            })
        }
    }
}

/// Concatenates 1-D vectors (e.g. per-column depth) end to end.
pub fn cat_vecs(mut parts: Vec<Array1<f32>>) -> Result<Array1<f32>> {
    match parts.len() {
        0 => Err(BurnishError::SampleInvariant { reason: "cannot concatenate zero parts".into() }),
        1 => Ok(parts.pop().expect("one part")),
        _ => {
            let views: Vec<_> = parts.iter().map(ndarray::ArrayBase::view).collect();
            ndarray::concatenate(Axis(0), &views).map_err(|e| BurnishError::SampleInvariant {
                reason: format!("depth concatenation failed: {e}"),
            })
        }
    }
}

/// Stacks equally-shaped `[L, F]` matrices into a `[B, L, F]` batch tensor.
pub fn stack_batch(parts: &[ArrayView2<f32>]) -> Result<Array3<f32>> {
    ndarray::stack(Axis(0), parts)
        .map_err(|e| BurnishError::Inference { reason: format!("batch stacking failed: {e}") })
}

/// Index of the maximum element of each row (ties resolved to the lowest index).
#[must_use]
pub fn argmax_rows(matrix: &ArrayView2<f32>) -> Vec<usize> {
    matrix
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            let mut best_val = f32::NEG_INFINITY;
            for (i, &v) in row.iter().enumerate() {
                if v > best_val {
                    best = i;
                    best_val = v;
                }
            }
            best
        })
        .collect()
}

/// Row-wise softmax with the usual max-subtraction for numerical stability.
#[must_use]
pub fn softmax_rows(matrix: &ArrayView2<f32>) -> Array2<f32> {
    let mut out = matrix.to_owned();
    for mut row in out.rows_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0_f32;
        for v in &mut row {
            *v = (*v - max).exp();
            sum += *v;
        }
        if sum > 0.0 {
            for v in &mut row {
                *v /= sum;
            }
        }
    }
    out
}

/// Gathers one element per row: `out[i] = matrix[i, indices[i]]`.
#[must_use]
pub fn gather_rows(matrix: &ArrayView2<f32>, indices: &[usize]) -> Vec<f32> {
    indices.iter().enumerate().map(|(row, &col)| matrix[[row, col]]).collect()
}
