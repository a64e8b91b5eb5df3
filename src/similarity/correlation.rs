//! Correlation-based cell similarity.

use crate::matrix::{CellId, ExpressionMatrix};
use crate::similarity::CellSimilarity;

/// Pearson correlation over the full gene space.
///
/// Uses the cached sums of both cells and a sparse dot product, so the cost
/// is linear in the number of non-zero counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactSimilarity;

impl CellSimilarity for ExactSimilarity {
    fn similarity(&self, matrix: &ExpressionMatrix, a: CellId, b: CellId) -> f64 {
        matrix.compute_cell_similarity(a, b)
    }
}

/// Pearson correlation restricted to each cell's largest counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateSimilarity;

impl CellSimilarity for ApproximateSimilarity {
    fn similarity(&self, matrix: &ExpressionMatrix, a: CellId, b: CellId) -> f64 {
        matrix.compute_approximate_cell_similarity(a, b)
    }
}
