//! Similarity between cells computed from their sparse expression rows.

mod correlation;
mod pairs;

pub use correlation::{ApproximateSimilarity, ExactSimilarity};
pub use pairs::{find_similar_pairs, Neighbor, SimilarPairs};

use crate::matrix::{CellId, ExpressionCount, ExpressionMatrix};

/// Dot product of two sparse rows sorted by gene id.
///
/// Walks both rows once, advancing whichever cursor points at the smaller
/// gene id, so the cost is linear in the number of non-zero entries.
pub fn scalar_product(a: &[ExpressionCount], b: &[ExpressionCount]) -> f64 {
    let (mut i, mut j) = (0, 0);
    let mut sum = 0.0;
    while i < a.len() && j < b.len() {
        let (x, y) = (&a[i], &b[j]);
        match x.gene_id.cmp(&y.gene_id) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += f64::from(x.count) * f64::from(y.count);
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

/// Pearson correlation of two vectors of length `n` given their scalar
/// product and their `(sum, sum of squares)`.
///
/// A constant vector makes the denominator zero; the result is then NaN or
/// infinite and is returned as is.
#[inline]
pub fn correlation(n: f64, scalar_product: f64, a: (f64, f64), b: (f64, f64)) -> f64 {
    let (a_sum1, a_sum2) = a;
    let (b_sum1, b_sum2) = b;
    let numerator = n * scalar_product - a_sum1 * b_sum1;
    let denominator = ((n * a_sum2 - a_sum1 * a_sum1) * (n * b_sum2 - b_sum1 * b_sum1)).sqrt();
    numerator / denominator
}

/// A similarity measure between two cells of an expression matrix.
pub trait CellSimilarity {
    /// Computes the similarity between cells `a` and `b`, in `[-1, 1]` for
    /// cells with non-constant expression.
    fn similarity(&self, matrix: &ExpressionMatrix, a: CellId, b: CellId) -> f64;

    /// Computes the distance between two cells.
    ///
    /// Default implementation: 1.0 - similarity.
    fn distance(&self, matrix: &ExpressionMatrix, a: CellId, b: CellId) -> f64 {
        1.0 - self.similarity(matrix, a, b)
    }
}

/// Enum for the available cell similarity measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityType {
    /// Correlation over all non-zero counts.
    Exact,
    /// Correlation over the largest counts only.
    Approximate,
}

impl SimilarityType {
    /// Computes similarity using this measure.
    pub fn compute(&self, matrix: &ExpressionMatrix, a: CellId, b: CellId) -> f64 {
        match self {
            SimilarityType::Exact => ExactSimilarity.similarity(matrix, a, b),
            SimilarityType::Approximate => ApproximateSimilarity.similarity(matrix, a, b),
        }
    }
}
