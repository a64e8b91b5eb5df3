//! Identifier types and the fixed-size records stored per cell.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Sequential cell identifier, assigned in insertion order.
pub type CellId = u32;

/// Sequential gene identifier, assigned in insertion order.
pub type GeneId = u32;

/// Identifier of an entry in a string table.
pub type StringId = u32;

/// Sentinel for a cell id that does not exist, for callers that keep ids in
/// flat arrays instead of `Option`.
pub const INVALID_CELL_ID: CellId = CellId::MAX;

/// Sentinel for a gene id that does not exist.
pub const INVALID_GENE_ID: GeneId = GeneId::MAX;

/// Meta data key that every cell must carry.
pub const CELL_NAME_KEY: &str = "CellName";

/// One non-zero entry of a sparse expression row.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ExpressionCount {
    /// Gene this count belongs to.
    pub gene_id: GeneId,
    /// Expression count, always positive once stored.
    pub count: f32,
}

impl ExpressionCount {
    /// Creates an entry.
    #[inline]
    pub fn new(gene_id: GeneId, count: f32) -> Self {
        Self { gene_id, count }
    }
}

/// Aggregates cached for each cell at insertion time.
///
/// `large_sum1` and `large_sum2` cover only the entries kept in the large
/// counts row used for approximate similarity.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct CellSummary {
    /// Sum of all counts.
    pub sum1: f64,
    /// Sum of all squared counts.
    pub sum2: f64,
    /// L2 norm, `sqrt(sum2)`.
    pub norm2: f64,
    /// `1 / sum1`.
    pub norm1_inverse: f64,
    /// `1 / norm2`.
    pub norm2_inverse: f64,
    /// Sum of the retained large counts.
    pub large_sum1: f64,
    /// Sum of the squares of the retained large counts.
    pub large_sum2: f64,
}

impl CellSummary {
    /// Computes the summary of a cell from its full sparse row and its
    /// truncated large counts row.
    pub fn from_rows(counts: &[ExpressionCount], large_counts: &[ExpressionCount]) -> Self {
        let (sum1, sum2) = sums(counts);
        let (large_sum1, large_sum2) = sums(large_counts);
        let norm2 = sum2.sqrt();
        Self {
            sum1,
            sum2,
            norm2,
            norm1_inverse: 1.0 / sum1,
            norm2_inverse: 1.0 / norm2,
            large_sum1,
            large_sum2,
        }
    }

    /// L1 norm, equal to `sum1` since counts are non-negative.
    #[inline]
    pub fn norm1(&self) -> f64 {
        self.sum1
    }
}

fn sums(counts: &[ExpressionCount]) -> (f64, f64) {
    counts.iter().fold((0.0, 0.0), |(s1, s2), e| {
        let c = f64::from(e.count);
        (s1 + c, s2 + c * c)
    })
}

/// A (name, value) pair of cell meta data, both ids into string tables.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MetaDataPair {
    /// Id in the meta data names table.
    pub name_id: StringId,
    /// Id in the meta data values table.
    pub value_id: StringId,
}

/// Normalization applied to expression counts before averaging or scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalizationMethod {
    /// Raw counts.
    #[default]
    None,
    /// Counts divided by their sum.
    L1,
    /// Counts divided by their L2 norm.
    L2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_from_rows() {
        let counts = [ExpressionCount::new(0, 10.0), ExpressionCount::new(2, 5.0)];
        let summary = CellSummary::from_rows(&counts, &counts[..1]);
        assert_eq!(summary.sum1, 15.0);
        assert_eq!(summary.sum2, 125.0);
        assert!((summary.norm2 - 125f64.sqrt()).abs() < 1e-12);
        assert!((summary.norm1_inverse - 1.0 / 15.0).abs() < 1e-12);
        assert_eq!(summary.large_sum1, 10.0);
        assert_eq!(summary.large_sum2, 100.0);
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<ExpressionCount>(), 8);
        assert_eq!(std::mem::size_of::<MetaDataPair>(), 8);
        assert_eq!(std::mem::size_of::<CellSummary>(), 56);
    }
}
