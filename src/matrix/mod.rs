//! Sparse single-cell expression matrix storage.

mod cell;
mod expression;
mod subset;

pub use cell::{
    CellId, CellSummary, ExpressionCount, GeneId, MetaDataPair, NormalizationMethod, StringId,
    CELL_NAME_KEY, INVALID_CELL_ID, INVALID_GENE_ID,
};
pub use expression::ExpressionMatrix;
pub use subset::{ExpressionMatrixSubset, GeneSet, SubsetSum};
