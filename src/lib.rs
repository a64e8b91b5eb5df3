//! # cellmatrix - Sparse Single-Cell Expression Storage
//!
//! cellmatrix stores large sparse gene-expression matrices on disk in
//! memory-mapped files and computes similarities between cells.
//!
//! ## Overview
//!
//! Each cell is a sparse row of (gene, count) pairs sorted by gene id, with a
//! cached summary (sums and norms) used to compute Pearson correlations
//! without touching the zero entries. Cells can be hashed into compact bit
//! signatures with random-hyperplane LSH so that cells with identical
//! signatures can be grouped cheaply.
//!
//! ## Key Features
//!
//! - **Mapped growable arrays** with page-rounded files and 1.5x growth
//! - **Ragged arrays** built incrementally or with a two-pass count-then-fill
//! - **Exact and approximate correlation** via sparse merge-join dot products
//! - **LSH signatures** computed with a centering shortcut, in parallel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cellmatrix::{Config, ExpressionMatrix, ExpressionMatrixSubset, GeneSet, Lsh};
//!
//! let config = Config::default();
//! let mut matrix = ExpressionMatrix::create_new("data/matrix", &config.matrix)?;
//!
//! let cell = matrix.add_cell(
//!     &[("CellName", "A")],
//!     &[("CD4", 10.0), ("CD8A", 5.0)],
//!     10,
//! )?;
//! let similarity = matrix.compute_cell_similarity(cell, cell);
//!
//! let genes = GeneSet::all(matrix.gene_count());
//! let cells: Vec<u32> = (0..matrix.cell_count() as u32).collect();
//! let subset = ExpressionMatrixSubset::create_new("data/subset", &genes, &cells, &matrix)?;
//! let lsh = Lsh::from_config(&subset, &config.lsh);
//! let groups = lsh.signature_groups(2);
//! ```
//!
//! ## Architecture
//!
//! - [`storage`] - Memory-mapped arrays, ragged arrays and name tables
//! - [`signature`] - Packed bit signatures
//! - [`matrix`] - Expression matrix, gene sets and matrix subsets
//! - [`similarity`] - Correlation between cells and similar pair search
//! - [`index`] - LSH signatures

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod index;
pub mod matrix;
pub mod signature;
pub mod similarity;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, LshConfig, MatrixConfig, SimilarityConfig};
pub use error::{MatrixError, Result};
pub use index::{Hyperplanes, Lsh};
pub use matrix::{
    CellId, CellSummary, ExpressionCount, ExpressionMatrix, ExpressionMatrixSubset, GeneId,
    GeneSet, NormalizationMethod, INVALID_CELL_ID, INVALID_GENE_ID,
};
pub use signature::{BitSet, BitSets, Bits, BitsMut};
pub use similarity::{
    find_similar_pairs, ApproximateSimilarity, CellSimilarity, ExactSimilarity, SimilarPairs,
    SimilarityType,
};
pub use storage::{MappedVec, RaggedVec, StringTable};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
