//! Configuration for the cellmatrix storage and similarity engine.

use serde::{Deserialize, Serialize};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Expression matrix storage configuration.
    pub matrix: MatrixConfig,

    /// LSH signature configuration.
    pub lsh: LshConfig,

    /// Similar pair search configuration.
    pub similarity: SimilarityConfig,
}

/// Expression matrix storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Number of genes the name table is pre-sized for.
    /// Default: 50,000.
    pub gene_capacity: usize,

    /// Number of cells the per-cell arrays are pre-sized for.
    /// Pre-sizing avoids repeated remaps during bulk loads.
    /// Default: 100,000.
    pub cell_capacity: usize,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            gene_capacity: 50_000,
            cell_capacity: 100_000,
        }
    }
}

/// LSH signature configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LshConfig {
    /// Number of hyperplanes, which is also the signature width in bits.
    /// Default: 1024.
    pub lsh_count: usize,

    /// Seed for hyperplane generation. Identical seeds give identical
    /// hyperplanes for the same gene count.
    /// Default: 231.
    pub seed: u64,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            lsh_count: 1024,
            seed: 231,
        }
    }
}

/// Similar pair search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Minimum similarity for a pair to be kept.
    /// Default: 0.5.
    pub similarity_threshold: f64,

    /// Maximum number of neighbors kept per cell.
    /// Default: 20.
    pub max_neighbors: usize,

    /// Use exact instead of approximate similarity.
    /// Default: true.
    pub use_exact_similarity: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            max_neighbors: 20,
            use_exact_similarity: true,
        }
    }
}
