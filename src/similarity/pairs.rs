//! Brute-force search for the most similar cells.

use crate::config::SimilarityConfig;
use crate::matrix::{CellId, ExpressionMatrix};
use crate::similarity::SimilarityType;
use log::info;
use rayon::prelude::*;
use std::time::Instant;

/// A neighbor of a cell and its similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Global id of the neighbor.
    pub cell_id: CellId,
    /// Similarity to the cell whose list this neighbor belongs to.
    pub similarity: f64,
}

/// For each cell of a cell set, its most similar cells in the same set.
#[derive(Debug, Clone, Default)]
pub struct SimilarPairs {
    cells: Vec<CellId>,
    neighbors: Vec<Vec<Neighbor>>,
}

impl SimilarPairs {
    /// The cell set, in the order neighbor lists are stored.
    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    /// Neighbors of `cell_id`, most similar first. Empty if the cell is not
    /// in the cell set.
    pub fn neighbors(&self, cell_id: CellId) -> &[Neighbor] {
        match self.cells.binary_search(&cell_id) {
            Ok(i) => &self.neighbors[i],
            Err(_) => &[],
        }
    }

    /// Total number of stored (cell, neighbor) pairs.
    pub fn pair_count(&self) -> usize {
        self.neighbors.iter().map(Vec::len).sum()
    }

    /// Iterates over `(cell, neighbors)` for every cell of the set.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &[Neighbor])> + '_ {
        self.cells
            .iter()
            .copied()
            .zip(self.neighbors.iter().map(Vec::as_slice))
    }
}

/// Compares every pair of `cells` and keeps, for each cell, up to
/// `config.max_neighbors` other cells with similarity at least
/// `config.similarity_threshold`.
///
/// `cells` must be sorted. The work is O(N²) and runs in parallel over cells.
/// Pairs with a NaN similarity are never kept.
pub fn find_similar_pairs(
    matrix: &ExpressionMatrix,
    cells: &[CellId],
    config: &SimilarityConfig,
) -> SimilarPairs {
    assert!(cells.windows(2).all(|w| w[0] < w[1]), "cell set must be sorted without duplicates");
    let measure = if config.use_exact_similarity {
        SimilarityType::Exact
    } else {
        SimilarityType::Approximate
    };

    let start = Instant::now();
    let neighbors: Vec<Vec<Neighbor>> = cells
        .par_iter()
        .map(|&a| {
            let mut list: Vec<Neighbor> = cells
                .iter()
                .filter(|&&b| b != a)
                .map(|&b| Neighbor {
                    cell_id: b,
                    similarity: measure.compute(matrix, a, b),
                })
                .filter(|n| n.similarity >= config.similarity_threshold)
                .collect();
            list.sort_by(|x, y| {
                y.similarity
                    .total_cmp(&x.similarity)
                    .then_with(|| x.cell_id.cmp(&y.cell_id))
            });
            list.truncate(config.max_neighbors);
            list
        })
        .collect();

    let pairs = SimilarPairs {
        cells: cells.to_vec(),
        neighbors,
    };
    info!(
        "Found {} similar pairs among {} cells in {:.3}s using {:?} similarity",
        pairs.pair_count(),
        cells.len(),
        start.elapsed().as_secs_f64(),
        measure
    );
    pairs
}
