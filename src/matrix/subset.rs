//! Gene sets and the expression matrix restricted to a subset of genes and
//! cells.

use crate::error::{MatrixError, Result};
use crate::matrix::cell::{CellId, ExpressionCount, GeneId};
use crate::matrix::expression::ExpressionMatrix;
use crate::storage::{suffixed, MappedVec, RaggedVec};
use bytemuck::{Pod, Zeroable};
use log::info;
use std::path::Path;

/// A sorted set of global gene ids. The position of a gene in the set is its
/// local gene id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeneSet {
    genes: Vec<GeneId>,
}

impl GeneSet {
    /// Builds a set from arbitrary ids, sorting and removing duplicates.
    pub fn new<I: IntoIterator<Item = GeneId>>(genes: I) -> Self {
        let mut genes: Vec<GeneId> = genes.into_iter().collect();
        genes.sort_unstable();
        genes.dedup();
        Self { genes }
    }

    /// The set of all genes `0..gene_count`.
    pub fn all(gene_count: usize) -> Self {
        Self {
            genes: (0..gene_count as GeneId).collect(),
        }
    }

    /// Number of genes.
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Returns true if `global` is in the set.
    pub fn contains(&self, global: GeneId) -> bool {
        self.local_gene_id(global).is_some()
    }

    /// Local id of a global gene id.
    #[inline]
    pub fn local_gene_id(&self, global: GeneId) -> Option<GeneId> {
        self.genes.binary_search(&global).ok().map(|i| i as GeneId)
    }

    /// Global id of a local gene id.
    #[inline]
    pub fn global_gene_id(&self, local: GeneId) -> GeneId {
        self.genes[local as usize]
    }

    /// The global ids in increasing order.
    pub fn as_slice(&self) -> &[GeneId] {
        &self.genes
    }
}

/// Sums of one subset cell's counts over the genes of the subset.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct SubsetSum {
    /// Sum of counts.
    pub sum1: f64,
    /// Sum of squared counts.
    pub sum2: f64,
}

/// Copy of the sparse rows of selected cells, restricted to a gene set and
/// renumbered with local gene and cell ids.
///
/// Stored under a base path as `<base>.genes`, `<base>.cells`, `<base>.sums`
/// and the ragged pair `<base>.counts.toc` / `<base>.counts.data`.
#[derive(Debug)]
pub struct ExpressionMatrixSubset {
    genes: MappedVec<GeneId>,
    cells: MappedVec<CellId>,
    sums: MappedVec<SubsetSum>,
    counts: RaggedVec<ExpressionCount>,
}

impl ExpressionMatrixSubset {
    /// Builds the subset of `matrix` for `gene_set` and `cells`.
    ///
    /// # Panics
    ///
    /// Panics if `cells` is not strictly increasing.
    pub fn create_new<P: AsRef<Path>>(
        base: P,
        gene_set: &GeneSet,
        cells: &[CellId],
        matrix: &ExpressionMatrix,
    ) -> Result<Self> {
        assert!(
            cells.windows(2).all(|w| w[0] < w[1]),
            "cell set must be sorted without duplicates"
        );
        let base = base.as_ref();

        let mut genes: MappedVec<GeneId> = MappedVec::create_new(suffixed(base, "genes"), gene_set.len(), 0)?;
        genes.copy_from_slice(gene_set.as_slice());
        let mut cell_ids: MappedVec<CellId> = MappedVec::create_new(suffixed(base, "cells"), cells.len(), 0)?;
        cell_ids.copy_from_slice(cells);
        let mut sums: MappedVec<SubsetSum> = MappedVec::create_new(suffixed(base, "sums"), cells.len(), 0)?;
        let mut counts: RaggedVec<ExpressionCount> = RaggedVec::create_new(suffixed(base, "counts"))?;

        let mut pass1 = counts.begin_pass1(cells.len());
        for (local, &cell_id) in cells.iter().enumerate() {
            pass1.increment_count_by(local, retained_counts(matrix, gene_set, cell_id).count() as u64);
        }
        let mut pass2 = pass1.begin_pass2()?;
        for (local, &cell_id) in cells.iter().enumerate() {
            let mut sum = SubsetSum::default();
            for entry in retained_counts(matrix, gene_set, cell_id) {
                let c = f64::from(entry.count);
                sum.sum1 += c;
                sum.sum2 += c * c;
                pass2.store(local, entry);
            }
            sums[local] = sum;
        }
        pass2.end_pass2();

        info!(
            "Created expression matrix subset {} with {} genes, {} cells, {} non-zero counts",
            base.display(),
            gene_set.len(),
            cells.len(),
            counts.total_len()
        );

        Ok(Self {
            genes,
            cells: cell_ids,
            sums,
            counts,
        })
    }

    /// Opens a subset previously built with [`ExpressionMatrixSubset::create_new`].
    pub fn access_existing<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        let subset = Self {
            genes: MappedVec::access_existing(suffixed(base, "genes"), false)?,
            cells: MappedVec::access_existing(suffixed(base, "cells"), false)?,
            sums: MappedVec::access_existing(suffixed(base, "sums"), false)?,
            counts: RaggedVec::access_existing(suffixed(base, "counts"), false)?,
        };
        let n = subset.cells.len();
        if subset.sums.len() != n || subset.counts.len() != n {
            return Err(MatrixError::InvalidData(format!(
                "subset {} has inconsistent cell counts",
                base.display()
            )));
        }
        Ok(subset)
    }

    /// Number of genes in the subset.
    #[inline]
    pub fn gene_count(&self) -> usize {
        self.genes.len()
    }

    /// Number of cells in the subset.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Global id of local gene `local`.
    pub fn global_gene_id(&self, local: GeneId) -> GeneId {
        self.genes[local as usize]
    }

    /// Global id of local cell `local`.
    pub fn global_cell_id(&self, local: CellId) -> CellId {
        self.cells[local as usize]
    }

    /// Local id of a global cell id, if the cell is in the subset.
    pub fn local_cell_id(&self, global: CellId) -> Option<CellId> {
        self.cells.binary_search(&global).ok().map(|i| i as CellId)
    }

    /// Counts of local cell `local`, keyed by local gene id in increasing order.
    #[inline]
    pub fn cell_expression_counts(&self, local: CellId) -> &[ExpressionCount] {
        self.counts.row(local as usize)
    }

    /// Sums of local cell `local` over the subset genes.
    #[inline]
    pub fn sum(&self, local: CellId) -> SubsetSum {
        self.sums[local as usize]
    }

    /// Total number of stored non-zero counts.
    pub fn total_nonzero(&self) -> usize {
        self.counts.total_len()
    }

    /// Unmaps the backing files.
    pub fn close(self) -> Result<()> {
        self.genes.close()?;
        self.cells.close()?;
        self.sums.close()?;
        self.counts.close()
    }

    /// Deletes the backing files.
    pub fn remove(self) -> Result<()> {
        self.genes.remove()?;
        self.cells.remove()?;
        self.sums.remove()?;
        self.counts.remove()
    }
}

/// Counts of a cell restricted to a gene set, renumbered with local gene ids.
fn retained_counts<'a>(
    matrix: &'a ExpressionMatrix,
    gene_set: &'a GeneSet,
    cell_id: CellId,
) -> impl Iterator<Item = ExpressionCount> + 'a {
    matrix.cell_expression_counts(cell_id).iter().filter_map(move |e| {
        gene_set
            .local_gene_id(e.gene_id)
            .map(|local| ExpressionCount::new(local, e.count))
    })
}
