//! Random-hyperplane Locality-Sensitive Hashing of cell expression vectors.
//!
//! Each cell of an [`ExpressionMatrixSubset`] gets one signature bit per
//! hyperplane: 1 if its mean-centered expression vector lies on the positive
//! side. The fraction of differing bits between two signatures estimates the
//! angle between the centered vectors, so
//! `cos(π · mismatches / lsh_count)` estimates their correlation.
//!
//! Centering never materializes dense vectors. For a hyperplane `U` and a cell
//! with counts `x` and mean `m`,
//!
//! ```text
//! (x - m)·U = x·U - m·sum(U)
//! ```
//!
//! `sum(U)` is computed once per hyperplane and `x·U` only visits the
//! non-zero counts, so a cell costs O(nnz × lsh_count).
//!
//! References:
//! - Charikar (2002): "Similarity estimation techniques from rounding algorithms"

use crate::config::LshConfig;
use crate::error::{MatrixError, Result};
use crate::matrix::{CellId, ExpressionMatrixSubset};
use crate::signature::{word_count_for, BitSet, BitSetView, BitSetViewMut, BitSets, Bits, BitsMut};
use crate::storage::{suffixed, MappedVec};
use bytemuck::{Pod, Zeroable};
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

/// Unit-length random hyperplane normals, stored gene-major so that all
/// components for one gene are contiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperplanes {
    gene_count: usize,
    lsh_count: usize,
    components: Vec<f64>,
}

impl Hyperplanes {
    /// Draws `lsh_count` hyperplanes in a space of `gene_count` dimensions.
    ///
    /// Each hyperplane gets `gene_count` independent standard normal
    /// components, drawn one hyperplane after the other, and is then scaled
    /// to unit length. The same arguments always give the same hyperplanes.
    pub fn generate(gene_count: usize, lsh_count: usize, seed: u64) -> Self {
        assert!(lsh_count > 0, "at least one hyperplane is needed");
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut components = vec![0.0; gene_count * lsh_count];

        for i in 0..lsh_count {
            let mut norm2 = 0.0;
            for gene in 0..gene_count {
                let x: f64 = rng.sample(StandardNormal);
                components[gene * lsh_count + i] = x;
                norm2 += x * x;
            }
            if norm2 > 0.0 {
                let factor = 1.0 / norm2.sqrt();
                for gene in 0..gene_count {
                    components[gene * lsh_count + i] *= factor;
                }
            }
        }

        Self {
            gene_count,
            lsh_count,
            components,
        }
    }

    /// Number of genes (dimensions).
    pub fn gene_count(&self) -> usize {
        self.gene_count
    }

    /// Number of hyperplanes.
    pub fn lsh_count(&self) -> usize {
        self.lsh_count
    }

    /// Components of all hyperplanes for one gene.
    #[inline]
    pub fn gene_row(&self, gene: usize) -> &[f64] {
        &self.components[gene * self.lsh_count..(gene + 1) * self.lsh_count]
    }

    /// Components of hyperplane `i`.
    pub fn column(&self, i: usize) -> impl Iterator<Item = f64> + '_ {
        self.components.iter().skip(i).step_by(self.lsh_count).copied()
    }

    /// Sum of the components of each hyperplane.
    pub fn column_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.lsh_count];
        for row in self.components.chunks_exact(self.lsh_count) {
            for (sum, &u) in sums.iter_mut().zip(row) {
                *sum += u;
            }
        }
        sums
    }
}

/// Header record of a saved [`Lsh`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
struct LshInfo {
    lsh_count: u64,
    cell_count: u64,
    word_count: u64,
    gene_count: u64,
    seed: u64,
}

/// LSH signatures of the cells of an expression matrix subset.
///
/// Cells are addressed by their local id in the subset.
#[derive(Debug, Clone)]
pub struct Lsh {
    hyperplanes: Hyperplanes,
    signatures: BitSets,
    seed: u64,
}

impl Lsh {
    /// Generates `lsh_count` hyperplanes from `seed` and computes the
    /// signature of every cell in `subset`.
    pub fn new(subset: &ExpressionMatrixSubset, lsh_count: usize, seed: u64) -> Self {
        info!(
            "Generating {} LSH hyperplanes for {} genes",
            lsh_count,
            subset.gene_count()
        );
        let hyperplanes = Hyperplanes::generate(subset.gene_count(), lsh_count, seed);

        info!("Computing LSH signatures of {} cells", subset.cell_count());
        let signatures = compute_signatures(&hyperplanes, subset);

        Self {
            hyperplanes,
            signatures,
            seed,
        }
    }

    /// Same as [`Lsh::new`] with the hyperplane count and seed taken from
    /// `config`.
    pub fn from_config(subset: &ExpressionMatrixSubset, config: &LshConfig) -> Self {
        Self::new(subset, config.lsh_count, config.seed)
    }

    /// Number of hyperplanes, the width of each signature in bits.
    pub fn lsh_count(&self) -> usize {
        self.hyperplanes.lsh_count()
    }

    /// Number of cells with a signature.
    pub fn cell_count(&self) -> usize {
        self.signatures.len()
    }

    /// Seed the hyperplanes were generated from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The hyperplanes.
    pub fn hyperplanes(&self) -> &Hyperplanes {
        &self.hyperplanes
    }

    /// All signatures, indexed by local cell id.
    pub fn signatures(&self) -> &BitSets {
        &self.signatures
    }

    /// Signature of local cell `local`.
    #[inline]
    pub fn signature(&self, local: CellId) -> BitSetView<'_> {
        self.signatures.get(local as usize)
    }

    /// Number of differing signature bits between two local cells.
    #[inline]
    pub fn count_mismatches(&self, a: CellId, b: CellId) -> usize {
        self.signature(a).count_mismatches(&self.signature(b))
    }

    /// Correlation estimate `cos(π · mismatches / lsh_count)`.
    pub fn estimate_similarity(&self, a: CellId, b: CellId) -> f64 {
        let angle = std::f64::consts::PI * self.count_mismatches(a, b) as f64 / self.lsh_count() as f64;
        angle.cos()
    }

    /// Groups local cells by identical signature, keeping only groups with
    /// at least `min_cell_count` cells. Groups iterate in signature order.
    pub fn signature_groups(&self, min_cell_count: usize) -> BTreeMap<BitSet, Vec<CellId>> {
        let mut groups: BTreeMap<BitSet, Vec<CellId>> = BTreeMap::new();
        for (local, signature) in self.signatures.iter().enumerate() {
            groups
                .entry(signature.to_bit_set())
                .or_default()
                .push(local as CellId);
        }
        groups.retain(|_, cells| cells.len() >= min_cell_count);
        debug!(
            "{} signature groups with at least {} cells",
            groups.len(),
            min_cell_count
        );
        groups
    }

    /// Saves the signatures to `<base>.info` and `<base>.signatures`.
    ///
    /// Hyperplanes are not written; [`Lsh::open`] regenerates them from the
    /// saved seed and gene count.
    pub fn save<P: AsRef<Path>>(&self, base: P) -> Result<()> {
        let base = base.as_ref();
        let mut info: MappedVec<LshInfo> = MappedVec::create_new(suffixed(base, "info"), 1, 1)?;
        info[0] = LshInfo {
            lsh_count: self.lsh_count() as u64,
            cell_count: self.cell_count() as u64,
            word_count: self.signatures.word_count() as u64,
            gene_count: self.hyperplanes.gene_count() as u64,
            seed: self.seed,
        };
        info.close()?;

        let words = self.signatures.as_words();
        let mut signatures: MappedVec<u64> =
            MappedVec::create_new(suffixed(base, "signatures"), words.len(), 0)?;
        signatures.copy_from_slice(words);
        signatures.close()
    }

    /// Opens signatures saved with [`Lsh::save`].
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        let info: MappedVec<LshInfo> = MappedVec::access_existing_read_only(suffixed(base, "info"))?;
        let header = match info.first() {
            Some(&header) if info.len() == 1 => header,
            _ => {
                return Err(MatrixError::InvalidData(format!(
                    "{} must hold exactly one record",
                    info.path().display()
                )))
            }
        };

        let lsh_count = header.lsh_count as usize;
        let signatures: MappedVec<u64> =
            MappedVec::access_existing_read_only(suffixed(base, "signatures"))?;
        if lsh_count == 0
            || header.word_count as usize != word_count_for(lsh_count)
            || signatures.len() != (header.cell_count * header.word_count) as usize
        {
            return Err(MatrixError::InvalidData(format!(
                "{} does not match {}",
                signatures.path().display(),
                info.path().display()
            )));
        }

        let hyperplanes = Hyperplanes::generate(header.gene_count as usize, lsh_count, header.seed);
        let signatures = BitSets::from_words(lsh_count, signatures.to_vec());
        info!(
            "Opened {} LSH signatures of {} bits from {}",
            signatures.len(),
            lsh_count,
            base.display()
        );

        Ok(Self {
            hyperplanes,
            signatures,
            seed: header.seed,
        })
    }
}

/// Computes one signature per subset cell, in parallel over cells.
fn compute_signatures(hyperplanes: &Hyperplanes, subset: &ExpressionMatrixSubset) -> BitSets {
    let lsh_count = hyperplanes.lsh_count();
    let gene_count = subset.gene_count();
    let cell_count = subset.cell_count();
    assert_eq!(hyperplanes.gene_count(), gene_count, "hyperplanes and subset disagree on gene count");

    let column_sums = hyperplanes.column_sums();
    let mut signatures = BitSets::new(cell_count, lsh_count);
    let word_count = signatures.word_count();

    let start = Instant::now();
    signatures
        .words_mut()
        .par_chunks_mut(word_count)
        .enumerate()
        .for_each_init(
            || vec![0.0; lsh_count],
            |scalar_products, (local, words)| {
                let local = local as CellId;
                let mean = subset.sum(local).sum1 / gene_count as f64;
                for (p, &sum) in scalar_products.iter_mut().zip(&column_sums) {
                    *p = -mean * sum;
                }

                for entry in subset.cell_expression_counts(local) {
                    let count = f64::from(entry.count);
                    let row = hyperplanes.gene_row(entry.gene_id as usize);
                    for (p, &u) in scalar_products.iter_mut().zip(row) {
                        *p += count * u;
                    }
                }

                let mut signature = BitSetViewMut::new(words);
                for (i, &p) in scalar_products.iter().enumerate() {
                    if p > 0.0 {
                        signature.set(i);
                    }
                }
            },
        );
    let seconds = start.elapsed().as_secs_f64();

    let non_zero = subset.total_nonzero() as f64;
    info!(
        "Processed {} non-zero expression counts for {} genes and {} cells",
        non_zero, gene_count, cell_count
    );
    info!(
        "Average expression matrix sparsity is {:.6}",
        non_zero / (gene_count as f64 * cell_count as f64)
    );
    info!(
        "LSH signatures took {:.3}s, {:.3e}s per cell, {:.2} Gflop/s",
        seconds,
        seconds / cell_count as f64,
        2e-9 * non_zero * lsh_count as f64 / seconds
    );

    signatures
}
