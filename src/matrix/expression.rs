//! The persistent expression matrix.
//!
//! A matrix lives in its own directory. Every component is a mapped file or
//! ragged pair of mapped files:
//!
//! | Base name                   | Content                                    |
//! |-----------------------------|--------------------------------------------|
//! | `GeneNames`                 | gene name table, id = [`GeneId`]           |
//! | `CellNames`                 | cell name table, id = [`CellId`]           |
//! | `Cells`                     | one [`CellSummary`] per cell               |
//! | `CellMetaData`              | (name, value) id pairs per cell            |
//! | `CellMetaDataNames`         | meta data name table                       |
//! | `CellMetaDataValues`        | meta data value table                      |
//! | `CellMetaDataNamesUsageCount` | number of cells using each meta data name |
//! | `CellExpressionCounts`      | sparse row per cell, sorted by gene id     |
//! | `LargeCellExpressionCounts` | largest counts per cell, sorted by gene id |

use crate::config::MatrixConfig;
use crate::error::{MatrixError, Result};
use crate::matrix::cell::{
    CellId, CellSummary, ExpressionCount, GeneId, MetaDataPair, NormalizationMethod,
    CELL_NAME_KEY,
};
use crate::matrix::subset::GeneSet;
use crate::similarity::{correlation, scalar_product};
use crate::storage::{MappedVec, RaggedVec, StringTable};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Sparse cell-by-gene expression counts with per-cell summaries, names and
/// meta data, all backed by memory-mapped files.
///
/// Single writer: mutating calls must not run concurrently with anything
/// else on the same matrix. Read-only methods take `&self` and can be shared
/// across threads.
#[derive(Debug)]
pub struct ExpressionMatrix {
    directory: PathBuf,
    gene_names: StringTable,
    cell_names: StringTable,
    cells: MappedVec<CellSummary>,
    cell_meta_data: RaggedVec<MetaDataPair>,
    meta_data_names: StringTable,
    meta_data_values: StringTable,
    meta_data_name_usage: MappedVec<u32>,
    expression_counts: RaggedVec<ExpressionCount>,
    large_expression_counts: RaggedVec<ExpressionCount>,
}

impl ExpressionMatrix {
    /// Creates an empty matrix in a new directory.
    ///
    /// Fails with [`MatrixError::DirectoryExists`] if `directory` exists.
    pub fn create_new<P: AsRef<Path>>(directory: P, config: &MatrixConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if directory.exists() {
            return Err(MatrixError::DirectoryExists(directory));
        }
        fs::create_dir(&directory)?;

        let mut gene_names = StringTable::create_new(directory.join("GeneNames"))?;
        let mut cell_names = StringTable::create_new(directory.join("CellNames"))?;
        let cells: MappedVec<CellSummary> = MappedVec::create_new(directory.join("Cells"), 0, config.cell_capacity)?;
        let mut cell_meta_data: RaggedVec<MetaDataPair> = RaggedVec::create_new(directory.join("CellMetaData"))?;
        let meta_data_names = StringTable::create_new(directory.join("CellMetaDataNames"))?;
        let meta_data_values = StringTable::create_new(directory.join("CellMetaDataValues"))?;
        let meta_data_name_usage: MappedVec<u32> =
            MappedVec::create_new(directory.join("CellMetaDataNamesUsageCount"), 0, 0)?;
        let mut expression_counts: RaggedVec<ExpressionCount> =
            RaggedVec::create_new(directory.join("CellExpressionCounts"))?;
        let mut large_expression_counts: RaggedVec<ExpressionCount> =
            RaggedVec::create_new(directory.join("LargeCellExpressionCounts"))?;

        gene_names.reserve(config.gene_capacity, 0)?;
        cell_names.reserve(config.cell_capacity, 0)?;
        cell_meta_data.reserve(config.cell_capacity, 0)?;
        expression_counts.reserve(config.cell_capacity, 0)?;
        large_expression_counts.reserve(config.cell_capacity, 0)?;

        info!(
            "Created expression matrix at {} (capacity {} genes, {} cells)",
            directory.display(),
            config.gene_capacity,
            config.cell_capacity
        );

        Ok(Self {
            directory,
            gene_names,
            cell_names,
            cells,
            cell_meta_data,
            meta_data_names,
            meta_data_values,
            meta_data_name_usage,
            expression_counts,
            large_expression_counts,
        })
    }

    /// Opens a matrix previously created with [`ExpressionMatrix::create_new`].
    pub fn access_existing<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            return Err(MatrixError::FileNotFound(directory));
        }

        let matrix = Self {
            gene_names: StringTable::access_existing(directory.join("GeneNames"), true)?,
            cell_names: StringTable::access_existing(directory.join("CellNames"), true)?,
            cells: MappedVec::access_existing(directory.join("Cells"), true)?,
            cell_meta_data: RaggedVec::access_existing(directory.join("CellMetaData"), true)?,
            meta_data_names: StringTable::access_existing(directory.join("CellMetaDataNames"), true)?,
            meta_data_values: StringTable::access_existing(directory.join("CellMetaDataValues"), true)?,
            meta_data_name_usage: MappedVec::access_existing(
                directory.join("CellMetaDataNamesUsageCount"),
                true,
            )?,
            expression_counts: RaggedVec::access_existing(directory.join("CellExpressionCounts"), true)?,
            large_expression_counts: RaggedVec::access_existing(
                directory.join("LargeCellExpressionCounts"),
                true,
            )?,
            directory,
        };

        if !matrix.is_consistent() {
            return Err(MatrixError::InvalidData(format!(
                "component sizes disagree in {}",
                matrix.directory.display()
            )));
        }

        info!(
            "Opened expression matrix at {} ({} genes, {} cells)",
            matrix.directory.display(),
            matrix.gene_count(),
            matrix.cell_count()
        );
        Ok(matrix)
    }

    /// Directory holding the backing files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of genes.
    #[inline]
    pub fn gene_count(&self) -> usize {
        self.gene_names.len()
    }

    /// Number of cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Adds a gene. Returns false if a gene with this name already exists.
    pub fn add_gene(&mut self, name: &str) -> Result<bool> {
        if self.gene_names.contains(name) {
            return Ok(false);
        }
        self.gene_names.get_or_insert(name)?;
        Ok(true)
    }

    /// Adds a cell and returns its id.
    ///
    /// `meta_data` must contain a `CellName` entry with a name not used by
    /// any other cell. It is stored first among the cell's meta data.
    /// Zero counts are dropped; negative counts and genes listed twice with
    /// non-zero counts are rejected. Genes not yet known are added.
    ///
    /// The `max_term_count` largest counts are also kept in a separate row
    /// for [`ExpressionMatrix::compute_approximate_cell_similarity`].
    ///
    /// All input is validated before anything is written, so the matrix is
    /// unchanged when an error is returned.
    pub fn add_cell<K, V, G>(
        &mut self,
        meta_data: &[(K, V)],
        expression_counts: &[(G, f32)],
        max_term_count: usize,
    ) -> Result<CellId>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        G: AsRef<str>,
    {
        assert!(self.cell_count() < CellId::MAX as usize, "cell id space exhausted");

        let cell_name_index = meta_data
            .iter()
            .position(|(key, _)| key.as_ref() == CELL_NAME_KEY)
            .ok_or(MatrixError::MissingCellName)?;
        let cell_name = meta_data[cell_name_index].1.as_ref();
        if self.cell_names.contains(cell_name) {
            return Err(MatrixError::DuplicateCellName(cell_name.to_string()));
        }

        let mut non_zero: Vec<(&str, f32)> = Vec::with_capacity(expression_counts.len());
        for (gene, count) in expression_counts {
            let (gene, count) = (gene.as_ref(), *count);
            if count.is_nan() {
                return Err(MatrixError::InvalidData(format!(
                    "expression count for cell {cell_name} gene {gene} is not a number"
                )));
            }
            if count < 0.0 {
                return Err(MatrixError::NegativeExpressionCount {
                    cell: cell_name.to_string(),
                    gene: gene.to_string(),
                    count,
                });
            }
            if count > 0.0 {
                non_zero.push((gene, count));
            }
        }

        let mut by_name: Vec<&str> = non_zero.iter().map(|&(gene, _)| gene).collect();
        by_name.sort_unstable();
        if let Some(pair) = by_name.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(MatrixError::DuplicateGene {
                cell: cell_name.to_string(),
                gene: pair[0].to_string(),
            });
        }

        // Largest counts first, ties by gene name.
        let mut large: Vec<usize> = (0..non_zero.len()).collect();
        large.sort_by(|&i, &j| {
            let (a, b) = (non_zero[i], non_zero[j]);
            b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0))
        });
        large.truncate(max_term_count);

        // Validation done, start writing.
        let cell_id = self.cell_count() as CellId;

        for (gene, _) in expression_counts {
            self.gene_names.get_or_insert(gene.as_ref())?;
        }
        let gene_ids: Vec<GeneId> = non_zero
            .iter()
            .map(|&(gene, _)| self.gene_names.get_or_insert(gene))
            .collect::<Result<_>>()?;
        let mut large_stored: Vec<ExpressionCount> = large
            .iter()
            .map(|&i| ExpressionCount::new(gene_ids[i], non_zero[i].1))
            .collect();
        large_stored.sort_unstable_by_key(|e| e.gene_id);

        self.cell_names.get_or_insert(cell_name)?;

        self.cell_meta_data.append_vector()?;
        let ordered = std::iter::once(&meta_data[cell_name_index]).chain(
            meta_data
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != cell_name_index)
                .map(|(_, pair)| pair),
        );
        for (key, value) in ordered {
            let pair = MetaDataPair {
                name_id: self.meta_data_names.get_or_insert(key.as_ref())?,
                value_id: self.meta_data_values.get_or_insert(value.as_ref())?,
            };
            self.increment_meta_data_name_usage(pair.name_id)?;
            self.cell_meta_data.append(pair)?;
        }

        self.expression_counts.append_vector()?;
        for (&gene_id, &(_, count)) in gene_ids.iter().zip(&non_zero) {
            self.expression_counts.append(ExpressionCount::new(gene_id, count))?;
        }
        self.expression_counts
            .row_mut(cell_id as usize)
            .sort_unstable_by_key(|e| e.gene_id);

        self.large_expression_counts.append_row(large_stored)?;

        let summary = CellSummary::from_rows(
            self.expression_counts.row(cell_id as usize),
            self.large_expression_counts.row(cell_id as usize),
        );
        self.cells.push(summary)?;

        self.check_invariants();
        debug!(
            "Added cell {cell_name} as {cell_id} with {} non-zero counts",
            self.expression_counts.row_len(cell_id as usize)
        );
        Ok(cell_id)
    }

    /// Resolves a cell given either its name or its numeric id as a string.
    ///
    /// A numeric string is taken as an id only if it is in range, otherwise
    /// it is looked up as a name.
    pub fn cell_id_from_string(&self, s: &str) -> Option<CellId> {
        s.parse::<CellId>()
            .ok()
            .filter(|&id| (id as usize) < self.cell_count())
            .or_else(|| self.cell_names.id(s))
    }

    /// Resolves a gene given either its name or its numeric id as a string.
    pub fn gene_id_from_string(&self, s: &str) -> Option<GeneId> {
        s.parse::<GeneId>()
            .ok()
            .filter(|&id| (id as usize) < self.gene_count())
            .or_else(|| self.gene_names.id(s))
    }

    /// Name of cell `cell_id`.
    pub fn cell_name(&self, cell_id: CellId) -> &str {
        self.cell_names.name(cell_id)
    }

    /// Name of gene `gene_id`.
    pub fn gene_name(&self, gene_id: GeneId) -> &str {
        self.gene_names.name(gene_id)
    }

    /// Cached aggregates of cell `cell_id`.
    #[inline]
    pub fn cell_summary(&self, cell_id: CellId) -> &CellSummary {
        &self.cells[cell_id as usize]
    }

    /// Non-zero counts of cell `cell_id`, sorted by gene id.
    #[inline]
    pub fn cell_expression_counts(&self, cell_id: CellId) -> &[ExpressionCount] {
        self.expression_counts.row(cell_id as usize)
    }

    /// The largest counts of cell `cell_id`, sorted by gene id.
    #[inline]
    pub fn large_cell_expression_counts(&self, cell_id: CellId) -> &[ExpressionCount] {
        self.large_expression_counts.row(cell_id as usize)
    }

    /// Count for one gene in one cell, 0 if the gene is not expressed.
    pub fn get_expression_count(&self, cell_id: CellId, gene_id: GeneId) -> f32 {
        let row = self.cell_expression_counts(cell_id);
        match row.binary_search_by_key(&gene_id, |e| e.gene_id) {
            Ok(i) => row[i].count,
            Err(_) => 0.0,
        }
    }

    /// Value of meta data field `name` for a cell.
    pub fn cell_meta_data(&self, cell_id: CellId, name: &str) -> Option<&str> {
        let name_id = self.meta_data_names.id(name)?;
        self.cell_meta_data
            .row(cell_id as usize)
            .iter()
            .find(|pair| pair.name_id == name_id)
            .map(|pair| self.meta_data_values.name(pair.value_id))
    }

    /// Replaces the value of meta data field `name` of a cell.
    ///
    /// The cell must already have the field: meta data rows are exactly
    /// sized when the cell is added. Renaming through `CellName` is rejected.
    pub fn set_cell_meta_data(&mut self, cell_id: CellId, name: &str, value: &str) -> Result<()> {
        if name == CELL_NAME_KEY {
            return Err(MatrixError::InvalidData(format!(
                "{CELL_NAME_KEY} of cell {} cannot be changed",
                self.cell_name(cell_id)
            )));
        }
        let position = self.meta_data_names.id(name).and_then(|name_id| {
            self.cell_meta_data
                .row(cell_id as usize)
                .iter()
                .position(|pair| pair.name_id == name_id)
        });
        let Some(position) = position else {
            return Err(MatrixError::MissingMetaData {
                cell: self.cell_name(cell_id).to_string(),
                name: name.to_string(),
            });
        };

        let value_id = self.meta_data_values.get_or_insert(value)?;
        self.cell_meta_data.row_mut(cell_id as usize)[position].value_id = value_id;
        Ok(())
    }

    /// Number of cells that have meta data field `name`.
    pub fn cell_meta_data_name_usage_count(&self, name: &str) -> u32 {
        self.meta_data_names
            .id(name)
            .map_or(0, |name_id| self.meta_data_name_usage[name_id as usize])
    }

    /// All meta data names with the number of cells using each, in order of
    /// first use.
    pub fn cell_meta_data_names(&self) -> Vec<(&str, u32)> {
        self.meta_data_names
            .iter()
            .zip(self.meta_data_name_usage.iter().copied())
            .collect()
    }

    fn increment_meta_data_name_usage(&mut self, name_id: u32) -> Result<()> {
        let name_id = name_id as usize;
        if name_id < self.meta_data_name_usage.len() {
            self.meta_data_name_usage[name_id] += 1;
        } else {
            assert_eq!(name_id, self.meta_data_name_usage.len(), "meta data name usage out of sync");
            self.meta_data_name_usage.push(1)?;
        }
        Ok(())
    }

    /// All meta data of a cell, `CellName` first.
    pub fn all_cell_meta_data(&self, cell_id: CellId) -> Vec<(&str, &str)> {
        self.cell_meta_data
            .row(cell_id as usize)
            .iter()
            .map(|pair| {
                (
                    self.meta_data_names.name(pair.name_id),
                    self.meta_data_values.name(pair.value_id),
                )
            })
            .collect()
    }

    /// Frequencies of the values of meta data field `name` over `cells`,
    /// most frequent first, ties by value. Cells without the field are
    /// skipped.
    pub fn histogram_meta_data(&self, cells: &[CellId], name: &str) -> Vec<(&str, usize)> {
        let mut histogram: BTreeMap<&str, usize> = BTreeMap::new();
        for &cell_id in cells {
            if let Some(value) = self.cell_meta_data(cell_id, name) {
                *histogram.entry(value).or_default() += 1;
            }
        }
        let mut sorted: Vec<(&str, usize)> = histogram.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        sorted
    }

    /// Pearson correlation of two cells over all genes.
    pub fn compute_cell_similarity(&self, a: CellId, b: CellId) -> f64 {
        let (sa, sb) = (self.cell_summary(a), self.cell_summary(b));
        correlation(
            self.gene_count() as f64,
            scalar_product(self.cell_expression_counts(a), self.cell_expression_counts(b)),
            (sa.sum1, sa.sum2),
            (sb.sum1, sb.sum2),
        )
    }

    /// Same formula as [`ExpressionMatrix::compute_cell_similarity`] using only
    /// the large counts rows. Carries no error bound.
    pub fn compute_approximate_cell_similarity(&self, a: CellId, b: CellId) -> f64 {
        let (sa, sb) = (self.cell_summary(a), self.cell_summary(b));
        correlation(
            self.gene_count() as f64,
            scalar_product(
                self.large_cell_expression_counts(a),
                self.large_cell_expression_counts(b),
            ),
            (sa.large_sum1, sa.large_sum2),
            (sb.large_sum1, sb.large_sum2),
        )
    }

    /// Counts of a cell restricted to `gene_set`, as (local gene id, count)
    /// pairs, normalized over the retained genes.
    pub fn compute_expression_vector(
        &self,
        cell_id: CellId,
        gene_set: &GeneSet,
        normalization: NormalizationMethod,
    ) -> Vec<(GeneId, f32)> {
        let mut vector: Vec<(GeneId, f32)> = self
            .cell_expression_counts(cell_id)
            .iter()
            .filter_map(|e| gene_set.local_gene_id(e.gene_id).map(|local| (local, e.count)))
            .collect();

        let factor = match normalization {
            NormalizationMethod::None => return vector,
            NormalizationMethod::L1 => {
                let sum: f64 = vector.iter().map(|&(_, c)| f64::from(c)).sum();
                (1.0 / sum) as f32
            }
            NormalizationMethod::L2 => {
                let sum: f64 = vector.iter().map(|&(_, c)| f64::from(c) * f64::from(c)).sum();
                (1.0 / sum.sqrt()) as f32
            }
        };
        for (_, count) in &mut vector {
            *count *= factor;
        }
        vector
    }

    /// Average of the normalized expression vectors of `cells`, indexed by
    /// local gene id, then normalized again with the same method.
    pub fn compute_average_expression(
        &self,
        gene_set: &GeneSet,
        cells: &[CellId],
        normalization: NormalizationMethod,
    ) -> Vec<f64> {
        let mut average = vec![0.0; gene_set.len()];
        for &cell_id in cells {
            for (local, count) in self.compute_expression_vector(cell_id, gene_set, normalization) {
                average[local as usize] += f64::from(count);
            }
        }

        let factor = 1.0 / cells.len() as f64;
        average.iter_mut().for_each(|a| *a *= factor);

        let factor = match normalization {
            NormalizationMethod::None => return average,
            NormalizationMethod::L1 => 1.0 / average.iter().sum::<f64>(),
            NormalizationMethod::L2 => 1.0 / average.iter().map(|a| a * a).sum::<f64>().sqrt(),
        };
        average.iter_mut().for_each(|a| *a *= factor);
        average
    }

    /// Information content in bits of the distribution of a gene's counts
    /// over `cells`: `log(n) + sum(p log p)`.
    ///
    /// Normalization uses the per-cell norms over all genes.
    pub fn compute_gene_information_content(
        &self,
        gene_id: GeneId,
        cells: &[CellId],
        normalization: NormalizationMethod,
    ) -> f32 {
        let counts: Vec<f32> = cells
            .iter()
            .map(|&cell_id| {
                let summary = self.cell_summary(cell_id);
                let c = self.get_expression_count(cell_id, gene_id);
                match normalization {
                    NormalizationMethod::None => c,
                    NormalizationMethod::L1 => c * summary.norm1_inverse as f32,
                    NormalizationMethod::L2 => c * summary.norm2_inverse as f32,
                }
            })
            .collect();

        let sum: f64 = counts.iter().map(|&c| f64::from(c)).sum();
        let inverse_sum = 1.0 / sum;
        let mut information = (cells.len() as f64).ln();
        for &c in counts.iter().filter(|&&c| c > 0.0) {
            let p = f64::from(c) * inverse_sum;
            information += p * p.ln();
        }
        (information / std::f64::consts::LN_2) as f32
    }

    /// Information content of every gene of `gene_set` over `cells`, indexed
    /// by local gene id. Genes are processed in parallel.
    pub fn compute_gene_information_content_for(
        &self,
        gene_set: &GeneSet,
        cells: &[CellId],
        normalization: NormalizationMethod,
    ) -> Vec<f32> {
        gene_set
            .as_slice()
            .par_iter()
            .map(|&gene_id| self.compute_gene_information_content(gene_id, cells, normalization))
            .collect()
    }

    /// The genes of `gene_set` whose information content over `cells` is
    /// strictly greater than `threshold` bits.
    ///
    /// A gene not expressed in any of the cells scores `log2(cells.len())`
    /// bits, the same as a gene expressed in a single cell.
    pub fn create_gene_set_using_information_content(
        &self,
        gene_set: &GeneSet,
        cells: &[CellId],
        normalization: NormalizationMethod,
        threshold: f64,
    ) -> GeneSet {
        let information = self.compute_gene_information_content_for(gene_set, cells, normalization);
        let selected = GeneSet::new(
            gene_set
                .as_slice()
                .iter()
                .zip(&information)
                .filter(|&(_, &bits)| f64::from(bits) > threshold)
                .map(|(&gene_id, _)| gene_id),
        );
        info!(
            "Kept {} of {} genes with information content above {threshold} bits",
            selected.len(),
            gene_set.len()
        );
        selected
    }

    /// Flushes every component to disk.
    pub fn sync_to_disk(&self) -> Result<()> {
        self.gene_names.sync_to_disk()?;
        self.cell_names.sync_to_disk()?;
        self.cells.sync_to_disk()?;
        self.cell_meta_data.sync_to_disk()?;
        self.meta_data_names.sync_to_disk()?;
        self.meta_data_values.sync_to_disk()?;
        self.meta_data_name_usage.sync_to_disk()?;
        self.expression_counts.sync_to_disk()?;
        self.large_expression_counts.sync_to_disk()
    }

    /// Syncs and unmaps every component.
    pub fn close(self) -> Result<()> {
        self.gene_names.close()?;
        self.cell_names.close()?;
        self.cells.close()?;
        self.cell_meta_data.close()?;
        self.meta_data_names.close()?;
        self.meta_data_values.close()?;
        self.meta_data_name_usage.close()?;
        self.expression_counts.close()?;
        self.large_expression_counts.close()
    }

    fn is_consistent(&self) -> bool {
        let n = self.cells.len();
        self.cell_names.len() == n
            && self.cell_meta_data.len() == n
            && self.expression_counts.len() == n
            && self.large_expression_counts.len() == n
            && self.meta_data_name_usage.len() == self.meta_data_names.len()
    }

    fn check_invariants(&self) {
        assert!(
            self.is_consistent(),
            "expression matrix components out of sync: {} names, {} cells, {} meta data rows, {} count rows",
            self.cell_names.len(),
            self.cells.len(),
            self.cell_meta_data.len(),
            self.expression_counts.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn matrix_with_cells(dir: &Path) -> ExpressionMatrix {
        let mut matrix = ExpressionMatrix::create_new(dir.join("matrix"), &MatrixConfig::default()).unwrap();
        matrix
            .add_cell(
                &[("Type", "T"), ("CellName", "A")],
                &[("g3", 5.0), ("g1", 10.0), ("g2", 0.0)],
                1,
            )
            .unwrap();
        matrix
            .add_cell(
                &[("CellName", "B"), ("Type", "B")],
                &[("g1", 2.0), ("g4", 1.0), ("g3", 4.0)],
                2,
            )
            .unwrap();
        matrix
            .add_cell(&[("CellName", "C"), ("Type", "T")], &[("g2", 3.0)], 10)
            .unwrap();
        matrix
    }

    #[test]
    fn test_rows_are_sorted_and_zeros_dropped() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());

        let a = matrix.cell_id_from_string("A").unwrap();
        let row = matrix.cell_expression_counts(a);
        assert_eq!(row.len(), 2);
        assert!(row.windows(2).all(|w| w[0].gene_id < w[1].gene_id));

        let summary = matrix.cell_summary(a);
        assert_eq!(summary.sum1, 15.0);
        assert_eq!(summary.sum2, 125.0);

        // g2 was registered even though its count was zero.
        let g2 = matrix.gene_id_from_string("g2").unwrap();
        assert_eq!(matrix.get_expression_count(a, g2), 0.0);
        let g1 = matrix.gene_id_from_string("g1").unwrap();
        assert_eq!(matrix.get_expression_count(a, g1), 10.0);
    }

    #[test]
    fn test_large_counts_keep_the_largest() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());

        let a = matrix.cell_id_from_string("A").unwrap();
        let large = matrix.large_cell_expression_counts(a);
        assert_eq!(large.len(), 1);
        assert_eq!(large[0].count, 10.0);
        assert_eq!(matrix.cell_summary(a).large_sum1, 10.0);

        let b = matrix.cell_id_from_string("B").unwrap();
        let large: Vec<f32> = matrix.large_cell_expression_counts(b).iter().map(|e| e.count).collect();
        let mut sorted = large.clone();
        sorted.sort_by(|x, y| y.partial_cmp(x).unwrap());
        assert_eq!(sorted, vec![4.0, 2.0]);
        assert!(matrix
            .large_cell_expression_counts(b)
            .windows(2)
            .all(|w| w[0].gene_id < w[1].gene_id));
    }

    #[test]
    fn test_id_resolution() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());

        assert_eq!(matrix.cell_id_from_string("1"), Some(1));
        assert_eq!(matrix.cell_id_from_string("B"), Some(1));
        assert_eq!(matrix.cell_id_from_string("3"), None);
        assert_eq!(matrix.cell_id_from_string("nobody"), None);
        assert_eq!(matrix.cell_name(2), "C");
        assert_eq!(matrix.gene_id_from_string("g4"), Some(3));
        assert_eq!(matrix.gene_name(0), "g3");
    }

    #[test]
    fn test_errors_leave_matrix_unchanged() {
        let dir = tempdir().unwrap();
        let mut matrix = matrix_with_cells(dir.path());
        let genes = matrix.gene_count();

        let err = matrix.add_cell(&[("Type", "T")], &[("g1", 1.0)], 5).unwrap_err();
        assert!(matches!(err, MatrixError::MissingCellName));

        let err = matrix.add_cell(&[("CellName", "A")], &[("g1", 1.0)], 5).unwrap_err();
        assert!(matches!(err, MatrixError::DuplicateCellName(ref name) if name == "A"));

        let err = matrix
            .add_cell(&[("CellName", "D")], &[("new", 1.0), ("g1", -1.0)], 5)
            .unwrap_err();
        assert!(matches!(err, MatrixError::NegativeExpressionCount { ref gene, .. } if gene == "g1"));

        let err = matrix
            .add_cell(&[("CellName", "D")], &[("g9", 1.0), ("g9", 2.0)], 5)
            .unwrap_err();
        assert!(matches!(err, MatrixError::DuplicateGene { ref gene, .. } if gene == "g9"));

        assert_eq!(matrix.cell_count(), 3);
        assert_eq!(matrix.gene_count(), genes);
        assert_eq!(matrix.cell_id_from_string("D"), None);

        // A zero entry does not count as a duplicate.
        matrix
            .add_cell(&[("CellName", "D")], &[("g1", 0.0), ("g1", 2.0)], 5)
            .unwrap();
    }

    #[test]
    fn test_meta_data() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());

        assert_eq!(matrix.all_cell_meta_data(0), vec![("CellName", "A"), ("Type", "T")]);
        assert_eq!(matrix.cell_meta_data(1, "Type"), Some("B"));
        assert_eq!(matrix.cell_meta_data(1, "Missing"), None);
        assert_eq!(
            matrix.histogram_meta_data(&[0, 1, 2], "Type"),
            vec![("T", 2), ("B", 1)]
        );
    }

    #[test]
    fn test_set_meta_data_and_usage_counts() {
        let dir = tempdir().unwrap();
        let mut matrix = matrix_with_cells(dir.path());

        assert_eq!(matrix.cell_meta_data_names(), vec![("CellName", 3), ("Type", 3)]);
        assert_eq!(matrix.cell_meta_data_name_usage_count("Cluster"), 0);

        matrix.set_cell_meta_data(2, "Type", "B").unwrap();
        assert_eq!(matrix.cell_meta_data(2, "Type"), Some("B"));
        assert_eq!(matrix.all_cell_meta_data(2).len(), 2);
        assert_eq!(
            matrix.histogram_meta_data(&[0, 1, 2], "Type"),
            vec![("B", 2), ("T", 1)]
        );

        let err = matrix.set_cell_meta_data(0, "Cluster", "7").unwrap_err();
        assert!(matches!(err, MatrixError::MissingMetaData { ref name, .. } if name == "Cluster"));
        assert!(matrix.set_cell_meta_data(0, "CellName", "Z").is_err());
        assert_eq!(matrix.cell_name(0), "A");

        matrix
            .add_cell(&[("CellName", "D"), ("Cluster", "1")], &[("g1", 1.0)], 5)
            .unwrap();
        assert_eq!(matrix.cell_meta_data_name_usage_count("Cluster"), 1);
        assert_eq!(matrix.cell_meta_data_name_usage_count("CellName"), 4);
        matrix.set_cell_meta_data(3, "Cluster", "2").unwrap();
        matrix.close().unwrap();

        let matrix = ExpressionMatrix::access_existing(dir.path().join("matrix")).unwrap();
        assert_eq!(matrix.cell_meta_data(2, "Type"), Some("B"));
        assert_eq!(matrix.cell_meta_data(3, "Cluster"), Some("2"));
        assert_eq!(
            matrix.cell_meta_data_names(),
            vec![("CellName", 4), ("Type", 3), ("Cluster", 1)]
        );
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());

        let ab = matrix.compute_cell_similarity(0, 1);
        let ba = matrix.compute_cell_similarity(1, 0);
        assert!((ab - ba).abs() < 1e-12);
        assert!((matrix.compute_cell_similarity(0, 0) - 1.0).abs() < 1e-9);
        assert!(ab > matrix.compute_cell_similarity(0, 2));

        let approximate = matrix.compute_approximate_cell_similarity(1, 1);
        assert!((approximate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_expression_vector_normalization() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());
        let gene_set = GeneSet::all(matrix.gene_count());

        let raw = matrix.compute_expression_vector(0, &gene_set, NormalizationMethod::None);
        assert_eq!(raw.iter().map(|&(_, c)| c).sum::<f32>(), 15.0);

        let l1 = matrix.compute_expression_vector(0, &gene_set, NormalizationMethod::L1);
        assert!((l1.iter().map(|&(_, c)| c).sum::<f32>() - 1.0).abs() < 1e-6);

        let l2 = matrix.compute_expression_vector(0, &gene_set, NormalizationMethod::L2);
        assert!((l2.iter().map(|&(_, c)| c * c).sum::<f32>() - 1.0).abs() < 1e-6);

        let subset = GeneSet::new([matrix.gene_id_from_string("g1").unwrap()]);
        let restricted = matrix.compute_expression_vector(0, &subset, NormalizationMethod::L1);
        assert_eq!(restricted, vec![(0, 1.0)]);
    }

    #[test]
    fn test_average_expression() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());
        let gene_set = GeneSet::all(matrix.gene_count());

        let average = matrix.compute_average_expression(&gene_set, &[0, 1], NormalizationMethod::None);
        let g1 = matrix.gene_id_from_string("g1").unwrap() as usize;
        assert!((average[g1] - 6.0).abs() < 1e-12);

        let l1 = matrix.compute_average_expression(&gene_set, &[0, 1, 2], NormalizationMethod::L1);
        assert!((l1.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_information_content() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());
        let g2 = matrix.gene_id_from_string("g2").unwrap();

        // Expressed in one cell out of three: log2(3) bits.
        let mut cells = vec![0, 1, 2];
        let info = matrix.compute_gene_information_content(g2, &cells, NormalizationMethod::None);
        assert!((info - 3f32.log2()).abs() < 1e-5);

        // Unevenly expressed in two cells: between 0 and 1 bit.
        cells.truncate(2);
        let g1 = matrix.gene_id_from_string("g1").unwrap();
        let info = matrix.compute_gene_information_content(g1, &cells, NormalizationMethod::L1);
        assert!((0.0..=1.0).contains(&info));
    }

    #[test]
    fn test_gene_selection_by_information_content() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());
        let all = GeneSet::all(matrix.gene_count());
        let cells = [0, 1, 2];

        let information =
            matrix.compute_gene_information_content_for(&all, &cells, NormalizationMethod::None);
        assert_eq!(information.len(), 4);
        for (local, &bits) in information.iter().enumerate() {
            let gene_id = all.global_gene_id(local as GeneId);
            let single = matrix.compute_gene_information_content(gene_id, &cells, NormalizationMethod::None);
            assert_eq!(bits, single);
        }

        // g2 and g4 are each expressed in one cell only: log2(3) bits.
        // g3 (5, 4, 0) and g1 (10, 2, 0) are spread out: below one bit.
        let selected =
            matrix.create_gene_set_using_information_content(&all, &cells, NormalizationMethod::None, 1.0);
        let names: Vec<&str> = selected.as_slice().iter().map(|&g| matrix.gene_name(g)).collect();
        assert_eq!(names, vec!["g2", "g4"]);

        // Only genes of the input set are candidates. g1 has about 0.93 bits,
        // g3 about 0.59.
        let partial = GeneSet::new([0, 1, 2]);
        let selected =
            matrix.create_gene_set_using_information_content(&partial, &cells, NormalizationMethod::None, 0.7);
        assert_eq!(selected.as_slice(), &[1, 2]);
    }

    #[test]
    fn test_reopen() {
        let dir = tempdir().unwrap();
        let matrix = matrix_with_cells(dir.path());
        matrix.close().unwrap();

        let matrix = ExpressionMatrix::access_existing(dir.path().join("matrix")).unwrap();
        assert_eq!(matrix.cell_count(), 3);
        assert_eq!(matrix.gene_count(), 4);
        assert_eq!(matrix.cell_id_from_string("C"), Some(2));
        assert_eq!(matrix.cell_meta_data(2, "Type"), Some("T"));
        assert_eq!(matrix.cell_summary(0).sum1, 15.0);

        let err = ExpressionMatrix::create_new(dir.path().join("matrix"), &MatrixConfig::default()).unwrap_err();
        assert!(matches!(err, MatrixError::DirectoryExists(_)));
    }
}
