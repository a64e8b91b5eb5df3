//! Integration tests for the cellmatrix storage and similarity engine.

use cellmatrix::{
    find_similar_pairs, Bits, CellId, Config, ExpressionMatrix, ExpressionMatrixSubset, GeneSet,
    Lsh, MappedVec, MatrixConfig, MatrixError, RaggedVec, SimilarityConfig,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds a matrix of `cell_count` random cells over `gene_count` genes, in
/// two groups with different expression profiles.
fn random_matrix(path: &std::path::Path, cell_count: usize, gene_count: usize) -> ExpressionMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(2017);
    let config = MatrixConfig {
        gene_capacity: gene_count,
        cell_capacity: 4,
    };
    let mut matrix = ExpressionMatrix::create_new(path, &config).unwrap();

    for cell in 0..cell_count {
        let group = cell % 2;
        let counts: Vec<(String, f32)> = (0..gene_count)
            .filter_map(|gene| {
                let favored = gene % 2 == group;
                let p = if favored { 0.6 } else { 0.1 };
                rng.gen_bool(p).then(|| {
                    let scale = if favored { 20.0 } else { 2.0 };
                    (format!("gene{gene}"), 1.0 + rng.gen::<f32>() * scale)
                })
            })
            .collect();
        let meta_data = [
            ("CellName".to_string(), format!("cell{cell}")),
            ("Group".to_string(), format!("group{group}")),
        ];
        matrix
            .add_cell(&meta_data, &counts, 8)
            .unwrap();
    }
    matrix
}

#[test]
fn test_add_cell_scenario() {
    init_logging();
    let dir = tempdir().unwrap();
    let mut matrix = ExpressionMatrix::create_new(dir.path().join("matrix"), &MatrixConfig::default()).unwrap();

    let a = matrix
        .add_cell(
            &[("CellName", "A")],
            &[("gene1", 10.0), ("gene2", 0.0), ("gene3", 5.0)],
            10,
        )
        .unwrap();

    assert_eq!(matrix.cell_expression_counts(a).len(), 2);
    assert_eq!(matrix.cell_summary(a).sum1, 15.0);
    assert_eq!(matrix.cell_summary(a).sum2, 125.0);

    let gene2 = matrix.gene_id_from_string("gene2").unwrap();
    assert_eq!(matrix.get_expression_count(a, gene2), 0.0);

    let err = matrix
        .add_cell(&[("CellName", "A")], &[("gene1", 1.0)], 10)
        .unwrap_err();
    assert!(matches!(err, MatrixError::DuplicateCellName(_)));
    assert!(err.to_string().contains('A'));
    assert_eq!(matrix.cell_count(), 1);
}

#[test]
fn test_lsh_scenario_is_reproducible() {
    init_logging();
    let dir = tempdir().unwrap();
    let mut matrix = ExpressionMatrix::create_new(dir.path().join("matrix"), &MatrixConfig::default()).unwrap();
    let counts = [("gene1", 3.0), ("gene2", 1.0), ("gene3", 7.0)];
    matrix.add_cell(&[("CellName", "c1")], &counts, 10).unwrap();
    matrix.add_cell(&[("CellName", "c2")], &counts, 10).unwrap();

    let gene_set = GeneSet::all(3);
    let subset =
        ExpressionMatrixSubset::create_new(dir.path().join("subset"), &gene_set, &[0, 1], &matrix).unwrap();

    let first = Lsh::new(&subset, 8, 42);
    let second = Lsh::new(&subset, 8, 42);
    assert_eq!(first.hyperplanes(), second.hyperplanes());
    for cell in 0..2 {
        assert_eq!(first.signature(cell), second.signature(cell));
    }
    assert_eq!(first.signature(0).count_mismatches(&first.signature(1)), 0);
}

#[test]
fn test_persistence_roundtrip() {
    init_logging();
    let dir = tempdir().unwrap();
    let path = dir.path().join("matrix");
    let matrix = random_matrix(&path, 20, 30);
    let expected: Vec<f64> = (1..20).map(|b| matrix.compute_cell_similarity(0, b)).collect();
    let meta = matrix.cell_meta_data(7, "Group").map(str::to_string);
    matrix.close().unwrap();

    let matrix = ExpressionMatrix::access_existing(&path).unwrap();
    assert_eq!(matrix.cell_count(), 20);
    let actual: Vec<f64> = (1..20).map(|b| matrix.compute_cell_similarity(0, b)).collect();
    assert_eq!(actual, expected);
    assert_eq!(matrix.cell_meta_data(7, "Group").map(str::to_string), meta);
    assert_eq!(matrix.cell_id_from_string("cell7"), Some(7));
}

#[test]
fn test_similarity_separates_groups() {
    init_logging();
    let dir = tempdir().unwrap();
    let matrix = random_matrix(&dir.path().join("matrix"), 40, 60);
    let cells: Vec<CellId> = (0..40).collect();

    let config = SimilarityConfig {
        similarity_threshold: 0.0,
        max_neighbors: 5,
        use_exact_similarity: true,
    };
    let pairs = find_similar_pairs(&matrix, &cells, &config);
    for (cell, neighbors) in pairs.iter() {
        assert_eq!(neighbors.len(), 5);
        for neighbor in neighbors {
            assert_eq!(neighbor.cell_id % 2, cell % 2, "cell {cell} paired across groups");
        }
    }

    let histogram = matrix.histogram_meta_data(&cells, "Group");
    assert_eq!(histogram, vec![("group0", 20), ("group1", 20)]);
}

#[test]
fn test_lsh_estimates_track_correlation() {
    init_logging();
    let dir = tempdir().unwrap();
    let matrix = random_matrix(&dir.path().join("matrix"), 30, 80);
    let config = Config::default();

    let gene_set = GeneSet::all(matrix.gene_count());
    let cells: Vec<CellId> = (0..30).collect();
    let subset =
        ExpressionMatrixSubset::create_new(dir.path().join("subset"), &gene_set, &cells, &matrix).unwrap();
    let lsh = Lsh::from_config(&subset, &config.lsh);

    let mut total_error = 0.0;
    let mut pairs = 0;
    for a in 0..30 {
        for b in a + 1..30 {
            let exact = matrix.compute_cell_similarity(a, b);
            total_error += (lsh.estimate_similarity(a, b) - exact).abs();
            pairs += 1;
        }
    }
    assert!(total_error / (pairs as f64) < 0.15);

    let base = dir.path().join("lsh");
    lsh.save(&base).unwrap();
    let reopened = Lsh::open(&base).unwrap();
    assert_eq!(reopened.estimate_similarity(0, 2), lsh.estimate_similarity(0, 2));
}

#[test]
fn test_storage_primitives_reopen() {
    init_logging();
    let dir = tempdir().unwrap();

    let mut v = MappedVec::<f64>::create_new(dir.path().join("values"), 0, 0).unwrap();
    for i in 0..10_000 {
        v.push(i as f64 * 0.5).unwrap();
    }
    v.close().unwrap();
    let v = MappedVec::<f64>::access_existing(dir.path().join("values"), false).unwrap();
    assert_eq!(v.len(), 10_000);
    assert_eq!(v[9_999], 4_999.5);

    let mut rows = RaggedVec::<u32>::create_new(dir.path().join("rows")).unwrap();
    for i in 0..100u32 {
        rows.append_row(0..i % 7).unwrap();
    }
    rows.close().unwrap();
    let rows = RaggedVec::<u32>::access_existing(dir.path().join("rows"), false).unwrap();
    assert_eq!(rows.len(), 100);
    assert_eq!(rows.row(13), &[0, 1, 2, 3, 4, 5]);
    assert_eq!(rows.total_len(), (0..100).map(|i| i % 7).sum::<u32>() as usize);

    let err = MappedVec::<u32>::access_existing(dir.path().join("values"), false).unwrap_err();
    assert!(err.to_string().contains("values"));
}
