//! Fixed filtering and normalization recipe

use crate::plot::violin_qc;
use crate::preprocessing::{filter_cells, filter_genes, log1p, normalize_total, scale, subset_cells, LogBase};
use crate::qc::{compute_qc, QcOptions, DEFAULT_MITO_PREFIX, N_COUNTS, PERCENT_MITO};
use anyhow::{Context, Error};
use log::info;
use scan_types::{AnnMatrix, PrepError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Cells with fewer detected genes are dropped before anything else.
pub const MIN_GENES: usize = 200;
/// Genes detected in fewer cells are dropped before anything else.
pub const MIN_CELLS: usize = 3;

/// File name of the QC violin plot written when `plot` is set.
pub const VIOLIN_FILE: &str = "violin_qc.svg";

/// Parameters of `apply_recipe`. Missing fields take their default when deserialized.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecipeConfig {
    /// Keep cells with strictly more detected genes than this
    pub l_n_genes: f64,
    /// Keep cells with strictly fewer detected genes than this
    pub r_n_genes: f64,
    /// Keep cells with a mitochondrial fraction strictly below this
    pub percent_mito_max: f64,
    pub normalize: bool,
    pub log: bool,
    /// Convert the matrix to sparse storage before filtering
    pub sparse: bool,
    pub plot: bool,
    /// Per-cell total after normalization; the median cell total if unset
    pub target_sum: Option<f64>,
    /// Scale genes to unit variance and clip at this value after the log transform
    pub scale_max: Option<f64>,
    pub mito_prefix: String,
    pub plot_dir: PathBuf,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        RecipeConfig {
            l_n_genes: 500.0,
            r_n_genes: 5000.0,
            percent_mito_max: 0.05,
            normalize: true,
            log: false,
            sparse: false,
            plot: false,
            target_sum: None,
            scale_max: None,
            mito_prefix: DEFAULT_MITO_PREFIX.to_string(),
            plot_dir: PathBuf::from("."),
        }
    }
}

impl RecipeConfig {
    /// Read a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<RecipeConfig, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        serde_json::from_str(&text).with_context(|| format!("parsing recipe config {}", path.display()))
    }
}

fn check_not_empty(adata: &AnnMatrix, step: &str) -> Result<(), Error> {
    let axis = if adata.n_obs() == 0 {
        "cells"
    } else if adata.n_vars() == 0 {
        "genes"
    } else {
        return Ok(());
    };
    Err(PrepError::EmptyResult {
        axis,
        step: step.to_string(),
    }
    .into())
}

/// Filter, normalize and log-transform a raw count matrix.
///
/// Cells need at least `MIN_GENES` detected genes and genes at least `MIN_CELLS` expressing
/// cells. QC metrics are then computed and cells kept if
/// `l_n_genes < n_genes < r_n_genes` and `percent_mito < percent_mito_max`; cells without counts
/// have an undefined mitochondrial fraction and are dropped. The normalized values are saved as
/// the raw snapshot before the log transform.
pub fn apply_recipe(adata: AnnMatrix, config: &RecipeConfig) -> Result<AnnMatrix, Error> {
    let adata = if config.sparse {
        adata.into_layout(true)
    } else {
        adata
    };

    let adata = filter_cells(adata, MIN_GENES)?;
    let adata = filter_genes(adata, MIN_CELLS)?;
    let adata = compute_qc(
        adata,
        &QcOptions {
            mito_prefix: config.mito_prefix.clone(),
        },
    )?;

    let keep: Vec<bool> = adata
        .obs()
        .numeric("n_genes")?
        .iter()
        .map(|&n| config.l_n_genes < n && n < config.r_n_genes)
        .collect();
    let adata = subset_cells(adata, &keep)?;
    let keep: Vec<bool> = adata
        .obs()
        .numeric(PERCENT_MITO)?
        .iter()
        .map(|&p| p < config.percent_mito_max)
        .collect();
    let adata = subset_cells(adata, &keep)?;

    if config.plot {
        violin_qc(&adata, &["n_genes", N_COUNTS, PERCENT_MITO], &config.plot_dir.join(VIOLIN_FILE))?;
    }

    info!("{:?}", adata.shape());
    check_not_empty(&adata, "QC filtering")?;

    let mut adata = if config.normalize {
        normalize_total(adata, config.target_sum)?
    } else {
        adata
    };
    adata.snapshot_raw();

    let adata = if config.log {
        log1p(adata, LogBase::E)?
    } else {
        adata
    };
    match config.scale_max {
        Some(m) => scale(adata, Some(m)),
        None => Ok(adata),
    }
}

#[cfg(test)]
mod test_recipe {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};
    use scan_types::ExprMatrix;

    const N_GENES: usize = 1000;
    const N_CELLS: usize = 300;
    const N_LOW: usize = 50;

    /// 1000 genes x 300 cells. The first 50 cells express fewer than 200 genes, the rest
    /// between 550 and 900. Genes 0..20 are mitochondrial.
    fn synthetic() -> AnnMatrix {
        let mut rng = rand_pcg::Pcg64::seed_from_u64(42);
        let mut x = Array2::<f64>::zeros((N_CELLS, N_GENES));
        for i in 0..N_CELLS {
            let n_expressed = if i < N_LOW {
                rng.gen_range(50..150)
            } else {
                rng.gen_range(550..900)
            };
            for g in 0..n_expressed {
                // spread expression over all genes so gene filtering keeps most of them
                let gene = (g * 7 + i * 13) % N_GENES;
                let count = if gene < 20 { 1.0 } else { rng.gen_range(1..20) as f64 };
                x[[i, gene]] = count;
            }
        }
        let var_names = (0..N_GENES)
            .map(|g| if g < 20 { format!("mt-{g}") } else { format!("Gene{g}") })
            .collect();
        let obs_names = (0..N_CELLS).map(|i| format!("cell{i}")).collect();
        AnnMatrix::new(x, obs_names, var_names).unwrap()
    }

    fn check_bounds(adata: &AnnMatrix, config: &RecipeConfig) {
        let n_genes = adata.obs().numeric("n_genes").unwrap();
        let mito = adata.obs().numeric(PERCENT_MITO).unwrap();
        for (&n, &p) in n_genes.iter().zip(mito) {
            assert!(config.l_n_genes < n && n < config.r_n_genes);
            assert!(p < config.percent_mito_max);
        }
    }

    #[test]
    fn test_end_to_end() {
        let config = RecipeConfig {
            log: true,
            ..RecipeConfig::default()
        };
        let adata = apply_recipe(synthetic(), &config).unwrap();
        assert!(adata.n_obs() <= N_CELLS - N_LOW);
        assert!(adata.n_obs() > 0);
        check_bounds(&adata, &config);
        assert!(adata.obs().contains(N_COUNTS));
        assert!(adata.var().contains("n_cells"));

        // raw holds the normalized, unlogged values
        let raw = adata.raw().unwrap();
        assert_eq!(raw.var_names, adata.var_names());
        let raw_x = raw.x.to_dense();
        let x = adata.x().to_dense();
        for (r, l) in raw_x.iter().zip(x.iter()) {
            assert_abs_diff_eq!(r.ln_1p(), *l, epsilon = 1e-12);
        }
        let totals = raw.x.row_sums();
        for t in &totals {
            assert_abs_diff_eq!(*t, totals[0], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_default_skips_log() {
        let adata = apply_recipe(synthetic(), &RecipeConfig::default()).unwrap();
        assert_eq!(adata.raw().unwrap().x, *adata.x());
    }

    const N_MITO: usize = 5;
    const N_OTHER: usize = 405;

    /// Counts of one cell: `n_mito` mitochondrial genes summing to `mito_total` and `n_other`
    /// other genes summing to `other_total`. Each expressed gene has one count except the first
    /// of its group, which takes the rest.
    fn cell(n_mito: usize, mito_total: usize, n_other: usize, other_total: usize) -> Vec<f64> {
        let mut row = vec![0.0; N_MITO + N_OTHER];
        for (offset, n, total) in [(0, n_mito, mito_total), (N_MITO, n_other, other_total)] {
            for g in 0..n {
                row[offset + g] = 1.0;
            }
            if n > 0 {
                row[offset] += (total - n) as f64;
            }
        }
        row
    }

    #[test]
    fn test_strict_bounds() {
        let cells = [
            ("filler0", cell(N_MITO, N_MITO, N_OTHER, N_OTHER)),
            ("filler1", cell(N_MITO, N_MITO, N_OTHER, N_OTHER)),
            ("filler2", cell(N_MITO, N_MITO, N_OTHER, N_OTHER)),
            // exactly l_n_genes detected genes
            ("c0", cell(0, 0, 300, 300)),
            // exactly r_n_genes detected genes
            ("c1", cell(0, 0, 400, 400)),
            // mito fraction exactly 20 / 400
            ("c2", cell(N_MITO, 20, 345, 380)),
            // mito fraction 40 / 400
            ("c3", cell(N_MITO, 40, 345, 360)),
            ("c4", cell(N_MITO, 10, 345, 490)),
            ("c5", cell(0, 0, 301, 301)),
            ("c6", cell(N_MITO, N_MITO, 394, 495)),
        ];
        let x = Array2::from_shape_fn((cells.len(), N_MITO + N_OTHER), |(i, g)| cells[i].1[g]);
        let obs_names: Vec<String> = cells.iter().map(|(name, _)| name.to_string()).collect();
        let var_names: Vec<String> = (0..N_MITO + N_OTHER)
            .map(|g| if g < N_MITO { format!("mt-{g}") } else { format!("Gene{g}") })
            .collect();

        for sparse in [false, true] {
            let adata = AnnMatrix::new(x.clone(), obs_names.clone(), var_names.clone()).unwrap();
            let config = RecipeConfig {
                l_n_genes: 300.0,
                r_n_genes: 400.0,
                percent_mito_max: 0.05,
                sparse,
                ..RecipeConfig::default()
            };
            let adata = apply_recipe(adata, &config).unwrap();
            assert_eq!(adata.obs_names(), &["c4", "c5", "c6"]);
            assert_eq!(adata.obs().numeric("n_genes").unwrap(), &[350.0, 301.0, 399.0]);
            let pm = adata.obs().numeric(PERCENT_MITO).unwrap();
            assert_abs_diff_eq!(pm[0], 0.02, epsilon = 1e-12);
            assert_eq!(pm[1], 0.0);
            assert_abs_diff_eq!(pm[2], 0.01, epsilon = 1e-12);
            assert_eq!(adata.n_vars(), N_MITO + N_OTHER);
        }
    }

    #[test]
    fn test_sparse_matches_dense() {
        let dense = apply_recipe(synthetic(), &RecipeConfig::default()).unwrap();
        let config = RecipeConfig {
            sparse: true,
            ..RecipeConfig::default()
        };
        let sparse = apply_recipe(synthetic(), &config).unwrap();
        assert!(matches!(sparse.x(), ExprMatrix::Sparse(_)));
        assert_eq!(dense.obs_names(), sparse.obs_names());
        assert_eq!(dense.var_names(), sparse.var_names());
        let d = dense.x().to_dense();
        let s = sparse.x().to_dense();
        for (a, b) in d.iter().zip(s.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fixed_target_without_log() {
        let config = RecipeConfig {
            log: false,
            target_sum: Some(1e4),
            ..RecipeConfig::default()
        };
        let adata = apply_recipe(synthetic(), &config).unwrap();
        for t in adata.x().row_sums() {
            assert_abs_diff_eq!(t, 1e4, epsilon = 1e-6);
        }
        assert_eq!(adata.raw().unwrap().x, *adata.x());
    }

    #[test]
    fn test_scale_clips() {
        let config = RecipeConfig {
            scale_max: Some(2.0),
            ..RecipeConfig::default()
        };
        let adata = apply_recipe(synthetic(), &config).unwrap();
        assert!(adata.x().to_dense().iter().all(|&v| v <= 2.0));
        assert!(adata.raw().unwrap().x.to_dense().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_over_strict_thresholds() {
        let config = RecipeConfig {
            l_n_genes: 10_000.0,
            r_n_genes: 20_000.0,
            ..RecipeConfig::default()
        };
        let err = apply_recipe(synthetic(), &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepError>(),
            Some(PrepError::EmptyResult { axis: "cells", .. })
        ));
    }

    #[test]
    fn test_plot_written() {
        let dir = std::env::temp_dir().join(format!("recipe-plot-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = RecipeConfig {
            plot: true,
            plot_dir: dir.clone(),
            ..RecipeConfig::default()
        };
        apply_recipe(synthetic(), &config).unwrap();
        assert!(dir.join(VIOLIN_FILE).exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_config_from_json() {
        let config: RecipeConfig = serde_json::from_str(r#"{"l_n_genes": 200, "log": true}"#).unwrap();
        assert_eq!(config.l_n_genes, 200.0);
        assert!(config.log);
        assert!(config.normalize);
        assert_eq!(config.r_n_genes, 5000.0);
        assert_eq!(config.mito_prefix, "mt-");
    }
}
