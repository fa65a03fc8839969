//! Per-cell quality-control statistics

use anyhow::Error;
use log::debug;
use ndarray::{Array2, Axis};
use scan_types::{AnnMatrix, Column, ExprMatrix};

/// Name prefix marking mitochondrial genes in mouse annotations.
pub const DEFAULT_MITO_PREFIX: &str = "mt-";

/// Obs column holding the total count of each cell
pub const N_COUNTS: &str = "n_counts";

/// Obs column holding the mitochondrial fraction of each cell
pub const PERCENT_MITO: &str = "percent_mito";

/// Options for `compute_qc`
#[derive(Clone, Debug)]
pub struct QcOptions {
    /// Genes whose name starts with this prefix (case-sensitive) count as mitochondrial
    pub mito_prefix: String,
}

impl Default for QcOptions {
    fn default() -> Self {
        QcOptions {
            mito_prefix: DEFAULT_MITO_PREFIX.to_string(),
        }
    }
}

/// Mask of genes whose name starts with `prefix`.
pub fn mito_gene_mask(var_names: &[String], prefix: &str) -> Vec<bool> {
    var_names.iter().map(|name| name.starts_with(prefix)).collect()
}

/// Row sums of a dense matrix over the masked columns.
fn dense_masked_sums(x: &Array2<f64>, mask: &[bool]) -> Vec<f64> {
    x.axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .zip(mask)
                .filter(|(_, &m)| m)
                .fold(0.0, |acc, (&v, _)| acc + v)
        })
        .collect()
}

/// Row sums of a CSR matrix over the masked columns. Only stored entries are visited.
fn sparse_masked_sums(x: &scan_types::SparseMatrix, mask: &[bool]) -> Vec<f64> {
    x.outer_iterator()
        .map(|row| row.iter().filter(|(c, _)| mask[*c]).fold(0.0, |acc, (_, &v)| acc + v))
        .collect()
}

/// Compute `n_counts` (total count) and `percent_mito` (fraction of the total from mitochondrial
/// genes) for every cell and store them in obs, overwriting earlier values.
///
/// The mitochondrial fraction is the mitochondrial sum divided by a freshly computed total. A cell
/// with a zero total gets NaN.
pub fn compute_qc(mut adata: AnnMatrix, options: &QcOptions) -> Result<AnnMatrix, Error> {
    let mito = mito_gene_mask(adata.var_names(), &options.mito_prefix);
    let num_mito = mito.iter().filter(|&&m| m).count();
    debug!("{} of {} genes match mitochondrial prefix '{}'", num_mito, mito.len(), options.mito_prefix);

    // totals come from X, never from a stored n_counts column
    let n_counts = adata.x().row_sums();
    let mito_counts = match adata.x() {
        ExprMatrix::Dense(x) => dense_masked_sums(x, &mito),
        ExprMatrix::Sparse(x) => sparse_masked_sums(x, &mito),
    };
    let percent_mito: Vec<f64> = mito_counts
        .iter()
        .zip(&n_counts)
        .map(|(&m, &t)| if t == 0.0 { f64::NAN } else { m / t })
        .collect();

    adata.insert_obs(N_COUNTS, Column::Numeric(n_counts))?;
    adata.insert_obs(PERCENT_MITO, Column::Numeric(percent_mito))?;
    Ok(adata)
}

#[cfg(test)]
mod test_qc {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn adata(x: Array2<f64>) -> AnnMatrix {
        let var_names = ["Gapdh", "mt-Co1", "Actb", "mt-Nd1", "MT-CO2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let obs_names = (0..x.nrows()).map(|i| format!("cell{i}")).collect();
        AnnMatrix::new(x, obs_names, var_names).unwrap()
    }

    fn example() -> Array2<f64> {
        array![
            [10.0, 2.0, 6.0, 2.0, 5.0],
            [0.0, 0.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 3.0, 0.0],
        ]
    }

    #[test]
    fn test_mito_mask_is_case_sensitive_prefix() {
        let a = adata(example());
        assert_eq!(
            mito_gene_mask(a.var_names(), DEFAULT_MITO_PREFIX),
            vec![false, true, false, true, false]
        );
    }

    #[test]
    fn test_compute_qc_values() {
        let a = compute_qc(adata(example()), &QcOptions::default()).unwrap();
        let n_counts = a.obs().numeric(N_COUNTS).unwrap();
        assert_eq!(n_counts, &[25.0, 0.0, 4.0]);
        let pm = a.obs().numeric(PERCENT_MITO).unwrap();
        assert_abs_diff_eq!(pm[0], 4.0 / 25.0);
        assert!(pm[1].is_nan());
        assert_abs_diff_eq!(pm[2], 0.75);
    }

    #[test]
    fn test_dense_and_sparse_agree() {
        let dense = compute_qc(adata(example()), &QcOptions::default()).unwrap();
        let sparse = compute_qc(adata(example()).into_layout(true), &QcOptions::default()).unwrap();
        assert_eq!(dense.obs().numeric(N_COUNTS).unwrap(), sparse.obs().numeric(N_COUNTS).unwrap());
        let d = dense.obs().numeric(PERCENT_MITO).unwrap();
        let s = sparse.obs().numeric(PERCENT_MITO).unwrap();
        for (x, y) in d.iter().zip(s) {
            assert!((x.is_nan() && y.is_nan()) || (x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_no_mito_counts_is_positive_zero() {
        let x = array![[4.0, 0.0, 1.0, 0.0, 3.0], [0.0, 0.0, 0.0, 0.0, 0.0]];
        for sparse in [false, true] {
            let a = compute_qc(adata(x.clone()).into_layout(sparse), &QcOptions::default()).unwrap();
            let pm = a.obs().numeric(PERCENT_MITO).unwrap();
            assert_eq!(pm[0], 0.0);
            assert!(pm[0].is_sign_positive());
            let n_counts = a.obs().numeric(N_COUNTS).unwrap();
            assert!(n_counts[1] == 0.0 && n_counts[1].is_sign_positive());
        }
    }

    #[test]
    fn test_recompute_overwrites() {
        let a = compute_qc(adata(example()), &QcOptions::default()).unwrap();
        let a = a.select_obs(&[0]);
        let opts = QcOptions {
            mito_prefix: "MT-".to_string(),
        };
        let a = compute_qc(a, &opts).unwrap();
        assert_eq!(a.obs().num_columns(), 2);
        assert_abs_diff_eq!(a.obs().numeric(PERCENT_MITO).unwrap()[0], 5.0 / 25.0);
    }
}
