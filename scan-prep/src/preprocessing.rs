use crate::stats::{mean_var, median};
use anyhow::Error;
use log::{debug, info};
use ndarray::Axis;
use scan_types::{AnnMatrix, Column, ExprMatrix, PrepError};

/// Base of logarithm used by `log1p`
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum LogBase {
    /// ln
    #[default]
    E,
    /// log2
    Two,
    /// log10
    Ten,
}

fn mask_to_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter().enumerate().filter(|(_, &keep)| keep).map(|(i, _)| i).collect()
}

/// Keep the cells where `mask` is true.
pub fn subset_cells(adata: AnnMatrix, mask: &[bool]) -> Result<AnnMatrix, Error> {
    if mask.len() != adata.n_obs() {
        return Err(PrepError::ShapeMismatch {
            expected: adata.n_obs(),
            actual: mask.len(),
        }
        .into());
    }
    Ok(adata.select_obs(&mask_to_indices(mask)))
}

/// Keep the genes where `mask` is true.
pub fn subset_genes(adata: AnnMatrix, mask: &[bool]) -> Result<AnnMatrix, Error> {
    if mask.len() != adata.n_vars() {
        return Err(PrepError::ShapeMismatch {
            expected: adata.n_vars(),
            actual: mask.len(),
        }
        .into());
    }
    Ok(adata.select_vars(&mask_to_indices(mask)))
}

/// Drop cells with fewer than `min_genes` detected (non-zero) genes. The number of detected
/// genes of each remaining cell is stored in obs as `n_genes`.
pub fn filter_cells(adata: AnnMatrix, min_genes: usize) -> Result<AnnMatrix, Error> {
    let n_genes = adata.x().nnz_per_row();
    let mask: Vec<bool> = n_genes.iter().map(|&n| n >= min_genes).collect();
    let removed = mask.iter().filter(|&&keep| !keep).count();
    if removed > 0 {
        info!("filtered out {} cells that have less than {} genes expressed", removed, min_genes);
    }
    let kept: Vec<f64> = n_genes
        .iter()
        .zip(&mask)
        .filter(|(_, &keep)| keep)
        .map(|(&n, _)| n as f64)
        .collect();
    let mut adata = subset_cells(adata, &mask)?;
    adata.insert_obs("n_genes", Column::Numeric(kept))?;
    Ok(adata)
}

/// Drop genes detected (non-zero) in fewer than `min_cells` cells. The number of cells
/// expressing each remaining gene is stored in var as `n_cells`.
pub fn filter_genes(adata: AnnMatrix, min_cells: usize) -> Result<AnnMatrix, Error> {
    let n_cells = adata.x().nnz_per_col();
    let mask: Vec<bool> = n_cells.iter().map(|&n| n >= min_cells).collect();
    let removed = mask.iter().filter(|&&keep| !keep).count();
    if removed > 0 {
        info!("filtered out {} genes that are detected in less than {} cells", removed, min_cells);
    }
    let kept: Vec<f64> = n_cells
        .iter()
        .zip(&mask)
        .filter(|(_, &keep)| keep)
        .map(|(&n, _)| n as f64)
        .collect();
    let mut adata = subset_genes(adata, &mask)?;
    adata.insert_var("n_cells", Column::Numeric(kept))?;
    Ok(adata)
}

/// Scale each cell to the same total count. With `target_sum == None` the target is the median
/// of the non-zero per-cell totals. Cells with a zero total are left at zero.
pub fn normalize_total(mut adata: AnnMatrix, target_sum: Option<f64>) -> Result<AnnMatrix, Error> {
    let counts = adata.x().row_sums();
    let target = match target_sum {
        Some(x) => x,
        None => {
            let nonzero: Vec<f64> = counts.iter().copied().filter(|&c| c > 0.0).collect();
            median(&nonzero).unwrap_or(1.0)
        }
    };
    if !(target.is_finite() && target > 0.0) {
        return Err(PrepError::InvalidArgument(format!("normalization target must be positive, got {target}")).into());
    }
    debug!("normalizing {} cells to a total count of {}", counts.len(), target);
    let factors: Vec<f64> = counts
        .iter()
        .map(|&c| if c > 0.0 { target / c } else { 1.0 })
        .collect();
    adata.x_mut().scale_rows(&factors);
    Ok(adata)
}

/// Apply `x -> log_b(1 + x)` to every value, in place.
pub fn log1p(mut adata: AnnMatrix, base: LogBase) -> Result<AnnMatrix, Error> {
    let log1p_fn: fn(f64) -> f64 = match base {
        LogBase::E => |x: f64| x.ln_1p(),
        LogBase::Two => |x: f64| (x + 1.0).log2(),
        LogBase::Ten => |x: f64| (x + 1.0).log10(),
    };
    adata.x_mut().map_zero_preserving(log1p_fn);
    Ok(adata)
}

/// Center each gene to mean 0 and scale to unit variance, then clip values above `max_value`.
/// The matrix becomes dense. Genes with zero variance are only centered. The per-gene mean and
/// standard deviation are stored in var as `mean` and `std`.
pub fn scale(adata: AnnMatrix, max_value: Option<f64>) -> Result<AnnMatrix, Error> {
    let mut adata = adata.into_layout(false);
    let mut means = Vec::with_capacity(adata.n_vars());
    let mut stds = Vec::with_capacity(adata.n_vars());
    if let ExprMatrix::Dense(x) = adata.x_mut() {
        for mut col in x.axis_iter_mut(Axis(1)) {
            let values = col.to_vec();
            let (mean, var) = mean_var(&values, 1);
            let std = var.sqrt();
            let divisor = if std.is_finite() && std > 0.0 { std } else { 1.0 };
            col.mapv_inplace(|v| {
                let z = (v - mean) / divisor;
                match max_value {
                    Some(m) if z > m => m,
                    _ => z,
                }
            });
            means.push(mean);
            stds.push(std);
        }
    }
    adata.insert_var("mean", Column::Numeric(means))?;
    adata.insert_var("std", Column::Numeric(stds))?;
    Ok(adata)
}
