//! ComBat batch-effect correction
//!
//! Parametric empirical Bayes adjustment of location and scale batch effects
//! (Johnson, Li & Rabinovic, Biostatistics 2007). Batch and covariate effects are fit jointly by
//! least squares; the data are standardized by the pooled residual variance, per-batch location
//! and scale estimates are shrunk towards their across-gene priors, and the adjusted values are
//! mapped back to the original scale.

use crate::stats::mean_var;
use anyhow::Error;
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use scan_types::{AnnMatrix, Categorical, Column, ExprMatrix, PrepError};

/// Convergence threshold of the empirical Bayes iteration (maximum relative change).
const CONV: f64 = 1e-4;
const MAX_ITER: usize = 1000;
const PIVOT_EPS: f64 = 1e-10;

/// Batch assignment of every cell.
struct Batches {
    labels: Vec<String>,
    /// Cell indices of each batch, in label order
    members: Vec<Vec<usize>>,
}

impl Batches {
    fn from_column(column: &Column, key: &str) -> Result<Batches, Error> {
        let text = column.to_text();
        if let Some(i) = text.iter().position(String::is_empty) {
            return Err(PrepError::InvalidArgument(format!("cell {i} has no value for batch key '{key}'")).into());
        }
        let cat = Categorical::from_labels(&text);
        let members = cat
            .categories
            .iter()
            .map(|c| cat.get_indices(c).unwrap_or_default())
            .collect();
        Ok(Batches {
            labels: cat.categories,
            members,
        })
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

/// Append the design columns for one covariate: numeric columns as-is, categorical and text
/// columns one-hot encoded without their first level.
fn covariate_columns(name: &str, column: &Column, out: &mut Vec<Array1<f64>>) -> Result<(), Error> {
    match column {
        Column::Numeric(v) => {
            if v.iter().any(|x| !x.is_finite()) {
                return Err(PrepError::InvalidArgument(format!("covariate '{name}' has missing values")).into());
            }
            out.push(Array1::from(v.clone()));
        }
        _ => {
            let text = column.to_text();
            let cat = Categorical::from_labels(&text);
            for level in 1..cat.categories.len() {
                out.push(cat.codes.iter().map(|&c| f64::from(u8::from(c == level as i32))).collect());
            }
        }
    }
    Ok(())
}

/// Cells x (batches + covariates) design matrix.
fn design_matrix(adata: &AnnMatrix, batches: &Batches, covariates: &[String]) -> Result<Array2<f64>, Error> {
    let mut columns = Vec::new();
    for member in &batches.members {
        let mut col = Array1::<f64>::zeros(adata.n_obs());
        for &i in member {
            col[i] = 1.0;
        }
        columns.push(col);
    }
    for name in covariates {
        covariate_columns(name, adata.obs().column(name)?, &mut columns)?;
    }

    let mut design = Array2::<f64>::zeros((adata.n_obs(), columns.len()));
    for (j, col) in columns.iter().enumerate() {
        design.column_mut(j).assign(col);
    }
    Ok(design)
}

/// Invert a small square matrix by Gauss-Jordan elimination with partial pivoting.
fn invert(a: &Array2<f64>) -> Result<Array2<f64>, Error> {
    let n = a.nrows();
    let mut aug = Array2::<f64>::zeros((n, 2 * n));
    aug.slice_mut(s![.., ..n]).assign(a);
    for i in 0..n {
        aug[[i, n + i]] = 1.0;
    }

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&x, &y| aug[[x, col]].abs().total_cmp(&aug[[y, col]].abs()))
            .unwrap_or(col);
        if aug[[pivot, col]].abs() < PIVOT_EPS {
            return Err(PrepError::InvalidArgument(
                "design matrix is singular; covariates are confounded with batch".to_string(),
            )
            .into());
        }
        if pivot != col {
            for k in 0..2 * n {
                aug.swap([pivot, k], [col, k]);
            }
        }
        let p = aug[[col, col]];
        aug.row_mut(col).mapv_inplace(|v| v / p);
        let pivot_row = aug.row(col).to_owned();
        for r in 0..n {
            if r != col {
                let f = aug[[r, col]];
                if f != 0.0 {
                    aug.row_mut(r).scaled_add(-f, &pivot_row);
                }
            }
        }
    }
    Ok(aug.slice(s![.., n..]).to_owned())
}

/// Hyperparameters of the inverse-gamma prior on a batch's scale estimates, or None when the
/// estimates do not vary across genes.
fn inverse_gamma_prior(delta_hat: ArrayView1<f64>) -> Option<(f64, f64)> {
    let (m, s2) = mean_var(delta_hat.as_slice()?, 1);
    if !(s2.is_finite() && s2 > 0.0) {
        return None;
    }
    let a = (2.0 * s2 + m * m) / s2;
    let b = (m * s2 + m * m * m) / s2;
    Some((a, b))
}

/// Iterate the posterior location and scale of one batch until both converge.
#[allow(clippy::too_many_arguments)]
fn solve_batch(
    s_data: &Array2<f64>,
    members: &[usize],
    gamma_hat: ArrayView1<f64>,
    delta_hat: ArrayView1<f64>,
    gamma_prior: Option<(f64, f64)>,
    delta_prior: Option<(f64, f64)>,
) -> (Array1<f64>, Array1<f64>) {
    let n = members.len() as f64;
    let batch = s_data.select(Axis(0), members);
    let mut g_old = gamma_hat.to_owned();
    let mut d_old = delta_hat.to_owned();

    for iter in 0..MAX_ITER {
        let g_new = match gamma_prior {
            Some((g_bar, t2)) => (t2 * n * &gamma_hat + &d_old * g_bar) / (t2 * n + &d_old),
            None => gamma_hat.to_owned(),
        };
        let d_new = match delta_prior {
            Some((a, b)) => {
                let resid = &batch - &g_new.view().insert_axis(Axis(0));
                let sum2 = resid.mapv(|v| v * v).sum_axis(Axis(0));
                (0.5 * sum2 + b) / (n / 2.0 + a - 1.0)
            }
            None => delta_hat.to_owned(),
        };

        let rel_change = |new: &Array1<f64>, old: &Array1<f64>| {
            new.iter()
                .zip(old)
                .map(|(x, y)| if *y == 0.0 { (x - y).abs() } else { ((x - y) / y).abs() })
                .fold(0.0, f64::max)
        };
        let change = rel_change(&g_new, &g_old).max(rel_change(&d_new, &d_old));
        g_old = g_new;
        d_old = d_new;
        if change <= CONV {
            debug!("empirical Bayes estimates converged after {} iterations", iter + 1);
            return (g_old, d_old);
        }
    }
    warn!("empirical Bayes estimates did not converge after {} iterations", MAX_ITER);
    (g_old, d_old)
}

/// Correct batch effects in `adata.x()` in place. Batches come from the obs column `key`;
/// `covariates` name obs columns whose effects are preserved. The matrix becomes dense.
///
/// Genes with the same value in every cell are left unchanged. With fewer than two batches nothing is
/// done.
pub fn combat(adata: &mut AnnMatrix, key: &str, covariates: &[String]) -> Result<(), Error> {
    let batch_col = adata
        .obs()
        .get(key)
        .ok_or_else(|| PrepError::MissingBatchKey(key.to_string()))?;
    let batches = Batches::from_column(batch_col, key)?;
    if batches.len() < 2 {
        warn!("only {} batch found under '{}', skipping ComBat", batches.len(), key);
        return Ok(());
    }
    if let Some(b) = batches.members.iter().position(|m| m.len() < 2) {
        return Err(PrepError::InvalidArgument(format!(
            "batch '{}' has fewer than 2 cells",
            batches.labels[b]
        ))
        .into());
    }
    info!("running ComBat on {} batches of '{}'", batches.len(), key);

    let design = design_matrix(adata, &batches, covariates)?;
    let x = adata.x().to_dense();
    let (n_cells, n_genes) = x.dim();
    let n_batch = batches.len();

    // least-squares fit of batch and covariate effects
    let gram_inv = invert(&design.t().dot(&design))?;
    let b_hat = gram_inv.dot(&design.t()).dot(&x);

    let mut grand_mean = Array1::<f64>::zeros(n_genes);
    for (b, member) in batches.members.iter().enumerate() {
        grand_mean.scaled_add(member.len() as f64 / n_cells as f64, &b_hat.row(b));
    }
    let resid = &x - &design.dot(&b_hat);
    let var_pooled = resid.mapv(|v| v * v).mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_genes));

    // the fitted residual of a constant gene is rounding noise, so test the data itself
    let genes: Vec<usize> = (0..n_genes)
        .filter(|&g| {
            let col = x.column(g);
            let lo = col.fold(f64::INFINITY, |a, &v| a.min(v));
            let hi = col.fold(f64::NEG_INFINITY, |a, &v| a.max(v));
            hi > lo && var_pooled[g] > 0.0
        })
        .collect();
    if genes.len() < n_genes {
        debug!("{} genes constant across cells are not adjusted", n_genes - genes.len());
    }
    if genes.is_empty() {
        return Ok(());
    }

    let mut stand_mean = Array2::<f64>::zeros((n_cells, n_genes));
    stand_mean += &grand_mean.view().insert_axis(Axis(0));
    if design.ncols() > n_batch {
        let cov = design.slice(s![.., n_batch..]);
        stand_mean += &cov.dot(&b_hat.slice(s![n_batch.., ..]));
    }

    let x_g = x.select(Axis(1), &genes);
    let mean_g = stand_mean.select(Axis(1), &genes);
    let sd_g: Array1<f64> = genes.iter().map(|&g| var_pooled[g].sqrt()).collect();
    let s_data = (&x_g - &mean_g) / &sd_g.view().insert_axis(Axis(0));

    let mut gamma_hat = Array2::<f64>::zeros((n_batch, genes.len()));
    let mut delta_hat = Array2::<f64>::zeros((n_batch, genes.len()));
    for (b, member) in batches.members.iter().enumerate() {
        let rows = s_data.select(Axis(0), member);
        for (j, col) in rows.axis_iter(Axis(1)).enumerate() {
            let (m, v) = mean_var(&col.to_vec(), 1);
            gamma_hat[[b, j]] = m;
            delta_hat[[b, j]] = v;
        }
    }

    let mut adjusted = s_data.clone();
    for (b, member) in batches.members.iter().enumerate() {
        let g = gamma_hat.row(b);
        let gamma_prior = g
            .as_slice()
            .map(|g| mean_var(g, 1))
            .filter(|(_, t2)| t2.is_finite() && *t2 > 0.0);
        let delta_prior = inverse_gamma_prior(delta_hat.row(b));
        let (gamma_star, delta_star) =
            solve_batch(&s_data, member, g, delta_hat.row(b), gamma_prior, delta_prior);

        for &i in member {
            let mut row = adjusted.row_mut(i);
            for j in 0..genes.len() {
                let d = delta_star[j];
                let scale = if d > 0.0 { d.sqrt() } else { 1.0 };
                row[j] = (row[j] - gamma_star[j]) / scale;
            }
        }
    }

    let mut out = x;
    for (j, &g) in genes.iter().enumerate() {
        let mut col = out.column_mut(g);
        for i in 0..n_cells {
            col[i] = adjusted[[i, j]] * sd_g[j] + mean_g[[i, j]];
        }
    }
    adata.set_x(ExprMatrix::Dense(out))
}
