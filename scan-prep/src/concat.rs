//! Combining several datasets into one

use crate::combat::combat;
use anyhow::{bail, Error};
use log::info;
use scan_types::{AnnMatrix, Annotations, Categorical, Column, ExprMatrix, PrepError};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// How genes of the combined datasets are matched up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JoinKind {
    /// Keep genes present in every dataset
    #[default]
    Inner,
    /// Keep genes present in any dataset; absent entries are zero
    Outer,
}

impl FromStr for JoinKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "inner" => JoinKind::Inner,
            "outer" => JoinKind::Outer,
            _ => bail!("unknown join kind: {}", s),
        })
    }
}

/// Batch correction applied after combining.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombatOptions {
    /// obs column holding the batch of each cell
    pub key: String,
    /// obs columns whose effects are preserved
    pub covariates: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConcatOptions {
    pub join: JoinKind,
    /// obs column that records the source dataset of each cell
    pub sample_key: String,
    /// Labels to use instead of the dataset names, one per dataset
    pub batch_categories: Option<Vec<String>>,
    /// Separator for making cell names unique as `{name}{sep}{label}`
    pub index_unique: Option<String>,
    pub combat: Option<CombatOptions>,
}

impl Default for ConcatOptions {
    fn default() -> Self {
        ConcatOptions {
            join: JoinKind::Inner,
            sample_key: "batch".to_string(),
            batch_categories: None,
            index_unique: Some("-".to_string()),
            combat: None,
        }
    }
}

/// Gene names of the combined matrix, in the first dataset's order followed by (outer join)
/// genes first seen in later datasets.
fn joined_genes(datasets: &[(String, AnnMatrix)], join: JoinKind) -> Vec<String> {
    let mut genes: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for (_, adata) in datasets {
        for g in adata.var_names() {
            if seen.insert(g.as_str()) {
                genes.push(g.clone());
            }
        }
        if join == JoinKind::Inner {
            break;
        }
    }
    if join == JoinKind::Inner {
        let sets: Vec<HashSet<&str>> = datasets
            .iter()
            .skip(1)
            .map(|(_, a)| a.var_names().iter().map(String::as_str).collect())
            .collect();
        genes.retain(|g| sets.iter().all(|s| s.contains(g.as_str())));
    }
    genes
}

fn gene_positions(var_names: &[String]) -> HashMap<&str, usize> {
    let mut pos = HashMap::with_capacity(var_names.len());
    for (i, g) in var_names.iter().enumerate() {
        pos.entry(g.as_str()).or_insert(i);
    }
    pos
}

/// Merge per-gene annotations, taking each gene's value from the first dataset that has both
/// the gene and the column. Numeric columns stay numeric; everything else becomes text.
fn merge_var(genes: &[String], parts: &[(Vec<String>, Annotations)]) -> Result<Annotations, Error> {
    let mut names: Vec<(String, bool)> = Vec::new();
    for (_, var) in parts {
        for (name, col) in var.iter() {
            if !names.iter().any(|(n, _)| n == name) {
                names.push((name.to_string(), col.as_numeric().is_some()));
            }
        }
    }

    let positions: Vec<HashMap<&str, usize>> = parts.iter().map(|(v, _)| gene_positions(v)).collect();
    let mut var = Annotations::new(genes.len());
    for (name, numeric) in names {
        let lookup = |g: &str| {
            parts.iter().zip(&positions).find_map(|((_, ann), pos)| {
                let col = ann.get(&name)?;
                pos.get(g).map(|&i| (col, i))
            })
        };
        let column = if numeric {
            Column::Numeric(
                genes
                    .iter()
                    .map(|g| match lookup(g) {
                        Some((Column::Numeric(v), i)) => v[i],
                        _ => f64::NAN,
                    })
                    .collect(),
            )
        } else {
            Column::Text(
                genes
                    .iter()
                    .map(|g| lookup(g).map(|(col, i)| col.select(&[i]).to_text().remove(0)).unwrap_or_default())
                    .collect(),
            )
        };
        var.insert(&name, column)?;
    }
    Ok(var)
}

/// Combine `datasets` (name, matrix) into one matrix, stacking cells in iteration order.
///
/// Every cell is labeled with its dataset's name (or the matching entry of `batch_categories`)
/// in the categorical obs column `sample_key`. Other obs columns are merged by name, padding
/// with missing values. The result is sparse if any input is sparse. If `combat` is set the
/// combined values are batch-corrected before returning. Raw snapshots of the inputs are not
/// carried over.
pub fn concat(datasets: Vec<(String, AnnMatrix)>, options: &ConcatOptions) -> Result<AnnMatrix, Error> {
    if datasets.is_empty() {
        return Err(PrepError::InvalidArgument("no datasets to combine".to_string()).into());
    }
    let mut keys = HashSet::new();
    for (name, _) in &datasets {
        if !keys.insert(name.as_str()) {
            return Err(PrepError::DuplicateDataset(name.clone()).into());
        }
    }
    let labels: Vec<String> = match &options.batch_categories {
        Some(cats) if cats.len() != datasets.len() => {
            return Err(PrepError::InvalidArgument(format!(
                "{} batch categories given for {} datasets",
                cats.len(),
                datasets.len()
            ))
            .into());
        }
        Some(cats) => cats.clone(),
        None => datasets.iter().map(|(name, _)| name.clone()).collect(),
    };

    let genes = joined_genes(&datasets, options.join);
    info!(
        "combining {} datasets on {} genes ({:?} join)",
        datasets.len(),
        genes.len(),
        options.join
    );

    let mut mats = Vec::with_capacity(datasets.len());
    let mut obs_names = Vec::new();
    let mut obs: Option<Annotations> = None;
    let mut codes = Vec::new();
    let mut var_parts = Vec::with_capacity(datasets.len());

    for (b, ((_, adata), label)) in datasets.into_iter().zip(&labels).enumerate() {
        let target: Vec<Option<usize>> = {
            let pos = gene_positions(adata.var_names());
            genes.iter().map(|g| pos.get(g.as_str()).copied()).collect()
        };
        let (x, cells, var_names, cell_ann, var) = adata.into_parts();
        mats.push(x.reindex_cols(&target));
        codes.extend(std::iter::repeat(b as i32).take(cells.len()));
        match &options.index_unique {
            Some(sep) => obs_names.extend(cells.into_iter().map(|c| format!("{c}{sep}{label}"))),
            None => obs_names.extend(cells),
        }
        match obs.as_mut() {
            Some(o) => o.append(&cell_ann),
            None => obs = Some(cell_ann),
        }
        var_parts.push((var_names, var));
    }

    let x = ExprMatrix::vstack(&mats, genes.len());
    let var = merge_var(&genes, &var_parts)?;
    let mut obs = obs.unwrap_or_else(|| Annotations::new(0));
    obs.insert(&options.sample_key, Column::Categorical(Categorical::new(labels, codes)?))?;

    let mut adata = AnnMatrix::with_annotations(x, obs_names, genes, obs, var)?;
    info!("combined matrix has {} cells x {} genes", adata.n_obs(), adata.n_vars());

    if let Some(opts) = &options.combat {
        combat(&mut adata, &opts.key, &opts.covariates)?;
    }
    Ok(adata)
}
