use anyhow::{bail, Context, Error};
use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};
use hdf5::Group;
use log::{debug, info};
use scan_types::{AnnMatrix, Column, ExprMatrix};
use sprs::{CsMat, TriMat};
use std::path::Path;

const MATRIX_GROUP: &str = "matrix";
const FEATURE_REF_GROUP: &str = "features";
const DATASET_DATA: &str = "data";
const DATASET_INDICES: &str = "indices";
const DATASET_INDPTR: &str = "indptr";
const DATASET_SHAPE: &str = "shape";
const DATASET_BARCODES: &str = "barcodes";
const FEATURE_ID: &str = "id";
const FEATURE_NAME: &str = "name";
const FEATURE_TYPE: &str = "feature_type";
const FEATURE_GENOME: &str = "genome";
const LEGACY_GENE_IDS: &str = "genes";
const LEGACY_GENE_NAMES: &str = "gene_names";

/// Feature type of gene-expression features in the feature reference.
pub const GENE_EXPRESSION: &str = "Gene Expression";

/// Read a dataset of strings. Cell Ranger writes fixed-length ASCII; files rewritten by other
/// tools may hold variable-length strings instead.
fn read_strings(group: &Group, name: &str) -> Result<Vec<String>, Error> {
    let ds = group.dataset(name).with_context(|| format!("missing dataset '{name}'"))?;
    if let Ok(v) = ds.read_raw::<FixedAscii<1024>>() {
        return Ok(v.iter().map(|s| s.as_str().to_string()).collect());
    }
    if let Ok(v) = ds.read_raw::<VarLenUnicode>() {
        return Ok(v.iter().map(|s| s.as_str().to_string()).collect());
    }
    let v = ds
        .read_raw::<VarLenAscii>()
        .with_context(|| format!("dataset '{name}' does not hold strings"))?;
    Ok(v.iter().map(|s| s.as_str().to_string()).collect())
}

struct FeatureColumns {
    ids: Vec<String>,
    names: Vec<String>,
    types: Vec<String>,
    genomes: Vec<String>,
}

/// Read the compressed-sparse-column count matrix stored in `group` (features x barcodes on
/// disk) as a barcodes x features CSR matrix.
fn read_counts(group: &Group) -> Result<CsMat<f64>, Error> {
    let shape: Vec<i64> = group.dataset(DATASET_SHAPE)?.read_raw()?;
    let [num_features, num_barcodes] = shape.as_slice() else {
        bail!("expected a 2-element shape, got {:?}", shape);
    };
    let num_features = usize::try_from(*num_features).with_context(|| format!("bad shape {shape:?}"))?;
    let num_barcodes = usize::try_from(*num_barcodes).with_context(|| format!("bad shape {shape:?}"))?;

    let data: Vec<f64> = group.dataset(DATASET_DATA)?.read_raw()?;
    let indices: Vec<i64> = group.dataset(DATASET_INDICES)?.read_raw()?;
    let indptr: Vec<i64> = group.dataset(DATASET_INDPTR)?.read_raw()?;

    if indptr.len() != num_barcodes + 1 {
        bail!("indptr has {} entries for {} barcodes", indptr.len(), num_barcodes);
    }
    if indices.len() != data.len() {
        bail!("{} indices for {} values", indices.len(), data.len());
    }
    // indptr must run from 0 to nnz without decreasing
    let indptr: Vec<usize> = indptr
        .iter()
        .map(|&p| usize::try_from(p))
        .collect::<Result<_, _>>()
        .context("negative entry in indptr")?;
    if indptr.first() != Some(&0) || indptr.last() != Some(&data.len()) {
        bail!("indptr does not span 0..{}", data.len());
    }
    if indptr.windows(2).any(|w| w[0] > w[1]) {
        bail!("indptr is not sorted");
    }

    let mut mat = TriMat::with_capacity((num_barcodes, num_features), data.len());
    for (bc, window) in indptr.windows(2).enumerate() {
        for k in window[0]..window[1] {
            let feature = usize::try_from(indices[k]).unwrap_or(usize::MAX);
            if feature >= num_features {
                bail!("feature index {} out of range for {} features", indices[k], num_features);
            }
            mat.add_triplet(bc, feature, data[k]);
        }
    }
    Ok(mat.to_csr())
}

fn read_features_v3(group: &Group) -> Result<FeatureColumns, Error> {
    let features = group.group(FEATURE_REF_GROUP)?;
    let ids = read_strings(&features, FEATURE_ID)?;
    let names = read_strings(&features, FEATURE_NAME)?;
    let types = read_strings(&features, FEATURE_TYPE)?;
    let genomes = if features.link_exists(FEATURE_GENOME) {
        read_strings(&features, FEATURE_GENOME)?
    } else {
        vec![String::new(); ids.len()]
    };
    Ok(FeatureColumns {
        ids,
        names,
        types,
        genomes,
    })
}

fn read_features_legacy(group: &Group, genome: &str) -> Result<FeatureColumns, Error> {
    let ids = read_strings(group, LEGACY_GENE_IDS)?;
    let names = read_strings(group, LEGACY_GENE_NAMES)?;
    let n = ids.len();
    Ok(FeatureColumns {
        ids,
        names,
        types: vec![GENE_EXPRESSION.to_string(); n],
        genomes: vec![genome.to_string(); n],
    })
}

/// Load a Cell Ranger feature-barcode matrix h5 as a cells x features `AnnMatrix`.
///
/// Both the v3 layout (a `matrix` group with a `features` sub-group) and the legacy v2 layout
/// (one group per genome) are understood. No genome filter is applied; a legacy file must hold
/// exactly one genome. With `gex_only`, only features of type `Gene Expression` are kept.
///
/// `var` gets the columns `gene_ids`, `feature_types` and `genome`; `var_names` are the feature
/// names and `obs_names` the barcodes.
pub fn read_10x_h5(path: impl AsRef<Path>, gex_only: bool) -> Result<AnnMatrix, Error> {
    let path = path.as_ref();
    read_10x_h5_inner(path, gex_only).with_context(|| path.display().to_string())
}

fn read_10x_h5_inner(path: &Path, gex_only: bool) -> Result<AnnMatrix, Error> {
    let file = hdf5::File::open(path)?;

    let (group, features) = if file.link_exists(MATRIX_GROUP) {
        let group = file.group(MATRIX_GROUP)?;
        let features = read_features_v3(&group)?;
        (group, features)
    } else {
        let genomes = file.member_names()?;
        let [genome] = genomes.as_slice() else {
            bail!("legacy matrix file holds {} genomes: {:?}", genomes.len(), genomes);
        };
        debug!("reading legacy matrix for genome {}", genome);
        let group = file.group(genome)?;
        let features = read_features_legacy(&group, genome)?;
        (group, features)
    };

    let barcodes = read_strings(&group, DATASET_BARCODES)?;
    let counts = read_counts(&group)?;
    if counts.rows() != barcodes.len() || counts.cols() != features.ids.len() {
        bail!(
            "matrix shape {:?} does not match {} barcodes and {} features",
            counts.shape(),
            barcodes.len(),
            features.ids.len()
        );
    }

    let mut adata = AnnMatrix::new(ExprMatrix::Sparse(counts), barcodes, features.names)?;
    adata.insert_var("gene_ids", Column::Text(features.ids))?;
    adata.insert_var("feature_types", Column::Text(features.types.clone()))?;
    adata.insert_var("genome", Column::Text(features.genomes))?;

    if gex_only {
        let keep: Vec<usize> = features
            .types
            .iter()
            .enumerate()
            .filter(|(_, t)| t.as_str() == GENE_EXPRESSION)
            .map(|(i, _)| i)
            .collect();
        if keep.len() < features.types.len() {
            info!("keeping {} of {} features of type {}", keep.len(), features.types.len(), GENE_EXPRESSION);
            adata = adata.select_vars(&keep);
        }
    }

    info!("loaded {} cells x {} features from {}", adata.n_obs(), adata.n_vars(), path.display());
    Ok(adata)
}
