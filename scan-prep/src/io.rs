//! Reading expression matrices from disk

use crate::mtx::load_mtx;
use anyhow::{Context, Error};
use flate2::read::MultiGzDecoder;
use log::info;
use ndarray::Array2;
use scan_types::{AnnMatrix, PrepError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const GZ_EXTENSION: &str = "gz";

/// Parameters for reading a delimited text table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelimitedOptions {
    /// Row holding the column (cell) labels; earlier rows are skipped
    pub header: Option<usize>,
    /// Column holding the row (gene) labels
    pub index_col: Option<usize>,
    pub delimiter: u8,
}

/// A recognized input format with the parameters needed to parse it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputFormat {
    /// Genes x cells text table (`.csv`, `.txt`)
    Delimited(DelimitedOptions),
    /// Cell Ranger feature-barcode matrix (`.h5`)
    TenxH5 { gex_only: bool },
    /// Coordinate Matrix Market, genes x cells (`.mtx`)
    MatrixMarket,
}

/// Options for `read`. Only the fields relevant to the detected format are used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    pub header: Option<usize>,
    pub index_col: Option<usize>,
    pub delimiter: u8,
    /// Keep only `Gene Expression` features of 10x h5 files
    pub gex_only: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            header: Some(0),
            index_col: Some(0),
            delimiter: b'\t',
            gex_only: true,
        }
    }
}

/// True if `path` ends in `.gz`.
fn is_gzipped(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(GZ_EXTENSION)
}

/// Open a text file for buffered reading, decompressing it if the name ends in `.gz`.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>, Error> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    Ok(if is_gzipped(path) {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

impl InputFormat {
    /// Resolve the format from the file extension, ignoring a trailing `.gz` on text formats.
    pub fn from_path(path: &Path, options: &ReadOptions) -> Result<InputFormat, Error> {
        let gzipped = is_gzipped(path);
        let stem = if gzipped {
            path.file_stem().map(Path::new)
        } else {
            Some(path)
        };
        let ext = stem
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let format = match ext.as_deref() {
            Some("csv") | Some("txt") => InputFormat::Delimited(DelimitedOptions {
                header: options.header,
                index_col: options.index_col,
                delimiter: options.delimiter,
            }),
            Some("mtx") => InputFormat::MatrixMarket,
            Some("h5") if !gzipped => InputFormat::TenxH5 {
                gex_only: options.gex_only,
            },
            _ => return Err(PrepError::UnsupportedFormat(path.display().to_string()).into()),
        };
        Ok(format)
    }
}

/// Load the expression matrix at `path` as a cells x genes `AnnMatrix`.
pub fn read(path: impl AsRef<Path>, options: &ReadOptions) -> Result<AnnMatrix, Error> {
    let path = path.as_ref();
    let format = InputFormat::from_path(path, options)?;
    let adata = read_format(path, &format)?;
    info!("read {} cells x {} genes from {}", adata.n_obs(), adata.n_vars(), path.display());
    Ok(adata)
}

/// Load `path` with an explicitly chosen format.
pub fn read_format(path: &Path, format: &InputFormat) -> Result<AnnMatrix, Error> {
    match *format {
        InputFormat::Delimited(opts) => read_delimited(path, &opts),
        InputFormat::MatrixMarket => {
            let x = load_mtx(path)?;
            let (n_cells, n_genes) = x.shape();
            AnnMatrix::new(x, numbered(n_cells), numbered(n_genes))
        }
        InputFormat::TenxH5 { gex_only } => read_h5(path, gex_only),
    }
}

#[cfg(feature = "hdf5")]
fn read_h5(path: &Path, gex_only: bool) -> Result<AnnMatrix, Error> {
    hdf5_io::read_10x_h5(path, gex_only)
}

#[cfg(not(feature = "hdf5"))]
fn read_h5(_path: &Path, _gex_only: bool) -> Result<AnnMatrix, Error> {
    Err(PrepError::FeatureDisabled("hdf5").into())
}

fn numbered(n: usize) -> Vec<String> {
    (0..n).map(|i| i.to_string()).collect()
}

/// Read a genes x cells table and transpose it so cells are rows.
pub fn read_delimited(path: &Path, opts: &DelimitedOptions) -> Result<AnnMatrix, Error> {
    read_delimited_inner(path, opts).with_context(|| path.display().to_string())
}

fn read_delimited_inner(path: &Path, opts: &DelimitedOptions) -> Result<AnnMatrix, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(opts.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(open_text(path)?);

    let mut header: Option<Vec<String>> = None;
    let mut gene_names = Vec::new();
    let mut values = Vec::new();
    let mut n_cells: Option<usize> = None;

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        match opts.header {
            Some(h) if line < h => continue,
            Some(h) if line == h => {
                header = Some(record.iter().map(|s| s.trim().to_string()).collect());
                continue;
            }
            _ => (),
        }

        if let Some(k) = opts.index_col {
            let label = record
                .get(k)
                .with_context(|| format!("line {} has no index column {}", line + 1, k + 1))?;
            gene_names.push(label.trim().to_string());
        }
        let mut row = Vec::with_capacity(record.len());
        for (col, field) in record.iter().enumerate() {
            if Some(col) == opts.index_col {
                continue;
            }
            let field = field.trim();
            let v = if field.is_empty() {
                0.0
            } else {
                field
                    .parse::<f64>()
                    .with_context(|| format!("non-numeric value '{}' on line {} column {}", field, line + 1, col + 1))?
            };
            row.push(v);
        }
        match n_cells {
            None => n_cells = Some(row.len()),
            Some(n) if n != row.len() => {
                return Err(PrepError::ShapeMismatch {
                    expected: n,
                    actual: row.len(),
                })
                .with_context(|| format!("line {} has a different number of values", line + 1));
            }
            Some(_) => (),
        }
        values.extend(row);
    }

    let n_cells = n_cells.unwrap_or_else(|| header.as_ref().map_or(0, Vec::len));
    let n_genes = if n_cells == 0 { 0 } else { values.len() / n_cells };

    let cell_names = match header {
        None => numbered(n_cells),
        Some(labels) if labels.len() == n_cells => labels,
        // the header also labels the index column
        Some(labels) if labels.len() == n_cells + 1 && opts.index_col.is_some() => {
            let skip = opts.index_col.unwrap_or(0);
            labels
                .into_iter()
                .enumerate()
                .filter(|&(i, _)| i != skip)
                .map(|(_, l)| l)
                .collect()
        }
        Some(labels) => {
            return Err(PrepError::ShapeMismatch {
                expected: n_cells,
                actual: labels.len(),
            })
            .context("header does not match the number of value columns");
        }
    };
    let gene_names = if opts.index_col.is_some() {
        gene_names
    } else {
        numbered(n_genes)
    };

    let genes_by_cells = Array2::from_shape_vec((n_genes, n_cells), values)?;
    let x = genes_by_cells.reversed_axes().as_standard_layout().into_owned();
    AnnMatrix::new(x, cell_names, gene_names)
}
