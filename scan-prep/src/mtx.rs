use crate::io::open_text;
use anyhow::{bail, format_err, Context, Error};
use scan_types::SparseMatrix;
use sprs::TriMat;
use std::io::BufRead;
use std::path::Path;

/// Load a coordinate Matrix Market file (optionally gzipped) holding a genes x cells matrix,
/// and return it transposed as a cells x genes CSR matrix. `pattern` matrices get the value 1
/// for every listed entry; duplicate entries are summed.
pub fn load_mtx(path: impl AsRef<Path>) -> Result<SparseMatrix, Error> {
    let path = path.as_ref();
    load_mtx_inner(path).with_context(|| path.display().to_string())
}

fn load_mtx_inner(path: &Path) -> Result<SparseMatrix, Error> {
    let mut reader = open_text(path)?;
    let mut line = String::new();
    let mut mat: Option<TriMat<f64>> = None;
    let mut line_num = 0;

    while reader.read_line(&mut line)? > 0 {
        line_num += 1;
        if line.starts_with('%') || line.trim().is_empty() {
            line.clear();
            continue;
        }
        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                let nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                // stored transposed: rows of the result are the file's columns
                mat = Some(TriMat::with_capacity((ncol, nrow), nnz));
            }
            Some(m) => {
                let row = data
                    .next()
                    .ok_or_else(|| format_err!("missing ROW on line {}", line_num))?
                    .parse::<usize>()?;
                let col = data
                    .next()
                    .ok_or_else(|| format_err!("missing COL on line {}", line_num))?
                    .parse::<usize>()?;
                let val = match data.next() {
                    Some(v) => v.parse::<f64>().with_context(|| format!("bad value on line {line_num}"))?,
                    None => 1.0,
                };
                let (ncell, ngene) = m.shape();
                if row == 0 || col == 0 || row > ngene || col > ncell {
                    bail!("entry ({}, {}) on line {} is out of bounds", row, col, line_num);
                }
                m.add_triplet(col - 1, row - 1, val);
            }
        }
        line.clear();
    }

    let Some(matrix) = mat else { bail!("no matrix found") };
    Ok(matrix.to_csr())
}

#[cfg(test)]
mod test_mtx {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_load_mtx_transposes() -> Result<(), Error> {
        // 3 genes x 2 cells on disk
        let m = load_mtx("test/genes_by_cells.mtx")?;
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.to_dense(), array![[1.0, 0.0, 4.0], [0.0, 2.5, 3.0]]);
        Ok(())
    }

    #[test]
    fn test_load_mtx_gz() -> Result<(), Error> {
        let plain = load_mtx("test/genes_by_cells.mtx")?;
        let gz = load_mtx("test/genes_by_cells.mtx.gz")?;
        assert_eq!(plain.to_dense(), gz.to_dense());
        Ok(())
    }

    #[test]
    fn test_load_mtx_missing_file() {
        assert!(load_mtx("test/does_not_exist.mtx").is_err());
    }
}
