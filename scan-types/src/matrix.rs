use ndarray::{Array2, Axis};
use sprs::{CsMat, CsVecView};

/// Compressed sparse row matrix with `f64` values and `usize` indices.
pub type SparseMatrix = CsMat<f64>;

/// Cells x genes expression values, held either dense or as a CSR sparse matrix. Operations
/// keep the representation unless they say otherwise.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprMatrix {
    /// Dense row-major array
    Dense(Array2<f64>),
    /// CSR sparse matrix, one outer vector per cell
    Sparse(SparseMatrix),
}

impl From<Array2<f64>> for ExprMatrix {
    fn from(x: Array2<f64>) -> Self {
        ExprMatrix::Dense(x)
    }
}

impl From<SparseMatrix> for ExprMatrix {
    fn from(x: SparseMatrix) -> Self {
        // sprs keeps CSC input as CSC; normalize so outer vectors are always cells
        ExprMatrix::Sparse(x.into_csr())
    }
}

/// Assemble a CSR matrix from per-row `(column, value)` lists. Each list must be sorted by column.
fn csr_from_rows(rows: Vec<Vec<(usize, f64)>>, n_cols: usize) -> SparseMatrix {
    let n_rows = rows.len();
    let nnz = rows.iter().map(Vec::len).sum();
    let mut indptr = Vec::with_capacity(n_rows + 1);
    let mut indices = Vec::with_capacity(nnz);
    let mut data = Vec::with_capacity(nnz);
    indptr.push(0);
    for row in rows {
        for (c, v) in row {
            indices.push(c);
            data.push(v);
        }
        indptr.push(indices.len());
    }
    CsMat::new((n_rows, n_cols), indptr, indices, data)
}

fn row_entries(row: CsVecView<'_, f64>) -> Vec<(usize, f64)> {
    row.iter().map(|(c, &v)| (c, v)).collect()
}

impl ExprMatrix {
    pub fn rows(&self) -> usize {
        match self {
            ExprMatrix::Dense(x) => x.nrows(),
            ExprMatrix::Sparse(x) => x.rows(),
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            ExprMatrix::Dense(x) => x.ncols(),
            ExprMatrix::Sparse(x) => x.cols(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, ExprMatrix::Sparse(_))
    }

    /// Value at row `r`, column `c`.
    pub fn get(&self, r: usize, c: usize) -> f64 {
        match self {
            ExprMatrix::Dense(x) => x[[r, c]],
            ExprMatrix::Sparse(x) => x.get(r, c).copied().unwrap_or(0.0),
        }
    }

    /// Dense copy of the values.
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            ExprMatrix::Dense(x) => x.clone(),
            ExprMatrix::Sparse(x) => x.to_dense(),
        }
    }

    pub fn into_dense(self) -> ExprMatrix {
        match self {
            ExprMatrix::Dense(_) => self,
            ExprMatrix::Sparse(x) => ExprMatrix::Dense(x.to_dense()),
        }
    }

    pub fn into_sparse(self) -> ExprMatrix {
        match self {
            ExprMatrix::Dense(x) => {
                let rows = x
                    .axis_iter(Axis(0))
                    .map(|row| {
                        row.iter()
                            .enumerate()
                            .filter(|(_, &v)| v != 0.0)
                            .map(|(c, &v)| (c, v))
                            .collect()
                    })
                    .collect();
                ExprMatrix::Sparse(csr_from_rows(rows, x.ncols()))
            }
            ExprMatrix::Sparse(_) => self,
        }
    }

    /// Number of non-zero entries in each row.
    pub fn nnz_per_row(&self) -> Vec<usize> {
        match self {
            ExprMatrix::Dense(x) => x
                .axis_iter(Axis(0))
                .map(|row| row.iter().filter(|&&v| v != 0.0).count())
                .collect(),
            ExprMatrix::Sparse(x) => x
                .outer_iterator()
                .map(|row| row.iter().filter(|(_, &v)| v != 0.0).count())
                .collect(),
        }
    }

    /// Number of non-zero entries in each column.
    pub fn nnz_per_col(&self) -> Vec<usize> {
        match self {
            ExprMatrix::Dense(x) => x
                .axis_iter(Axis(1))
                .map(|col| col.iter().filter(|&&v| v != 0.0).count())
                .collect(),
            ExprMatrix::Sparse(x) => {
                let mut counts = vec![0; x.cols()];
                for row in x.outer_iterator() {
                    for (c, &v) in row.iter() {
                        if v != 0.0 {
                            counts[c] += 1;
                        }
                    }
                }
                counts
            }
        }
    }

    /// Keep the rows at `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> ExprMatrix {
        match self {
            ExprMatrix::Dense(x) => ExprMatrix::Dense(x.select(Axis(0), indices)),
            ExprMatrix::Sparse(x) => {
                let rows = indices
                    .iter()
                    .map(|&r| x.outer_view(r).map(row_entries).unwrap_or_default())
                    .collect();
                ExprMatrix::Sparse(csr_from_rows(rows, x.cols()))
            }
        }
    }

    /// Keep the columns at `indices`, in that order.
    pub fn select_cols(&self, indices: &[usize]) -> ExprMatrix {
        let target: Vec<Option<usize>> = indices.iter().map(|&c| Some(c)).collect();
        self.reindex_cols(&target)
    }

    /// Build a matrix whose column `j` is this matrix's column `target[j]`, or all zeros when
    /// `target[j]` is None.
    pub fn reindex_cols(&self, target: &[Option<usize>]) -> ExprMatrix {
        match self {
            ExprMatrix::Dense(x) => {
                let mut out = Array2::<f64>::zeros((x.nrows(), target.len()));
                for (j, src) in target.iter().enumerate() {
                    if let Some(src) = *src {
                        out.column_mut(j).assign(&x.column(src));
                    }
                }
                ExprMatrix::Dense(out)
            }
            ExprMatrix::Sparse(x) => {
                let mut new_pos = vec![None; x.cols()];
                for (j, src) in target.iter().enumerate() {
                    if let Some(src) = *src {
                        new_pos[src] = Some(j);
                    }
                }
                let rows = x
                    .outer_iterator()
                    .map(|row| {
                        let mut entries: Vec<(usize, f64)> =
                            row.iter().filter_map(|(c, &v)| new_pos[c].map(|j| (j, v))).collect();
                        entries.sort_unstable_by_key(|&(j, _)| j);
                        entries
                    })
                    .collect();
                ExprMatrix::Sparse(csr_from_rows(rows, target.len()))
            }
        }
    }

    /// Stack matrices vertically. The result is sparse if any input is sparse. All inputs must
    /// have `n_cols` columns.
    pub fn vstack(mats: &[ExprMatrix], n_cols: usize) -> ExprMatrix {
        if mats.iter().any(ExprMatrix::is_sparse) {
            let mut rows = Vec::new();
            for m in mats {
                match m {
                    ExprMatrix::Sparse(x) => rows.extend(x.outer_iterator().map(row_entries)),
                    ExprMatrix::Dense(x) => rows.extend(x.axis_iter(Axis(0)).map(|row| {
                        row.iter()
                            .enumerate()
                            .filter(|(_, &v)| v != 0.0)
                            .map(|(c, &v)| (c, v))
                            .collect::<Vec<_>>()
                    })),
                }
            }
            ExprMatrix::Sparse(csr_from_rows(rows, n_cols))
        } else {
            let n_rows = mats.iter().map(ExprMatrix::rows).sum();
            let mut out = Array2::<f64>::zeros((n_rows, n_cols));
            let mut offset = 0;
            for m in mats {
                if let ExprMatrix::Dense(x) = m {
                    out.slice_mut(ndarray::s![offset..offset + x.nrows(), ..]).assign(x);
                    offset += x.nrows();
                }
            }
            ExprMatrix::Dense(out)
        }
    }

    /// Sum of each row.
    pub fn row_sums(&self) -> Vec<f64> {
        match self {
            ExprMatrix::Dense(x) => x.sum_axis(Axis(1)).to_vec(),
            ExprMatrix::Sparse(x) => x
                .outer_iterator()
                .map(|row| row.data().iter().fold(0.0, |acc, &v| acc + v))
                .collect(),
        }
    }

    /// Multiply every entry of row `i` by `factors[i]`.
    pub fn scale_rows(&mut self, factors: &[f64]) {
        match self {
            ExprMatrix::Dense(x) => {
                for (mut row, &f) in x.axis_iter_mut(Axis(0)).zip(factors) {
                    row.mapv_inplace(|v| v * f);
                }
            }
            ExprMatrix::Sparse(x) => {
                let rows = x
                    .outer_iterator()
                    .zip(factors)
                    .map(|(row, &f)| row.iter().map(|(c, &v)| (c, v * f)).collect())
                    .collect();
                *x = csr_from_rows(rows, x.cols());
            }
        }
    }

    /// Apply `f` to every stored value. `f(0.0)` must be `0.0`, so that implicit zeros of a sparse
    /// matrix stay valid.
    pub fn map_zero_preserving<F: Fn(f64) -> f64>(&mut self, f: F) {
        match self {
            ExprMatrix::Dense(x) => x.mapv_inplace(f),
            ExprMatrix::Sparse(x) => x.map_inplace(|&v| f(v)),
        }
    }
}

#[cfg(test)]
mod test_matrix {
    use super::*;
    use ndarray::array;

    fn example() -> Array2<f64> {
        array![[1.0, 0.0, 2.0], [0.0, 0.0, 0.0], [3.0, 4.0, 0.0]]
    }

    #[test]
    fn test_dense_sparse_agree() {
        let d = ExprMatrix::Dense(example());
        let s = d.clone().into_sparse();
        assert!(s.is_sparse());
        assert_eq!(d.row_sums(), s.row_sums());
        assert_eq!(d.nnz_per_row(), vec![2, 0, 2]);
        assert_eq!(s.nnz_per_row(), vec![2, 0, 2]);
        assert_eq!(d.nnz_per_col(), s.nnz_per_col());
        // an empty sparse row sums to +0.0
        assert!(s.row_sums()[1].is_sign_positive());
        assert_eq!(s.to_dense(), example());
    }

    #[test]
    fn test_select() {
        for m in [ExprMatrix::Dense(example()), ExprMatrix::Dense(example()).into_sparse()] {
            let r = m.select_rows(&[2, 0]);
            assert_eq!(r.to_dense(), array![[3.0, 4.0, 0.0], [1.0, 0.0, 2.0]]);
            let c = m.select_cols(&[2, 1]);
            assert_eq!(c.to_dense(), array![[2.0, 0.0], [0.0, 0.0], [0.0, 4.0]]);
            let re = m.reindex_cols(&[None, Some(0)]);
            assert_eq!(re.to_dense(), array![[0.0, 1.0], [0.0, 0.0], [0.0, 3.0]]);
        }
    }

    #[test]
    fn test_vstack() {
        let a = ExprMatrix::Dense(array![[1.0, 2.0]]);
        let b = ExprMatrix::Dense(array![[3.0, 0.0], [0.0, 4.0]]);
        let dense = ExprMatrix::vstack(&[a.clone(), b.clone()], 2);
        assert!(!dense.is_sparse());
        assert_eq!(dense.to_dense(), array![[1.0, 2.0], [3.0, 0.0], [0.0, 4.0]]);

        let mixed = ExprMatrix::vstack(&[a, b.into_sparse()], 2);
        assert!(mixed.is_sparse());
        assert_eq!(mixed.to_dense(), dense.to_dense());
    }

    #[test]
    fn test_scale_and_map() {
        for mut m in [ExprMatrix::Dense(example()), ExprMatrix::Dense(example()).into_sparse()] {
            m.scale_rows(&[2.0, 1.0, 0.5]);
            assert_eq!(m.to_dense(), array![[2.0, 0.0, 4.0], [0.0, 0.0, 0.0], [1.5, 2.0, 0.0]]);
            m.map_zero_preserving(|v| v * 10.0);
            assert_eq!(m.get(2, 1), 20.0);
            assert_eq!(m.get(1, 1), 0.0);
        }
    }
}
