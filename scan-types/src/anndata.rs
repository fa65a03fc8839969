use crate::annotations::{Annotations, Column};
use crate::error::PrepError;
use crate::matrix::ExprMatrix;
use anyhow::Error;

/// Frozen copy of the expression values and gene metadata, taken before a destructive
/// transform such as the log transform.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSnapshot {
    pub x: ExprMatrix,
    pub var_names: Vec<String>,
    pub var: Annotations,
}

/// Annotated expression matrix: cells are rows, genes are columns.
///
/// The number of rows of `x`, the number of `obs_names` and the length of `obs` are always
/// equal, as are the number of columns, `var_names` and the length of `var`. Every method that
/// could break this returns an error instead.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnMatrix {
    x: ExprMatrix,
    obs_names: Vec<String>,
    var_names: Vec<String>,
    obs: Annotations,
    var: Annotations,
    raw: Option<RawSnapshot>,
}

fn check_len(expected: usize, actual: usize) -> Result<(), Error> {
    if expected != actual {
        return Err(PrepError::ShapeMismatch { expected, actual }.into());
    }
    Ok(())
}

impl AnnMatrix {
    /// Wrap a matrix with its cell and gene labels and empty annotation tables.
    pub fn new(x: impl Into<ExprMatrix>, obs_names: Vec<String>, var_names: Vec<String>) -> Result<AnnMatrix, Error> {
        let x = x.into();
        let obs = Annotations::new(obs_names.len());
        let var = Annotations::new(var_names.len());
        AnnMatrix::with_annotations(x, obs_names, var_names, obs, var)
    }

    /// Wrap a matrix with labels and existing annotation tables.
    pub fn with_annotations(
        x: ExprMatrix,
        obs_names: Vec<String>,
        var_names: Vec<String>,
        obs: Annotations,
        var: Annotations,
    ) -> Result<AnnMatrix, Error> {
        check_len(x.rows(), obs_names.len())?;
        check_len(x.rows(), obs.len())?;
        check_len(x.cols(), var_names.len())?;
        check_len(x.cols(), var.len())?;
        Ok(AnnMatrix {
            x,
            obs_names,
            var_names,
            obs,
            var,
            raw: None,
        })
    }

    pub fn x(&self) -> &ExprMatrix {
        &self.x
    }

    /// Mutable access to the values. Callers may change values but not the shape; use
    /// `set_x` to swap in a matrix of possibly different representation.
    pub fn x_mut(&mut self) -> &mut ExprMatrix {
        &mut self.x
    }

    /// Replace the values with a matrix of the same shape.
    pub fn set_x(&mut self, x: ExprMatrix) -> Result<(), Error> {
        check_len(self.x.rows(), x.rows())?;
        check_len(self.x.cols(), x.cols())?;
        self.x = x;
        Ok(())
    }

    /// Store `x` densely (`sparse == false`) or as CSR (`sparse == true`).
    pub fn into_layout(mut self, sparse: bool) -> AnnMatrix {
        self.x = if sparse {
            self.x.into_sparse()
        } else {
            self.x.into_dense()
        };
        self
    }

    pub fn obs_names(&self) -> &[String] {
        &self.obs_names
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    pub fn obs(&self) -> &Annotations {
        &self.obs
    }

    pub fn var(&self) -> &Annotations {
        &self.var
    }

    pub fn raw(&self) -> Option<&RawSnapshot> {
        self.raw.as_ref()
    }

    pub fn n_obs(&self) -> usize {
        self.x.rows()
    }

    pub fn n_vars(&self) -> usize {
        self.x.cols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.x.shape()
    }

    /// Add or overwrite a per-cell annotation column.
    pub fn insert_obs(&mut self, name: &str, column: Column) -> Result<(), Error> {
        self.obs.insert(name, column)
    }

    /// Add or overwrite a per-gene annotation column.
    pub fn insert_var(&mut self, name: &str, column: Column) -> Result<(), Error> {
        self.var.insert(name, column)
    }

    /// Keep the cells at `indices`, in that order. An existing raw snapshot is kept as-is, so it
    /// should only be taken once cell filtering is done.
    pub fn select_obs(self, indices: &[usize]) -> AnnMatrix {
        AnnMatrix {
            x: self.x.select_rows(indices),
            obs_names: indices.iter().map(|&i| self.obs_names[i].clone()).collect(),
            obs: self.obs.select(indices),
            ..self
        }
    }

    /// Keep the genes at `indices`, in that order. The raw snapshot keeps all of its genes.
    pub fn select_vars(self, indices: &[usize]) -> AnnMatrix {
        AnnMatrix {
            x: self.x.select_cols(indices),
            var_names: indices.iter().map(|&i| self.var_names[i].clone()).collect(),
            var: self.var.select(indices),
            ..self
        }
    }

    /// Store a deep copy of the current values and gene metadata as the raw snapshot,
    /// replacing any earlier one. Later in-place transforms of `x` do not reach the copy.
    pub fn snapshot_raw(&mut self) {
        self.raw = Some(RawSnapshot {
            x: self.x.clone(),
            var_names: self.var_names.clone(),
            var: self.var.clone(),
        });
    }

    /// Split into `(x, obs_names, var_names, obs, var)`, dropping any raw snapshot.
    pub fn into_parts(self) -> (ExprMatrix, Vec<String>, Vec<String>, Annotations, Annotations) {
        (self.x, self.obs_names, self.var_names, self.obs, self.var)
    }
}

#[cfg(test)]
mod test_anndata {
    use super::*;
    use ndarray::array;

    fn names(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn test_new_checks_shape() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        assert!(AnnMatrix::new(x.clone(), names("c", 2), names("g", 2)).is_err());
        assert!(AnnMatrix::new(x.clone(), names("c", 3), names("g", 3)).is_err());
        let a = AnnMatrix::new(x, names("c", 3), names("g", 2)).unwrap();
        assert_eq!(a.shape(), (3, 2));
        assert_eq!(a.obs().len(), 3);
        assert_eq!(a.var().len(), 2);
    }

    #[test]
    fn test_select_keeps_alignment() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mut a = AnnMatrix::new(x, names("c", 3), names("g", 2)).unwrap();
        a.insert_obs("v", Column::Numeric(vec![10.0, 20.0, 30.0])).unwrap();
        a.insert_var("w", Column::Numeric(vec![1.0, 2.0])).unwrap();

        let a = a.select_obs(&[2, 0]).select_vars(&[1]);
        assert_eq!(a.shape(), (2, 1));
        assert_eq!(a.obs_names(), &["c2", "c0"]);
        assert_eq!(a.var_names(), &["g1"]);
        assert_eq!(a.obs().numeric("v").unwrap(), &[30.0, 10.0]);
        assert_eq!(a.var().numeric("w").unwrap(), &[2.0]);
        assert_eq!(a.x().to_dense(), array![[6.0], [2.0]]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let x = array![[1.0, 0.0], [3.0, 4.0]];
        let mut a = AnnMatrix::new(x.clone(), names("c", 2), names("g", 2)).unwrap();
        a.snapshot_raw();
        a.x_mut().map_zero_preserving(|v| v * 2.0);
        assert_eq!(a.raw().unwrap().x.to_dense(), x);
        assert_eq!(a.x().get(1, 1), 8.0);
    }

    #[test]
    fn test_set_x_checks_shape() {
        let mut a = AnnMatrix::new(array![[1.0, 0.0]], names("c", 1), names("g", 2)).unwrap();
        assert!(a.set_x(ExprMatrix::Dense(array![[1.0]])).is_err());
        assert!(a.set_x(ExprMatrix::Dense(array![[1.0, 2.0]]).into_sparse()).is_ok());
        assert!(a.x().is_sparse());
    }
}
