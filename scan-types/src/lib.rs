//! # scan-types: annotated expression matrices shared by the scan-prep crates

/// Per-cell and per-gene annotation tables
pub mod annotations;

/// Annotated expression matrix container
pub mod anndata;

/// Categorical annotation columns
pub mod categorical;

/// Typed failure kinds
pub mod error;

/// Dense and sparse expression values
pub mod matrix;

pub use anndata::{AnnMatrix, RawSnapshot};
pub use annotations::{Annotations, Column};
pub use categorical::Categorical;
pub use error::PrepError;
pub use matrix::{ExprMatrix, SparseMatrix};
