//! # scan-prep: loading, QC and preprocessing of single-cell expression matrices

/// Batch-effect correction
pub mod combat;

/// Combining datasets
pub mod concat;

/// Reading expression matrices from CSV/TXT, 10x HDF5 and MTX files
pub mod io;

/// MTX loading routine
pub mod mtx;

/// QC plots
pub mod plot;

/// Cell and gene filtering, normalization and scaling
pub mod preprocessing;

/// Per-cell QC metrics
pub mod qc;

/// The filtering and normalization recipe
pub mod recipe;

pub mod stats;

pub use concat::{concat, CombatOptions, ConcatOptions, JoinKind};
pub use io::{read, InputFormat, ReadOptions};
pub use qc::{compute_qc, QcOptions};
pub use recipe::{apply_recipe, RecipeConfig};
pub use scan_types::{AnnMatrix, PrepError};
