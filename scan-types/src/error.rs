use thiserror::Error;

/// Failure kinds raised by the loading, QC and preprocessing routines. These travel inside an
/// `anyhow::Error` and can be recovered with `downcast_ref::<PrepError>()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrepError {
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("batch key '{0}' not found in obs")]
    MissingBatchKey(String),

    #[error("no {axis} left after {step}")]
    EmptyResult { axis: &'static str, step: String },

    #[error("dataset '{0}' given more than once")]
    DuplicateDataset(String),

    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} support was not compiled in")]
    FeatureDisabled(&'static str),
}
