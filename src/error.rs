//! Crate-wide error type.
//!
//! Structural problems (bad axes, mismatched vectors, duplicate component
//! names, cyclic twins) are errors. Numerical non-convergence is not: the
//! optimizer reports it as data (`fit::Termination`, `domain::FailureReason`).

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpecError>;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("index {index} is out of range for axis '{axis}' (size {size})")]
    IndexOutOfRange { axis: String, index: usize, size: usize },

    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("a component named '{0}' already exists in the model")]
    DuplicateName(String),

    #[error("no component named '{0}' in the model")]
    UnknownComponent(String),

    #[error("component '{component}' has no parameter '{parameter}'")]
    UnknownParameter { component: String, parameter: String },

    #[error("twinning {target} to {source_ref} would create a cycle")]
    TwinCycle { target: String, source_ref: String },

    #[error("invalid initial guess: parameter {index} is {value}")]
    InvalidInitialGuess { index: usize, value: f64 },

    #[error("invalid axis: {0}")]
    InvalidAxis(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("element '{0}' is not in the element database")]
    UnknownElement(String),

    #[error("unknown X-ray line '{0}'")]
    UnknownXrayLine(String),

    #[error("operation requires a {expected}-dimensional signal, found {found}")]
    UnsupportedSignalDimension { expected: usize, found: usize },

    #[error("metadata path '{path}': {reason}")]
    MetadataPath { path: String, reason: &'static str },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpecError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SpecError::Io {
            path: path.into(),
            source,
        }
    }
}
