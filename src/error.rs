use std::path::PathBuf;

use thiserror::Error;

/// Everything that can stop a selection run.
///
/// Per-record problems (undefined feature values) are not errors: the record is
/// excluded and counted on its [`Dataset`](crate::data::model::Dataset).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("dataset not found: {}", path.display())]
    DatasetNotFound { path: PathBuf },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("failed to load model '{}': {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("predicate references unknown field '{field}'")]
    PredicateFieldUnknown { field: String },

    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("output already exists: {}", path.display())]
    OutputExists { path: PathBuf },

    #[error("scanner is {state}, expected {expected}")]
    ScanState {
        state: &'static str,
        expected: &'static str,
    },

    #[error("scan worker panicked")]
    WorkerPanicked,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        PipelineError::Parse {
            offset,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
