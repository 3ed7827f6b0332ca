use std::path::PathBuf;
use thiserror::Error;

use crate::file::FileError;

#[derive(Debug, Error)]
pub enum RelationError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Source file not found: {0}")]
    Missing(PathBuf),

    #[error("{path} row {row}: {detail}")]
    Parse {
        path: PathBuf,
        row: usize,
        detail: String,
    },

    #[error("Block size too small to hold a single {columns}-column row")]
    Capacity { columns: usize },

    #[error("Source file has no data rows: {0}")]
    EmptySource(PathBuf),

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("No such column: {0}")]
    UnknownColumn(String),
}

pub type RelationResult<T> = Result<T, RelationError>;
