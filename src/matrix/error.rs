use std::path::PathBuf;
use thiserror::Error;

use crate::file::FileError;

#[derive(Debug, Error)]
pub enum MatrixError {
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

    #[error("Block size too small to hold a single matrix cell")]
    Capacity,

    #[error("Source file has no data rows: {0}")]
    EmptySource(PathBuf),
}

pub type MatrixResult<T> = Result<T, MatrixError>;
