use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Block file not found: {0}")]
    Missing(PathBuf),

    #[error("Bad block file {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Buffer pool exhausted: every resident block is reserved")]
    PoolExhausted,
}

pub type FileResult<T> = Result<T, FileError>;
