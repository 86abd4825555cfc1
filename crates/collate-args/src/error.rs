use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArgError {
    #[error("cannot split into zero parts")]
    ZeroParts,

    #[error("argument file path has no file name: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("store error: {0}")]
    Store(#[from] collate_store::StoreError),
}

pub type ArgResult<T> = Result<T, ArgError>;
