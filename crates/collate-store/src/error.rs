use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("corrupt store at offset {offset}: {reason}")]
    Format { offset: u64, reason: String },

    #[error("object index {index} out of range (store holds {len} objects)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("store reader is not open")]
    NotOpen,

    #[error("store file is locked by another handle: {}", .0.display())]
    Locked(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
