use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    /// Shard tree disagrees with the master template at `path`.
    #[error("schema mismatch at '{path}': {reason}")]
    SchemaMismatch { path: String, reason: String },

    #[error("nothing to concatenate")]
    Empty,

    #[error("tree file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid tree file magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported tree file version: {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt tree file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TreeResult<T> = Result<T, TreeError>;
