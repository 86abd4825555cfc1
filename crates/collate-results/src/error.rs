use std::path::PathBuf;

use thiserror::Error;

use crate::manager::LifecycleState;

#[derive(Debug, Error)]
pub enum ResultsError {
    /// Missing sidecar, state file or run directory.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A shard that could not be loaded or inserted during a merge.
    #[error("bad child {id}: {reason}")]
    BadChild { id: u64, reason: String },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("task id {id} outside 0..{total_tasks}")]
    TaskIdOutOfRange { id: u64, total_tasks: u64 },

    #[error("run directory has no final path component: {}", .0.display())]
    InvalidDirectory(PathBuf),

    #[error("malformed sidecar {}: {reason}", .path.display())]
    Sidecar { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] collate_store::StoreError),

    #[error("tree error: {0}")]
    Tree(#[from] collate_tree::TreeError),

    #[error("collective error: {0}")]
    Collective(#[from] collate_collective::CollectiveError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ResultsResult<T> = Result<T, ResultsError>;
