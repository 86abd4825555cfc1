use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectiveError {
    #[error("a collective group needs at least one member")]
    EmptyGroup,

    #[error("root rank {root} outside group of {size}")]
    InvalidRoot { root: usize, size: usize },

    #[error("rank {rank} timed out after {waited_ms}ms in collective round {round}")]
    Timeout { rank: usize, round: u64, waited_ms: u128 },

    #[error("peer rank {0} has left the group")]
    PeerClosed(usize),

    #[error("collective channel disconnected")]
    Disconnected,

    #[error("scatter needs one chunk per rank: expected {expected}, got {actual}")]
    ChunkCount { expected: usize, actual: usize },

    #[error("scatter root supplied no chunks")]
    MissingChunks,

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type CollectiveResult<T> = Result<T, CollectiveError>;
