//! Results management for collate runs.
//!
//! A run is a directory holding one shard per finished task plus a
//! `total_tasks` sidecar. [`ResultsManager`] tracks the shards, merges them
//! into a single dataset with one row per task id, either in one process
//! ([`ResultsManager::concatenate`]) or across the members of a
//! [`Collective`](collate_collective::Collective)
//! ([`ResultsManager::parallel_concatenate`]), and removes the directory
//! once the merge is safe on disk.

pub mod config;
pub mod distributed;
pub mod error;
pub mod manager;
pub mod record;

pub use config::{ManagerConfig, SyncMode};
pub use distributed::partition;
pub use error::{ResultsError, ResultsResult};
pub use manager::{load_dataset, LifecycleState, ResultsManager, STATE_FILE, TOTAL_TASKS_FILE};
pub use record::{parse_shard_id, shard_file_name, shard_path, BadChild, ShardRecord};
