use std::path::Path;
use std::time::Duration;

use collate_collective::CollectiveConfig;
use collate_tree::BincodeCodec;
use serde::{Deserialize, Serialize};

use crate::error::{ResultsError, ResultsResult};

/// Durability of shard and dataset writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` every file before it is renamed into place.
    EveryWrite,
    /// Rely on the OS page cache.
    OsDefault,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::EveryWrite
    }
}

/// Configuration for a results manager and the merges it runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub sync_mode: SyncMode,
    /// Bound on every collective wait during distributed operations.
    pub collective_timeout_ms: u64,
    /// Default worker count for parallel merges started from the CLI.
    pub workers: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            collective_timeout_ms: 60_000,
            workers: 1,
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(s: &str) -> ResultsResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ResultsError::Config(e.to_string()))?;
        if config.workers == 0 {
            return Err(ResultsError::Config("workers must be at least 1".into()));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> ResultsResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ResultsError::NotFound(path.to_path_buf()),
            _ => ResultsError::Io(e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn collective_config(&self) -> CollectiveConfig {
        CollectiveConfig {
            timeout: Duration::from_millis(self.collective_timeout_ms),
        }
    }

    /// Shard codec honouring `sync_mode`.
    pub fn codec(&self) -> BincodeCodec {
        BincodeCodec::with_sync(self.sync_mode == SyncMode::EveryWrite)
    }
}
