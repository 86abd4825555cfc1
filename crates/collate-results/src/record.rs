use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ResultsError;

const SHARD_PREFIX: &str = "child_";
const SHARD_SUFFIX: &str = ".shard";

/// One task's shard file as tracked by a results manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRecord {
    /// Task index; the shard's row in the merged dataset.
    pub id: u64,
    pub path: PathBuf,
    /// Modification time seen when the record was made, if the platform
    /// reports one.
    pub observed_mtime: Option<DateTime<Utc>>,
}

impl ShardRecord {
    /// Record `path` for task `id`, stamping the file's current mtime.
    pub fn observe(id: u64, path: PathBuf) -> Self {
        let observed_mtime = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Self {
            id,
            path,
            observed_mtime,
        }
    }
}

/// A shard skipped during a merge, and why.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadChild {
    pub id: u64,
    pub path: PathBuf,
    pub reason: String,
}

impl BadChild {
    pub fn new(record: &ShardRecord, reason: impl Into<String>) -> Self {
        Self {
            id: record.id,
            path: record.path.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_error(record: &ShardRecord, err: &ResultsError) -> Self {
        match err {
            ResultsError::BadChild { reason, .. } => Self::new(record, reason.clone()),
            other => Self::new(record, other.to_string()),
        }
    }
}

/// Deterministic shard file name for task `id`.
pub fn shard_file_name(id: u64) -> String {
    format!("{SHARD_PREFIX}{id}{SHARD_SUFFIX}")
}

/// Default location of task `id`'s shard inside `directory`.
pub fn shard_path(directory: &Path, id: u64) -> PathBuf {
    directory.join(shard_file_name(id))
}

/// Parse the task id out of a shard file name. Only exact
/// `child_<digits>.shard` names match, so temp files never do.
pub fn parse_shard_id(file_name: &str) -> Option<u64> {
    let digits = file_name
        .strip_prefix(SHARD_PREFIX)?
        .strip_suffix(SHARD_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
