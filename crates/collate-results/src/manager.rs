use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use collate_collective::{gather_value, Collective};
use collate_store::{ObjectReader, ObjectWriter, StoreSummary};
use collate_tree::{expand, insert, BincodeCodec, ResultTree, TreeCodec, TreeError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::{ResultsError, ResultsResult};
use crate::record::{parse_shard_id, shard_path, BadChild, ShardRecord};

/// Sidecar holding the task count as a JSON integer.
pub const TOTAL_TASKS_FILE: &str = "total_tasks";
/// Manager state snapshot written by [`ResultsManager::save_state`].
pub const STATE_FILE: &str = "manager.dat";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Accepting shards.
    Collecting,
    /// Inside a collective gather.
    Gathering,
    /// Dataset written; shards still on disk.
    Merged,
    /// Run directory removed.
    Cleaned,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Collecting => "collecting",
            Self::Gathering => "gathering",
            Self::Merged => "merged",
            Self::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// Holds a manager in a transient state and puts it back to `Collecting`
/// when dropped, including when the owning future is cancelled.
struct StateGuard<'a> {
    state: &'a mut LifecycleState,
}

impl<'a> StateGuard<'a> {
    fn enter(state: &'a mut LifecycleState, transient: LifecycleState) -> Self {
        *state = transient;
        Self { state }
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.state = LifecycleState::Collecting;
    }
}

#[derive(Serialize, Deserialize)]
struct StateHeader {
    total_tasks: u64,
    directory: PathBuf,
}

/// Collects per-task shards under a run directory and merges them into one
/// dataset at `{parent}/{basename}.dat`, one row per task id.
pub struct ResultsManager {
    pub(crate) total_tasks: u64,
    pub(crate) directory: PathBuf,
    pub(crate) dataset_path: PathBuf,
    pub(crate) children: Vec<ShardRecord>,
    pub(crate) state: LifecycleState,
    pub(crate) config: ManagerConfig,
    pub(crate) codec: Arc<dyn TreeCodec>,
}

impl fmt::Debug for ResultsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultsManager")
            .field("total_tasks", &self.total_tasks)
            .field("directory", &self.directory)
            .field("children", &self.children.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ResultsManager {
    /// Start a run: create `directory` (and parents) and write the
    /// `total_tasks` sidecar.
    pub fn create(total_tasks: u64, directory: impl AsRef<Path>) -> ResultsResult<Self> {
        Self::create_with(total_tasks, directory, ManagerConfig::default())
    }

    pub fn create_with(
        total_tasks: u64,
        directory: impl AsRef<Path>,
        config: ManagerConfig,
    ) -> ResultsResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        let dataset_path = dataset_path_for(&directory)?;
        fs::create_dir_all(&directory)?;

        let sidecar = directory.join(TOTAL_TASKS_FILE);
        let encoded = serde_json::to_string(&total_tasks).map_err(|e| ResultsError::Sidecar {
            path: sidecar.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&sidecar, encoded)?;
        info!(directory = %directory.display(), total_tasks, "run created");

        Ok(Self::assemble(total_tasks, directory, dataset_path, Vec::new(), config))
    }

    /// Rebuild a manager from an existing run directory: the sidecar gives
    /// the task count and every `child_<id>.shard` file becomes a record.
    pub fn restore_from_directory(directory: impl AsRef<Path>) -> ResultsResult<Self> {
        Self::restore_with(directory, ManagerConfig::default())
    }

    pub fn restore_with(directory: impl AsRef<Path>, config: ManagerConfig) -> ResultsResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        let dataset_path = dataset_path_for(&directory)?;
        let total_tasks = read_sidecar(&directory.join(TOTAL_TASKS_FILE))?;

        let mut children = Vec::new();
        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(parse_shard_id) else {
                continue;
            };
            if !entry.file_type()?.is_file() {
                continue;
            }
            if id >= total_tasks {
                warn!(id, total_tasks, path = %entry.path().display(), "ignoring shard outside task range");
                continue;
            }
            children.push(ShardRecord::observe(id, entry.path()));
        }
        children.sort_by_key(|c| c.id);
        info!(directory = %directory.display(), total_tasks, children = children.len(), "run restored");

        Ok(Self::assemble(total_tasks, directory, dataset_path, children, config))
    }

    fn assemble(
        total_tasks: u64,
        directory: PathBuf,
        dataset_path: PathBuf,
        children: Vec<ShardRecord>,
        config: ManagerConfig,
    ) -> Self {
        let codec: Arc<dyn TreeCodec> = Arc::new(config.codec());
        Self {
            total_tasks,
            directory,
            dataset_path,
            children,
            state: LifecycleState::Collecting,
            config,
            codec,
        }
    }

    /// Replace the codec used for shards and the merged dataset.
    pub fn with_codec(mut self, codec: Arc<dyn TreeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn total_tasks(&self) -> u64 {
        self.total_tasks
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Where merges write the master dataset.
    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    pub fn children(&self) -> &[ShardRecord] {
        &self.children
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Default shard location for task `id`.
    pub fn child_path(&self, id: u64) -> PathBuf {
        shard_path(&self.directory, id)
    }

    /// Persist `data` as task `id`'s shard at its default location.
    pub fn add_child(&mut self, data: &ResultTree, id: u64) -> ResultsResult<()> {
        let path = self.child_path(id);
        self.add_child_at(data, id, path)
    }

    /// Persist `data` as task `id`'s shard at `path`. A second shard for the
    /// same id replaces the first.
    pub fn add_child_at(&mut self, data: &ResultTree, id: u64, path: impl Into<PathBuf>) -> ResultsResult<()> {
        self.require("add_child", &[LifecycleState::Collecting])?;
        if id >= self.total_tasks {
            return Err(ResultsError::TaskIdOutOfRange {
                id,
                total_tasks: self.total_tasks,
            });
        }

        let path = path.into();
        self.codec.save(&path, data)?;

        if let Some(pos) = self.children.iter().position(|c| c.id == id) {
            let previous = self.children.remove(pos);
            warn!(id, previous = %previous.path.display(), "duplicate task id, keeping the newer shard");
        }
        debug!(id, path = %path.display(), "shard recorded");
        self.children.push(ShardRecord::observe(id, path));
        Ok(())
    }

    /// Task ids of the tracked shards, in list order.
    pub fn inserted_idxs(&self) -> Vec<u64> {
        self.children.iter().map(|c| c.id).collect()
    }

    /// Ids in `0..total_tasks` with no tracked shard.
    pub fn missing_ids(&self) -> Vec<u64> {
        let mut present: Vec<u64> = self.inserted_idxs();
        present.sort_unstable();
        present.dedup();
        let mut present = present.into_iter().peekable();
        (0..self.total_tasks)
            .filter(|id| {
                if present.peek() == Some(id) {
                    present.next();
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Stable sort of the child list by id.
    pub fn sort_children(&mut self) {
        self.children.sort_by_key(|c| c.id);
    }

    /// Collective gather of child lists onto `root`. Root ends with every
    /// rank's records concatenated in rank order; other ranks keep theirs.
    pub async fn gather(&mut self, channel: &dyn Collective, root: usize) -> ResultsResult<()> {
        self.require("gather", &[LifecycleState::Collecting])?;
        let gathered = {
            let _gathering = StateGuard::enter(&mut self.state, LifecycleState::Gathering);
            gather_value(channel, &self.children, root).await
        };

        if let Some(lists) = gathered? {
            self.children = lists.into_iter().flatten().collect();
            info!(rank = channel.rank(), children = self.children.len(), "child lists gathered");
        }
        Ok(())
    }

    /// Merge every tracked shard into the dataset at [`dataset_path`], row
    /// `id` for the shard with that id. Shards that fail to load or do not
    /// match the template are skipped and returned.
    ///
    /// [`dataset_path`]: Self::dataset_path
    pub fn concatenate(&mut self) -> ResultsResult<Vec<BadChild>> {
        self.require("concatenate", &[LifecycleState::Collecting, LifecycleState::Merged])?;
        let ordered = self.ordered_children();

        let rows = row_count(self.total_tasks)?;
        let merged = merge_rows(self.codec.as_ref(), &ordered, None, rows, |_, record| record.id as usize);
        let master = merged.dataset.unwrap_or_else(ResultTree::empty);
        self.finish_merge(&master, merged.inserted.len(), &merged.bad)?;
        Ok(merged.bad)
    }

    /// Remove the run directory. Only valid once merged; repeating it is a
    /// no-op.
    pub fn cleanup(&mut self) -> ResultsResult<()> {
        match self.state {
            LifecycleState::Cleaned => return Ok(()),
            LifecycleState::Merged => {}
            state => {
                return Err(ResultsError::InvalidState {
                    operation: "cleanup",
                    state,
                })
            }
        }
        match fs::remove_dir_all(&self.directory) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.children.clear();
        self.state = LifecycleState::Cleaned;
        info!(directory = %self.directory.display(), "run directory removed");
        Ok(())
    }

    /// Accept a dataset written by an earlier process as this run's merge,
    /// so a restored manager can be cleaned up.
    pub fn adopt_existing_dataset(&mut self) -> ResultsResult<()> {
        self.require("adopt dataset", &[LifecycleState::Collecting, LifecycleState::Merged])?;
        if !self.dataset_path.is_file() {
            return Err(ResultsError::NotFound(self.dataset_path.clone()));
        }
        self.state = LifecycleState::Merged;
        Ok(())
    }

    /// Snapshot `total_tasks`, the directory and the child list into
    /// `{directory}/manager.dat`.
    pub fn save_state(&self) -> ResultsResult<StoreSummary> {
        self.require(
            "save state",
            &[LifecycleState::Collecting, LifecycleState::Merged],
        )?;
        let header = StateHeader {
            total_tasks: self.total_tasks,
            directory: self.directory.clone(),
        };
        let path = self.directory.join(STATE_FILE);
        let mut writer = ObjectWriter::create(&path, 2, &header)?;
        writer.append(&self.inserted_idxs())?;
        writer.append(&self.children)?;
        let summary = writer.finish()?;
        debug!(path = %summary.path.display(), children = self.children.len(), "state saved");
        Ok(summary)
    }

    /// Rebuild a manager from a [`save_state`](Self::save_state) snapshot.
    pub fn restore_from_state(path: impl AsRef<Path>) -> ResultsResult<Self> {
        Self::restore_state_with(path, ManagerConfig::default())
    }

    pub fn restore_state_with(path: impl AsRef<Path>, config: ManagerConfig) -> ResultsResult<Self> {
        let mut reader = ObjectReader::open(path.as_ref())?;
        let header: StateHeader = reader.header()?;
        let children: Vec<ShardRecord> = reader.read(1)?;
        reader.close();

        let dataset_path = dataset_path_for(&header.directory)?;
        Ok(Self::assemble(
            header.total_tasks,
            header.directory,
            dataset_path,
            children,
            config,
        ))
    }

    /// Load the dataset written by the last merge.
    pub fn load_dataset(&self) -> ResultsResult<ResultTree> {
        Ok(self.codec.load(&self.dataset_path)?)
    }

    pub(crate) fn require(&self, operation: &'static str, allowed: &[LifecycleState]) -> ResultsResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ResultsError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Id-sorted copy of the child list; duplicates keep list order.
    pub(crate) fn ordered_children(&self) -> Vec<ShardRecord> {
        let mut ordered = self.children.clone();
        ordered.sort_by_key(|c| c.id);
        ordered
    }

    pub(crate) fn finish_merge(
        &mut self,
        master: &ResultTree,
        inserted: usize,
        bad: &[BadChild],
    ) -> ResultsResult<()> {
        self.codec.save(&self.dataset_path, master)?;
        self.state = LifecycleState::Merged;
        info!(
            dataset = %self.dataset_path.display(),
            inserted,
            bad = bad.len(),
            total_tasks = self.total_tasks,
            "merge complete"
        );
        Ok(())
    }
}

/// Load a dataset written with the default codec, e.g. by another process.
pub fn load_dataset(path: impl AsRef<Path>) -> ResultsResult<ResultTree> {
    Ok(BincodeCodec::new().load(path.as_ref())?)
}

/// Outcome of merging a list of shards into a freshly expanded tree.
pub(crate) struct LocalMerge {
    /// `None` when no shard could be loaded.
    pub dataset: Option<ResultTree>,
    /// `(row, id)` of every shard written.
    pub inserted: Vec<(usize, u64)>,
    pub bad: Vec<BadChild>,
}

/// Load each shard in order and write it into row `row_of(position, record)`
/// of a master of `rows` rows expanded from `template`, or from the first
/// shard that loads when no template is given.
pub(crate) fn merge_rows(
    codec: &dyn TreeCodec,
    children: &[ShardRecord],
    template: Option<&ResultTree>,
    rows: usize,
    row_of: impl Fn(usize, &ShardRecord) -> usize,
) -> LocalMerge {
    let mut merged = LocalMerge {
        dataset: None,
        inserted: Vec::new(),
        bad: Vec::new(),
    };

    for (position, record) in children.iter().enumerate() {
        let row = row_of(position, record);
        let outcome = load_child(codec, record).and_then(|shard| {
            let master = merged
                .dataset
                .get_or_insert_with(|| expand(template.unwrap_or(&shard), rows));
            insert(master, &shard, row).map_err(|e| bad_child(record, e))
        });
        match outcome {
            Ok(()) => merged.inserted.push((row, record.id)),
            Err(e) => {
                warn!(id = record.id, path = %record.path.display(), error = %e, "skipping bad child");
                merged.bad.push(BadChild::from_error(record, &e));
            }
        }
    }
    merged
}

/// The first shard in `children` that loads.
pub(crate) fn first_loadable(codec: &dyn TreeCodec, children: &[ShardRecord]) -> Option<ResultTree> {
    children.iter().find_map(|record| codec.load(&record.path).ok())
}

fn load_child(codec: &dyn TreeCodec, record: &ShardRecord) -> ResultsResult<ResultTree> {
    codec.load(&record.path).map_err(|e| bad_child(record, e))
}

fn bad_child(record: &ShardRecord, err: TreeError) -> ResultsError {
    ResultsError::BadChild {
        id: record.id,
        reason: err.to_string(),
    }
}

pub(crate) fn row_count(total_tasks: u64) -> ResultsResult<usize> {
    usize::try_from(total_tasks).map_err(|_| ResultsError::TaskIdOutOfRange {
        id: total_tasks,
        total_tasks,
    })
}

fn dataset_path_for(directory: &Path) -> ResultsResult<PathBuf> {
    let name = directory
        .file_name()
        .ok_or_else(|| ResultsError::InvalidDirectory(directory.to_path_buf()))?;
    let mut file = name.to_os_string();
    file.push(".dat");
    Ok(directory.with_file_name(file))
}

fn read_sidecar(path: &Path) -> ResultsResult<u64> {
    let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ResultsError::NotFound(path.to_path_buf()),
        _ => ResultsError::Io(e),
    })?;
    serde_json::from_str(contents.trim()).map_err(|e| ResultsError::Sidecar {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn shard(value: f64) -> ResultTree {
        ResultTree::empty()
            .with("x", ResultTree::leaf(array![value]))
            .with(
                "stats",
                ResultTree::empty().with("mean", ResultTree::leaf(array![[value, value * 2.0]])),
            )
    }

    fn column(tree: &ResultTree, path: &str) -> Vec<f64> {
        tree.get(path).unwrap().as_array().unwrap().iter().copied().collect()
    }

    #[test]
    fn worked_example() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run");
        let mut m = ResultsManager::create(4, &dir).unwrap();
        m.add_child(&ResultTree::empty().with("x", ResultTree::leaf(array![2.0])), 2).unwrap();
        m.add_child(&ResultTree::empty().with("x", ResultTree::leaf(array![0.0])), 0).unwrap();
        m.add_child(&ResultTree::empty().with("x", ResultTree::leaf(array![3.0])), 3).unwrap();

        let bad = m.concatenate().unwrap();
        assert!(bad.is_empty());
        assert_eq!(m.inserted_idxs(), vec![2, 0, 3]);
        assert_eq!(m.state(), LifecycleState::Merged);
        assert_eq!(m.dataset_path(), root.path().join("run.dat"));

        let dataset = m.load_dataset().unwrap();
        let x = dataset.get("x").unwrap().as_array().unwrap();
        assert_eq!(x.shape(), &[4, 1]);
        assert_eq!(column(&dataset, "x"), vec![0.0, 0.0, 2.0, 3.0]);
    }

    #[test]
    fn dataset_readable_without_manager() {
        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(2, root.path().join("run")).unwrap();
        m.add_child(&shard(7.0), 1).unwrap();
        m.concatenate().unwrap();

        let dataset = load_dataset(root.path().join("run.dat")).unwrap();
        assert_eq!(dataset, m.load_dataset().unwrap());
        assert!(matches!(
            load_dataset(root.path().join("other.dat")),
            Err(ResultsError::Tree(TreeError::NotFound(_)))
        ));
    }

    #[test]
    fn create_writes_sidecar() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("run");
        ResultsManager::create(12, &dir).unwrap();
        let sidecar = fs::read_to_string(dir.join(TOTAL_TASKS_FILE)).unwrap();
        assert_eq!(sidecar, "12");
    }

    #[test]
    fn rows_follow_ids_for_nested_trees() {
        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(3, root.path().join("run")).unwrap();
        for id in [1, 2, 0] {
            m.add_child(&shard(id as f64 + 1.0), id).unwrap();
        }
        m.concatenate().unwrap();

        let dataset = m.load_dataset().unwrap();
        assert_eq!(column(&dataset, "x"), vec![1.0, 2.0, 3.0]);
        let mean = dataset.get("stats/mean").unwrap().as_array().unwrap();
        assert_eq!(mean.shape(), &[3, 1, 2]);
        assert_eq!(column(&dataset, "stats/mean"), vec![1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
    }

    #[test]
    fn concatenate_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(2, root.path().join("run")).unwrap();
        m.add_child(&shard(1.0), 1).unwrap();
        m.concatenate().unwrap();
        let first = fs::read(m.dataset_path()).unwrap();
        m.concatenate().unwrap();
        assert_eq!(fs::read(m.dataset_path()).unwrap(), first);
    }

    #[test]
    fn zero_children_write_empty_sentinel() {
        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(5, root.path().join("run")).unwrap();
        assert!(m.concatenate().unwrap().is_empty());
        assert_eq!(m.state(), LifecycleState::Merged);
        assert!(m.load_dataset().unwrap().is_empty());
    }

    #[test]
    fn bad_children_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(4, root.path().join("run")).unwrap();
        m.add_child(&shard(1.0), 0).unwrap();
        m.add_child(&ResultTree::empty().with("x", ResultTree::leaf(Array1::from(vec![1.0, 2.0]))), 1)
            .unwrap();
        m.add_child(&shard(3.0), 2).unwrap();
        m.add_child(&shard(4.0), 3).unwrap();
        fs::write(m.child_path(3), b"not a shard").unwrap();

        let bad = m.concatenate().unwrap();
        let bad_ids: Vec<u64> = bad.iter().map(|b| b.id).collect();
        assert_eq!(bad_ids, vec![1, 3]);
        assert!(bad.iter().all(|b| !b.reason.is_empty()));

        let dataset = m.load_dataset().unwrap();
        assert_eq!(column(&dataset, "x"), vec![1.0, 0.0, 3.0, 0.0]);
    }

    #[test]
    fn missing_shard_file_is_bad_child() {
        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(2, root.path().join("run")).unwrap();
        m.add_child(&shard(1.0), 0).unwrap();
        m.add_child(&shard(2.0), 1).unwrap();
        fs::remove_file(m.child_path(0)).unwrap();

        let bad = m.concatenate().unwrap();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].id, 0);
        // Template comes from the first loadable child.
        assert_eq!(column(&m.load_dataset().unwrap(), "x"), vec![0.0, 2.0]);
    }

    #[test]
    fn duplicate_id_last_write_wins() {
        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(2, root.path().join("run")).unwrap();
        m.add_child(&shard(1.0), 1).unwrap();
        m.add_child(&shard(9.0), 1).unwrap();
        assert_eq!(m.inserted_idxs(), vec![1]);

        m.concatenate().unwrap();
        assert_eq!(column(&m.load_dataset().unwrap(), "x"), vec![0.0, 9.0]);
    }

    #[tokio::test]
    async fn cancelled_gather_returns_to_collecting() {
        use collate_collective::{CollectiveConfig, LocalCollective};
        use std::time::Duration;

        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(3, root.path().join("run")).unwrap();
        m.add_child(&shard(1.0), 0).unwrap();
        // Rank 1 never joins, and the collective's own timeout is far away.
        let members = LocalCollective::group(2, CollectiveConfig::default()).unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(20), m.gather(&members[0], 0)).await;
        assert!(outcome.is_err());
        assert_eq!(m.state(), LifecycleState::Collecting);

        m.add_child(&shard(2.0), 1).unwrap();
        assert_eq!(m.inserted_idxs(), vec![0, 1]);
        assert!(m.concatenate().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_gather_returns_to_collecting() {
        use collate_collective::{CollectiveConfig, CollectiveError, LocalCollective};
        use std::time::Duration;

        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(3, root.path().join("run")).unwrap();
        let members = LocalCollective::group(
            2,
            CollectiveConfig {
                timeout: Duration::from_millis(20),
            },
        )
        .unwrap();

        let err = m.gather(&members[0], 0).await.unwrap_err();
        assert!(matches!(err, ResultsError::Collective(CollectiveError::Timeout { .. })));
        assert_eq!(m.state(), LifecycleState::Collecting);
    }

    #[test]
    fn out_of_range_id_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(2, root.path().join("run")).unwrap();
        let err = m.add_child(&shard(1.0), 2).unwrap_err();
        assert!(matches!(err, ResultsError::TaskIdOutOfRange { id: 2, total_tasks: 2 }));
        assert!(m.children().is_empty());
        assert!(!m.child_path(2).exists());
    }

    #[test]
    fn lifecycle_is_enforced() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run");
        let mut m = ResultsManager::create(2, &dir).unwrap();

        assert!(matches!(
            m.cleanup(),
            Err(ResultsError::InvalidState { state: LifecycleState::Collecting, .. })
        ));

        m.add_child(&shard(1.0), 0).unwrap();
        m.concatenate().unwrap();
        assert!(matches!(
            m.add_child(&shard(2.0), 1),
            Err(ResultsError::InvalidState { state: LifecycleState::Merged, .. })
        ));

        m.cleanup().unwrap();
        assert!(!dir.exists());
        assert!(m.dataset_path().exists());
        m.cleanup().unwrap();
        assert_eq!(m.state(), LifecycleState::Cleaned);

        assert!(matches!(m.concatenate(), Err(ResultsError::InvalidState { .. })));
        assert!(matches!(m.add_child(&shard(1.0), 0), Err(ResultsError::InvalidState { .. })));
    }

    #[test]
    fn restore_scans_shards() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run");
        let mut m = ResultsManager::create(3, &dir).unwrap();
        m.add_child(&shard(3.0), 2).unwrap();
        m.add_child(&shard(1.0), 0).unwrap();
        fs::write(dir.join("child_7.shard"), b"stray").unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();
        fs::create_dir(dir.join("child_1.shard")).unwrap();

        let mut restored = ResultsManager::restore_from_directory(&dir).unwrap();
        assert_eq!(restored.total_tasks(), 3);
        assert_eq!(restored.inserted_idxs(), vec![0, 2]);
        assert!(restored.children().iter().all(|c| c.observed_mtime.is_some()));
        assert_eq!(restored.missing_ids(), vec![1]);

        restored.concatenate().unwrap();
        assert_eq!(column(&restored.load_dataset().unwrap(), "x"), vec![1.0, 0.0, 3.0]);
    }

    #[test]
    fn restore_requires_sidecar() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run");
        fs::create_dir(&dir).unwrap();
        assert!(matches!(
            ResultsManager::restore_from_directory(&dir),
            Err(ResultsError::NotFound(_))
        ));

        fs::write(dir.join(TOTAL_TASKS_FILE), "many").unwrap();
        assert!(matches!(
            ResultsManager::restore_from_directory(&dir),
            Err(ResultsError::Sidecar { .. })
        ));
    }

    #[test]
    fn state_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run");
        let mut m = ResultsManager::create(6, &dir).unwrap();
        for id in [4, 1, 5] {
            m.add_child(&shard(id as f64), id).unwrap();
        }
        let summary = m.save_state().unwrap();
        assert_eq!(summary.object_count, 2);

        let restored = ResultsManager::restore_from_state(dir.join(STATE_FILE)).unwrap();
        assert_eq!(restored.total_tasks(), 6);
        assert_eq!(restored.directory(), dir.as_path());
        assert_eq!(restored.children(), m.children());
        assert_eq!(restored.state(), LifecycleState::Collecting);
        assert_eq!(restored.missing_ids(), vec![0, 2, 3]);
    }

    #[test]
    fn adopt_existing_dataset_enables_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run");
        let mut m = ResultsManager::create(1, &dir).unwrap();
        m.add_child(&shard(1.0), 0).unwrap();

        let mut restored = ResultsManager::restore_from_directory(&dir).unwrap();
        assert!(matches!(restored.adopt_existing_dataset(), Err(ResultsError::NotFound(_))));

        m.concatenate().unwrap();
        restored.adopt_existing_dataset().unwrap();
        restored.cleanup().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn sort_and_missing_ids() {
        let root = tempfile::tempdir().unwrap();
        let mut m = ResultsManager::create(5, root.path().join("run")).unwrap();
        for id in [3, 0, 4] {
            m.add_child(&shard(1.0), id).unwrap();
        }
        assert_eq!(m.missing_ids(), vec![1, 2]);
        m.sort_children();
        assert_eq!(m.inserted_idxs(), vec![0, 3, 4]);
    }

    #[test]
    fn directory_needs_a_name() {
        assert!(matches!(
            ResultsManager::create(1, "/"),
            Err(ResultsError::InvalidDirectory(_))
        ));
    }
}
