use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use collate_store::{ObjectReader, ObjectWriter, StoreSummary};
use tracing::{debug, info};

use crate::error::{ArgError, ArgResult};
use crate::value::ArgSet;

/// A named list of per-task argument sets plus free-form metadata, stored as
/// `{dir}/{name}.dat`: metadata in the header, one object per argument set.
#[derive(Clone, Debug, PartialEq)]
pub struct ArgFile {
    name: String,
    dir: PathBuf,
    meta: BTreeMap<String, String>,
    args: Vec<ArgSet>,
    /// Argument sets in the backing file, known before they are loaded.
    count: usize,
    loaded: bool,
    /// File this was opened from, which need not be `{dir}/{name}.dat`.
    source: Option<PathBuf>,
}

impl ArgFile {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            meta: BTreeMap::new(),
            args: Vec::new(),
            count: 0,
            loaded: true,
            source: None,
        }
    }

    pub fn with_args(mut self, args: Vec<ArgSet>, meta: BTreeMap<String, String>) -> Self {
        self.set_args(args, meta);
        self
    }

    pub fn set_args(&mut self, args: Vec<ArgSet>, meta: BTreeMap<String, String>) {
        self.count = args.len();
        self.args = args;
        self.meta = meta;
        self.loaded = true;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    /// Loaded argument sets; empty until [`load_args`](Self::load_args) for
    /// a file opened without them.
    pub fn args(&self) -> &[ArgSet] {
        &self.args
    }

    /// Number of argument sets, loaded or not.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Default location, `{dir}/{name}.dat`.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.dat", self.name))
    }

    /// File the argument sets load from: the opened file, else
    /// [`path`](Self::path).
    pub fn source(&self) -> PathBuf {
        self.source.clone().unwrap_or_else(|| self.path())
    }

    pub fn save(&self) -> ArgResult<StoreSummary> {
        self.save_to(&self.path())
    }

    pub fn save_to(&self, path: &Path) -> ArgResult<StoreSummary> {
        let mut writer = ObjectWriter::create(path, self.args.len() as u64, &self.meta)?;
        for set in &self.args {
            writer.append(set)?;
        }
        let summary = writer.finish()?;
        info!(path = %path.display(), sets = summary.object_count, "argument file saved");
        Ok(summary)
    }

    /// Open `path` reading only the metadata and the set count. The name is
    /// the file name up to its first `.`.
    pub fn open(path: impl AsRef<Path>) -> ArgResult<Self> {
        let path = path.as_ref();
        let (name, dir) = split_path(path)?;
        let mut reader = ObjectReader::open(path)?;
        let meta = reader.header()?;
        let count = reader.len();
        reader.close();
        debug!(path = %path.display(), count, "argument file opened");

        Ok(Self {
            name,
            dir,
            meta,
            args: Vec::new(),
            count,
            loaded: count == 0,
            source: Some(path.to_path_buf()),
        })
    }

    /// Open `path` and load every argument set.
    pub fn open_with_args(path: impl AsRef<Path>) -> ArgResult<Self> {
        let path = path.as_ref();
        let mut file = Self::open(path)?;
        file.load_from(path)?;
        Ok(file)
    }

    /// Load the argument sets from [`source`](Self::source).
    pub fn load_args(&mut self) -> ArgResult<&[ArgSet]> {
        let path = self.source();
        self.load_from(&path)?;
        Ok(&self.args)
    }

    fn load_from(&mut self, path: &Path) -> ArgResult<()> {
        let mut reader = ObjectReader::open(path)?;
        let args = (0..reader.len())
            .map(|i| reader.read(i))
            .collect::<Result<Vec<ArgSet>, _>>()?;
        reader.close();
        self.count = args.len();
        self.args = args;
        self.loaded = true;
        Ok(())
    }

    /// Read argument set `index` of the file at `path` without loading the
    /// others.
    pub fn get(path: impl AsRef<Path>, index: usize) -> ArgResult<ArgSet> {
        let mut reader = ObjectReader::open(path.as_ref())?;
        Ok(reader.read(index)?)
    }

    /// Split into `parts` contiguous runs, the first `len % parts` one set
    /// longer, each saved as `{dir}/{name}_split{i}.dat` with this file's
    /// metadata.
    pub fn split(&mut self, parts: usize) -> ArgResult<Vec<ArgFile>> {
        if parts == 0 {
            return Err(ArgError::ZeroParts);
        }
        if !self.loaded {
            self.load_args()?;
        }

        let base = self.args.len() / parts;
        let extra = self.args.len() % parts;
        let mut rest = self.args.as_slice();
        let mut out = Vec::with_capacity(parts);
        for i in 0..parts {
            let (head, tail) = rest.split_at(base + usize::from(i < extra));
            rest = tail;
            let part = ArgFile::new(format!("{}_split{i}", self.name), self.dir.clone())
                .with_args(head.to_vec(), self.meta.clone());
            part.save()?;
            out.push(part);
        }
        info!(name = %self.name, parts, sets = self.args.len(), "argument file split");
        Ok(out)
    }
}

fn split_path(path: &Path) -> ArgResult<(String, PathBuf)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArgError::InvalidPath(path.to_path_buf()))?;
    let name = file_name.split('.').next().unwrap_or(file_name).to_string();
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok((name, dir))
}
