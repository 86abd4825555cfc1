use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::StoreResult;
use crate::lock;
use crate::record::{write_record, INDEX_POINTER_SIZE};

/// Result of closing a store writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSummary {
    pub path: PathBuf,
    pub object_count: usize,
    /// File offset of the trailing index, also stored at offset 0.
    pub index_offset: u64,
    /// Total file size in bytes.
    pub bytes: u64,
}

/// Sequential, append-only writer for an indexed object store.
///
/// Layout produced by [`ObjectWriter::finish`]:
/// ```text
/// [8 bytes: index pointer (little-endian u64)]
/// [record: object count hint]
/// [record: header]
/// [record: object 0] ... [record: object N-1]
/// [record: index, the N start offsets of the object records]
/// ```
///
/// The writer holds an exclusive lock on the file until it is finished or
/// dropped. A writer dropped without `finish` leaves a zero index pointer,
/// which readers reject.
pub struct ObjectWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Current write offset in the file.
    position: u64,
    offsets: Vec<u64>,
}

impl ObjectWriter {
    /// Create (or truncate) the store at `path` and write the preamble:
    /// the reserved pointer, `count_hint`, then `header`.
    pub fn create<H: Serialize + ?Sized>(
        path: &Path,
        count_hint: u64,
        header: &H,
    ) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        // Truncate only once the lock is ours; a live reader keeps its bytes.
        lock::exclusive(&file, path)?;
        file.set_len(0)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(&0u64.to_le_bytes())?;
        let mut position = INDEX_POINTER_SIZE;
        position += write_record(&mut writer, &count_hint)?;
        position += write_record(&mut writer, header)?;

        debug!(path = %path.display(), count_hint, data_start = position, "store opened for writing");
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            position,
            offsets: Vec::new(),
        })
    }

    /// Append one object, recording its start offset in the index.
    pub fn append<T: Serialize + ?Sized>(&mut self, object: &T) -> StoreResult<()> {
        let offset = self.position;
        self.position += write_record(&mut self.writer, object)?;
        self.offsets.push(offset);
        Ok(())
    }

    /// Number of objects appended so far.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the trailing index, patch the pointer at offset 0, and sync.
    /// The file is consistent only after this returns.
    pub fn finish(mut self) -> StoreResult<StoreSummary> {
        let index_offset = self.position;
        let index_len = write_record(&mut self.writer, &self.offsets)?;
        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&index_offset.to_le_bytes())?;
        file.sync_all()?;

        let summary = StoreSummary {
            path: self.path,
            object_count: self.offsets.len(),
            index_offset,
            bytes: index_offset + index_len,
        };
        debug!(
            path = %summary.path.display(),
            objects = summary.object_count,
            index_offset,
            "store closed"
        );
        Ok(summary)
    }
}
