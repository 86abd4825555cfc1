use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use fs4::FileExt;

use crate::error::{StoreError, StoreResult};

/// Take a non-blocking exclusive advisory lock for a writer.
pub(crate) fn exclusive(file: &File, path: &Path) -> StoreResult<()> {
    FileExt::try_lock_exclusive(file).map_err(|e| contended(e, path))
}

/// Take a non-blocking shared advisory lock for a reader.
pub(crate) fn shared(file: &File, path: &Path) -> StoreResult<()> {
    FileExt::try_lock_shared(file).map_err(|e| contended(e, path))
}

fn contended(err: std::io::Error, path: &Path) -> StoreError {
    if err.kind() == ErrorKind::WouldBlock {
        StoreError::Locked(path.to_path_buf())
    } else {
        StoreError::Io(err)
    }
}
