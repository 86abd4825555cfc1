use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{TreeError, TreeResult};
use crate::tree::ResultTree;

const MAGIC: &[u8; 4] = b"CLTR";
const VERSION: u32 = 1;
/// Magic + version + CRC32.
const PREAMBLE_SIZE: usize = 12;

/// Persistence for whole result trees: one tree per file.
pub trait TreeCodec: Send + Sync {
    fn load(&self, path: &Path) -> TreeResult<ResultTree>;

    /// Write `tree` to `path`. Readers must never observe a partial file.
    fn save(&self, path: &Path, tree: &ResultTree) -> TreeResult<()>;
}

/// Default codec: a CRC-checked bincode body behind a magic/version
/// preamble.
///
/// ```text
/// [4 bytes: "CLTR"]
/// [4 bytes: version (big-endian u32)]
/// [4 bytes: CRC32 of body (big-endian u32)]
/// [N bytes: bincode-serialized ResultTree]
/// ```
///
/// `save` writes into a hidden temp file beside the destination and renames
/// it into place once complete, so a directory scan only ever sees finished
/// files.
#[derive(Clone, Debug, Default)]
pub struct BincodeCodec {
    sync: bool,
}

impl BincodeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `sync` is set, file contents are fsynced before the rename.
    pub fn with_sync(sync: bool) -> Self {
        Self { sync }
    }

    pub fn encode(tree: &ResultTree) -> TreeResult<Vec<u8>> {
        let body = bincode::serialize(tree).map_err(|e| TreeError::Serialization(e.to_string()))?;
        let mut buf = Vec::with_capacity(PREAMBLE_SIZE + body.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_be_bytes());
        buf.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    pub fn decode(path: &Path, data: &[u8]) -> TreeResult<ResultTree> {
        if data.len() < PREAMBLE_SIZE {
            return Err(corrupt(path, "file too short"));
        }
        if &data[0..4] != MAGIC {
            return Err(TreeError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != VERSION {
            return Err(TreeError::UnsupportedVersion(version));
        }
        let expected_crc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let body = &data[PREAMBLE_SIZE..];
        if crc32fast::hash(body) != expected_crc {
            return Err(corrupt(path, "CRC mismatch"));
        }
        bincode::deserialize(body).map_err(|e| corrupt(path, &e.to_string()))
    }
}

impl TreeCodec for BincodeCodec {
    fn load(&self, path: &Path) -> TreeResult<ResultTree> {
        let data = std::fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TreeError::NotFound(path.to_path_buf()),
            _ => TreeError::Io(e),
        })?;
        Self::decode(path, &data)
    }

    fn save(&self, path: &Path, tree: &ResultTree) -> TreeResult<()> {
        let data = Self::encode(tree)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".collate-")
            .suffix(".partial")
            .tempfile_in(dir)?;
        tmp.write_all(&data)?;
        tmp.flush()?;
        if self.sync {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(path).map_err(|e| TreeError::Io(e.error))?;

        debug!(path = %path.display(), bytes = data.len(), "tree saved");
        Ok(())
    }
}

fn corrupt(path: &Path, reason: &str) -> TreeError {
    TreeError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
