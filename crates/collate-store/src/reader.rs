use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::lock;
use crate::record::{decode, read_record, INDEX_POINTER_SIZE};

/// Random-access reader for a store written by [`crate::ObjectWriter`].
///
/// Opening reads the preamble and the full trailing index; each
/// [`read`](Self::read) is then a single seek plus one record decode, with
/// no cursor state carried between calls.
#[derive(Debug)]
pub struct ObjectReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    count_hint: u64,
    header: Vec<u8>,
    header_offset: u64,
    index_offset: u64,
    offsets: Vec<u64>,
}

impl ObjectReader {
    /// Open the store, validate the pointer, and load the index.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(path.to_path_buf()),
            _ => StoreError::Io(e),
        })?;
        lock::shared(&file, path)?;

        let file_len = file.metadata()?.len();
        if file_len < INDEX_POINTER_SIZE {
            return Err(StoreError::Format {
                offset: 0,
                reason: format!("file of {file_len} bytes has no index pointer"),
            });
        }

        let mut file = BufReader::new(file);
        file.seek(SeekFrom::Start(0))?;
        let mut pointer = [0u8; INDEX_POINTER_SIZE as usize];
        file.read_exact(&mut pointer)?;
        let index_offset = u64::from_le_bytes(pointer);

        if index_offset == 0 {
            return Err(StoreError::Format {
                offset: 0,
                reason: "store was not closed".into(),
            });
        }
        if index_offset >= file_len {
            return Err(StoreError::Format {
                offset: 0,
                reason: format!("index pointer {index_offset} beyond file of {file_len} bytes"),
            });
        }

        let (count_payload, header_offset) =
            read_record(&mut file, INDEX_POINTER_SIZE, index_offset)?;
        let count_hint: u64 = decode(&count_payload, INDEX_POINTER_SIZE)?;

        let (header, data_start) = read_record(&mut file, header_offset, index_offset)?;

        let (index_payload, index_end) = read_record(&mut file, index_offset, file_len)?;
        let offsets: Vec<u64> = decode(&index_payload, index_offset)?;
        if index_end != file_len {
            return Err(StoreError::Format {
                offset: index_end,
                reason: format!("{} trailing bytes after index", file_len - index_end),
            });
        }
        if let Some(bad) = offsets
            .iter()
            .find(|&&o| o < data_start || o >= index_offset)
        {
            return Err(StoreError::Format {
                offset: index_offset,
                reason: format!("index entry {bad} outside object region {data_start}..{index_offset}"),
            });
        }

        debug!(
            path = %path.display(),
            objects = offsets.len(),
            count_hint,
            index_offset,
            "store opened for reading"
        );
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            count_hint,
            header,
            header_offset,
            index_offset,
            offsets,
        })
    }

    /// Read and decode object `index`.
    pub fn read<T: DeserializeOwned>(&mut self, index: usize) -> StoreResult<T> {
        let offset = self.offset_of(index)?;
        let payload = self.read_payload(offset)?;
        decode(&payload, offset)
    }

    /// Raw, CRC-verified payload bytes of object `index`.
    pub fn read_raw(&mut self, index: usize) -> StoreResult<Vec<u8>> {
        let offset = self.offset_of(index)?;
        self.read_payload(offset)
    }

    /// Decode the header written at creation into the caller's type.
    pub fn header<H: DeserializeOwned>(&self) -> StoreResult<H> {
        decode(&self.header, self.header_offset)
    }

    /// Release the file handle and its lock. Later reads fail with
    /// [`StoreError::NotOpen`]; closing twice is harmless.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "store closed for reading");
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Object count as declared by the writer at creation time.
    pub fn count_hint(&self) -> u64 {
        self.count_hint
    }

    /// Number of objects actually indexed.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn index_offset(&self) -> u64 {
        self.index_offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset_of(&self, index: usize) -> StoreResult<u64> {
        if self.file.is_none() {
            return Err(StoreError::NotOpen);
        }
        self.offsets
            .get(index)
            .copied()
            .ok_or(StoreError::IndexOutOfRange {
                index,
                len: self.offsets.len(),
            })
    }

    fn read_payload(&mut self, offset: u64) -> StoreResult<Vec<u8>> {
        let limit = self.index_offset;
        let file = self.file.as_mut().ok_or(StoreError::NotOpen)?;
        let (payload, _) = read_record(file, offset, limit)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RECORD_HEADER_SIZE;
    use crate::writer::ObjectWriter;
    use std::collections::BTreeMap;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn write_numbers(path: &Path, n: u64) {
        let mut header = BTreeMap::new();
        header.insert("kind".to_string(), "numbers".to_string());
        let mut writer = ObjectWriter::create(path, n, &header).unwrap();
        for i in 0..n {
            writer.append(&format!("object-{i}")).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn reads_in_arbitrary_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 5);

        let mut reader = ObjectReader::open(&path).unwrap();
        for i in [4usize, 0, 2, 2, 1, 3] {
            let value: String = reader.read(i).unwrap();
            assert_eq!(value, format!("object-{i}"));
        }
    }

    #[test]
    fn header_and_count_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 3);

        let reader = ObjectReader::open(&path).unwrap();
        assert_eq!(reader.count_hint(), 3);
        assert_eq!(reader.len(), 3);
        let header: BTreeMap<String, String> = reader.header().unwrap();
        assert_eq!(header["kind"], "numbers");
    }

    #[test]
    fn index_points_at_record_starts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 4);

        let reader = ObjectReader::open(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        for (i, &offset) in reader.offsets().iter().enumerate() {
            let start = offset as usize;
            let len = u32::from_le_bytes(bytes[start..start + 4].try_into().unwrap()) as usize;
            let body = start + RECORD_HEADER_SIZE as usize;
            let value: String = bincode::deserialize(&bytes[body..body + len]).unwrap();
            assert_eq!(value, format!("object-{i}"));
        }
    }

    #[test]
    fn out_of_range_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 2);

        let mut reader = ObjectReader::open(&path).unwrap();
        let err = reader.read::<String>(2).unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfRange { index: 2, len: 2 }));
    }

    #[test]
    fn read_after_close_is_not_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 1);

        let mut reader = ObjectReader::open(&path).unwrap();
        reader.close();
        reader.close();
        assert!(!reader.is_open());
        assert!(matches!(reader.read::<String>(0), Err(StoreError::NotOpen)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ObjectReader::open(&dir.path().join("absent.dat")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn unclosed_store_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("open.dat");
        {
            let mut writer = ObjectWriter::create(&path, 1, &()).unwrap();
            writer.append(&1u8).unwrap();
        }
        let err = ObjectReader::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Format { offset: 0, .. }));
    }

    #[test]
    fn pointer_beyond_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 2);

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all(&u64::MAX.to_le_bytes()).unwrap();
        drop(file);

        let err = ObjectReader::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Format { .. }));
    }

    #[test]
    fn truncated_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 2);

        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

        let err = ObjectReader::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Format { .. }));
    }

    #[test]
    fn corrupt_object_fails_only_its_own_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 3);

        let offset = ObjectReader::open(&path).unwrap().offsets()[1];
        let mut bytes = std::fs::read(&path).unwrap();
        let target = (offset + RECORD_HEADER_SIZE) as usize + 2;
        bytes[target] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = ObjectReader::open(&path).unwrap();
        assert!(matches!(reader.read::<String>(1), Err(StoreError::Format { .. })));
        assert_eq!(reader.read::<String>(0).unwrap(), "object-0");
        assert_eq!(reader.read::<String>(2).unwrap(), "object-2");
    }

    #[test]
    fn reader_blocked_while_writer_holds_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 1);

        let writer = ObjectWriter::create(&path, 0, &()).unwrap();
        let err = ObjectReader::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Locked(_)));
        writer.finish().unwrap();

        assert!(ObjectReader::open(&path).is_ok());
    }

    #[test]
    fn writer_blocked_while_reader_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 2);

        let mut reader = ObjectReader::open(&path).unwrap();
        let err = ObjectWriter::create(&path, 0, &()).err().unwrap();
        assert!(matches!(err, StoreError::Locked(_)));

        // The reader's data survived the refused writer.
        assert_eq!(reader.read::<String>(1).unwrap(), "object-1");
        reader.close();
        assert!(ObjectWriter::create(&path, 0, &()).is_ok());
    }

    #[test]
    fn concurrent_readers_share_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        write_numbers(&path, 2);

        let mut a = ObjectReader::open(&path).unwrap();
        let mut b = ObjectReader::open(&path).unwrap();
        assert_eq!(a.read::<String>(0).unwrap(), b.read::<String>(0).unwrap());
    }
}
