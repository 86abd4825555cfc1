use std::io::{Read, Seek, SeekFrom, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

/// Size of the index pointer reserved at the start of every store file.
pub const INDEX_POINTER_SIZE: u64 = 8;

/// Record header: 4 bytes payload length + 4 bytes CRC32.
///
/// On-disk format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode)]
/// ```
pub const RECORD_HEADER_SIZE: u64 = 8;

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(payload: &[u8], offset: u64) -> StoreResult<T> {
    bincode::deserialize(payload).map_err(|e| StoreError::Format {
        offset,
        reason: format!("undecodable record payload: {e}"),
    })
}

/// Serialize `value` and write it as one framed record. Returns the number
/// of bytes written, header included.
pub(crate) fn write_record<W: Write, T: Serialize + ?Sized>(
    writer: &mut W,
    value: &T,
) -> StoreResult<u64> {
    let payload = encode(value)?;
    let length = u32::try_from(payload.len()).map_err(|_| {
        StoreError::Serialization(format!("record of {} bytes exceeds u32 framing", payload.len()))
    })?;
    let crc = crc32fast::hash(&payload);

    writer.write_all(&length.to_le_bytes())?;
    writer.write_all(&crc.to_le_bytes())?;
    writer.write_all(&payload)?;

    Ok(RECORD_HEADER_SIZE + payload.len() as u64)
}

/// Read the framed record starting at `offset`, which must end at or before
/// `limit`. Returns the verified payload and the offset just past the record.
pub(crate) fn read_record<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    limit: u64,
) -> StoreResult<(Vec<u8>, u64)> {
    let body_start = offset
        .checked_add(RECORD_HEADER_SIZE)
        .filter(|&end| end <= limit)
        .ok_or_else(|| StoreError::Format {
            offset,
            reason: format!("record header extends beyond {limit}"),
        })?;

    reader.seek(SeekFrom::Start(offset))?;
    let mut header = [0u8; RECORD_HEADER_SIZE as usize];
    reader.read_exact(&mut header)?;

    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let end = body_start + length as u64;
    if end > limit {
        return Err(StoreError::Format {
            offset,
            reason: format!("record of {length} bytes extends beyond {limit}"),
        });
    }

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;

    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(StoreError::Format {
            offset,
            reason: format!("CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
        });
    }

    Ok((payload, end))
}
