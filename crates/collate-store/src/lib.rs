//! Indexed object store for collate.
//!
//! A single binary file holding many independently readable serialized
//! objects. Objects are appended sequentially by an [`ObjectWriter`] and read
//! back in any order by an [`ObjectReader`] through a trailing offset index.
//!
//! # File Layout
//!
//! ```text
//! [8 bytes: index pointer, LE u64]
//! [record: object count hint]
//! [record: header]
//! [record: object]*
//! [record: index, Vec<u64> of object offsets]
//! ```
//!
//! Every record is `[u32 length][u32 CRC32][bincode payload]`, so any object
//! can be decoded at its offset without touching its neighbours.
//!
//! # Design Rules
//!
//! 1. A handle is a writer or a reader, never both.
//! 2. Writers lock the file exclusively, readers share it; contention is an
//!    error, not a wait.
//! 3. The file is valid only after [`ObjectWriter::finish`].
//! 4. Corruption surfaces as [`StoreError::Format`] and is never recovered.

pub mod error;
mod lock;
pub mod reader;
pub mod record;
pub mod writer;

pub use error::{StoreError, StoreResult};
pub use reader::ObjectReader;
pub use writer::{ObjectWriter, StoreSummary};
