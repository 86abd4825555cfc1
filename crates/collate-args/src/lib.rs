//! Argument files for collate tasks.
//!
//! An [`ArgFile`] holds one [`ArgSet`] per task in the indexed object
//! store, so a task can read its own arguments with [`ArgFile::get`]
//! without loading the rest. Large sweeps can be cut into balanced pieces
//! with [`ArgFile::split`].

pub mod error;
pub mod file;
pub mod value;

pub use error::{ArgError, ArgResult};
pub use file::ArgFile;
pub use value::{ArgSet, ArgValue};
