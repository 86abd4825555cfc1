//! Result trees for collate.
//!
//! A [`ResultTree`] is a nested mapping whose leaves are fixed-shape `f64`
//! arrays: one task's results. The [`walker`] turns a template tree into a
//! master dataset with a leading row per task and writes shards into rows.
//! A [`TreeCodec`] persists whole trees; [`BincodeCodec`] is the default.

pub mod codec;
pub mod error;
pub mod tree;
pub mod walker;

pub use codec::{BincodeCodec, TreeCodec};
pub use error::{TreeError, TreeResult};
pub use tree::ResultTree;
pub use walker::{concat_rows, expand, insert, row, rows};
