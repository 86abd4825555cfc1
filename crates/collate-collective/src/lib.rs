//! Collective communication for collate workers.
//!
//! A distributed merge synchronizes its workers at exactly two points: the
//! root scatters the work list, then gathers every worker's partial result.
//! [`Collective`] is the transport-agnostic interface for those points.
//! [`LocalCollective`] implements it in-process over tokio channels, with
//! every wait bounded by [`CollectiveConfig::timeout`].

pub mod collective;
pub mod error;
pub mod local;

pub use collective::{gather_value, scatter_values, Collective};
pub use error::{CollectiveError, CollectiveResult};
pub use local::{CollectiveConfig, LocalCollective};
