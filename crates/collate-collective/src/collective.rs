use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CollectiveError, CollectiveResult};

/// Group communication across a fixed set of ranked workers.
///
/// Every member must enter the same sequence of collective calls with the
/// same `root`. Payloads are opaque bytes; see [`gather_value`] and
/// [`scatter_values`] for typed wrappers.
#[async_trait]
pub trait Collective: Send + Sync {
    /// This member's rank in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of members, fixed for the life of the group.
    fn size(&self) -> usize;

    /// Contribute `payload`. Root receives every rank's payload in rank
    /// order; other ranks receive `None`.
    async fn gather(&self, payload: Vec<u8>, root: usize) -> CollectiveResult<Option<Vec<Vec<u8>>>>;

    /// Root passes one chunk per rank (`chunks[r]` goes to rank `r`); every
    /// rank, root included, receives its own chunk. Non-root ranks pass `None`.
    async fn scatter(&self, chunks: Option<Vec<Vec<u8>>>, root: usize) -> CollectiveResult<Vec<u8>>;
}

/// Typed [`Collective::gather`]: values travel bincode-encoded.
pub async fn gather_value<C, T>(channel: &C, value: &T, root: usize) -> CollectiveResult<Option<Vec<T>>>
where
    C: Collective + ?Sized,
    T: Serialize + DeserializeOwned,
{
    let payload = bincode::serialize(value).map_err(|e| CollectiveError::Serialization(e.to_string()))?;
    match channel.gather(payload, root).await? {
        Some(payloads) => payloads
            .iter()
            .map(|p| bincode::deserialize(p).map_err(|e| CollectiveError::Serialization(e.to_string())))
            .collect::<CollectiveResult<Vec<T>>>()
            .map(Some),
        None => Ok(None),
    }
}

/// Typed [`Collective::scatter`].
pub async fn scatter_values<C, T>(channel: &C, values: Option<Vec<T>>, root: usize) -> CollectiveResult<T>
where
    C: Collective + ?Sized,
    T: Serialize + DeserializeOwned,
{
    let chunks = values
        .map(|values| {
            values
                .iter()
                .map(|v| bincode::serialize(v).map_err(|e| CollectiveError::Serialization(e.to_string())))
                .collect::<CollectiveResult<Vec<_>>>()
        })
        .transpose()?;
    let payload = channel.scatter(chunks, root).await?;
    bincode::deserialize(&payload).map_err(|e| CollectiveError::Serialization(e.to_string()))
}
