//! Distributed merge across the members of a [`Collective`].
//!
//! Workers meet twice. First the root scatters contiguous slices of its
//! id-sorted child list, each with the shared template tree. Each worker
//! merges its slice into a sub-dataset with one row per slice position.
//! Then the root gathers every worker's sub-dataset with the ids of the
//! rows it filled, stacks them, and writes each row into the master at its
//! task id.

use collate_collective::{gather_value, scatter_values, Collective, CollectiveError};
use collate_tree::{concat_rows, expand, insert, row, ResultTree};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ResultsResult;
use crate::manager::{first_loadable, merge_rows, row_count, LifecycleState, ResultsManager};
use crate::record::{BadChild, ShardRecord};

/// What the root sends each worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct WorkSlice {
    /// First loadable shard of the whole list; `None` if none loads.
    template: Option<ResultTree>,
    children: Vec<ShardRecord>,
}

/// What one worker sends back to the root.
#[derive(Debug, Serialize, Deserialize)]
struct Contribution {
    rank: usize,
    /// Sub-dataset with one row per slice position; `None` if nothing loaded.
    rows: Option<ResultTree>,
    /// Task id held by each row of `rows`, `None` for rows left empty.
    lookup: Vec<Option<u64>>,
    bad: Vec<BadChild>,
    /// Set when the worker could not process its slice at all.
    error: Option<String>,
}

impl Contribution {
    fn failed(rank: usize, reason: String) -> Self {
        Self {
            rank,
            rows: None,
            lookup: Vec::new(),
            bad: Vec::new(),
            error: Some(reason),
        }
    }
}

/// Split `items` into `parts` contiguous runs. The first `len % parts` runs
/// hold one extra item.
pub fn partition<T: Clone>(items: &[T], parts: usize) -> Vec<Vec<T>> {
    if parts == 0 {
        return Vec::new();
    }
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        out.push(items[start..start + len].to_vec());
        start += len;
    }
    out
}

impl ResultsManager {
    /// Merge across every member of `channel`. Every member must call this
    /// with the same `root`; only the root's child list is used and only the
    /// root writes the dataset. Non-root members return the bad children of
    /// their own slice, the root returns all of them.
    ///
    /// The dataset equals what [`concatenate`](Self::concatenate) writes for
    /// the same child list, whatever the number of workers.
    pub async fn parallel_concatenate(
        &mut self,
        channel: &dyn Collective,
        root: usize,
    ) -> ResultsResult<Vec<BadChild>> {
        self.require(
            "parallel concatenate",
            &[LifecycleState::Collecting, LifecycleState::Merged],
        )?;
        let rank = channel.rank();
        let slices = (rank == root).then(|| {
            let ordered = self.ordered_children();
            let template = first_loadable(self.codec.as_ref(), &ordered);
            partition(&ordered, channel.size())
                .into_iter()
                .map(|children| WorkSlice {
                    template: template.clone(),
                    children,
                })
                .collect::<Vec<_>>()
        });

        let contribution = match scatter_values::<_, WorkSlice>(channel, slices.clone(), root).await {
            Ok(slice) => self.merge_slice(rank, &slice),
            Err(CollectiveError::Serialization(reason)) => {
                warn!(rank, error = %reason, "could not decode work slice");
                Contribution::failed(rank, reason)
            }
            Err(e) => return Err(e.into()),
        };
        let own_bad = contribution.bad.clone();

        let Some(contributions) = gather_value(channel, &contribution, root).await? else {
            return Ok(own_bad);
        };
        let slices = slices.unwrap_or_default();
        self.assemble_contributions(contributions, &slices)
    }

    fn merge_slice(&self, rank: usize, slice: &WorkSlice) -> Contribution {
        let children = &slice.children;
        let merged = merge_rows(
            self.codec.as_ref(),
            children,
            slice.template.as_ref(),
            children.len(),
            |position, _| position,
        );
        let mut lookup = vec![None; children.len()];
        for &(row, id) in &merged.inserted {
            lookup[row] = Some(id);
        }
        debug!(rank, slice = children.len(), inserted = merged.inserted.len(), "slice merged");
        Contribution {
            rank,
            rows: merged.dataset,
            lookup,
            bad: merged.bad,
            error: None,
        }
    }

    fn assemble_contributions(
        &mut self,
        contributions: Vec<Contribution>,
        slices: &[WorkSlice],
    ) -> ResultsResult<Vec<BadChild>> {
        let mut bad = Vec::new();
        let mut parts = Vec::new();
        // Id and record behind each stacked row, `None` for empty rows.
        let mut filled: Vec<Option<(u64, &ShardRecord)>> = Vec::new();
        let mut schema: Option<Vec<(String, Vec<usize>)>> = None;

        for contribution in contributions {
            let slice = slices
                .get(contribution.rank)
                .map(|s| s.children.as_slice())
                .unwrap_or_default();
            if let Some(reason) = contribution.error {
                warn!(rank = contribution.rank, error = %reason, "worker failed, its slice is skipped");
                let reason = format!("worker {} failed: {reason}", contribution.rank);
                bad.extend(slice.iter().map(|record| BadChild::new(record, reason.clone())));
                continue;
            }
            bad.extend(contribution.bad);

            let Some(rows) = contribution.rows else {
                continue;
            };
            let row_schema = row_schema(&rows);
            match &schema {
                Some(expected) if *expected != row_schema => {
                    warn!(rank = contribution.rank, "worker rows differ from the first worker's schema");
                    bad.extend(
                        slice
                            .iter()
                            .zip(&contribution.lookup)
                            .filter(|(_, id)| id.is_some())
                            .map(|(record, _)| BadChild::new(record, "schema differs from other workers")),
                    );
                    continue;
                }
                Some(_) => {}
                None => schema = Some(row_schema),
            }
            parts.push(rows);
            filled.extend(
                contribution
                    .lookup
                    .iter()
                    .zip(slice)
                    .map(|(id, record)| id.map(|id| (id, record))),
            );
        }

        let mut inserted = 0;
        let master = if parts.is_empty() {
            ResultTree::empty()
        } else {
            let stacked = concat_rows(&parts)?;
            let mut master = expand(&row(&stacked, 0)?, row_count(self.total_tasks)?);

            // Slices are contiguous runs of the id-sorted list, so stacked
            // rows are already in id order and a later duplicate wins.
            for (offset, entry) in filled.iter().enumerate() {
                let Some((id, record)) = entry else {
                    continue;
                };
                match insert(&mut master, &row(&stacked, offset)?, *id as usize) {
                    Ok(()) => inserted += 1,
                    Err(e) => {
                        warn!(id, path = %record.path.display(), error = %e, "skipping bad child");
                        bad.push(BadChild::new(record, e.to_string()));
                    }
                }
            }
            master
        };
        bad.sort_by_key(|b| b.id);

        self.finish_merge(&master, inserted, &bad)?;
        info!(workers = slices.len(), "distributed merge assembled");
        Ok(bad)
    }
}

/// Leaf shapes with the row axis dropped.
fn row_schema(tree: &ResultTree) -> Vec<(String, Vec<usize>)> {
    tree.leaf_shapes()
        .into_iter()
        .map(|(path, shape)| (path, shape.into_iter().skip(1).collect()))
        .collect()
}
