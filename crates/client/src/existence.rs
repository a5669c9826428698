//! Batched existence checks.

use crate::client::IsolateClient;
use crate::error::{ClientError, ClientResult};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use isolate_core::{Batch, ContentId, ItemSet, ItemSize, partition};
use std::collections::BTreeSet;

/// Query one batch and return the identifiers the server already holds.
pub async fn check_presence(
    client: &IsolateClient,
    batch: &Batch,
) -> ClientResult<BTreeSet<ContentId>> {
    let ids: Vec<ContentId> = batch.ids().copied().collect();
    let flags = client.contains(&ids).await?;
    let present: BTreeSet<ContentId> = ids
        .into_iter()
        .zip(flags)
        .filter_map(|(id, present)| present.then_some(id))
        .collect();

    tracing::debug!(
        items = batch.len(),
        bytes = batch.total_bytes(),
        present = present.len(),
        "Checked batch"
    );
    Ok(present)
}

/// Items found absent, plus the first batch failure if any batch could not
/// be checked.
#[derive(Debug, Default)]
pub struct MissingItems {
    /// Items whose batch answered and flagged them absent.
    pub items: ItemSet,
    /// Items of a failed batch appear in neither set.
    pub failure: Option<ClientError>,
}

impl MissingItems {
    /// The missing items, or the first batch failure.
    pub fn into_result(self) -> ClientResult<ItemSet> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self.items),
        }
    }
}

/// Check every batch of `items` and collect those the server lacks.
///
/// Only items that were queried and flagged absent are returned: empty items
/// are dropped before partitioning and items of unknown size cannot be
/// batched. Batches are checked concurrently, bounded by
/// `contains_concurrency`. A failed batch does not affect the others.
pub async fn find_missing(client: &IsolateClient, items: &ItemSet) -> MissingItems {
    let candidates = items
        .iter()
        .filter(|(_, item)| !item.size.is_empty())
        .map(|(id, item)| (id, item.size));
    let batches = partition(candidates, &client.config().batch);

    let parallel = client.config().contains_concurrency.max(1);
    let mut missing = ItemSet::new();
    let mut present = 0usize;
    let mut failure = None;
    let mut in_flight = FuturesUnordered::new();

    let mut record = |batch: &Batch, result: ClientResult<BTreeSet<ContentId>>| match result {
        Ok(found) => {
            present += found.len();
            for id in batch.ids().filter(|id| !found.contains(*id)) {
                if let Some(item) = items.get(id) {
                    missing.insert(*id, item.clone());
                }
            }
        }
        Err(error) => {
            tracing::warn!(items = batch.len(), error = %error, "Existence check failed");
            failure.get_or_insert(error);
        }
    };

    for batch in &batches {
        in_flight.push(async move { (batch, check_presence(client, batch).await) });
        if in_flight.len() >= parallel
            && let Some((batch, result)) = in_flight.next().await
        {
            record(batch, result);
        }
    }
    while let Some((batch, result)) = in_flight.next().await {
        record(batch, result);
    }

    tracing::info!(
        candidates = items.len(),
        batches = batches.len(),
        present,
        missing = missing.len(),
        unknown_size = items
            .values()
            .filter(|item| item.size == ItemSize::Unknown)
            .count(),
        failed = failure.is_some(),
        "Filtered items already in the store"
    );
    MissingItems {
        items: missing,
        failure,
    }
}

/// Return exactly the items of `items` the server flagged absent.
///
/// Fails with the first batch error once every batch has been checked.
pub async fn filter_missing(client: &IsolateClient, items: &ItemSet) -> ClientResult<ItemSet> {
    find_missing(client, items).await.into_result()
}
