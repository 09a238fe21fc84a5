//! Searching, counting and sampling, shared by the admin and published views.

use crate::entity::{EntitySamplingPayload, SamplingOptions};
use crate::paging::{connection_from_rows, resolve_paging, Connection, Paging, DEFAULT_PAGE_SIZE};
use crate::query::{EntityQuery, QueryFilter, SearchPlan};
use crate::storage::{order_key, SearchRow, Storage};
use crate::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Fetch one page of entities matching a filter.
pub(crate) async fn search<T>(
    storage: &dyn Storage,
    filter: QueryFilter,
    query: &EntityQuery,
    paging: &Paging,
    decode: impl FnMut(SearchRow) -> Result<T>,
) -> Result<Option<Connection<T>>> {
    let resolved = resolve_paging(paging, query.order.cursor_kind())?;
    let plan = SearchPlan::new(filter, query, &resolved);
    if resolved.count == 0 {
        return Ok(None);
    }

    let mut tx = storage.begin_read().await?;
    let rows = tx.search(&plan).await?;
    tracing::debug!(rows = rows.len(), forwards = resolved.is_forwards, "search");

    let order = query.order;
    Ok(connection_from_rows(
        &resolved,
        rows,
        |row| order_key(order, &row.entity),
        decode,
    ))
}

pub(crate) async fn count(storage: &dyn Storage, filter: &QueryFilter) -> Result<u64> {
    let mut tx = storage.begin_read().await?;
    tx.count(filter).await
}

/// Pick distinct random entities matching a filter.
///
/// The same seed over the same data picks the same entities.
pub(crate) async fn sample<T>(
    storage: &dyn Storage,
    filter: &QueryFilter,
    options: &SamplingOptions,
    mut decode: impl FnMut(SearchRow) -> Result<T>,
) -> Result<EntitySamplingPayload<T>> {
    let seed = options.seed.unwrap_or_else(rand::random);
    let mut tx = storage.begin_read().await?;
    let total_count = tx.count(filter).await?;

    let length = usize::try_from(total_count).unwrap_or(usize::MAX);
    let amount = options.count.unwrap_or(DEFAULT_PAGE_SIZE).min(length);
    let mut rng = StdRng::seed_from_u64(seed);
    let offsets = rand::seq::index::sample(&mut rng, length, amount).into_vec();

    let mut items = Vec::with_capacity(offsets.len());
    for offset in offsets {
        if let Some(row) = tx.search_at_offset(filter, offset as u64).await? {
            items.push(decode(row)?);
        }
    }

    Ok(EntitySamplingPayload {
        seed,
        total_count,
        items,
    })
}
