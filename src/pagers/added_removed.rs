//! Added/Removed orchestration
//!
//! Runs a delta enumeration when allowed, falls back to a full listing when
//! the endpoint cannot answer incrementally, and classifies every page into
//! the Added/Removed sets a backup applies to its container index.

use super::classify::{ChangeSet, ClassifyFn, ItemFilter};
use super::enumerate::{spawn_delta_enumerate_items, spawn_enumerate_items};
use super::page::{DeltaHandler, NonDeltaHandler};
use super::results::{DeltaUpdate, NextPageResults};
use crate::error::{is_err_delta_not_supported, PagerError, Result, ResultExt};
use crate::limiter::RequestLimiter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The diff of a container since the previous delta token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddedAndRemoved {
    /// Added or changed item IDs with their modification times
    pub added: HashMap<String, DateTime<Utc>>,
    /// Removed item IDs
    pub removed: Vec<String>,
    /// Token to resume from next time
    pub delta_update: DeltaUpdate,
    /// Whether the modification times in `added` can be trusted
    pub valid_mod_times: bool,
}

impl AddedAndRemoved {
    fn new(changes: ChangeSet, delta_update: DeltaUpdate, valid_mod_times: bool) -> Self {
        let (added, removed) = changes.into_parts();
        Self {
            added,
            removed,
            delta_update,
            valid_mod_times,
        }
    }
}

/// Knobs for [`get_added_and_removed_item_ids`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddedAndRemovedOptions {
    /// Delta link from the previous run; empty for a first run
    pub prev_delta_link: String,
    /// Whether the container may be enumerated incrementally
    pub can_make_delta_queries: bool,
    /// Stop after this many added items (0 = unlimited)
    pub item_limit: usize,
}

/// Classify pages from a bridge until it ends or the item budget is met.
///
/// The budget is only checked between pages. A run cut short by the budget
/// hands back an empty delta link since the token would skip the items
/// never read; a run whose last page lands on the budget keeps its link.
async fn get_limited_items<T>(
    ctx: &CancellationToken,
    mut npr: NextPageResults<T>,
    item_limit: usize,
    classify: ClassifyFn<T>,
    filters: &[ItemFilter<T>],
) -> Result<(ChangeSet, DeltaUpdate)> {
    let mut changes = ChangeSet::new();
    let mut over_budget = false;

    loop {
        if item_limit > 0 && changes.added().len() >= item_limit {
            over_budget = true;
            break;
        }

        let (items, reset, done) = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                return Err(PagerError::cancelled("collecting added and removed items"));
            }
            page = npr.next_page() => page,
        };

        if done {
            break;
        }

        if reset {
            changes.clear();
        }

        match classify(&items, filters) {
            Ok(page_changes) => changes.merge(page_changes),
            Err(e) => {
                npr.cancel();
                return Err(e);
            }
        }
    }

    // Don't let the producer fetch pages nobody will read.
    npr.cancel();

    let outcome = npr.outcome().await?;
    let mut du = outcome.delta_update;

    if over_budget && outcome.stopped_early {
        tracing::info!(
            item_limit,
            added = changes.added().len(),
            "item limit reached, dropping delta token"
        );
        du.url.clear();
    }

    Ok((changes, du))
}

/// Enumerate a container and classify its items into Added and Removed.
///
/// With delta queries allowed the delta pager runs from
/// `options.prev_delta_link`; invalid tokens are recovered from inside the
/// enumeration. If the endpoint does not support delta queries, or delta is
/// disallowed, the plain pager lists everything and the result carries a
/// reset with no token.
pub async fn get_added_and_removed_item_ids<T, P, D>(
    ctx: &CancellationToken,
    limiter: Arc<dyn RequestLimiter>,
    pager: P,
    delta_pager: D,
    options: &AddedAndRemovedOptions,
    classify: ClassifyFn<T>,
    filters: &[ItemFilter<T>],
) -> Result<AddedAndRemoved>
where
    T: Send + 'static,
    P: NonDeltaHandler<T> + 'static,
    D: DeltaHandler<T> + 'static,
{
    if options.can_make_delta_queries {
        let valid_mod_times = delta_pager.valid_mod_times();
        let npr = spawn_delta_enumerate_items(
            ctx,
            delta_pager,
            Arc::clone(&limiter),
            &options.prev_delta_link,
        );

        match get_limited_items(ctx, npr, options.item_limit, classify, filters).await {
            Ok((changes, du)) => return Ok(AddedAndRemoved::new(changes, du, valid_mod_times)),
            Err(e) if is_err_delta_not_supported(&e) => {
                tracing::info!("delta not supported, falling back to full enumeration");
            }
            Err(e) => return Err(e.with_context("getting delta added and removed items")),
        }
    }

    let valid_mod_times = pager.valid_mod_times();
    let npr = spawn_enumerate_items(ctx, pager, limiter);

    let (changes, _) = get_limited_items(ctx, npr, options.item_limit, classify, filters)
        .await
        .context("getting added and removed items")?;

    let du = DeltaUpdate {
        url: String::new(),
        reset: true,
    };

    Ok(AddedAndRemoved::new(changes, du, valid_mod_times))
}
