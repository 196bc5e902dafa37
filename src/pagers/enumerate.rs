//! Pagination loops and batch collectors
//!
//! The enumerators walk every page of a remote listing and stream each page
//! through a [`PageWriter`]. They are meant to run as the producer task of a
//! [`NextPageResults`]; the `spawn_*` helpers wire that up and the `batch_*`
//! helpers drain it into memory.

use super::page::{is_next_link_valid, next_and_delta_link, next_link, DeltaHandler, NonDeltaHandler, Valuer};
use super::results::{DeltaUpdate, NextPageResults, PageWriter};
use crate::error::{is_err_delta_not_supported, is_err_invalid_delta, PagerError, Result, ResultExt};
use crate::limiter::{CostClass, RequestLimiter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Non-empty seed cursor so the first fetch always happens
const DO_WHILE: &str = "do-while";

/// Accumulates pages from a bridge, honouring reset notifications.
///
/// A page marked `reset` discards everything pushed before it, so whatever
/// is left at the end reflects only the last uninterrupted pass.
#[derive(Debug)]
pub struct PageAccumulator<T> {
    items: Vec<T>,
    resets: usize,
}

impl<T> PageAccumulator<T> {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            resets: 0,
        }
    }

    /// Add a page; clears prior items first when `reset` is set
    pub fn push_page(&mut self, items: Vec<T>, reset: bool) {
        if reset {
            self.items.clear();
            self.resets += 1;
        }
        self.items.extend(items);
    }

    /// Number of items currently held
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if no items are held
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of resets seen so far
    pub fn resets(&self) -> usize {
        self.resets
    }

    /// Take the accumulated items
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> Default for PageAccumulator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run state of a delta enumeration
#[derive(Debug)]
struct DeltaRunState {
    page_count: usize,
    item_count: usize,
    new_delta_link: String,
    invalid_prev_delta: bool,
    consume: CostClass,
}

impl DeltaRunState {
    fn new(prev_delta_link: &str) -> Self {
        let invalid_prev_delta = prev_delta_link.is_empty();

        Self {
            page_count: 0,
            item_count: 0,
            new_delta_link: String::new(),
            invalid_prev_delta,
            // Delta queries with no previous token cost more.
            consume: if invalid_prev_delta {
                CostClass::DeltaNoToken
            } else {
                CostClass::SingleGetOrDelta
            },
        }
    }

    /// Forget the previous token and start counting from scratch
    fn reset(&mut self) {
        self.invalid_prev_delta = true;
        self.consume = CostClass::DeltaNoToken;
        self.page_count = 0;
        self.item_count = 0;
        self.new_delta_link.clear();
    }

    fn delta_update(&self) -> DeltaUpdate {
        DeltaUpdate {
            url: self.new_delta_link.clone(),
            reset: self.invalid_prev_delta,
        }
    }
}

/// Walk a non-delta listing page by page.
///
/// Any fetch error ends the walk; the page that failed is never forwarded.
/// The returned [`DeltaUpdate`] is always empty since plain listings cannot
/// be resumed.
pub async fn enumerate_items<T, P>(
    mut pager: P,
    limiter: Arc<dyn RequestLimiter>,
    writer: PageWriter<T>,
) -> Result<DeltaUpdate>
where
    T: Send,
    P: NonDeltaHandler<T>,
{
    let ctx = writer.fetch_ctx().clone();
    let mut page_count = 0usize;
    let mut item_count = 0usize;
    let mut next = DO_WHILE.to_string();

    while !next.is_empty() {
        let fetched = match limiter.consume(&ctx, CostClass::Default).await {
            Ok(()) => pager.get_page(&ctx).await,
            Err(e) => Err(e),
        };

        let page = match fetched {
            Ok(page) => page,
            Err(_) if writer.stopped_by_consumer() => return Ok(DeltaUpdate::default()),
            Err(e) => {
                return Err(e.with_context(format!(
                    "getting page {} after {} items",
                    page_count + 1,
                    item_count
                )))
            }
        };

        next = next_link(&page);
        let items = page.into_values();

        item_count += items.len();
        page_count += 1;

        if writer.write_next_page(items, false).await?.is_stopped() {
            return Ok(DeltaUpdate::default());
        }

        if !is_next_link_valid(&next) {
            tracing::warn!(next_link = %next, "next link has an empty path segment");
        }

        pager.set_next_link(&next);
    }

    tracing::info!(item_count, page_count, "completed item enumeration");

    Ok(DeltaUpdate::default())
}

/// Walk a delta listing page by page, starting from `prev_delta_link`.
///
/// An invalid previous token resets the pager and restarts the walk in
/// place; a reset-marked empty page tells the consumer to drop what it has.
/// A delta-not-supported answer also resets and emits that page, then ends
/// the walk with the error so the caller can fall back to a full listing.
pub async fn delta_enumerate_items<T, P>(
    mut pager: P,
    limiter: Arc<dyn RequestLimiter>,
    writer: PageWriter<T>,
    prev_delta_link: String,
) -> Result<DeltaUpdate>
where
    T: Send,
    P: DeltaHandler<T>,
{
    let ctx = writer.fetch_ctx().clone();
    let mut state = DeltaRunState::new(&prev_delta_link);
    let mut next = DO_WHILE.to_string();

    while !next.is_empty() {
        let fetched = match limiter.consume(&ctx, state.consume).await {
            Ok(()) => pager.get_page(&ctx).await,
            Err(e) => Err(e),
        };

        let page = match fetched {
            Ok(page) => page,
            Err(_) if writer.stopped_by_consumer() => return Ok(state.delta_update()),
            Err(e) if is_err_delta_not_supported(&e) => {
                tracing::info!("delta queries not supported");

                pager.reset(&ctx).await;

                if writer.write_next_page(Vec::new(), true).await?.is_stopped() {
                    return Ok(state.delta_update());
                }

                return Err(e);
            }
            Err(e) if is_err_invalid_delta(&e) => {
                tracing::info!(delta_link = %prev_delta_link, "invalid previous delta");

                state.reset();

                // Ditch the delta history and start again from a full listing.
                pager.reset(&ctx).await;

                if writer.write_next_page(Vec::new(), true).await?.is_stopped() {
                    return Ok(state.delta_update());
                }

                continue;
            }
            Err(e) => {
                return Err(e.with_context(format!(
                    "getting delta page {} after {} items",
                    state.page_count + 1,
                    state.item_count
                )))
            }
        };

        let (next_page_link, delta_link) = next_and_delta_link(&page);
        let items = page.into_values();

        state.item_count += items.len();
        state.page_count += 1;

        if writer.write_next_page(items, false).await?.is_stopped() {
            return Ok(state.delta_update());
        }

        if !delta_link.is_empty() {
            state.new_delta_link = delta_link;
        }

        if !is_next_link_valid(&next_page_link) {
            tracing::warn!(next_link = %next_page_link, "next link has an empty path segment");
        }

        next = next_page_link;
        pager.set_next_link(&next);
    }

    tracing::info!(
        item_count = state.item_count,
        page_count = state.page_count,
        reset = state.invalid_prev_delta,
        "completed delta item enumeration"
    );

    Ok(state.delta_update())
}

/// Start a non-delta enumeration in the background
pub fn spawn_enumerate_items<T, P>(
    ctx: &CancellationToken,
    pager: P,
    limiter: Arc<dyn RequestLimiter>,
) -> NextPageResults<T>
where
    T: Send + 'static,
    P: NonDeltaHandler<T> + 'static,
{
    NextPageResults::spawn(ctx, move |writer| enumerate_items(pager, limiter, writer))
}

/// Start a delta enumeration in the background
pub fn spawn_delta_enumerate_items<T, P>(
    ctx: &CancellationToken,
    pager: P,
    limiter: Arc<dyn RequestLimiter>,
    prev_delta_link: &str,
) -> NextPageResults<T>
where
    T: Send + 'static,
    P: DeltaHandler<T> + 'static,
{
    let prev_delta_link = prev_delta_link.to_string();
    NextPageResults::spawn(ctx, move |writer| {
        delta_enumerate_items(pager, limiter, writer, prev_delta_link)
    })
}

/// Drain a bridge into memory, clearing on every reset
async fn collect_pages<T>(
    ctx: &CancellationToken,
    mut npr: NextPageResults<T>,
) -> Result<(Vec<T>, DeltaUpdate)> {
    let mut acc = PageAccumulator::new();

    loop {
        let (items, reset, done) = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(PagerError::cancelled("collecting pages")),
            page = npr.next_page() => page,
        };

        if done {
            break;
        }

        acc.push_page(items, reset);
    }

    let du = npr.results().await?;

    Ok((acc.into_items(), du))
}

/// Enumerate every item of a non-delta listing into a `Vec`, in fetch order
pub async fn batch_enumerate_items<T, P>(
    ctx: &CancellationToken,
    pager: P,
    limiter: Arc<dyn RequestLimiter>,
) -> Result<Vec<T>>
where
    T: Send + 'static,
    P: NonDeltaHandler<T> + 'static,
{
    let npr = spawn_enumerate_items(ctx, pager, limiter);
    let (items, _) = collect_pages(ctx, npr)
        .await
        .context("enumerating items")?;

    Ok(items)
}

/// Enumerate a delta listing into a `Vec`.
///
/// Items fetched before a reset are discarded, so the result reflects only
/// the last full pass.
pub async fn batch_delta_enumerate_items<T, P>(
    ctx: &CancellationToken,
    pager: P,
    limiter: Arc<dyn RequestLimiter>,
    prev_delta_link: &str,
) -> Result<(Vec<T>, DeltaUpdate)>
where
    T: Send + 'static,
    P: DeltaHandler<T> + 'static,
{
    let npr = spawn_delta_enumerate_items(ctx, pager, limiter, prev_delta_link);
    collect_pages(ctx, npr)
        .await
        .context("enumerating delta items")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DELTA_TOKEN_NOT_SUPPORTED;
    use crate::limiter::Unlimited;
    use crate::replay::{Fixture, FixturePage, ReplayItem, ReplayPager};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLimiter {
        costs: Mutex<Vec<CostClass>>,
    }

    #[async_trait]
    impl RequestLimiter for RecordingLimiter {
        async fn consume(&self, _ctx: &CancellationToken, cost: CostClass) -> Result<()> {
            self.costs.lock().unwrap().push(cost);
            Ok(())
        }
    }

    fn page(ids: &[&str]) -> FixturePage {
        FixturePage::items(ids.iter().map(|id| ReplayItem::new(*id)).collect())
    }

    fn ids_of(items: &[ReplayItem]) -> Vec<&str> {
        items.iter().filter_map(|item| item.id.as_deref()).collect()
    }

    #[test]
    fn test_accumulator_reset_clears() {
        let mut acc = PageAccumulator::new();
        acc.push_page(vec![1, 2], false);
        acc.push_page(vec![3], false);
        acc.push_page(vec![4], true);
        acc.push_page(vec![5], false);

        assert_eq!(acc.len(), 2);
        assert_eq!(acc.resets(), 1);
        assert_eq!(acc.into_items(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_batch_enumerate_concatenates_pages() {
        let fixture = Fixture {
            pages: vec![page(&["a", "b"]), page(&[]), page(&["c"])],
            ..Default::default()
        };
        let ctx = CancellationToken::new();

        let items = batch_enumerate_items(&ctx, fixture.pager(), Arc::new(Unlimited))
            .await
            .unwrap();

        assert_eq!(ids_of(&items), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_batch_enumerate_error_after_first_page() {
        let fixture = Fixture {
            pages: vec![
                page(&["a", "b", "c"]),
                FixturePage::error(503, "ServiceUnavailable", "try later"),
                page(&["d"]),
            ],
            ..Default::default()
        };
        let ctx = CancellationToken::new();

        let err = batch_enumerate_items(&ctx, fixture.pager(), Arc::new(Unlimited))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("getting page 2 after 3 items"), "{err}");
        assert!(matches!(err.root(), PagerError::Service { status: Some(503), .. }));
    }

    #[tokio::test]
    async fn test_batch_delta_keeps_delta_link() {
        let fixture = Fixture {
            delta_link: "delta-2".into(),
            delta_pages: vec![page(&["a"]), page(&["b"])],
            ..Default::default()
        };
        let ctx = CancellationToken::new();

        let (items, du) = batch_delta_enumerate_items(&ctx, fixture.delta_pager(), Arc::new(Unlimited), "delta-1")
            .await
            .unwrap();

        assert_eq!(ids_of(&items), vec!["a", "b"]);
        assert_eq!(
            du,
            DeltaUpdate {
                url: "delta-2".into(),
                reset: false
            }
        );
    }

    #[tokio::test]
    async fn test_batch_delta_invalid_token_resets_once() {
        let fixture = Fixture {
            delta_link: "delta-2".into(),
            delta_pages: vec![
                page(&["stale"]),
                FixturePage::error(410, "SyncStateInvalid", "token expired"),
            ],
            reset_pages: vec![page(&["a"]), page(&["b"])],
            ..Default::default()
        };
        let pager = fixture.delta_pager();
        let stats = pager.stats();
        let limiter = Arc::new(RecordingLimiter::default());
        let ctx = CancellationToken::new();

        let (items, du) = batch_delta_enumerate_items(&ctx, pager, limiter.clone(), "delta-1")
            .await
            .unwrap();

        assert_eq!(ids_of(&items), vec!["a", "b"]);
        assert!(du.reset);
        assert_eq!(du.url, "delta-2");
        assert_eq!(stats.resets(), 1);
        assert_eq!(
            *limiter.costs.lock().unwrap(),
            vec![
                CostClass::SingleGetOrDelta,
                CostClass::SingleGetOrDelta,
                CostClass::DeltaNoToken,
                CostClass::DeltaNoToken,
            ]
        );
    }

    #[tokio::test]
    async fn test_delta_not_supported_resets_then_fails() {
        let fixture = Fixture {
            delta_pages: vec![
                page(&["a"]),
                FixturePage::error(400, "BadRequest", DELTA_TOKEN_NOT_SUPPORTED),
            ],
            ..Default::default()
        };
        let pager = fixture.delta_pager();
        let stats = pager.stats();
        let ctx = CancellationToken::new();

        let mut npr = spawn_delta_enumerate_items(&ctx, pager, Arc::new(Unlimited), "delta-1");

        assert_eq!(npr.next_page().await.1, false);
        let (items, reset, done) = npr.next_page().await;
        assert!(items.is_empty());
        assert!(reset);
        assert!(!done);
        assert!(npr.next_page().await.2);

        let err = npr.results().await.unwrap_err();
        assert!(is_err_delta_not_supported(&err));
        assert_eq!(stats.resets(), 1);
    }

    #[tokio::test]
    async fn test_non_delta_costs_default() {
        let fixture = Fixture {
            pages: vec![page(&["a"]), page(&["b"])],
            ..Default::default()
        };
        let limiter = Arc::new(RecordingLimiter::default());
        let ctx = CancellationToken::new();

        batch_enumerate_items(&ctx, fixture.pager(), limiter.clone())
            .await
            .unwrap();

        assert_eq!(*limiter.costs.lock().unwrap(), vec![CostClass::Default; 2]);
    }

    #[tokio::test]
    async fn test_first_delta_run_is_a_reset() {
        let fixture = Fixture {
            delta_link: "delta-1".into(),
            delta_pages: vec![page(&["a"])],
            ..Default::default()
        };
        let limiter = Arc::new(RecordingLimiter::default());
        let ctx = CancellationToken::new();

        let (_, du) = batch_delta_enumerate_items(&ctx, fixture.delta_pager(), limiter.clone(), "")
            .await
            .unwrap();

        assert!(du.reset);
        assert_eq!(*limiter.costs.lock().unwrap(), vec![CostClass::DeltaNoToken]);
    }

    #[tokio::test]
    async fn test_consumer_cancel_ends_quietly() {
        let pages = (0..100)
            .map(|i| FixturePage::items(vec![ReplayItem::new(i.to_string())]))
            .collect();
        let pager = ReplayPager::new(pages, Vec::new(), String::new(), true);
        let stats = pager.stats();
        let ctx = CancellationToken::new();

        let mut npr = spawn_enumerate_items(&ctx, pager, Arc::new(Unlimited));
        assert_eq!(ids_of(&npr.next_page().await.0), vec!["0"]);
        npr.cancel();

        assert_eq!(npr.results().await.unwrap(), DeltaUpdate::default());
        assert!(stats.fetches() < 100);
    }

    #[tokio::test]
    async fn test_caller_cancel_fails_batch() {
        let slow = FixturePage {
            delay_ms: 60_000,
            ..Default::default()
        };
        let pager = ReplayPager::new(vec![slow], Vec::new(), String::new(), true);
        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = batch_enumerate_items(&ctx, pager, Arc::new(Unlimited))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    proptest! {
        #[test]
        fn prop_batch_enumerate_is_concatenation(sizes in proptest::collection::vec(0usize..8, 0..6)) {
            let pages: Vec<FixturePage> = sizes
                .iter()
                .enumerate()
                .map(|(p, n)| FixturePage::items((0..*n).map(|i| ReplayItem::new(format!("{p}-{i}"))).collect()))
                .collect();
            let expected: Vec<ReplayItem> = pages.iter().flat_map(|p| p.items.clone()).collect();
            let pager = ReplayPager::new(pages, Vec::new(), String::new(), true);

            let items = tokio_test::block_on(async {
                let ctx = CancellationToken::new();
                batch_enumerate_items(&ctx, pager, Arc::new(Unlimited)).await
            })
            .unwrap();

            prop_assert_eq!(items, expected);
        }

        #[test]
        fn prop_invalid_delta_at_k_keeps_only_retry_pass(
            before in proptest::collection::vec(0usize..6, 0..5),
            retry in proptest::collection::vec(0usize..6, 0..5),
        ) {
            let build = |prefix: &str, sizes: &[usize]| -> Vec<FixturePage> {
                sizes
                    .iter()
                    .enumerate()
                    .map(|(p, n)| FixturePage::items((0..*n).map(|i| ReplayItem::new(format!("{prefix}{p}-{i}"))).collect()))
                    .collect()
            };

            // The failure sits at page k = before.len() of the first pass.
            let mut delta_pages = build("stale", before.as_slice());
            delta_pages.push(FixturePage::error(410, "SyncStateNotFound", "sync state gone"));
            let reset_pages = build("retry", retry.as_slice());
            let expected: Vec<ReplayItem> = reset_pages.iter().flat_map(|p| p.items.clone()).collect();

            let pager = ReplayPager::new(delta_pages, reset_pages, "delta-2".to_string(), true);
            let stats = pager.stats();

            let (items, du) = tokio_test::block_on(async {
                let ctx = CancellationToken::new();
                batch_delta_enumerate_items(&ctx, pager, Arc::new(Unlimited), "delta-1").await
            })
            .unwrap();

            prop_assert_eq!(items, expected);
            prop_assert_eq!(stats.resets(), 1);
            prop_assert_eq!(du, DeltaUpdate { url: "delta-2".into(), reset: true });
        }
    }
}
