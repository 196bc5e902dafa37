//! Page source capabilities
//!
//! The traits a remote endpoint implements so the enumerators can walk it,
//! plus small helpers for reading pagination cursors.

use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A page that can point at the page after it
pub trait NextLinker {
    /// Cursor for the following page, if any
    fn next_link(&self) -> Option<&str>;
}

/// A page that, once the listing is exhausted, hands out a delta cursor
pub trait DeltaLinker: NextLinker {
    /// Resumable token for a later incremental query, if any
    fn delta_link(&self) -> Option<&str>;
}

/// A page of items
pub trait Valuer<T> {
    /// Take the items out of the page
    fn into_values(self) -> Vec<T>;
}

/// Page of a non-incremental listing
pub trait NextLinkValuer<T>: NextLinker + Valuer<T> {}

impl<T, P: NextLinker + Valuer<T>> NextLinkValuer<T> for P {}

/// Page of an incremental listing
pub trait DeltaLinkValuer<T>: DeltaLinker + Valuer<T> {}

impl<T, P: DeltaLinker + Valuer<T>> DeltaLinkValuer<T> for P {}

/// Remote source walked with plain next-links
#[async_trait]
pub trait NonDeltaHandler<T>: Send {
    /// Page type returned by the endpoint
    type Page: NextLinkValuer<T> + Send;

    /// Fetch the page the pager currently points at
    async fn get_page(&mut self, ctx: &CancellationToken) -> Result<Self::Page>;

    /// Point the pager at the next page
    fn set_next_link(&mut self, next_link: &str);

    /// Whether items from this source carry trustworthy modification times
    fn valid_mod_times(&self) -> bool;
}

/// Remote source walked incrementally from a delta token
#[async_trait]
pub trait DeltaHandler<T>: Send {
    /// Page type returned by the endpoint
    type Page: DeltaLinkValuer<T> + Send;

    /// Fetch the page the pager currently points at
    async fn get_page(&mut self, ctx: &CancellationToken) -> Result<Self::Page>;

    /// Point the pager at the next page
    fn set_next_link(&mut self, next_link: &str);

    /// Drop any delta history so the next fetch starts a full listing
    async fn reset(&mut self, ctx: &CancellationToken);

    /// Whether items from this source carry trustworthy modification times
    fn valid_mod_times(&self) -> bool;
}

/// Next-link of a page, empty if the page has none
pub fn next_link<P: NextLinker + ?Sized>(page: &P) -> String {
    page.next_link().unwrap_or_default().to_string()
}

/// Next-link and delta-link of a page, each empty if absent
pub fn next_and_delta_link<P: DeltaLinker + ?Sized>(page: &P) -> (String, String) {
    (
        next_link(page),
        page.delta_link().unwrap_or_default().to_string(),
    )
}

/// Check a next-link for an empty user segment.
///
/// Links built for a missing user or container come back as `users//...`;
/// they are still followed but worth flagging in the logs.
pub fn is_next_link_valid(next: &str) -> bool {
    !next.contains("users//")
}
