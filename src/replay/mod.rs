//! Recorded page source
//!
//! Serves pages captured in a JSON fixture through both handler traits, so
//! the enumeration engine can be driven end to end without a live service.
//!
//! A fixture looks like:
//!
//! ```json
//! {
//!   "delta_link": "delta-2",
//!   "delta_pages": [
//!     { "items": [{ "id": "a", "last_modified": "2024-01-01T00:00:00Z" }] },
//!     { "error": { "status": 410, "code": "SyncStateNotFound" } }
//!   ],
//!   "reset_pages": [{ "items": [{ "id": "b" }] }],
//!   "pages": [{ "items": [{ "id": "a" }, { "id": "b" }] }]
//! }
//! ```
//!
//! `delta_pages` are served from the previous token, `reset_pages` after the
//! delta pager is reset, and `pages` by the plain pager.

use crate::error::{PagerError, Result};
use crate::pagers::{
    AdditionalData, DeltaHandler, DeltaLinker, NextLinker, NonDeltaHandler, PagedItem, Valuer,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Next-link handed out while a listing has more pages
const REPLAY_NEXT_LINK: &str = "replay://next";

/// A recorded item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayItem {
    /// Item ID
    pub id: Option<String>,
    /// Last modification time
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    /// Provider property bag, e.g. carrying `@removed`
    #[serde(default)]
    pub additional_data: AdditionalData,
    /// Deletion time
    #[serde(default)]
    pub deleted_date_time: Option<DateTime<Utc>>,
}

impl ReplayItem {
    /// Item with just an ID
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }
}

impl PagedItem for ReplayItem {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    fn additional_data(&self) -> Option<&AdditionalData> {
        Some(&self.additional_data)
    }

    fn has_deleted_date_time(&self) -> bool {
        true
    }

    fn deleted_date_time(&self) -> Option<DateTime<Utc>> {
        self.deleted_date_time
    }
}

/// Service error a fixture page answers with instead of items
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureError {
    /// HTTP status
    #[serde(default)]
    pub status: Option<u16>,
    /// OData error code
    #[serde(default)]
    pub code: String,
    /// Error message
    #[serde(default)]
    pub message: String,
}

impl From<&FixtureError> for PagerError {
    fn from(err: &FixtureError) -> Self {
        PagerError::service(err.status, err.code.clone(), err.message.clone())
    }
}

/// One recorded response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixturePage {
    /// Items on the page
    #[serde(default)]
    pub items: Vec<ReplayItem>,
    /// Error returned instead of the page
    #[serde(default)]
    pub error: Option<FixtureError>,
    /// Simulated latency before the response
    #[serde(default)]
    pub delay_ms: u64,
}

impl FixturePage {
    /// Page holding `items`
    pub fn items(items: Vec<ReplayItem>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    /// Page answering with a service error
    pub fn error(status: u16, code: &str, message: &str) -> Self {
        Self {
            error: Some(FixtureError {
                status: Some(status),
                code: code.to_string(),
                message: message.to_string(),
            }),
            ..Default::default()
        }
    }
}

fn default_valid_mod_times() -> bool {
    true
}

/// A recorded container: its delta and plain listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    /// Whether items carry trustworthy modification times
    #[serde(default = "default_valid_mod_times")]
    pub valid_mod_times: bool,
    /// Delta link handed out on the last delta page
    #[serde(default)]
    pub delta_link: String,
    /// Delta listing served from the previous token
    #[serde(default)]
    pub delta_pages: Vec<FixturePage>,
    /// Delta listing served after a reset
    #[serde(default)]
    pub reset_pages: Vec<FixturePage>,
    /// Plain listing
    #[serde(default)]
    pub pages: Vec<FixturePage>,
}

impl Fixture {
    /// Load a fixture from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| PagerError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&content)
    }

    /// Parse a fixture from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Pager replaying the plain listing
    pub fn pager(&self) -> ReplayPager {
        ReplayPager::new(self.pages.clone(), Vec::new(), String::new(), self.valid_mod_times)
    }

    /// Pager replaying the delta listing
    pub fn delta_pager(&self) -> ReplayPager {
        ReplayPager::new(
            self.delta_pages.clone(),
            self.reset_pages.clone(),
            self.delta_link.clone(),
            self.valid_mod_times,
        )
    }
}

/// Page handed back by a [`ReplayPager`]
#[derive(Debug, Clone, Default)]
pub struct ReplayPage {
    items: Vec<ReplayItem>,
    next_link: Option<String>,
    delta_link: Option<String>,
}

impl NextLinker for ReplayPage {
    fn next_link(&self) -> Option<&str> {
        self.next_link.as_deref()
    }
}

impl DeltaLinker for ReplayPage {
    fn delta_link(&self) -> Option<&str> {
        self.delta_link.as_deref()
    }
}

impl Valuer<ReplayItem> for ReplayPage {
    fn into_values(self) -> Vec<ReplayItem> {
        self.items
    }
}

/// Counters observable after a pager has been moved into a task
#[derive(Debug, Default)]
pub struct ReplayStats {
    fetches: AtomicUsize,
    resets: AtomicUsize,
}

impl ReplayStats {
    /// Number of `get_page` calls
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of `reset` calls
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
}

/// Pager walking recorded pages in order
#[derive(Debug)]
pub struct ReplayPager {
    pages: Vec<FixturePage>,
    reset_pages: Vec<FixturePage>,
    delta_link: String,
    cursor: usize,
    valid_mod_times: bool,
    stats: Arc<ReplayStats>,
}

impl ReplayPager {
    /// Create a pager serving `pages`, switching to `reset_pages` on reset
    pub fn new(
        pages: Vec<FixturePage>,
        reset_pages: Vec<FixturePage>,
        delta_link: String,
        valid_mod_times: bool,
    ) -> Self {
        Self {
            pages,
            reset_pages,
            delta_link,
            cursor: 0,
            valid_mod_times,
            stats: Arc::new(ReplayStats::default()),
        }
    }

    /// Shared handle on the pager's counters
    pub fn stats(&self) -> Arc<ReplayStats> {
        Arc::clone(&self.stats)
    }

    async fn fetch(&mut self, ctx: &CancellationToken) -> Result<ReplayPage> {
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);

        // Past the end the listing is exhausted: an empty last page.
        let Some(page) = self.pages.get(self.cursor) else {
            return Ok(self.last_page(Vec::new()));
        };

        if page.delay_ms > 0 {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(PagerError::cancelled("fetching replay page")),
                _ = tokio::time::sleep(Duration::from_millis(page.delay_ms)) => {}
            }
        } else if ctx.is_cancelled() {
            return Err(PagerError::cancelled("fetching replay page"));
        }

        if let Some(err) = &page.error {
            return Err(err.into());
        }

        let items = page.items.clone();
        if self.cursor + 1 < self.pages.len() {
            Ok(ReplayPage {
                items,
                next_link: Some(REPLAY_NEXT_LINK.to_string()),
                delta_link: None,
            })
        } else {
            Ok(self.last_page(items))
        }
    }

    fn last_page(&self, items: Vec<ReplayItem>) -> ReplayPage {
        ReplayPage {
            items,
            next_link: None,
            delta_link: (!self.delta_link.is_empty()).then(|| self.delta_link.clone()),
        }
    }

    fn advance(&mut self, next_link: &str) {
        if !next_link.is_empty() {
            self.cursor += 1;
        }
    }
}

#[async_trait]
impl NonDeltaHandler<ReplayItem> for ReplayPager {
    type Page = ReplayPage;

    async fn get_page(&mut self, ctx: &CancellationToken) -> Result<ReplayPage> {
        self.fetch(ctx).await
    }

    fn set_next_link(&mut self, next_link: &str) {
        self.advance(next_link);
    }

    fn valid_mod_times(&self) -> bool {
        self.valid_mod_times
    }
}

#[async_trait]
impl DeltaHandler<ReplayItem> for ReplayPager {
    type Page = ReplayPage;

    async fn get_page(&mut self, ctx: &CancellationToken) -> Result<ReplayPage> {
        self.fetch(ctx).await
    }

    fn set_next_link(&mut self, next_link: &str) {
        self.advance(next_link);
    }

    async fn reset(&mut self, _ctx: &CancellationToken) {
        self.stats.resets.fetch_add(1, Ordering::Relaxed);
        self.pages = std::mem::take(&mut self.reset_pages);
        self.cursor = 0;
    }

    fn valid_mod_times(&self) -> bool {
        self.valid_mod_times
    }
}
