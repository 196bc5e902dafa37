//! # deltapager - Incremental Paged Enumeration
//!
//! deltapager walks paginated remote listings and reduces them to the set of
//! items added and removed since the last run, together with the delta token
//! to resume from next time.
//!
//! ## Features
//!
//! - **Delta Enumeration**: Resume from a delta token, recovering in place when
//!   the service rejects it as stale
//! - **Full Listing Fallback**: Switch to a plain listing when the endpoint
//!   cannot answer incrementally
//! - **Streaming Pages**: A background producer hands pages to the consumer one
//!   at a time with in-band reset notifications
//! - **Pluggable Classification**: Removal markers, deleted timestamps, or
//!   add-everything
//! - **Request Budget**: Token-bucket rate limiting with per-call costs
//! - **Replay**: Drive the engine from recorded JSON fixtures
//!
//! ## Quick Start
//!
//! ```no_run
//! use deltapager::prelude::*;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> deltapager::Result<()> {
//! let fixture = Fixture::from_file(std::path::Path::new("inbox.json"))?;
//! let config = EnumerationConfig::default();
//! let ctx = CancellationToken::new();
//!
//! let aar = get_added_and_removed_item_ids(
//!     &ctx,
//!     config.to_limiter(),
//!     fixture.pager(),
//!     fixture.delta_pager(),
//!     &config.options("previous-delta-link"),
//!     added_and_removed_by_additional_data,
//!     &[],
//! )
//! .await?;
//!
//! println!("{} added, {} removed", aar.added.len(), aar.removed.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Collecting Every Item
//!
//! ```no_run
//! use deltapager::prelude::*;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(fixture: Fixture) -> deltapager::Result<()> {
//! let ctx = CancellationToken::new();
//! let (items, du) = batch_delta_enumerate_items(
//!     &ctx,
//!     fixture.delta_pager(),
//!     Arc::new(Unlimited),
//!     "",
//! )
//! .await?;
//!
//! println!("{} items, next delta link {:?}", items.len(), du.url);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod limiter;
pub mod pagers;
pub mod replay;

// Re-export commonly used types
pub use config::{EnumerationConfig, Strategy};
pub use error::{PagerError, Result};
pub use pagers::{get_added_and_removed_item_ids, AddedAndRemoved, AddedAndRemovedOptions, DeltaUpdate};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use deltapager::prelude::*;
    //! ```

    pub use crate::config::{EnumerationConfig, Strategy};
    pub use crate::error::{is_err_delta_not_supported, is_err_invalid_delta, PagerError, Result};
    pub use crate::limiter::{CostClass, RequestBudget, RequestLimiter, Unlimited};
    pub use crate::pagers::{
        added_and_removed_add_all, added_and_removed_by_additional_data,
        added_and_removed_by_deleted_date_time, batch_delta_enumerate_items,
        batch_enumerate_items, filter_include_all, get_added_and_removed_item_ids,
        AddedAndRemoved, AddedAndRemovedOptions, DeltaHandler, DeltaUpdate, ItemFilter,
        NonDeltaHandler, PagedItem,
    };
    pub use crate::replay::{Fixture, ReplayItem, ReplayPager};
}
