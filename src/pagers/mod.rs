//! Paged enumeration engine
//!
//! This module provides:
//! - Page source traits for plain and delta listings
//! - A producer/consumer bridge carrying pages with in-band resets
//! - Pagination loops with invalid-token recovery and batch collectors
//! - Classification of pages into Added/Removed sets
//! - The orchestrator choosing between delta and full enumeration

mod added_removed;
mod classify;
mod enumerate;
mod page;
mod results;

pub use added_removed::*;
pub use classify::*;
pub use enumerate::*;
pub use page::*;
pub use results::*;
