//! Item classification strategies
//!
//! Turn a page of raw items into Added (with modification time) and Removed
//! decisions. Providers signal deletion differently, so the strategy is
//! chosen per source:
//! - [`added_and_removed_add_all`] for sources with no deletion signal
//! - [`added_and_removed_by_additional_data`] for `@removed` markers
//! - [`added_and_removed_by_deleted_date_time`] for a deleted timestamp field

use crate::error::{PagerError, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Additional-data key flagging an item as removed from a delta listing.
/// The value is either `changed` or `deleted`; both mean the item left.
pub const ADDITIONAL_DATA_REMOVED: &str = "@removed";

/// Provider-specific property bag attached to an item
pub type AdditionalData = HashMap<String, serde_json::Value>;

/// Predicate an item must pass to be classified at all
pub type ItemFilter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Signature shared by all classification strategies
pub type ClassifyFn<T> = fn(&[T], &[ItemFilter<T>]) -> Result<ChangeSet>;

/// Getters an item may expose.
///
/// Only the ID is mandatory. The other capabilities default to "not
/// provided"; a strategy that needs one the item lacks reports a
/// [`PagerError::Classification`].
pub trait PagedItem {
    /// Item ID, `None` if the item carries none
    fn id(&self) -> Option<&str>;

    /// Last modification time, if known
    fn last_modified(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Additional-data bag, `None` if the item type has no such bag
    fn additional_data(&self) -> Option<&AdditionalData> {
        None
    }

    /// Whether the item type carries a deleted-time field at all
    fn has_deleted_date_time(&self) -> bool {
        false
    }

    /// Deletion time, set once the item was deleted
    fn deleted_date_time(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Filter that accepts every item
pub fn filter_include_all<T>(_item: &T) -> bool {
    true
}

/// Added/Removed decisions accumulated in arrival order.
///
/// A later decision for an ID replaces an earlier one, so an ID is never in
/// both sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    added: HashMap<String, DateTime<Utc>>,
    removed: Vec<String>,
    removed_ids: HashSet<String>,
}

impl ChangeSet {
    /// Create an empty change set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an addition, overriding an earlier removal of the same ID
    pub fn add(&mut self, id: impl Into<String>, mod_time: DateTime<Utc>) {
        let id = id.into();
        if self.removed_ids.remove(&id) {
            self.removed.retain(|r| r != &id);
        }
        self.added.insert(id, mod_time);
    }

    /// Record a removal, overriding an earlier addition of the same ID
    pub fn remove(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.added.remove(&id);
        if self.removed_ids.insert(id.clone()) {
            self.removed.push(id);
        }
    }

    /// Fold a later set of decisions into this one
    pub fn merge(&mut self, later: ChangeSet) {
        let ChangeSet { added, removed, .. } = later;

        // `later` is already conflict-free, so its two halves commute.
        for id in removed {
            self.remove(id);
        }
        for (id, mod_time) in added {
            self.add(id, mod_time);
        }
    }

    /// Drop every decision
    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
        self.removed_ids.clear();
    }

    /// Added IDs and their modification times
    pub fn added(&self) -> &HashMap<String, DateTime<Utc>> {
        &self.added
    }

    /// Removed IDs in first-seen order
    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    /// Split into the added map and the removed list
    pub fn into_parts(self) -> (HashMap<String, DateTime<Utc>>, Vec<String>) {
        (self.added, self.removed)
    }
}

fn passes_filters<T>(item: &T, filters: &[ItemFilter<T>]) -> bool {
    filters.iter().all(|passes| passes(item))
}

fn require_id<T: PagedItem>(item: &T) -> Result<&str> {
    item.id()
        .ok_or_else(|| PagerError::classification::<T>("an id getter"))
}

/// A usable modification time: now, if the item has none.
///
/// The epoch itself is the zero value some sources send for "unknown" and is
/// treated as missing; any other time, earlier ones included, is kept.
pub fn mod_time_or_now(mod_time: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match mod_time {
        Some(t) if t != DateTime::<Utc>::UNIX_EPOCH => t,
        _ => Utc::now(),
    }
}

/// Add every filtered item; never remove anything
pub fn added_and_removed_add_all<T: PagedItem>(
    items: &[T],
    filters: &[ItemFilter<T>],
) -> Result<ChangeSet> {
    let mut changes = ChangeSet::new();

    for item in items.iter().filter(|item| passes_filters(*item, filters)) {
        let id = require_id(item)?;
        changes.add(id, mod_time_or_now(item.last_modified()));
    }

    Ok(changes)
}

/// Remove items whose additional data carries a non-null `@removed` marker;
/// add the rest
pub fn added_and_removed_by_additional_data<T: PagedItem>(
    items: &[T],
    filters: &[ItemFilter<T>],
) -> Result<ChangeSet> {
    let mut changes = ChangeSet::new();

    for item in items.iter().filter(|item| passes_filters(*item, filters)) {
        let id = require_id(item)?;
        let data = item
            .additional_data()
            .ok_or_else(|| PagerError::classification::<T>("an additional data getter"))?;

        let removed = data
            .get(ADDITIONAL_DATA_REMOVED)
            .is_some_and(|marker| !marker.is_null());

        if removed {
            changes.remove(id);
        } else {
            changes.add(id, mod_time_or_now(item.last_modified()));
        }
    }

    Ok(changes)
}

/// Remove items with a deleted timestamp; add the rest
pub fn added_and_removed_by_deleted_date_time<T: PagedItem>(
    items: &[T],
    filters: &[ItemFilter<T>],
) -> Result<ChangeSet> {
    let mut changes = ChangeSet::new();

    for item in items.iter().filter(|item| passes_filters(*item, filters)) {
        let id = require_id(item)?;
        if !item.has_deleted_date_time() {
            return Err(PagerError::classification::<T>("a deleted date time getter"));
        }

        match item.deleted_date_time() {
            Some(_) => changes.remove(id),
            None => changes.add(id, mod_time_or_now(item.last_modified())),
        }
    }

    Ok(changes)
}
