//! Change detection
//!
//! Classifies the source rows of one entity type against the active
//! warehouse versions of the same type. One pass over each side, joined on
//! the business key in memory.

use crate::errors::{Result, WarehouseError};
use crate::model::{EntityKind, Snapshot};
use std::collections::BTreeMap;
use std::fmt;

/// A record type the warehouse versions
pub trait Tracked: Clone + fmt::Debug {
    type Key: Ord + Clone + fmt::Debug + fmt::Display;
    const KIND: EntityKind;

    fn business_key(&self) -> Self::Key;

    /// Equal on every tracked attribute
    fn same_tracked(&self, other: &Self) -> bool;
}

/// A source row whose active version must be superseded
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedRow<R> {
    /// Surrogate key of the version being closed
    pub previous_sk: i64,
    pub record: R,
}

/// Disjoint classification of source rows, each list ordered by business key
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet<R> {
    pub new: Vec<R>,
    pub changed: Vec<ChangedRow<R>>,
    pub unchanged: usize,
}

impl<R> ChangeSet<R> {
    /// Every source row is new (full load)
    pub fn all_new(rows: Vec<R>) -> Self {
        Self {
            new: rows,
            changed: Vec::new(),
            unchanged: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty()
    }
}

impl<R> Default for ChangeSet<R> {
    fn default() -> Self {
        Self::all_new(Vec::new())
    }
}

/// Classify source rows as New, Changed or Unchanged
///
/// Active snapshots whose key is absent from the source are ignored;
/// deletions do not propagate.
///
/// # Errors
///
/// - `InvalidInput` if the source holds the same business key twice
/// - `InvariantViolation` if two active snapshots share a business key
pub fn detect<R: Tracked>(source: &[R], active: &[Snapshot<R>]) -> Result<ChangeSet<R>> {
    let mut active_by_key: BTreeMap<R::Key, &Snapshot<R>> = BTreeMap::new();
    for snapshot in active {
        let key = snapshot.record.business_key();
        if active_by_key.insert(key.clone(), snapshot).is_some() {
            return Err(WarehouseError::DuplicateActiveVersion {
                entity: R::KIND,
                business_key: key.to_string(),
            }
            .into());
        }
    }

    let mut source_by_key: BTreeMap<R::Key, &R> = BTreeMap::new();
    for row in source {
        let key = row.business_key();
        if source_by_key.insert(key.clone(), row).is_some() {
            return Err(WarehouseError::DuplicateSourceKey {
                entity: R::KIND,
                business_key: key.to_string(),
            }
            .into());
        }
    }

    let mut change_set = ChangeSet::default();
    for (key, row) in source_by_key {
        match active_by_key.get(&key) {
            None => change_set.new.push(row.clone()),
            Some(snapshot) if snapshot.record.same_tracked(row) => change_set.unchanged += 1,
            Some(snapshot) => change_set.changed.push(ChangedRow {
                previous_sk: snapshot.surrogate_key,
                record: row.clone(),
            }),
        }
    }

    Ok(change_set)
}
