//! Reference-counted multiset.
//!
//! The same route may be installed on behalf of several networks. The
//! kernel only needs to hear about the first add and the last remove.

use crate::sync_map::SyncMap;
use std::hash::Hash;

/// What a multiset operation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefChange {
    /// Count went 0 -> 1.
    First,
    /// Count went 1 -> 0; the entry is gone.
    Last,
    /// Count moved between two non-zero values.
    Shared(u32),
    /// Remove of an element that was never added.
    Absent,
}

impl RefChange {
    /// True when the underlying resource must actually be touched.
    pub fn is_edge(&self) -> bool {
        matches!(self, RefChange::First | RefChange::Last)
    }
}

/// A multiset keyed by `T`. Entries are dropped when their count hits 0.
#[derive(Debug, Clone)]
pub struct RefCountSet<T> {
    counts: SyncMap<T, u32>,
}

impl<T> RefCountSet<T>
where
    T: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            counts: SyncMap::new(),
        }
    }

    /// Adds one reference to `item`.
    pub fn add(&mut self, item: &T) -> RefChange {
        let count = self.counts.get_or_insert_with(item.clone(), || 0);
        *count += 1;
        if *count == 1 {
            RefChange::First
        } else {
            RefChange::Shared(*count)
        }
    }

    /// Drops one reference to `item`.
    pub fn remove(&mut self, item: &T) -> RefChange {
        match self.counts.decrement_ref(item) {
            Ok(0) => {
                self.counts.remove(item);
                RefChange::Last
            }
            Ok(n) => RefChange::Shared(n),
            Err(_) => RefChange::Absent,
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.counts.contains_key(item)
    }

    pub fn count(&self, item: &T) -> u32 {
        self.counts.ref_count(item).unwrap_or(0)
    }

    /// Number of distinct elements.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.values().map(|c| u64::from(*c)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, u32)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }
}

impl<T> Default for RefCountSet<T>
where
    T: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
