//! Bidirectional mapping between catalog identifiers and the dense
//! numeric identifiers stored in the index.
//!
//! Numeric identifiers are allocated sequentially and never reused. An
//! update repoints the catalog id at a fresh numeric id, so postings for
//! the old vector no longer resolve and drop out at result time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::corpus::EntryId;
use crate::index::types::NumericId;

#[derive(Debug, Default, Clone)]
pub struct IdMap {
    forward: HashMap<EntryId, NumericId>,
    reverse: HashMap<NumericId, EntryId>,
    next: u64,
}

/// Serialized form; the reverse map is rebuilt on load.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdMapData {
    pub forward: HashMap<EntryId, NumericId>,
    pub next: u64,
}

impl IdMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh numeric id for a catalog entry.
    ///
    /// Any previous mapping for `entry` is replaced; its old numeric id
    /// becomes unresolvable.
    pub fn allocate(&mut self, entry: EntryId) -> NumericId {
        let numeric = NumericId(self.next);
        self.next += 1;
        if let Some(old) = self.forward.insert(entry, numeric) {
            self.reverse.remove(&old);
        }
        self.reverse.insert(numeric, entry);
        numeric
    }

    /// Drop both directions of the mapping for `entry`.
    pub fn remove(&mut self, entry: EntryId) -> Option<NumericId> {
        let numeric = self.forward.remove(&entry)?;
        self.reverse.remove(&numeric);
        Some(numeric)
    }

    #[must_use]
    pub fn numeric(&self, entry: EntryId) -> Option<NumericId> {
        self.forward.get(&entry).copied()
    }

    #[must_use]
    pub fn entry(&self, numeric: NumericId) -> Option<EntryId> {
        self.reverse.get(&numeric).copied()
    }

    /// Count of live mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    #[must_use]
    pub fn to_data(&self) -> IdMapData {
        IdMapData {
            forward: self.forward.clone(),
            next: self.next,
        }
    }
}

impl From<IdMapData> for IdMap {
    fn from(data: IdMapData) -> Self {
        let reverse = data
            .forward
            .iter()
            .map(|(&entry, &numeric)| (numeric, entry))
            .collect();
        Self {
            forward: data.forward,
            reverse,
            next: data.next,
        }
    }
}
