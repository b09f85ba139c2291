//! Entries and the key index.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::types::Value;

/// Where a record's line lives in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Locator {
    /// Partition file number
    pub file: u32,
    /// 1-based line index (0 for memory-only tables)
    pub line: u32,
}

/// Mutable state of one record, guarded by the entry mutex.
#[derive(Debug)]
pub(crate) struct EntryState {
    /// Record tuple; `None` when the table keeps data on drive
    pub data: Option<Vec<Value>>,
    pub locator: Locator,
    /// Set once the entry is removed from the index
    pub deleted: bool,
}

/// One record of a table.
#[derive(Debug)]
pub(crate) struct Entry {
    pub key: String,
    /// Password hash (AuthTable only), swapped without the entry lock
    pub password: Option<ArcSwap<String>>,
    pub state: Mutex<EntryState>,
}

impl Entry {
    pub fn new(key: String, password: Option<String>, data: Option<Vec<Value>>, locator: Locator) -> Self {
        Self {
            key,
            password: password.map(|hash| ArcSwap::from_pointee(hash)),
            state: Mutex::new(EntryState {
                data,
                locator,
                deleted: false,
            }),
        }
    }
}

/// Primary and alt-login indexes.
#[derive(Debug, Default)]
pub(crate) struct EntryIndex {
    pub primary: HashMap<String, Arc<Entry>>,
    pub alt: HashMap<String, Arc<Entry>>,
}

impl EntryIndex {
    /// Looks `name` up as a primary key, then as an alt-login value.
    pub fn resolve(&self, name: &str) -> Option<&Arc<Entry>> {
        self.primary.get(name).or_else(|| self.alt.get(name))
    }

    /// Whether `entry` is still the live entry for its key.
    pub fn is_live(&self, entry: &Arc<Entry>) -> bool {
        self.primary
            .get(&entry.key)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    pub fn len(&self) -> usize {
        self.primary.len()
    }
}
