//! Per-table registry of unique string values in use.

use std::collections::{HashMap, HashSet};

use crate::error::DbError;
use crate::filter::UniqueValue;

#[derive(Debug, Default)]
pub(crate) struct UniqueRegistry {
    values: HashMap<String, HashSet<String>>,
}

impl UniqueRegistry {
    /// Fails if any of `candidates` is already registered.
    pub fn check(&self, candidates: &[UniqueValue]) -> Result<(), DbError> {
        match candidates.iter().find(|u| self.contains(u)) {
            Some(taken) => Err(DbError::UniqueValueDuplicate(taken.path.clone())),
            None => Ok(()),
        }
    }

    pub fn contains(&self, unique: &UniqueValue) -> bool {
        self.values
            .get(&unique.path)
            .is_some_and(|set| set.contains(&unique.value))
    }

    pub fn add(&mut self, values: &[UniqueValue]) {
        for unique in values {
            self.values
                .entry(unique.path.clone())
                .or_default()
                .insert(unique.value.clone());
        }
    }

    pub fn remove(&mut self, values: &[UniqueValue]) {
        for unique in values {
            if let Some(set) = self.values.get_mut(&unique.path) {
                set.remove(&unique.value);
            }
        }
    }

    /// Number of values registered under `path`.
    pub fn count(&self, path: &str) -> usize {
        self.values.get(path).map_or(0, HashSet::len)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Splits an update into the values it adds and the values it releases.
pub(crate) fn diff(old: &[UniqueValue], new: &[UniqueValue]) -> (Vec<UniqueValue>, Vec<UniqueValue>) {
    let added = new.iter().filter(|u| !old.contains(u)).cloned().collect();
    let removed = old.iter().filter(|u| !new.contains(u)).cloned().collect();
    (added, removed)
}
