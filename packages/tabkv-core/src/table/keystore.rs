//! Keystore: records addressed by a caller-supplied key.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::config::TableOptions;
use crate::error::DbError;
use crate::persistence::Storage;
use crate::types::Schema;

use super::descriptor::{TableDescriptor, TableKind};
use super::entry::Locator;
use super::table::TableCore;
use super::validation::validate_key;

/// A schema-validated key-value table.
#[derive(Debug)]
pub struct Keystore {
    core: TableCore,
}

impl Keystore {
    pub(crate) fn create(
        name: &str,
        data_dir: &Path,
        schema: Schema,
        options: &TableOptions,
        storage: Arc<Storage>,
    ) -> Result<Self, DbError> {
        let core = TableCore::create(name, TableKind::Keystore, data_dir, schema, options, None, storage)?;
        Ok(Self { core })
    }

    /// Loads the descriptor under `dir` and replays the table's records.
    pub(crate) fn open(dir: &Path, storage: Arc<Storage>) -> Result<Self, DbError> {
        let descriptor = TableDescriptor::load(dir)?;
        if descriptor.kind != TableKind::Keystore {
            return Err(DbError::TableKindMismatch {
                table: descriptor.name,
                expected: TableKind::Keystore.label(),
            });
        }
        let core = TableCore::from_descriptor(descriptor, dir.to_path_buf(), storage)?;
        core.restore()?;
        Ok(Self { core })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn schema(&self) -> &Schema {
        &self.core.schema
    }

    /// Directory holding the partition files and descriptor.
    pub fn dir(&self) -> &Path {
        &self.core.dir
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.core.contains(key)
    }

    /// Inserts a new record under `key`.
    ///
    /// # Arguments
    /// * `key` - Primary key; must be non-empty and free of `. * \t \n \r`
    /// * `obj` - Item values; absent items take their defaults
    ///
    /// # Returns
    /// The partition file and line the record was written to.
    pub fn insert(&self, key: &str, obj: &Map<String, Json>) -> Result<Locator, DbError> {
        validate_key(key)?;
        self.core.insert(key, None, obj)
    }

    /// Reads a record.
    ///
    /// With `selection` absent or empty every item is returned; otherwise
    /// each selection key is a query key and its value the method
    /// parameter list.
    pub fn get_data(&self, key: &str, selection: Option<&Map<String, Json>>) -> Result<Map<String, Json>, DbError> {
        let entry = self.core.lookup_primary(key)?;
        self.core.read(&entry, selection)
    }

    /// Applies query-key updates to the record under `key`.
    pub fn update_data(&self, key: &str, updates: &Map<String, Json>) -> Result<(), DbError> {
        self.core.update(key, None, updates)
    }

    pub fn delete(&self, key: &str) -> Result<(), DbError> {
        self.core.delete(key, None)
    }

    /// Inserts `obj` under `key`, or replaces the items it names when the
    /// key already exists.
    pub fn upsert(&self, key: &str, obj: &Map<String, Json>) -> Result<(), DbError> {
        validate_key(key)?;
        if !self.core.contains(key) {
            match self.core.insert(key, None, obj) {
                Ok(_) => return Ok(()),
                Err(DbError::KeyInUse(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let updates: Map<String, Json> = obj
            .iter()
            .filter(|(name, value)| !value.is_null() && self.core.schema.get(name).is_some())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        self.core.update(key, None, &updates)
    }

    /// Clears the table and reloads it from its partition files.
    pub fn restore(&self) -> Result<usize, DbError> {
        self.core.restore()
    }

    /// Closes open partition files; with `persist` the descriptor is
    /// rewritten first.
    pub fn close(&self, persist: bool) -> Result<(), DbError> {
        self.core.close(persist)
    }

    pub fn partition_max(&self) -> u32 {
        self.core.partition_max()
    }

    pub fn set_partition_max(&self, partition_max: u32) -> Result<(), DbError> {
        self.core.set_partition_max(partition_max)
    }

    pub fn max_entries(&self) -> u64 {
        self.core.max_entries()
    }

    pub fn set_max_entries(&self, max_entries: u64) -> Result<(), DbError> {
        self.core.set_max_entries(max_entries)
    }

    pub fn encrypt_cost(&self) -> u32 {
        self.core.encrypt_cost()
    }

    pub fn set_encrypt_cost(&self, cost: u32) -> Result<(), DbError> {
        self.core.set_encrypt_cost(cost)
    }

    /// Partition number new records are appended to.
    pub fn file_on(&self) -> u32 {
        self.core.file_on()
    }

    /// Number of values registered for the unique item at `path`.
    pub fn unique_count(&self, path: &str) -> usize {
        self.core.unique_count(path)
    }
}
