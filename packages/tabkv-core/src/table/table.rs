//! Shared table engine behind [`Keystore`](super::Keystore) and
//! [`AuthTable`](super::AuthTable).
//!
//! A table owns:
//! - An immutable schema
//! - The key index (primary and alt-login) under one `RwLock`
//! - The unique-value registry under its own mutex
//! - Atomically read tunables and the current append partition `file_on`
//!
//! Locks are always taken in the order index, uniques, entry, storage.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as Json};

use crate::config::TableOptions;
use crate::crypto;
use crate::error::DbError;
use crate::filter::{collect_uniques, Filter, FilterMode};
use crate::persistence::io_utils::{classify_io_error, IoOp};
use crate::persistence::{partition_path, Storage, PARTITION_EXTENSION};
use crate::types::{ItemKind, Schema, Value};

use super::descriptor::{AuthDescriptor, TableDescriptor, TableKind};
use super::entry::{Entry, EntryIndex, EntryState, Locator};
use super::record::StoredRecord;
use super::unique::{diff, UniqueRegistry};
use super::validation;

/// AuthTable-only tunables.
#[derive(Debug)]
pub(crate) struct AuthKnobs {
    pub min_password: AtomicU32,
    pub pass_reset_len: AtomicU32,
    pub email_item: ArcSwapOption<String>,
    pub alt_login_item: ArcSwapOption<String>,
}

impl AuthKnobs {
    pub fn new(
        min_password: u32,
        pass_reset_len: u32,
        email_item: Option<String>,
        alt_login_item: Option<String>,
    ) -> Self {
        Self {
            min_password: AtomicU32::new(min_password),
            pass_reset_len: AtomicU32::new(pass_reset_len),
            email_item: ArcSwapOption::from(email_item.map(Arc::new)),
            alt_login_item: ArcSwapOption::from(alt_login_item.map(Arc::new)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TableCore {
    pub name: String,
    pub kind: TableKind,
    pub dir: PathBuf,
    pub schema: Schema,
    storage: Arc<Storage>,
    data_on_drive: bool,
    mem_only: bool,
    partition_max: AtomicU32,
    max_entries: AtomicU64,
    encrypt_cost: AtomicU32,
    file_on: AtomicU32,
    index: RwLock<EntryIndex>,
    uniques: Mutex<UniqueRegistry>,
    /// Whether any table-global unique item exists
    has_uniques: bool,
    pub auth: Option<AuthKnobs>,
    /// Serialises descriptor rewrites
    descriptor_lock: Mutex<()>,
}

impl TableCore {
    /// Creates a new, empty table and its directory.
    ///
    /// Fails with `TableExists` if the directory is already present.
    pub fn create(
        name: &str,
        kind: TableKind,
        data_dir: &Path,
        schema: Schema,
        options: &TableOptions,
        auth: Option<AuthKnobs>,
        storage: Arc<Storage>,
    ) -> Result<Self, DbError> {
        validate_table_name(name)?;
        let core = Self {
            name: name.to_string(),
            kind,
            dir: kind.table_dir(data_dir, name),
            has_uniques: has_global_uniques(&schema),
            schema,
            storage,
            data_on_drive: options.data_on_drive && !options.mem_only,
            mem_only: options.mem_only,
            partition_max: AtomicU32::new(options.partition_max.max(1)),
            max_entries: AtomicU64::new(options.max_entries),
            encrypt_cost: AtomicU32::new(options.encrypt_cost.clamp(crypto::MIN_COST, crypto::MAX_COST)),
            file_on: AtomicU32::new(0),
            index: RwLock::new(EntryIndex::default()),
            uniques: Mutex::new(UniqueRegistry::default()),
            auth,
            descriptor_lock: Mutex::new(()),
        };
        core.check_auth_items()?;

        if !core.mem_only {
            if core.dir.exists() {
                return Err(DbError::TableExists(name.to_string()));
            }
            core.storage.create_dir(&core.dir)?;
            core.persist_descriptor()?;
        }
        tracing::info!("Created {} '{}'", kind.label(), name);
        Ok(core)
    }

    /// Rebuilds an empty table from a stored descriptor; call
    /// [`restore`](Self::restore) to load its records.
    pub fn from_descriptor(descriptor: TableDescriptor, dir: PathBuf, storage: Arc<Storage>) -> Result<Self, DbError> {
        let auth = descriptor.auth.map(|a| {
            AuthKnobs::new(a.min_password, a.pass_reset_len, a.email_item, a.alt_login_item)
        });
        let core = Self {
            name: descriptor.name,
            kind: descriptor.kind,
            dir,
            has_uniques: has_global_uniques(&descriptor.schema),
            schema: descriptor.schema,
            storage,
            data_on_drive: descriptor.data_on_drive,
            mem_only: descriptor.mem_only,
            partition_max: AtomicU32::new(descriptor.partition_max.max(1)),
            max_entries: AtomicU64::new(descriptor.max_entries),
            encrypt_cost: AtomicU32::new(descriptor.encrypt_cost.clamp(crypto::MIN_COST, crypto::MAX_COST)),
            file_on: AtomicU32::new(descriptor.file_on),
            index: RwLock::new(EntryIndex::default()),
            uniques: Mutex::new(UniqueRegistry::default()),
            auth,
            descriptor_lock: Mutex::new(()),
        };
        core.check_auth_items()?;
        Ok(core)
    }

    pub fn descriptor(&self) -> TableDescriptor {
        TableDescriptor {
            name: self.name.clone(),
            kind: self.kind,
            schema: self.schema.clone(),
            file_on: self.file_on(),
            data_on_drive: self.data_on_drive,
            mem_only: self.mem_only,
            partition_max: self.partition_max(),
            encrypt_cost: self.encrypt_cost(),
            max_entries: self.max_entries(),
            auth: self.auth.as_ref().map(|a| AuthDescriptor {
                min_password: a.min_password.load(Ordering::Acquire),
                pass_reset_len: a.pass_reset_len.load(Ordering::Acquire),
                email_item: a.email_item.load_full().map(|s| s.to_string()),
                alt_login_item: a.alt_login_item.load_full().map(|s| s.to_string()),
            }),
        }
    }

    /// Rewrites `config.gdbc`; memory-only tables have none.
    pub fn persist_descriptor(&self) -> Result<(), DbError> {
        if self.mem_only {
            return Ok(());
        }
        let _guard = self.descriptor_lock.lock();
        self.descriptor().store(&self.dir)
    }

    // ---- tunables ----

    pub fn partition_max(&self) -> u32 {
        self.partition_max.load(Ordering::Acquire)
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries.load(Ordering::Acquire)
    }

    pub fn encrypt_cost(&self) -> u32 {
        self.encrypt_cost.load(Ordering::Acquire)
    }

    pub fn file_on(&self) -> u32 {
        self.file_on.load(Ordering::Acquire)
    }

    pub fn set_partition_max(&self, partition_max: u32) -> Result<(), DbError> {
        self.partition_max.store(partition_max.max(1), Ordering::Release);
        self.persist_descriptor()
    }

    pub fn set_max_entries(&self, max_entries: u64) -> Result<(), DbError> {
        self.max_entries.store(max_entries, Ordering::Release);
        self.persist_descriptor()
    }

    pub fn set_encrypt_cost(&self, cost: u32) -> Result<(), DbError> {
        self.encrypt_cost
            .store(cost.clamp(crypto::MIN_COST, crypto::MAX_COST), Ordering::Release);
        self.persist_descriptor()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Number of registered unique values under `path`.
    pub fn unique_count(&self, path: &str) -> usize {
        self.uniques.lock().count(path)
    }

    // ---- auth items ----

    pub fn alt_login_item(&self) -> Option<Arc<String>> {
        self.auth.as_ref().and_then(|a| a.alt_login_item.load_full())
    }

    pub fn email_item(&self) -> Option<Arc<String>> {
        self.auth.as_ref().and_then(|a| a.email_item.load_full())
    }

    fn check_auth_items(&self) -> Result<(), DbError> {
        if let Some(item) = self.email_item() {
            email_index(&self.schema, &item)?;
        }
        if let Some(item) = self.alt_login_item() {
            validation::alt_login_index(&self.schema, &item)?;
        }
        Ok(())
    }

    /// Switches the email item; `None` disables password resets.
    pub fn set_email_item(&self, item: Option<String>) -> Result<(), DbError> {
        let auth = self.auth_knobs()?;
        if let Some(item) = &item {
            email_index(&self.schema, item)?;
        }
        auth.email_item.store(item.map(Arc::new));
        self.persist_descriptor()
    }

    /// Switches the alt-login item and rebuilds the alt index.
    pub fn set_alt_login_item(&self, item: Option<String>) -> Result<(), DbError> {
        let auth = self.auth_knobs()?;
        let data_index = item
            .as_deref()
            .map(|name| validation::alt_login_index(&self.schema, name))
            .transpose()?;

        let mut index = self.index.write();
        let mut alt = HashMap::new();
        if let Some(data_index) = data_index {
            for entry in index.primary.values() {
                let state = entry.state.lock();
                let record = self.load(&state)?;
                if let Some(Value::Str(value)) = record.get(data_index) {
                    if !value.is_empty() {
                        alt.insert(value.clone(), entry.clone());
                    }
                }
            }
        }
        index.alt = alt;
        auth.alt_login_item.store(item.map(Arc::new));
        drop(index);
        self.persist_descriptor()
    }

    pub fn auth_knobs(&self) -> Result<&AuthKnobs, DbError> {
        self.auth.as_ref().ok_or_else(|| {
            DbError::Unexpected(format!("table '{}' has no auth settings", self.name))
        })
    }

    fn alt_value(&self, record: &[Value]) -> Option<String> {
        let item = self.alt_login_item()?;
        let data_index = self.schema.get(&item)?.data_index;
        match record.get(data_index) {
            Some(Value::Str(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Checks table-level constraints the filter does not know about.
    fn check_record(&self, record: &[Value]) -> Result<(), DbError> {
        let Some(item) = self.email_item() else {
            return Ok(());
        };
        let data_index = email_index(&self.schema, &item)?;
        match record.get(data_index) {
            Some(Value::Str(email)) if !email.is_empty() => validation::validate_email(email),
            _ => Ok(()),
        }
    }

    // ---- storage ----

    fn partition(&self, file: u32) -> PathBuf {
        partition_path(&self.dir, file)
    }

    /// Appends a new record line and rolls the partition when it fills.
    ///
    /// Callers hold the index write lock, which serialises `file_on`.
    fn append(&self, key: &str, password: Option<&str>, record: &[Value]) -> Result<Locator, DbError> {
        if self.mem_only {
            return Ok(Locator::default());
        }
        let payload = StoredRecord::new(self.kind, key, password, record).encode()?;
        let file = self.file_on();
        let line = self.storage.insert(&self.partition(file), &payload)?;

        if line >= self.partition_max() {
            self.file_on.store(file + 1, Ordering::Release);
            tracing::debug!("Table '{}' rolled to partition {}", self.name, file + 1);
            if let Err(e) = self.persist_descriptor() {
                tracing::warn!("Failed to record partition roll for '{}': {}", self.name, e);
            }
        }
        Ok(Locator { file, line })
    }

    fn rewrite(&self, key: &str, password: Option<&str>, record: &[Value], locator: Locator) -> Result<(), DbError> {
        if self.mem_only {
            return Ok(());
        }
        let payload = StoredRecord::new(self.kind, key, password, record).encode()?;
        self.storage
            .update(&self.partition(locator.file), locator.line, &payload)
    }

    /// Returns the record tuple, reloading it from storage for
    /// data-on-drive tables.
    fn load<'s>(&self, state: &'s EntryState) -> Result<Cow<'s, [Value]>, DbError> {
        if let Some(data) = &state.data {
            return Ok(Cow::Borrowed(data.as_slice()));
        }
        let bytes = self
            .storage
            .read(&self.partition(state.locator.file), state.locator.line)?;
        let stored = StoredRecord::decode(&bytes)?;
        Filter::new(FilterMode::Restore, self.encrypt_cost())
            .decode_stored(&self.schema, &stored.data)
            .map(Cow::Owned)
    }

    fn keeps_data(&self) -> bool {
        !self.data_on_drive
    }

    // ---- operations ----

    /// Resolves a primary key or alt-login value.
    pub fn lookup(&self, name: &str) -> Result<Arc<Entry>, DbError> {
        self.index
            .read()
            .resolve(name)
            .cloned()
            .ok_or(DbError::NoEntryFound)
    }

    /// Resolves a primary key only.
    pub fn lookup_primary(&self, key: &str) -> Result<Arc<Entry>, DbError> {
        self.index
            .read()
            .primary
            .get(key)
            .cloned()
            .ok_or(DbError::NoEntryFound)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.read().primary.contains_key(key)
    }

    /// Filters and stores a new record.
    pub fn insert(
        &self,
        key: &str,
        password: Option<String>,
        obj: &Map<String, Json>,
    ) -> Result<Locator, DbError> {
        let record = Filter::new(FilterMode::Write, self.encrypt_cost()).insert_record(&self.schema, obj)?;
        self.check_record(&record)?;
        let uniques = collect_uniques(&self.schema, &record);
        let alt = self.alt_value(&record);

        let mut index = self.index.write();
        if index.primary.contains_key(key) {
            return Err(DbError::KeyInUse(key.to_string()));
        }
        let max_entries = self.max_entries();
        if max_entries > 0 && index.len() as u64 >= max_entries {
            return Err(DbError::TableFull {
                table: self.name.clone(),
                max_entries,
            });
        }

        let mut registry = self.uniques.lock();
        registry.check(&uniques)?;

        let locator = self.append(key, password.as_deref(), &record)?;
        registry.add(&uniques);
        drop(registry);

        let data = self.keeps_data().then_some(record);
        let entry = Arc::new(Entry::new(key.to_string(), password, data, locator));
        if let Some(alt) = alt {
            index.alt.insert(alt, entry.clone());
        }
        index.primary.insert(key.to_string(), entry);
        Ok(locator)
    }

    /// Renders the record of `entry`.
    pub fn read(&self, entry: &Arc<Entry>, selection: Option<&Map<String, Json>>) -> Result<Map<String, Json>, DbError> {
        let state = entry.state.lock();
        if state.deleted {
            return Err(DbError::NoEntryFound);
        }
        let record = self.load(&state)?;
        Filter::new(FilterMode::Get, self.encrypt_cost()).get_record(&self.schema, &record, selection)
    }

    /// Applies `updates` to the record under `key`.
    ///
    /// With `expected` set, the live entry must be that exact entry; this
    /// guards callers that verified a password before taking any lock.
    pub fn update(
        &self,
        key: &str,
        expected: Option<&Arc<Entry>>,
        updates: &Map<String, Json>,
    ) -> Result<(), DbError> {
        {
            // The alt-login item only changes under the index write lock.
            let index = self.index.read();
            if !self.touches_alt(updates) {
                let entry = live_entry(&index, key, expected)?;
                self.update_entry(&entry, updates)?;
                return Ok(());
            }
        }

        let mut index = self.index.write();
        let entry = live_entry(&index, key, expected)?;
        if let Some((old, new)) = self.update_entry(&entry, updates)? {
            if let Some(old) = old {
                index.alt.remove(&old);
            }
            if let Some(new) = new {
                index.alt.insert(new, entry);
            }
        }
        Ok(())
    }

    fn touches_alt(&self, updates: &Map<String, Json>) -> bool {
        self.alt_login_item().is_some_and(|alt| {
            updates
                .keys()
                .any(|k| k.split('.').next() == Some(alt.as_str()))
        })
    }

    /// Returns the alt-login change, if any, as `(old, new)`.
    #[allow(clippy::type_complexity)]
    fn update_entry(
        &self,
        entry: &Arc<Entry>,
        updates: &Map<String, Json>,
    ) -> Result<Option<(Option<String>, Option<String>)>, DbError> {
        let mut registry = self.has_uniques.then(|| self.uniques.lock());
        let mut state = entry.state.lock();
        if state.deleted {
            return Err(DbError::NoEntryFound);
        }

        let old = self.load(&state)?;
        let next = Filter::new(FilterMode::Write, self.encrypt_cost()).update_record(&self.schema, &old, updates)?;
        self.check_record(&next)?;

        let (added, removed) = if self.has_uniques {
            diff(
                &collect_uniques(&self.schema, &old),
                &collect_uniques(&self.schema, &next),
            )
        } else {
            (Vec::new(), Vec::new())
        };
        if let Some(registry) = registry.as_ref() {
            registry.check(&added)?;
        }
        let old_alt = self.alt_value(&old);
        let new_alt = self.alt_value(&next);
        drop(old);

        let password = entry.password.as_ref().map(|p| p.load_full());
        self.rewrite(
            &entry.key,
            password.as_ref().map(|p| p.as_str()),
            &next,
            state.locator,
        )?;
        if self.keeps_data() {
            state.data = Some(next);
        }
        drop(state);

        if let Some(registry) = registry.as_mut() {
            registry.remove(&removed);
            registry.add(&added);
        }
        Ok((old_alt != new_alt).then_some((old_alt, new_alt)))
    }

    /// Removes the record under `key` and tombstones its line.
    pub fn delete(&self, key: &str, expected: Option<&Arc<Entry>>) -> Result<(), DbError> {
        let mut index = self.index.write();
        let entry = live_entry(&index, key, expected)?;
        let mut registry = self.uniques.lock();
        let mut state = entry.state.lock();

        let record = self.load(&state)?;
        let uniques = collect_uniques(&self.schema, &record);
        let alt = self.alt_value(&record);
        drop(record);

        if !self.mem_only {
            self.storage
                .delete(&self.partition(state.locator.file), state.locator.line)?;
        }
        state.deleted = true;
        state.data = None;
        drop(state);

        registry.remove(&uniques);
        drop(registry);
        if let Some(alt) = alt {
            index.alt.remove(&alt);
        }
        index.primary.remove(key);
        Ok(())
    }

    /// Replaces the password hash of `entry` and rewrites its line.
    pub fn set_password(&self, entry: &Arc<Entry>, hash: String) -> Result<(), DbError> {
        let index = self.index.read();
        if !index.is_live(entry) {
            return Err(DbError::NoEntryFound);
        }
        let state = entry.state.lock();
        if state.deleted {
            return Err(DbError::NoEntryFound);
        }
        let record = self.load(&state)?;
        self.rewrite(&entry.key, Some(hash.as_str()), &record, state.locator)?;
        if let Some(slot) = &entry.password {
            slot.store(Arc::new(hash));
        }
        Ok(())
    }

    /// Returns the string value of a top-level item of `entry`.
    pub fn string_value(&self, entry: &Arc<Entry>, data_index: usize) -> Result<Option<String>, DbError> {
        let state = entry.state.lock();
        if state.deleted {
            return Err(DbError::NoEntryFound);
        }
        let record = self.load(&state)?;
        Ok(record.get(data_index).and_then(Value::as_str).map(str::to_string))
    }

    /// Replays every partition file into the (emptied) table.
    ///
    /// Returns the number of records loaded.
    pub fn restore(&self) -> Result<usize, DbError> {
        let mut index = self.index.write();
        let mut registry = self.uniques.lock();
        index.primary.clear();
        index.alt.clear();
        registry.clear();
        if self.mem_only {
            return Ok(0);
        }

        let mut filter = Filter::new(FilterMode::Restore, self.encrypt_cost());
        let mut restored = 0;
        let mut file_on = self.file_on();
        for file in self.partition_numbers()? {
            let path = self.partition(file);
            let lines = self.storage.read_lines(&path)?;
            for (i, line) in lines.iter().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let line_no = i as u32 + 1;
                let stored = match StoredRecord::decode(line) {
                    Ok(stored) => stored,
                    Err(e) => {
                        tracing::warn!("Skipping undecodable line {} of {}: {}", line_no, path.display(), e);
                        continue;
                    }
                };
                let key = stored
                    .primary()
                    .ok_or_else(|| {
                        DbError::RestoreItemSchema(format!("{} line {} has no key", path.display(), line_no))
                    })?
                    .to_string();
                if index.primary.contains_key(&key) {
                    return Err(DbError::KeyInUse(key));
                }

                let record = filter.decode_stored(&self.schema, &stored.data)?;
                let uniques = collect_uniques(&self.schema, &record);
                registry.check(&uniques)?;
                registry.add(&uniques);

                let alt = self.alt_value(&record);
                let data = self.keeps_data().then_some(record);
                let locator = Locator { file, line: line_no };
                let entry = Arc::new(Entry::new(key.clone(), stored.password, data, locator));
                if let Some(alt) = alt {
                    index.alt.insert(alt, entry.clone());
                }
                index.primary.insert(key, entry);
                restored += 1;
            }

            let next = if lines.len() as u32 >= self.partition_max() { file + 1 } else { file };
            file_on = file_on.max(next);
        }
        drop(registry);
        drop(index);

        if file_on != self.file_on() {
            self.file_on.store(file_on, Ordering::Release);
            self.persist_descriptor()?;
        }
        tracing::info!("Restored {} records into {} '{}'", restored, self.kind.label(), self.name);
        Ok(restored)
    }

    /// Sorted numbers of the partition files present in the table directory.
    fn partition_numbers(&self) -> Result<Vec<u32>, DbError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| classify_io_error(e, IoOp::Read, &self.dir))?;
        let mut numbers = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| classify_io_error(e, IoOp::Read, &self.dir))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(PARTITION_EXTENSION) {
                continue;
            }
            if let Some(n) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Closes the table's partition files, optionally rewriting the
    /// descriptor first.
    pub fn close(&self, persist: bool) -> Result<(), DbError> {
        if self.mem_only {
            return Ok(());
        }
        if persist {
            self.persist_descriptor()?;
        }
        self.storage.close_dir(&self.dir)
    }
}

fn live_entry(index: &EntryIndex, key: &str, expected: Option<&Arc<Entry>>) -> Result<Arc<Entry>, DbError> {
    let entry = index.primary.get(key).ok_or(DbError::NoEntryFound)?;
    if let Some(expected) = expected {
        if !Arc::ptr_eq(entry, expected) {
            return Err(DbError::NoEntryFound);
        }
    }
    Ok(entry.clone())
}

fn validate_table_name(name: &str) -> Result<(), DbError> {
    if name.is_empty() {
        return Err(DbError::TableNameRequired);
    }
    if name.contains(['/', '\\', '.', '*']) || name.chars().any(char::is_whitespace) {
        return Err(DbError::KeyInvalid(name.to_string()));
    }
    Ok(())
}

fn email_index(schema: &Schema, item: &str) -> Result<usize, DbError> {
    validation::string_item_index(schema, item).ok_or_else(|| {
        DbError::SchemaInvalid(format!("email item '{}' is not a top-level string", item))
    })
}

/// Whether `schema` has a unique string outside any Array or Map.
fn has_global_uniques(schema: &Schema) -> bool {
    fn walk(kind: &ItemKind) -> bool {
        match kind {
            ItemKind::String(spec) => spec.unique,
            ItemKind::Object(spec) => spec.schema.iter().any(|(_, item)| walk(&item.kind)),
            _ => false,
        }
    }
    schema.iter().any(|(_, item)| walk(&item.kind))
}
