//! AuthTable: user records guarded by a hashed password.
//!
//! Every operation taking a `(name, password)` pair accepts either the user
//! name or the user's current alt-login value, and reports a missing user and
//! a wrong password identically as `NoEntryFound`.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::config::AuthTableOptions;
use crate::crypto;
use crate::error::DbError;
use crate::persistence::Storage;
use crate::types::Schema;

use super::descriptor::{TableDescriptor, TableKind};
use super::entry::{Entry, Locator};
use super::table::{AuthKnobs, TableCore};
use super::validation::{string_item_index, validate_name, validate_password};

/// Delivers a freshly generated password to its user.
///
/// The new password only takes effect once delivery succeeds.
pub trait PasswordResetNotifier {
    fn deliver(&self, user: &str, email: &str, new_password: &str) -> Result<(), String>;
}

impl<F> PasswordResetNotifier for F
where
    F: Fn(&str, &str, &str) -> Result<(), String>,
{
    fn deliver(&self, user: &str, email: &str, new_password: &str) -> Result<(), String> {
        self(user, email, new_password)
    }
}

#[derive(Debug)]
pub struct AuthTable {
    core: TableCore,
}

impl AuthTable {
    pub(crate) fn create(
        name: &str,
        data_dir: &Path,
        schema: Schema,
        options: &AuthTableOptions,
        storage: Arc<Storage>,
    ) -> Result<Self, DbError> {
        let knobs = AuthKnobs::new(
            options.min_password,
            options.pass_reset_len,
            options.email_item.clone(),
            options.alt_login_item.clone(),
        );
        let core = TableCore::create(
            name,
            TableKind::AuthTable,
            data_dir,
            schema,
            &options.table,
            Some(knobs),
            storage,
        )?;
        Ok(Self { core })
    }

    /// Loads the descriptor under `dir` and replays the table's users.
    pub(crate) fn open(dir: &Path, storage: Arc<Storage>) -> Result<Self, DbError> {
        let descriptor = TableDescriptor::load(dir)?;
        if descriptor.kind != TableKind::AuthTable || descriptor.auth.is_none() {
            return Err(DbError::TableKindMismatch {
                table: descriptor.name,
                expected: TableKind::AuthTable.label(),
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

    pub fn dir(&self) -> &Path {
        &self.core.dir
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves `name` and checks `password` against the stored hash.
    fn authenticate(&self, name: &str, password: &str) -> Result<Arc<Entry>, DbError> {
        let entry = self.core.lookup(name)?;
        let hash = entry
            .password
            .as_ref()
            .map(|slot| slot.load_full())
            .ok_or(DbError::NoEntryFound)?;
        if !crypto::verify(password, &hash) {
            return Err(DbError::NoEntryFound);
        }
        Ok(entry)
    }

    /// Creates a user.
    ///
    /// # Arguments
    /// * `name` - User name; must be non-empty and contain no whitespace
    /// * `password` - Plain password of at least `min_password` characters
    /// * `obj` - Item values; absent items take their defaults
    pub fn new_user(&self, name: &str, password: &str, obj: &Map<String, Json>) -> Result<Locator, DbError> {
        validate_name(name)?;
        validate_password(password, self.min_password())?;
        let hash = crypto::encrypt(password, self.core.encrypt_cost())?;
        self.core.insert(name, Some(hash), obj)
    }

    pub fn get_user_data(
        &self,
        name: &str,
        password: &str,
        selection: Option<&Map<String, Json>>,
    ) -> Result<Map<String, Json>, DbError> {
        let entry = self.authenticate(name, password)?;
        self.core.read(&entry, selection)
    }

    pub fn update_user_data(&self, name: &str, password: &str, updates: &Map<String, Json>) -> Result<(), DbError> {
        let entry = self.authenticate(name, password)?;
        self.core.update(&entry.key, Some(&entry), updates)
    }

    pub fn delete_user(&self, name: &str, password: &str) -> Result<(), DbError> {
        let entry = self.authenticate(name, password)?;
        self.core.delete(&entry.key, Some(&entry))
    }

    pub fn change_user_password(&self, name: &str, old_password: &str, new_password: &str) -> Result<(), DbError> {
        validate_password(new_password, self.min_password())?;
        let entry = self.authenticate(name, old_password)?;
        let hash = crypto::encrypt(new_password, self.core.encrypt_cost())?;
        self.core.set_password(&entry, hash)
    }

    /// Replaces the user's password with a random one of `pass_reset_len`
    /// characters and hands it to `notifier`.
    ///
    /// Requires a configured email item and a non-empty email on the user.
    /// When delivery fails the old password stays in place.
    pub fn reset_user_password(&self, name: &str, notifier: &dyn PasswordResetNotifier) -> Result<(), DbError> {
        let item = self.core.email_item().ok_or(DbError::NoEmailItem)?;
        let data_index = string_item_index(&self.core.schema, &item).ok_or(DbError::NoEmailItem)?;
        let entry = self.core.lookup(name)?;
        let email = self
            .core
            .string_value(&entry, data_index)?
            .filter(|email| !email.is_empty())
            .ok_or(DbError::NoEmailItem)?;

        let plain = crypto::random_password(self.pass_reset_len());
        let hash = crypto::encrypt(&plain, self.core.encrypt_cost())?;
        if let Err(reason) = notifier.deliver(&entry.key, &email, &plain) {
            tracing::warn!("Password reset for '{}' not delivered: {}", entry.key, reason);
            return Err(DbError::PasswordResetDelivery(reason));
        }
        self.core.set_password(&entry, hash)?;
        tracing::debug!("Password reset for '{}' in '{}'", entry.key, self.core.name);
        Ok(())
    }

    pub fn restore(&self) -> Result<usize, DbError> {
        self.core.restore()
    }

    pub fn close(&self, persist: bool) -> Result<(), DbError> {
        self.core.close(persist)
    }

    // ---- tunables ----

    fn knobs(&self) -> Option<&AuthKnobs> {
        self.core.auth.as_ref()
    }

    pub fn min_password(&self) -> u32 {
        self.knobs()
            .map_or(0, |k| k.min_password.load(Ordering::Acquire))
    }

    pub fn set_min_password(&self, min_password: u32) -> Result<(), DbError> {
        self.core
            .auth_knobs()?
            .min_password
            .store(min_password, Ordering::Release);
        self.core.persist_descriptor()
    }

    pub fn pass_reset_len(&self) -> u32 {
        self.knobs()
            .map_or(0, |k| k.pass_reset_len.load(Ordering::Acquire))
    }

    pub fn set_pass_reset_len(&self, pass_reset_len: u32) -> Result<(), DbError> {
        self.core
            .auth_knobs()?
            .pass_reset_len
            .store(pass_reset_len, Ordering::Release);
        self.core.persist_descriptor()
    }

    pub fn email_item(&self) -> Option<String> {
        self.core.email_item().map(|s| s.to_string())
    }

    /// Sets the top-level String item holding user emails.
    pub fn set_email_item(&self, item: Option<&str>) -> Result<(), DbError> {
        self.core.set_email_item(item.map(str::to_string))
    }

    pub fn alt_login_item(&self) -> Option<String> {
        self.core.alt_login_item().map(|s| s.to_string())
    }

    /// Sets the unique String item accepted in place of the user name.
    pub fn set_alt_login_item(&self, item: Option<&str>) -> Result<(), DbError> {
        self.core.set_alt_login_item(item.map(str::to_string))
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

    pub fn file_on(&self) -> u32 {
        self.core.file_on()
    }

    pub fn unique_count(&self, path: &str) -> usize {
        self.core.unique_count(path)
    }
}
