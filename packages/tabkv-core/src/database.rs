//! Database container managing Keystores, AuthTables and Leaderboards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{AuthTableOptions, DbConfig, LeaderboardOptions, TableOptions};
use crate::error::DbError;
use crate::leaderboard::Leaderboard;
use crate::persistence::Storage;
use crate::table::{AuthTable, Keystore, TableKind};
use crate::types::Schema;

/// A registered table of any kind.
#[derive(Debug, Clone)]
pub enum TableHandle {
    Keystore(Arc<Keystore>),
    AuthTable(Arc<AuthTable>),
    Leaderboard(Arc<Leaderboard>),
}

impl TableHandle {
    pub fn label(&self) -> &'static str {
        match self {
            TableHandle::Keystore(_) => TableKind::Keystore.label(),
            TableHandle::AuthTable(_) => TableKind::AuthTable.label(),
            TableHandle::Leaderboard(_) => "Leaderboard",
        }
    }

    fn close(&self, persist: bool) -> Result<(), DbError> {
        match self {
            TableHandle::Keystore(ks) => ks.close(persist),
            TableHandle::AuthTable(at) => at.close(persist),
            TableHandle::Leaderboard(_) => Ok(()),
        }
    }
}

/// Database container holding every table and the shared partition storage.
///
/// Table names are unique across kinds.
#[derive(Debug)]
pub struct Database {
    config: DbConfig,
    /// Open-file cache shared by all tables
    storage: Arc<Storage>,
    /// Map of table name to table
    tables: RwLock<HashMap<String, TableHandle>>,
}

impl Database {
    /// Creates an empty database rooted at `config.data_dir`.
    pub fn new(config: DbConfig) -> Self {
        let storage = Arc::new(Storage::new(config.file_open_time()));
        Self {
            config,
            storage,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Table options seeded from the database defaults.
    pub fn table_options(&self) -> TableOptions {
        TableOptions::from(&self.config)
    }

    pub fn auth_table_options(&self) -> AuthTableOptions {
        AuthTableOptions::from(&self.config)
    }

    /// Number of partition files currently held open.
    pub fn open_file_count(&self) -> usize {
        self.storage.open_file_count()
    }

    fn register<T>(
        &self,
        name: &str,
        build: impl FnOnce() -> Result<Arc<T>, DbError>,
        wrap: impl FnOnce(Arc<T>) -> TableHandle,
    ) -> Result<Arc<T>, DbError> {
        if name.is_empty() {
            return Err(DbError::TableNameRequired);
        }
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(DbError::TableExists(name.to_string()));
        }
        let table = build()?;
        tables.insert(name.to_string(), wrap(table.clone()));
        Ok(table)
    }

    /// Creates a new Keystore.
    ///
    /// # Arguments
    /// * `name` - Table name, unique across all table kinds
    /// * `schema` - Item definitions for every record
    /// * `options` - Storage and capacity options, see [`Database::table_options`]
    pub fn create_keystore(
        &self,
        name: &str,
        schema: Schema,
        options: &TableOptions,
    ) -> Result<Arc<Keystore>, DbError> {
        self.register(
            name,
            || Keystore::create(name, &self.config.data_dir, schema, options, self.storage.clone()).map(Arc::new),
            TableHandle::Keystore,
        )
    }

    /// Creates a new AuthTable.
    pub fn create_auth_table(
        &self,
        name: &str,
        schema: Schema,
        options: &AuthTableOptions,
    ) -> Result<Arc<AuthTable>, DbError> {
        self.register(
            name,
            || AuthTable::create(name, &self.config.data_dir, schema, options, self.storage.clone()).map(Arc::new),
            TableHandle::AuthTable,
        )
    }

    /// Creates a new in-memory Leaderboard.
    pub fn create_leaderboard(&self, name: &str, options: LeaderboardOptions) -> Result<Arc<Leaderboard>, DbError> {
        self.register(
            name,
            || Leaderboard::new(name, options).map(Arc::new),
            TableHandle::Leaderboard,
        )
    }

    /// Rebuilds a Keystore from its directory under the data directory.
    pub fn restore_keystore(&self, name: &str) -> Result<Arc<Keystore>, DbError> {
        let dir = TableKind::Keystore.table_dir(&self.config.data_dir, name);
        let ks = self.register(
            name,
            || Keystore::open(&dir, self.storage.clone()).map(Arc::new),
            TableHandle::Keystore,
        )?;
        tracing::info!("Keystore '{}' restored with {} entries", name, ks.len());
        Ok(ks)
    }

    /// Rebuilds an AuthTable from its directory under the data directory.
    pub fn restore_auth_table(&self, name: &str) -> Result<Arc<AuthTable>, DbError> {
        let dir = TableKind::AuthTable.table_dir(&self.config.data_dir, name);
        let at = self.register(
            name,
            || AuthTable::open(&dir, self.storage.clone()).map(Arc::new),
            TableHandle::AuthTable,
        )?;
        tracing::info!("AuthTable '{}' restored with {} users", name, at.len());
        Ok(at)
    }

    /// Gets a table of any kind by name.
    pub fn table(&self, name: &str) -> Result<TableHandle, DbError> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn keystore(&self, name: &str) -> Result<Arc<Keystore>, DbError> {
        match self.table(name)? {
            TableHandle::Keystore(ks) => Ok(ks),
            _ => Err(DbError::TableKindMismatch {
                table: name.to_string(),
                expected: TableKind::Keystore.label(),
            }),
        }
    }

    pub fn auth_table(&self, name: &str) -> Result<Arc<AuthTable>, DbError> {
        match self.table(name)? {
            TableHandle::AuthTable(at) => Ok(at),
            _ => Err(DbError::TableKindMismatch {
                table: name.to_string(),
                expected: TableKind::AuthTable.label(),
            }),
        }
    }

    pub fn leaderboard(&self, name: &str) -> Result<Arc<Leaderboard>, DbError> {
        match self.table(name)? {
            TableHandle::Leaderboard(lb) => Ok(lb),
            _ => Err(DbError::TableKindMismatch {
                table: name.to_string(),
                expected: "Leaderboard",
            }),
        }
    }

    /// Unregisters a table and closes its files. The table directory is
    /// left on disk.
    pub fn delete_table(&self, name: &str) -> Result<(), DbError> {
        let handle = self
            .tables
            .write()
            .remove(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))?;
        handle.close(false)?;
        tracing::info!("Deleted {} '{}'", handle.label(), name);
        Ok(())
    }

    /// Returns all table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    /// Closes every table, optionally rewriting descriptors first.
    ///
    /// Every table is attempted; the first failure is returned.
    pub fn close(&self, persist: bool) -> Result<(), DbError> {
        let tables = self.tables.read();
        let mut first_error = None;
        for (name, handle) in tables.iter() {
            if let Err(e) = handle.close(persist) {
                tracing::warn!("Failed to close {} '{}': {}", handle.label(), name, e);
                first_error.get_or_insert(e);
            }
        }
        drop(tables);

        if let Err(e) = self.storage.close_all() {
            first_error.get_or_insert(e);
        }
        tracing::info!("Database closed");
        first_error.map_or(Ok(()), Err)
    }
}
