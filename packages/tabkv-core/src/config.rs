//! Database configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Database configuration.
///
/// Table-level fields are defaults applied when a table is created without
/// overriding them in its options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Root directory holding one sub-directory per table
    pub data_dir: PathBuf,
    /// Idle time before a cached partition file is closed, in milliseconds
    pub file_open_time_ms: u64,
    /// Maximum lines per partition file
    pub partition_max: u32,
    /// Maximum entries per table (0 = unbounded)
    pub max_entries: u64,
    /// Cost parameter for password and encrypted string hashing
    pub encrypt_cost: u32,
    /// Minimum password length for auth tables
    pub min_password: u32,
    /// Length of generated reset passwords
    pub pass_reset_len: u32,
}

impl DbConfig {
    /// Returns the idle close delay as a `Duration`.
    pub fn file_open_time(&self) -> Duration {
        Duration::from_millis(self.file_open_time_ms)
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            file_open_time_ms: 10_000, // 10 seconds default
            partition_max: 5_000,
            max_entries: 0,
            encrypt_cost: 2,
            min_password: 6,
            pass_reset_len: 12,
        }
    }
}

/// Options for a new Keystore.
#[derive(Debug, Clone, PartialEq)]
pub struct TableOptions {
    /// Maximum lines per partition file
    pub partition_max: u32,
    /// Maximum entries (0 = unbounded)
    pub max_entries: u64,
    /// Hashing cost for encrypted strings
    pub encrypt_cost: u32,
    /// Keep records on disk only and reload them on every read
    pub data_on_drive: bool,
    /// Keep records in memory only; nothing is written to disk
    pub mem_only: bool,
}

impl From<&DbConfig> for TableOptions {
    fn from(config: &DbConfig) -> Self {
        Self {
            partition_max: config.partition_max,
            max_entries: config.max_entries,
            encrypt_cost: config.encrypt_cost,
            data_on_drive: false,
            mem_only: false,
        }
    }
}

impl Default for TableOptions {
    fn default() -> Self {
        Self::from(&DbConfig::default())
    }
}

/// Options for a new AuthTable.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthTableOptions {
    pub table: TableOptions,
    pub min_password: u32,
    pub pass_reset_len: u32,
    /// Top-level String item holding the user's email
    pub email_item: Option<String>,
    /// Top-level unique String item accepted in place of the user name
    pub alt_login_item: Option<String>,
}

impl From<&DbConfig> for AuthTableOptions {
    fn from(config: &DbConfig) -> Self {
        Self {
            table: TableOptions::from(config),
            min_password: config.min_password,
            pass_reset_len: config.pass_reset_len,
            email_item: None,
            alt_login_item: None,
        }
    }
}

impl Default for AuthTableOptions {
    fn default() -> Self {
        Self::from(&DbConfig::default())
    }
}

/// Options for a new Leaderboard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeaderboardOptions {
    /// Capacity (0 = unbounded)
    pub max_entries: usize,
    /// On a tie, place the newcomer above the tied entries
    pub dup_push_above: bool,
    /// Move an existing name even when its new target is worse
    pub always_replace: bool,
}
