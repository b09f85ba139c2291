//! Schema-validated, partitioned key-value table engine.
//!
//! Provides Keystores, AuthTables and Leaderboards, a typed value filter
//! with a method sublanguage for reads and updates, and line-oriented
//! partition storage with timed file close.

pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod filter;
pub mod leaderboard;
pub mod persistence;
pub mod table;
pub mod types;

pub use config::{AuthTableOptions, DbConfig, LeaderboardOptions, TableOptions};
pub use database::{Database, TableHandle};
pub use error::DbError;
pub use leaderboard::{Leaderboard, LeaderboardEntry};
pub use table::{AuthTable, Keystore, Locator, PasswordResetNotifier};
pub use types::{ItemKind, Schema, Value};
