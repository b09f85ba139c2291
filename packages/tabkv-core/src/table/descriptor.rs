//! Table configuration descriptor persisted as `config.gdbc`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::persistence::io_utils::{classify_io_error, IoOp};
use crate::persistence::write_atomic;
use crate::types::Schema;

/// File name of the descriptor inside a table directory.
pub const DESCRIPTOR_FILE: &str = "config.gdbc";

/// Table flavour backed by a partition directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Keystore,
    AuthTable,
}

impl TableKind {
    /// Directory name prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            TableKind::Keystore => "KS-",
            TableKind::AuthTable => "AT-",
        }
    }

    /// Returns the directory of table `name` under `data_dir`.
    pub fn table_dir(self, data_dir: &Path, name: &str) -> PathBuf {
        data_dir.join(format!("{}{}", self.prefix(), name))
    }

    pub fn label(self) -> &'static str {
        match self {
            TableKind::Keystore => "Keystore",
            TableKind::AuthTable => "AuthTable",
        }
    }
}

/// AuthTable-only knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthDescriptor {
    pub min_password: u32,
    pub pass_reset_len: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_login_item: Option<String>,
}

/// Everything needed to rebuild a table from its directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub kind: TableKind,
    pub schema: Schema,
    /// Partition currently receiving appends
    pub file_on: u32,
    pub data_on_drive: bool,
    pub mem_only: bool,
    pub partition_max: u32,
    pub encrypt_cost: u32,
    pub max_entries: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDescriptor>,
}

impl TableDescriptor {
    /// Reads the descriptor stored in `dir`.
    pub fn load(dir: &Path) -> Result<Self, DbError> {
        let path = dir.join(DESCRIPTOR_FILE);
        let bytes = fs::read(&path).map_err(|e| {
            let op = if e.kind() == ErrorKind::NotFound {
                IoOp::Open
            } else {
                IoOp::Read
            };
            classify_io_error(e, op, &path)
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DbError::Decode(format!("{}: {}", path.display(), e)))
    }

    /// Atomically rewrites the descriptor in `dir` as a single line.
    pub fn store(&self, dir: &Path) -> Result<(), DbError> {
        let mut bytes = serde_json::to_vec(self).map_err(|e| DbError::Encode(e.to_string()))?;
        bytes.push(b'\n');
        write_atomic(&dir.join(DESCRIPTOR_FILE), &bytes)
    }
}
