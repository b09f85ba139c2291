//! I/O utilities for persistence operations.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::DbError;

/// Storage operation that produced an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Read,
    Append,
    Update,
    CreateDir,
    RemoveDir,
}

/// Classifies I/O errors into the storage error variant for `op`.
pub fn classify_io_error(error: std::io::Error, op: IoOp, path: &Path) -> DbError {
    let reason = match error.kind() {
        ErrorKind::StorageFull | ErrorKind::OutOfMemory => format!("disk full: {}", error),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            format!("transient: {}", error)
        }
        _ => error.to_string(),
    };
    let path = path.to_path_buf();
    match op {
        IoOp::Open => DbError::FileOpen { path, reason },
        IoOp::Read => DbError::FileRead { path, reason },
        IoOp::Append => DbError::FileAppend { path, reason },
        IoOp::Update => DbError::FileUpdate { path, reason },
        IoOp::CreateDir => DbError::DirCreate { path, reason },
        IoOp::RemoveDir => DbError::DirRemove { path, reason },
    }
}

/// Writes `contents` to `path` through a temporary sibling and a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), DbError> {
    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| classify_io_error(e, IoOp::Update, &temp_path))?;
    file.write_all(contents)
        .map_err(|e| classify_io_error(e, IoOp::Update, &temp_path))?;
    file.sync_all()
        .map_err(|e| classify_io_error(e, IoOp::Update, &temp_path))?;

    fs::rename(&temp_path, path).map_err(|e| classify_io_error(e, IoOp::Update, path))
}
