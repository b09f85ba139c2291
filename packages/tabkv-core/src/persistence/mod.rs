//! Line-addressed partition storage with a timed open-file cache.
//!
//! Each partition file is a sequence of payloads separated by `\n`. The
//! storage layer keeps an [`OpenFile`] per file in active use: the OS handle,
//! a byte image of the file and the start offset of every line. Files idle
//! for longer than the configured open time are truncated to their image,
//! released and dropped from the cache; the next access reopens them.
//!
//! Lock order: open-file map, then the per-file mutex.


pub(crate) mod io_utils;
mod open_file;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::DbError;

use io_utils::{classify_io_error, IoOp};
use open_file::OpenFile;

pub use io_utils::write_atomic;

/// File extension of partition files.
pub const PARTITION_EXTENSION: &str = "gdbs";

/// Returns the path of partition `file` inside `dir`.
pub fn partition_path(dir: &Path, file: u32) -> PathBuf {
    dir.join(format!("{}.{}", file, PARTITION_EXTENSION))
}

type SharedFile = Arc<Mutex<OpenFile>>;

#[derive(Debug)]
struct StorageInner {
    files: Mutex<HashMap<PathBuf, SharedFile>>,
    file_open_time: Duration,
}

impl StorageInner {
    /// Closes every file idle for at least `file_open_time`.
    ///
    /// Files currently locked by an operation are skipped; that operation
    /// resets their timer before releasing the lock.
    fn sweep_idle(&self) {
        let mut files = self.files.lock();
        files.retain(|path, file| {
            let Some(mut guard) = file.try_lock() else {
                return true;
            };
            if guard.idle_for() < self.file_open_time {
                return true;
            }
            if let Err(e) = guard.close() {
                tracing::warn!(path = %path.display(), error = %e, "idle close failed");
            }
            false
        });
    }

    fn close_matching(&self, mut pred: impl FnMut(&Path) -> bool) -> Result<(), DbError> {
        let mut files = self.files.lock();
        let mut first_err = None;
        files.retain(|path, file| {
            if !pred(path) {
                return true;
            }
            if let Err(e) = file.lock().close() {
                first_err.get_or_insert(e);
            }
            false
        });
        first_err.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Default)]
struct SweepSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Newline-delimited, line-addressable persistence for records.
#[derive(Debug)]
pub struct Storage {
    inner: Arc<StorageInner>,
    signal: Arc<SweepSignal>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Storage {
    /// Creates a storage layer closing files after `file_open_time` idle.
    pub fn new(file_open_time: Duration) -> Self {
        let inner = Arc::new(StorageInner {
            files: Mutex::new(HashMap::new()),
            file_open_time,
        });
        let signal = Arc::new(SweepSignal::default());
        let sweeper = spawn_sweeper(Arc::downgrade(&inner), signal.clone(), file_open_time);

        Self {
            inner,
            signal,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Returns the idle close delay.
    pub fn file_open_time(&self) -> Duration {
        self.inner.file_open_time
    }

    /// Runs `op` on the loaded [`OpenFile`] for `path`, retrying when the
    /// cached record was closed between lookup and lock.
    fn with_file<T>(
        &self,
        path: &Path,
        op: impl FnOnce(&mut OpenFile) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        loop {
            let file = {
                let mut files = self.inner.files.lock();
                files
                    .entry(path.to_path_buf())
                    .or_insert_with(|| Arc::new(Mutex::new(OpenFile::new(path))))
                    .clone()
            };

            let mut guard = file.lock();
            if guard.is_closed() {
                continue;
            }
            guard.ensure_loaded()?;
            guard.touch();
            let result = op(&mut guard);
            guard.touch();
            return result;
        }
    }

    /// Appends `payload` to the file at `path` and returns its 1-based line.
    pub fn insert(&self, path: &Path, payload: &[u8]) -> Result<u32, DbError> {
        check_payload(payload)?;
        self.with_file(path, |file| file.append(payload))
    }

    /// Replaces the content of `line` in the file at `path`.
    pub fn update(&self, path: &Path, line: u32, payload: &[u8]) -> Result<(), DbError> {
        check_payload(payload)?;
        self.with_file(path, |file| file.replace(line, payload))
    }

    /// Tombstones `line` by writing an empty payload.
    pub fn delete(&self, path: &Path, line: u32) -> Result<(), DbError> {
        self.update(path, line, &[])
    }

    /// Returns the payload stored at `line`.
    pub fn read(&self, path: &Path, line: u32) -> Result<Vec<u8>, DbError> {
        self.with_file(path, |file| file.read(line))
    }

    /// Returns every line of the file at `path`, or nothing if it is absent.
    pub fn read_lines(&self, path: &Path) -> Result<Vec<Vec<u8>>, DbError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.with_file(path, |file| Ok(file.lines()))
    }

    /// Returns the number of lines in the file at `path`.
    pub fn line_count(&self, path: &Path) -> Result<u32, DbError> {
        self.with_file(path, |file| Ok(file.line_count()))
    }

    /// Creates `dir` and any missing parents.
    pub fn create_dir(&self, dir: &Path) -> Result<(), DbError> {
        fs::create_dir_all(dir).map_err(|e| classify_io_error(e, IoOp::CreateDir, dir))
    }

    /// Closes every cached file under `dir` and removes the directory.
    pub fn remove_dir(&self, dir: &Path) -> Result<(), DbError> {
        self.close_dir(dir)?;
        if !dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(dir).map_err(|e| classify_io_error(e, IoOp::RemoveDir, dir))
    }

    /// Closes every cached file under `dir`.
    pub fn close_dir(&self, dir: &Path) -> Result<(), DbError> {
        self.inner.close_matching(|path| path.starts_with(dir))
    }

    /// Closes the cached file for `path`, if any.
    pub fn close_file(&self, path: &Path) -> Result<(), DbError> {
        self.inner.close_matching(|p| p == path)
    }

    /// Closes every cached file.
    pub fn close_all(&self) -> Result<(), DbError> {
        self.inner.close_matching(|_| true)
    }

    /// Returns the number of files currently held open.
    pub fn open_file_count(&self) -> usize {
        let files = self.inner.files.lock();
        files.values().filter(|f| f.lock().is_loaded()).count()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.wake.notify_all();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
        if let Err(e) = self.close_all() {
            tracing::warn!(error = %e, "failed to close partition files on shutdown");
        }
    }
}

fn check_payload(payload: &[u8]) -> Result<(), DbError> {
    if payload.contains(&b'\n') {
        return Err(DbError::InvalidPayload);
    }
    Ok(())
}

fn spawn_sweeper(
    inner: Weak<StorageInner>,
    signal: Arc<SweepSignal>,
    file_open_time: Duration,
) -> Option<JoinHandle<()>> {
    let interval = (file_open_time / 4).max(Duration::from_millis(1));
    let spawned = thread::Builder::new()
        .name("tabkv-file-sweeper".to_string())
        .spawn(move || loop {
            {
                let mut stopped = signal.stopped.lock();
                if !*stopped {
                    signal.wake.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    return;
                }
            }
            match inner.upgrade() {
                Some(inner) => inner.sweep_idle(),
                None => return,
            }
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "file sweeper not started; files close on shutdown only");
            None
        }
    }
}
