//! Cached view of one partition file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::DbError;

use super::io_utils::{classify_io_error, IoOp};

/// Cached partition file: OS handle, byte image and line start offsets.
///
/// Lines are 1-based. `line_starts[n - 1]` is the byte offset of line `n`
/// inside `image`; a line ends at the next `\n` or at the end of the image.
#[derive(Debug)]
pub(crate) struct OpenFile {
    path: PathBuf,
    handle: Option<File>,
    image: Vec<u8>,
    line_starts: Vec<usize>,
    last_used: Instant,
    /// Set once the idle sweeper (or shutdown) has released this file.
    /// A closed record is never reloaded; callers fetch a fresh one.
    closed: bool,
}

impl OpenFile {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            handle: None,
            image: Vec::new(),
            line_starts: Vec::new(),
            last_used: Instant::now(),
            closed: false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    /// Resets the idle timer.
    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> std::time::Duration {
        self.last_used.elapsed()
    }

    /// Opens the file (creating it if missing) and caches its content.
    pub(crate) fn ensure_loaded(&mut self) -> Result<(), DbError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| classify_io_error(e, IoOp::Open, &self.path))?;

        let mut image = Vec::new();
        file.read_to_end(&mut image)
            .map_err(|e| classify_io_error(e, IoOp::Read, &self.path))?;

        self.line_starts = scan_line_starts(&image);
        self.image = image;
        self.handle = Some(file);

        tracing::debug!(
            path = %self.path.display(),
            lines = self.line_starts.len(),
            "opened partition file"
        );
        Ok(())
    }

    pub(crate) fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }

    /// Returns `[start, end)` of `line` within the image, newline excluded.
    fn line_range(&self, line: u32) -> Result<(usize, usize), DbError> {
        if line == 0 || line as usize > self.line_starts.len() {
            return Err(DbError::LineOutOfRange {
                path: self.path.clone(),
                line,
            });
        }
        let start = self.line_starts[line as usize - 1];
        let end = self.image[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|n| start + n)
            .unwrap_or(self.image.len());
        Ok((start, end))
    }

    /// Appends `payload` as a new line and returns its 1-based index.
    pub(crate) fn append(&mut self, payload: &[u8]) -> Result<u32, DbError> {
        let write_from = self.image.len();
        // Keep line boundaries intact if a previous write was cut short.
        if self.image.last().is_some_and(|&b| b != b'\n') {
            self.image.push(b'\n');
        }
        let start = self.image.len();
        self.image.extend_from_slice(payload);
        self.image.push(b'\n');

        if let Err(e) = self.write_tail(write_from, IoOp::Append) {
            self.image.truncate(write_from);
            return Err(e);
        }
        self.line_starts.push(start);
        Ok(self.line_starts.len() as u32)
    }

    /// Replaces the content of `line` with `payload`.
    ///
    /// Subsequent line offsets shift by the length difference. A shorter
    /// payload also truncates the OS file so no stale tail survives a crash.
    pub(crate) fn replace(&mut self, line: u32, payload: &[u8]) -> Result<(), DbError> {
        let (start, end) = self.line_range(line)?;
        let delta = payload.len() as isize - (end - start) as isize;

        self.image.splice(start..end, payload.iter().copied());
        for offset in self.line_starts[line as usize..].iter_mut() {
            *offset = (*offset as isize + delta) as usize;
        }

        self.write_tail(start, IoOp::Update)?;
        if delta < 0 {
            self.truncate_to_image(IoOp::Update)?;
        }
        Ok(())
    }

    /// Returns a copy of `line`'s payload.
    pub(crate) fn read(&self, line: u32) -> Result<Vec<u8>, DbError> {
        let (start, end) = self.line_range(line)?;
        Ok(self.image[start..end].to_vec())
    }

    /// Returns every line payload in order, tombstones included as empty.
    pub(crate) fn lines(&self) -> Vec<Vec<u8>> {
        (1..=self.line_count())
            .filter_map(|line| self.read(line).ok())
            .collect()
    }

    fn write_tail(&mut self, from: usize, op: IoOp) -> Result<(), DbError> {
        let file = self.handle.as_mut().ok_or_else(|| {
            DbError::Unexpected(format!("{} written while unloaded", self.path.display()))
        })?;
        file.seek(SeekFrom::Start(from as u64))
            .map_err(|e| classify_io_error(e, op, &self.path))?;
        file.write_all(&self.image[from..])
            .map_err(|e| classify_io_error(e, op, &self.path))
    }

    fn truncate_to_image(&mut self, op: IoOp) -> Result<(), DbError> {
        let image_len = self.image.len() as u64;
        if let Some(file) = self.handle.as_mut() {
            file.set_len(image_len)
                .map_err(|e| classify_io_error(e, op, &self.path))?;
        }
        Ok(())
    }

    /// Truncates the OS file to the image length and releases everything.
    pub(crate) fn close(&mut self) -> Result<(), DbError> {
        self.closed = true;
        let image_len = self.image.len() as u64;
        self.image = Vec::new();
        self.line_starts = Vec::new();

        if let Some(file) = self.handle.take() {
            file.set_len(image_len)
                .map_err(|e| classify_io_error(e, IoOp::Update, &self.path))?;
            tracing::debug!(path = %self.path.display(), "closed partition file");
        }
        Ok(())
    }
}

/// Computes the start offset of every line in `image`.
pub(crate) fn scan_line_starts(image: &[u8]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut pos = 0;
    while pos < image.len() {
        starts.push(pos);
        match image[pos..].iter().position(|&b| b == b'\n') {
            Some(n) => pos += n + 1,
            None => break,
        }
    }
    starts
}
