//! Whole-file writes that readers never observe half done.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    config::{global_config, RetryPolicy},
    storage::{Bytes, StorageError},
};

/// The extension of temporary files written before a rename.
pub(crate) const PARTIAL_EXTENSION: &str = "partial";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns true if `path` is a temporary file left behind by an interrupted write.
pub(crate) fn is_partial(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension == PARTIAL_EXTENSION)
}

/// Writes files through a uniquely named sibling temporary file and an atomic rename.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AtomicFileWriter {
    verify: bool,
}

impl AtomicFileWriter {
    /// Create a writer. With `verify`, every write is read back and repeated on mismatch.
    pub(crate) const fn new(verify: bool) -> Self {
        Self { verify }
    }

    /// Write `value` to `path`, replacing any existing file.
    ///
    /// The parent directory must exist.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the write or rename fails,
    /// or [`StorageError::VerificationFailed`] if verification is enabled and the file never reads back as `value`.
    pub(crate) fn write(&self, path: &Path, value: &[u8]) -> Result<(), StorageError> {
        if !self.verify {
            return write_once(path, value);
        }

        let attempts = global_config().verify_attempts();
        for attempt in 1..=attempts {
            write_once(path, value)?;
            if read(path)?.is_some_and(|written| written == value) {
                return Ok(());
            }
            log::warn!(
                "verification of {} failed (attempt {attempt} of {attempts})",
                path.display()
            );
        }
        Err(StorageError::VerificationFailed {
            path: path.to_path_buf(),
            attempts,
        })
    }
}

/// Read the whole file at `path`, or [`None`] if it does not exist.
pub(crate) fn read(path: &Path) -> Result<Option<Bytes>, StorageError> {
    match std::fs::read(path) {
        Ok(value) => Ok(Some(Bytes::from(value))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Remove the file at `path`. Returns false if there was nothing to remove.
pub(crate) fn remove(path: &Path) -> Result<bool, StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        "{file_name}.{}-{}.{PARTIAL_EXTENSION}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

fn write_temp(temp_path: &Path, value: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(temp_path)?;
    file.write_all(value)?;
    file.sync_all()
}

fn write_once(path: &Path, value: &[u8]) -> Result<(), StorageError> {
    let temp_path = temp_path(path);
    let result = write_temp(&temp_path, value)
        .map_err(StorageError::from)
        .and_then(|()| rename_with_retry(&temp_path, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

/// Rename `from` to `to`, retrying while the destination is held open by another program.
fn rename_with_retry(from: &Path, to: &Path) -> Result<(), StorageError> {
    let policy = RetryPolicy::from_global();
    let mut attempt = 0;
    loop {
        match std::fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(err)
                if err.kind() == std::io::ErrorKind::PermissionDenied
                    && attempt + 1 < policy.attempts =>
            {
                log::warn!(
                    "renaming {} failed with {err}, retrying (attempt {} of {})",
                    to.display(),
                    attempt + 1,
                    policy.attempts
                );
                std::thread::sleep(policy.delay(attempt));
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
