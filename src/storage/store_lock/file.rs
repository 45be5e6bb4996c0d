//! Cross-process shard mutex backed by lock files.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use crate::config::global_config;

use super::{
    flock, ShardLockError, ShardLocksTraits, ShardMutex, ShardMutexGuard, ShardMutexGuardTraits,
    ShardMutexTraits,
};

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// File shard mutex guard.
///
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct FileShardMutexGuard {
    file: File,
}

impl ShardMutexGuardTraits for FileShardMutexGuard {}

impl Drop for FileShardMutexGuard {
    fn drop(&mut self) {
        flock::unlock(&self.file);
    }
}

/// File shard mutex.
#[derive(Debug)]
pub struct FileShardMutex {
    path: PathBuf,
    timeout: Duration,
}

impl FileShardMutex {
    /// Returns the path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<FileShardMutexGuard, ShardLockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let deadline = Instant::now() + self.timeout;
        let mut interval = Duration::from_millis(1);
        loop {
            if flock::try_lock(&file, true)? {
                return Ok(FileShardMutexGuard { file });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ShardLockError::Timeout {
                    path: self.path.clone(),
                    timeout: self.timeout,
                });
            }
            std::thread::sleep(interval.min(deadline - now));
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
        }
    }
}

impl ShardMutexTraits for FileShardMutex {
    fn lock(&self) -> Result<ShardMutexGuard<'_>, ShardLockError> {
        Ok(Box::new(self.lock_file()?))
    }
}

/// File shard locks.
///
/// Each shard container is guarded by an exclusive `flock` on a lock file in a lock directory shared by all cooperating processes.
/// Lock files are named by a hash of the absolute container path, so every process must open the store through the same path.
/// Hash collisions only serialise unrelated containers.
///
/// Lock files are left in place after use.
#[derive(Debug)]
pub struct FileShardLocks {
    lock_dir: PathBuf,
    timeout: Duration,
}

impl FileShardLocks {
    /// Create file shard locks with lock files in `lock_dir`.
    ///
    /// The acquisition timeout is the global [lock timeout](crate::config::Config#lock-timeout).
    #[must_use]
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            timeout: global_config().lock_timeout(),
        }
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The default lock directory, `nested_shard_store-locks` in the system temporary directory.
    #[must_use]
    pub fn default_lock_dir() -> PathBuf {
        std::env::temp_dir().join("nested_shard_store-locks")
    }

    /// Returns the lock directory.
    #[must_use]
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    fn lock_path(&self, container: &Path) -> PathBuf {
        let bytes = container.to_string_lossy();
        let bytes = bytes.as_bytes();
        let name = format!(
            "{:08x}{:08x}.lock",
            crc32c::crc32c(bytes),
            crc32c::crc32c_append(0x9e37_79b9, bytes)
        );
        self.lock_dir.join(name)
    }
}

impl Default for FileShardLocks {
    fn default() -> Self {
        Self::new(Self::default_lock_dir())
    }
}

impl ShardLocksTraits for FileShardLocks {
    fn mutex(&self, container: &Path) -> ShardMutex {
        Box::new(FileShardMutex {
            path: self.lock_path(container),
            timeout: self.timeout,
        })
    }

    fn probe(&self) -> Result<(), ShardLockError> {
        if !flock::SUPPORTED {
            return Err(ShardLockError::Unsupported(
                "file shard locks require flock support".to_string(),
            ));
        }
        let probe = FileShardMutex {
            path: self.lock_dir.join("probe.lock"),
            timeout: self.timeout,
        };
        let _guard = probe.lock_file()?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn shard_file_lock_exclusive() -> Result<(), Box<dyn std::error::Error>> {
        let lock_dir = tempfile::TempDir::new()?;
        let locks = FileShardLocks::new(lock_dir.path());
        locks.probe()?;

        let container = Path::new("/store/a/0/0/4.shard");
        let locks_held = AtomicUsize::new(0);
        let overlapped = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let mutex = locks.mutex(container);
                    let _guard = mutex.lock().unwrap();
                    if locks_held.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                    locks_held.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn shard_file_lock_timeout() -> Result<(), Box<dyn std::error::Error>> {
        let lock_dir = tempfile::TempDir::new()?;
        let locks = FileShardLocks::new(lock_dir.path()).with_timeout(Duration::from_millis(20));
        let container = Path::new("/store/a/0.shard");
        let mutex = locks.mutex(container);
        let _guard = mutex.lock()?;
        let other = locks.mutex(container);
        assert!(matches!(
            other.lock(),
            Err(ShardLockError::Timeout { .. })
        ));
        let unrelated = locks.mutex(Path::new("/store/a/1.shard"));
        assert!(unrelated.lock().is_ok());
        Ok(())
    }
}
