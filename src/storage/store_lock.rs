//! Locks used by stores to acquire exclusive access to shard containers.
//!
//! [`ShardLocks`] implements [`ShardLocksTraits`] to request a locking primitive for a shard container path.
//! A [`NestedShardStore`](crate::storage::store::NestedShardStore) wraps every shard container read, write, and delete in the container's mutex.
//!
//! The abstract locking primitive is a [`ShardMutex`] with a [`ShardMutexGuard`] RAII guard.
//! The lock implementations include:
//!  - [`DisabledShardLocks`] (with [`DisabledShardMutex`]) disable locking.
//!    - Used by default in stores.
//!    - **Requires that concurrent writers never target the same shard container**, e.g. one worker owns one shard for a batch of writes.
//!  - [`DefaultShardLocks`] (with [`DefaultShardMutex`]) implement [`parking_lot::Mutex`]-based locking in a single process.
//!  - [`FileShardLocks`] (with [`FileShardMutex`]) implement `flock`-based locking visible to every cooperating process on a host.

mod default;
mod disabled;
mod file;
pub(crate) mod flock;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;

pub use default::{DefaultShardLocks, DefaultShardMutex, DefaultShardMutexGuard};
pub use disabled::{DisabledShardLocks, DisabledShardMutex, DisabledShardMutexGuard};
pub use file::{FileShardLocks, FileShardMutex, FileShardMutexGuard};

/// Shard container lock manager.
pub type ShardLocks = Arc<dyn ShardLocksTraits>;

/// Traits for shard container lock managers.
pub trait ShardLocksTraits: Send + Sync + core::fmt::Debug {
    /// Returns the mutex for the shard container at `container`.
    #[must_use]
    fn mutex(&self, container: &Path) -> ShardMutex;

    /// Checks that the lock service is usable.
    ///
    /// Stores call this once on creation, so that a store never silently runs without the locking it was configured with.
    ///
    /// # Errors
    /// Returns a [`ShardLockError`] if a lock cannot be acquired.
    fn probe(&self) -> Result<(), ShardLockError> {
        Ok(())
    }

    /// Returns false if the locks do not coordinate anything.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Mutex for a shard container.
pub type ShardMutex = Box<dyn ShardMutexTraits>;

/// Traits for a shard container mutex.
pub trait ShardMutexTraits {
    /// Acquires a mutex, blocking the current thread until it is able to do so.
    ///
    /// When the returned guard goes out of scope, the mutex will be unlocked.
    ///
    /// # Errors
    /// Returns a [`ShardLockError`] if the lock cannot be acquired.
    fn lock(&self) -> Result<ShardMutexGuard<'_>, ShardLockError>;
}

/// Shard container mutex guard.
pub type ShardMutexGuard<'a> = Box<dyn ShardMutexGuardTraits + 'a>;

/// Traits for a shard container mutex guard.
pub trait ShardMutexGuardTraits {}

/// A shard lock error.
#[derive(Debug, Error)]
pub enum ShardLockError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The lock was not acquired before the timeout elapsed.
    #[error("failed to acquire lock {path} within {timeout:?}")]
    Timeout {
        /// The lock path.
        path: PathBuf,
        /// The timeout.
        timeout: Duration,
    },
    /// The lock implementation is not supported on this platform.
    #[error("{0}")]
    Unsupported(String),
}
