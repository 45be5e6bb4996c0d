//! Global configuration options.

use std::{
    sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

/// Global configuration options for the nested shard store.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with [`global_config_mut`].
///
/// Per-store behaviour (separator, container extension, shard depth, etc.) is configured with
/// [`NestedShardStoreOptions`](crate::storage::store::NestedShardStoreOptions) instead.
///
/// # I/O Retry Options
/// ## I/O Retry Attempts
/// > default: `10`
///
/// The maximum number of attempts for an operation that fails transiently.
/// This applies to atomic renames that fail with a permission error (e.g. a file briefly held by an indexer)
/// and to opening a shard container that is busy in another thread or process.
/// Exhausting the attempts is a fatal error.
///
/// ## I/O Retry Initial Delay
/// > default: `10ms`
///
/// The delay before the second attempt of a transiently failing operation.
/// The delay doubles after each subsequent attempt.
///
/// ## Verify Attempts
/// > default: `5`
///
/// The maximum number of write-then-verify cycles when write verification is enabled.
/// A value that still does not read back identically after this many cycles is reported as
/// [`StorageError::VerificationFailed`](crate::storage::StorageError::VerificationFailed).
///
/// # Locking Options
/// ## Lock Timeout
/// > default: `10s`
///
/// The maximum time to wait when acquiring a cross-process shard lock.
/// This also bounds the lock probe performed when a store with cross-process locking is opened.
///
/// # Shard Container Options
/// ## Compaction Threshold
/// > default: `1 MiB`
///
/// A shard container is only compacted once its file size exceeds this threshold and it holds more dead bytes than live bytes.
///
/// ## Consolidate Concurrent Limit
/// > default: [`std::thread::available_parallelism`]`()`
///
/// The maximum number of shard containers migrated concurrently by a parallel consolidation.
#[derive(Debug)]
pub struct Config {
    io_retry_attempts: usize,
    io_retry_initial_delay: Duration,
    verify_attempts: usize,
    lock_timeout: Duration,
    compaction_threshold: u64,
    consolidate_concurrent_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            io_retry_attempts: 10,
            io_retry_initial_delay: Duration::from_millis(10),
            verify_attempts: 5,
            lock_timeout: Duration::from_secs(10),
            compaction_threshold: 1024 * 1024,
            consolidate_concurrent_limit: std::thread::available_parallelism()
                .map_or(1, std::num::NonZeroUsize::get),
        }
    }
}

impl Config {
    /// Get the [I/O retry attempts](#io-retry-attempts) configuration.
    #[must_use]
    pub fn io_retry_attempts(&self) -> usize {
        self.io_retry_attempts
    }

    /// Set the [I/O retry attempts](#io-retry-attempts) configuration.
    ///
    /// A value of zero is treated as one attempt.
    pub fn set_io_retry_attempts(&mut self, attempts: usize) {
        self.io_retry_attempts = attempts.max(1);
    }

    /// Get the [I/O retry initial delay](#io-retry-initial-delay) configuration.
    #[must_use]
    pub fn io_retry_initial_delay(&self) -> Duration {
        self.io_retry_initial_delay
    }

    /// Set the [I/O retry initial delay](#io-retry-initial-delay) configuration.
    pub fn set_io_retry_initial_delay(&mut self, delay: Duration) {
        self.io_retry_initial_delay = delay;
    }

    /// Get the [verify attempts](#verify-attempts) configuration.
    #[must_use]
    pub fn verify_attempts(&self) -> usize {
        self.verify_attempts
    }

    /// Set the [verify attempts](#verify-attempts) configuration.
    ///
    /// A value of zero is treated as one attempt.
    pub fn set_verify_attempts(&mut self, attempts: usize) {
        self.verify_attempts = attempts.max(1);
    }

    /// Get the [lock timeout](#lock-timeout) configuration.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Set the [lock timeout](#lock-timeout) configuration.
    pub fn set_lock_timeout(&mut self, timeout: Duration) {
        self.lock_timeout = timeout;
    }

    /// Get the [compaction threshold](#compaction-threshold) configuration.
    #[must_use]
    pub fn compaction_threshold(&self) -> u64 {
        self.compaction_threshold
    }

    /// Set the [compaction threshold](#compaction-threshold) configuration.
    pub fn set_compaction_threshold(&mut self, threshold: u64) {
        self.compaction_threshold = threshold;
    }

    /// Get the [consolidate concurrent limit](#consolidate-concurrent-limit) configuration.
    #[must_use]
    pub fn consolidate_concurrent_limit(&self) -> usize {
        self.consolidate_concurrent_limit
    }

    /// Set the [consolidate concurrent limit](#consolidate-concurrent-limit) configuration.
    ///
    /// A value of zero is treated as one.
    pub fn set_consolidate_concurrent_limit(&mut self, concurrent_limit: usize) {
        self.consolidate_concurrent_limit = concurrent_limit.max(1);
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .read()
        .unwrap()
}

/// Returns a mutable reference to the global configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .write()
        .unwrap()
}

/// A snapshot of the retry related configuration, taken so the global lock is not held across I/O.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) attempts: usize,
    pub(crate) initial_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_global() -> Self {
        let config = global_config();
        Self {
            attempts: config.io_retry_attempts(),
            initial_delay: config.io_retry_initial_delay(),
        }
    }

    /// The delay to sleep after failed attempt `attempt` (zero based).
    pub(crate) fn delay(&self, attempt: usize) -> Duration {
        let shift = u32::try_from(attempt.min(16)).unwrap_or(16);
        self.initial_delay.saturating_mul(1 << shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_verify_attempts() {
        assert!(global_config().verify_attempts() >= 1);
        let previous = global_config().verify_attempts();
        global_config_mut().set_verify_attempts(0);
        assert_eq!(global_config().verify_attempts(), 1);
        global_config_mut().set_verify_attempts(previous);
    }

    #[test]
    fn retry_policy_backoff() {
        let policy = RetryPolicy {
            attempts: 4,
            initial_delay: Duration::from_millis(5),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(5));
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(3), Duration::from_millis(40));
    }
}
