//! Disabled shard mutex.

use std::path::Path;

use super::{
    ShardLockError, ShardLocksTraits, ShardMutex, ShardMutexGuard, ShardMutexGuardTraits,
    ShardMutexTraits,
};

/// Disabled shard mutex guard.
#[derive(Debug)]
pub struct DisabledShardMutexGuard;

impl ShardMutexGuardTraits for DisabledShardMutexGuard {}

/// Disabled shard mutex.
#[derive(Debug)]
pub struct DisabledShardMutex;

impl ShardMutexTraits for DisabledShardMutex {
    fn lock(&self) -> Result<ShardMutexGuard<'_>, ShardLockError> {
        Ok(Box::new(DisabledShardMutexGuard))
    }
}

/// Disabled shard locks.
#[derive(Debug, Default)]
pub struct DisabledShardLocks;

impl ShardLocksTraits for DisabledShardLocks {
    fn mutex(&self, _container: &Path) -> ShardMutex {
        Box::new(DisabledShardMutex)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;

    #[test]
    fn shard_disabled_lock() {
        let locks = DisabledShardLocks;
        let container = Path::new("a/0/0/4.shard");
        let barrier = Barrier::new(2);
        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    let mutex = locks.mutex(container);
                    let _lock = mutex.lock().unwrap();
                    // Both threads hold the "lock" at once
                    barrier.wait();
                });
            }
        });
        assert!(!locks.is_enabled());
    }
}
