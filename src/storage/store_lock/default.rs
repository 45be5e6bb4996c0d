//! Default (single process) shard mutex.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, MutexGuard};

use super::{
    ShardLockError, ShardLocksTraits, ShardMutex, ShardMutexGuard, ShardMutexGuardTraits,
    ShardMutexTraits,
};

/// Default shard mutex guard.
#[derive(Debug)]
pub struct DefaultShardMutexGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

impl ShardMutexGuardTraits for DefaultShardMutexGuard<'_> {}

/// Default shard mutex.
#[derive(Debug)]
pub struct DefaultShardMutex(Arc<Mutex<()>>);

impl ShardMutexTraits for DefaultShardMutex {
    fn lock(&self) -> Result<ShardMutexGuard<'_>, ShardLockError> {
        Ok(Box::new(DefaultShardMutexGuard::<'_>(self.0.lock())))
    }
}

/// Default shard locks.
///
/// Serialises access to a shard container between the threads of a single process.
#[derive(Debug, Default)]
pub struct DefaultShardLocks(Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>);

impl ShardLocksTraits for DefaultShardLocks {
    fn mutex(&self, container: &Path) -> ShardMutex {
        let mut locks = self.0.lock();
        Box::new(DefaultShardMutex(
            locks.entry(container.to_path_buf()).or_default().clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use rayon::iter::{IntoParallelIterator, ParallelIterator};

    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn shard_default_lock() {
        let locks = DefaultShardLocks::default();
        let container = Path::new("a/0/0/4.shard");
        let locks_held = AtomicUsize::new(0);
        assert!(!(0..20).into_par_iter().any(|_| {
            let mutex = locks.mutex(container);
            let _lock = mutex.lock().unwrap();
            locks_held.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            let locks_held = locks_held.fetch_sub(1, Ordering::SeqCst);
            locks_held > 1
        }));
    }

    #[test]
    fn shard_default_lock_distinct_containers() {
        let locks = DefaultShardLocks::default();
        let mutex_a = locks.mutex(Path::new("a/0.shard"));
        let mutex_b = locks.mutex(Path::new("a/1.shard"));
        let _guard_a = mutex_a.lock().unwrap();
        let _guard_b = mutex_b.lock().unwrap();
    }
}
