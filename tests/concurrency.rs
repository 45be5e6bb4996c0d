use std::{error::Error, path::Path, sync::Arc};

use rayon::iter::{IntoParallelIterator, ParallelIterator};

use nested_shard_store::storage::{
    store::{NestedShardStore, NestedShardStoreCreateError, NestedShardStoreOptions},
    store_lock::{DefaultShardLocks, FileShardLocks, ShardLocks},
    Bytes, ListableStorageTraits, ReadableStorageTraits, StorageError, StoreKey,
    WritableStorageTraits,
};

fn chunk_value(i: usize, j: usize, k: usize) -> Bytes {
    Bytes::from(vec![i as u8, j as u8, k as u8])
}

fn create_array(
    path: &Path,
    options: NestedShardStoreOptions,
) -> Result<NestedShardStore, Box<dyn Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = NestedShardStore::new_with_options(path, options)?;
    store.set(&StoreKey::new("a/.zarray")?, Bytes::from_static(b"{}"))?;
    Ok(store)
}

/// Every chunk `a/i/j/k` for `i` in `shards` and `j`, `k` below `n`, written in parallel.
fn write_chunks(
    store: &NestedShardStore,
    shards: std::ops::Range<usize>,
    n: usize,
) -> Result<(), StorageError> {
    let chunks: Vec<(usize, usize, usize)> = shards
        .flat_map(|i| (0..n).flat_map(move |j| (0..n).map(move |k| (i, j, k))))
        .collect();
    chunks.into_par_iter().try_for_each(|(i, j, k)| {
        store.set(&StoreKey::new(format!("a/{i}/{j}/{k}"))?, chunk_value(i, j, k))
    })
}

fn check_chunks(
    store: &NestedShardStore,
    shards: std::ops::Range<usize>,
    n: usize,
) -> Result<(), Box<dyn Error>> {
    for i in shards {
        for j in 0..n {
            for k in 0..n {
                let key = StoreKey::new(format!("a/{i}/{j}/{k}"))?;
                assert_eq!(store.get(&key)?, Some(chunk_value(i, j, k)), "{key}");
            }
        }
    }
    Ok(())
}

#[test]
fn concurrent_disjoint_shards() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    let store = create_array(path.path(), NestedShardStoreOptions::default())?;

    // One worker per shard container, no locks needed
    (0..8usize).into_par_iter().try_for_each(|i| {
        for j in 0..4 {
            for k in 0..4 {
                store.set(&StoreKey::new(format!("a/{i}/{j}/{k}"))?, chunk_value(i, j, k))?;
            }
        }
        Ok::<_, StorageError>(())
    })?;

    check_chunks(&store, 0..8, 4)?;
    assert_eq!(store.len()?, 1 + 8 * 16);
    Ok(())
}

#[test]
fn concurrent_shared_shard_default_locks() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    let locks: ShardLocks = Arc::new(DefaultShardLocks::default());
    let mut options = NestedShardStoreOptions::default();
    options.shard_locks(locks);
    let store = create_array(path.path(), options)?;

    write_chunks(&store, 0..2, 8)?;
    check_chunks(&store, 0..2, 8)?;
    assert_eq!(store.list()?.len(), 1 + 2 * 64);

    // Concurrent erases of entries in the same container
    (0..8usize).into_par_iter().try_for_each(|k| {
        store.erase(&StoreKey::new(format!("a/0/0/{k}"))?)
    })?;
    assert_eq!(store.list()?.len(), 1 + 2 * 64 - 8);
    Ok(())
}

#[cfg(unix)]
#[test]
fn concurrent_shared_shard_file_locks() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    let lock_dir = tempfile::TempDir::new()?;
    let options = || {
        let locks: ShardLocks = Arc::new(FileShardLocks::new(lock_dir.path()));
        let mut options = NestedShardStoreOptions::default();
        options.shard_locks(locks);
        options
    };

    // Two store instances standing in for two processes
    let store_a = create_array(path.path(), options())?;
    let store_b = NestedShardStore::new_with_options(path.path(), options())?;
    let (written_a, written_b) = rayon::join(
        || write_chunks(&store_a, 0..2, 6),
        || write_chunks(&store_b, 1..3, 6),
    );
    written_a?;
    written_b?;

    check_chunks(&store_a, 0..3, 6)?;
    check_chunks(&store_b, 0..3, 6)?;
    assert_eq!(store_a.len()?, 1 + 3 * 36);
    Ok(())
}

#[test]
fn unusable_shard_locks() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    let file = path.path().join("file");
    std::fs::write(&file, b"")?;

    // The lock directory cannot be created below a regular file
    let options = |write_direct: bool| {
        let locks: ShardLocks = Arc::new(FileShardLocks::new(file.join("locks")));
        let mut options = NestedShardStoreOptions::default();
        options.shard_locks(locks).write_direct(write_direct);
        options
    };
    assert!(matches!(
        NestedShardStore::new_with_options(path.path().join("store"), options(true)),
        Err(NestedShardStoreCreateError::LockUnavailable(_))
    ));

    // Locks are unused without direct shard writes
    NestedShardStore::new_with_options(path.path().join("store"), options(false))?;
    Ok(())
}
