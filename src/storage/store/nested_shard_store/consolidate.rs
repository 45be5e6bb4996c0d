//! Migration of plain chunk files into shard containers.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rayon_iter_concurrent_limit::iter_concurrent_limit;
use walkdir::WalkDir;

use crate::{
    config::global_config,
    storage::{StorageError, ARRAY_METADATA_FILE},
};

use super::{
    atomic_file::{self, is_partial},
    is_not_found, NestedShardStore,
};

/// The plain files to migrate into one shard container, as (entry name, source file) pairs.
type ContainerSources = Vec<(String, PathBuf)>;

/// The outcome of [`NestedShardStore::consolidate`].
#[derive(Debug, Default)]
pub struct ConsolidationReport {
    /// The number of shard containers written.
    pub containers: usize,
    /// The number of plain chunk files moved into shard containers.
    pub chunks_migrated: usize,
    /// The number of empty directories removed.
    pub directories_pruned: usize,
    /// The shard containers that could not be migrated, with the reason.
    ///
    /// Their source files are left in place, except those already migrated, and a later consolidation picks them up.
    pub failures: Vec<(PathBuf, StorageError)>,
}

impl ConsolidationReport {
    /// Returns true if every shard container was migrated.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn walk_error(err: walkdir::Error) -> StorageError {
    std::io::Error::from(err).into()
}

/// Returns the segments of `path` relative to `root`, or [`None`] if one is not valid UTF-8.
fn relative_segments(path: &Path, root: &Path) -> Option<Vec<String>> {
    pathdiff::diff_paths(path, root)?
        .components()
        .map(|component| component.as_os_str().to_str().map(str::to_string))
        .collect()
}

impl NestedShardStore {
    /// Move plain chunk files into shard containers.
    ///
    /// Every array root (a directory holding `.zarray`) is scanned for shard eligible plain files.
    /// The files are grouped by their shard container, and each group is written to its container and then deleted.
    /// Finally, empty directories below each array root are removed.
    ///
    /// Containers are migrated in parallel if [enabled](super::NestedShardStoreOptions::consolidate_parallel),
    /// up to the [consolidate concurrent limit](crate::config::Config#consolidate-concurrent-limit).
    /// A container that fails to migrate does not stop the others and is reported in [`ConsolidationReport::failures`].
    /// Consolidating an already consolidated store does nothing.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the store is read only or cannot be scanned.
    pub fn consolidate(&self) -> Result<ConsolidationReport, StorageError> {
        self.check_writable()?;
        let mut report = ConsolidationReport::default();

        let roots = self.array_roots()?;
        let mut groups = BTreeMap::<PathBuf, ContainerSources>::new();
        for root in &roots {
            self.scan_array(root, &mut groups)?;
        }

        let groups: Vec<(PathBuf, ContainerSources)> = groups.into_iter().collect();
        let results: Vec<(PathBuf, Result<usize, StorageError>)> =
            if self.options.consolidate_parallel {
                let concurrent_limit = global_config().consolidate_concurrent_limit();
                iter_concurrent_limit!(concurrent_limit, groups, map, |(container, sources)| {
                    let result = self.migrate(&container, &sources);
                    (container, result)
                })
                .collect()
            } else {
                groups
                    .into_iter()
                    .map(|(container, sources)| {
                        let result = self.migrate(&container, &sources);
                        (container, result)
                    })
                    .collect()
            };
        for (container, result) in results {
            match result {
                Ok(chunks) => {
                    report.containers += 1;
                    report.chunks_migrated += chunks;
                }
                Err(err) => {
                    log::warn!(
                        "failed to consolidate shard container {}: {err}",
                        container.display()
                    );
                    report.failures.push((container, err));
                }
            }
        }

        for root in &roots {
            report.directories_pruned += prune_empty_dirs(root)?;
        }
        Ok(report)
    }

    /// Returns the directories holding array metadata.
    fn array_roots(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut roots = Vec::new();
        for entry in WalkDir::new(&self.base_path) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_not_found(&err) => continue,
                Err(err) => return Err(walk_error(err)),
            };
            if entry.file_type().is_file() && entry.file_name() == ARRAY_METADATA_FILE {
                if let Some(root) = entry.path().parent() {
                    roots.push(root.to_path_buf());
                }
            }
        }
        Ok(roots)
    }

    /// Group the shard eligible plain files of the array at `root` by shard container.
    ///
    /// Nested arrays are left to their own scan. Temporary files of interrupted writes are removed.
    fn scan_array(
        &self,
        root: &Path,
        groups: &mut BTreeMap<PathBuf, ContainerSources>,
    ) -> Result<(), StorageError> {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir() && entry.path().join(ARRAY_METADATA_FILE).is_file())
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_not_found(&err) => continue,
                Err(err) => return Err(walk_error(err)),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if is_partial(path) {
                log::debug!("removing stale temporary file {}", path.display());
                atomic_file::remove(path)?;
                continue;
            }

            let Some(coordinates) = relative_segments(path, root) else {
                continue;
            };
            if !self
                .codec
                .is_shardable(coordinates.iter().map(String::as_str))
            {
                continue;
            }
            let key = self.fspath_to_key(path)?;
            if let Some(location) = self.codec.decode(&key) {
                groups
                    .entry(self.container_path(&location))
                    .or_default()
                    .push((location.name().to_string(), path.to_path_buf()));
            }
        }
        Ok(())
    }

    /// Write `sources` into `container`, then delete them. Returns the number of files migrated.
    fn migrate(&self, container: &Path, sources: &[(String, PathBuf)]) -> Result<usize, StorageError> {
        self.with_shard_lock(container, || {
            let mut values = Vec::with_capacity(sources.len());
            for (name, source) in sources {
                // A source may have been erased since the scan
                if let Some(value) = atomic_file::read(source)? {
                    values.push((name.as_str(), value, source));
                }
            }
            let entries: Vec<(&str, &[u8])> = values
                .iter()
                .map(|(name, value, _)| (*name, value.as_ref()))
                .collect();
            self.containers.put_many(container, &entries)?;

            for (_, _, source) in &values {
                atomic_file::remove(source)?;
            }
            log::debug!(
                "migrated {} chunks into shard container {}",
                values.len(),
                container.display()
            );
            Ok(values.len())
        })
    }
}

/// Remove the empty directories below `root`, deepest first. Returns the number removed.
fn prune_empty_dirs(root: &Path) -> Result<usize, StorageError> {
    let mut pruned = 0;
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if is_not_found(&err) => continue,
            Err(err) => return Err(walk_error(err)),
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        if std::fs::read_dir(path)?.next().is_none() {
            std::fs::remove_dir(path)?;
            log::debug!("pruned empty directory {}", path.display());
            pruned += 1;
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use crate::storage::{Bytes, ListableStorageTraits, StoreKey, WritableStorageTraits};

    use super::{super::NestedShardStoreOptions, *};

    fn flat_store(path: &Path) -> Result<NestedShardStore, Box<dyn Error>> {
        let mut options = NestedShardStoreOptions::default();
        options.write_direct(false).consolidate_parallel(false);
        let store = NestedShardStore::new_with_options(path, options)?;
        store.set(&StoreKey::new("g/a/.zarray")?, Bytes::from_static(b"{}"))?;
        Ok(store)
    }

    #[test]
    fn consolidate_migrates_and_prunes() -> Result<(), Box<dyn Error>> {
        let path = tempfile::TempDir::new()?;
        let store = flat_store(path.path())?;
        for key in ["g/a/0/0/0", "g/a/0/0/1", "g/a/0/1/0", "g/a/1/0/0", "g/a/5"] {
            store.set(&StoreKey::new(key)?, Bytes::from(key.as_bytes().to_vec()))?;
        }
        std::fs::write(path.path().join("g/a/0/0/0.1-2.partial"), b"stale")?;
        let before = store.list()?;

        let report = store.consolidate()?;
        assert!(report.is_complete());
        assert_eq!(report.containers, 2);
        assert_eq!(report.chunks_migrated, 4);
        assert!(report.directories_pruned >= 2);
        assert!(path.path().join("g/a/0.shard").is_file());
        assert!(path.path().join("g/a/1.shard").is_file());
        assert!(!path.path().join("g/a/0/0/0").exists());
        assert!(!path.path().join("g/a/1").exists());
        // Too shallow to shard
        assert!(path.path().join("g/a/5").is_file());

        assert_eq!(store.list()?, before);
        Ok(())
    }

    #[test]
    fn consolidate_nested_arrays() -> Result<(), Box<dyn Error>> {
        let path = tempfile::TempDir::new()?;
        let store = flat_store(path.path())?;
        store.set(&StoreKey::new("g/a/b/.zarray")?, Bytes::from_static(b"{}"))?;
        store.set(&StoreKey::new("g/a/b/0/0/0")?, Bytes::from_static(b"b"))?;
        store.set(&StoreKey::new("g/a/0/0/0")?, Bytes::from_static(b"a"))?;

        let report = store.consolidate()?;
        assert_eq!(report.containers, 2);
        assert!(path.path().join("g/a/b/0.shard").is_file());
        assert!(path.path().join("g/a/0.shard").is_file());
        assert!(path.path().join("g/a/b/.zarray").is_file());
        Ok(())
    }
}
