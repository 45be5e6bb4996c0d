//! A store of plain files and shard containers.
//!
//! Metadata and legacy chunks are stored one file per key, as in a nested directory store.
//! Chunks deep enough below an array root are grouped into shard container files.
//! See [`NestedShardStore`].

mod atomic_file;
mod consolidate;
mod shard_container;
mod shard_key;

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    sync::Arc,
};

use itertools::Itertools;
use thiserror::Error;
use walkdir::WalkDir;

use crate::storage::{
    store_lock::{DisabledShardLocks, FileShardLocks, ShardLockError, ShardLocks},
    Bytes, ListableStorageTraits, MaybeBytes, ReadableStorageTraits, StorageError, StoreKey,
    StoreKeyError, StoreKeys, StorePrefix, WritableStorageTraits, ARRAY_METADATA_FILE,
};

use self::{
    atomic_file::{is_partial, AtomicFileWriter},
    shard_container::ShardContainers,
};

pub use self::{
    consolidate::ConsolidationReport,
    shard_container::ShardContainerError,
    shard_key::{ShardKeyCodec, ShardLocation},
};

/// The only supported dimension separator.
const DIMENSION_SEPARATOR: char = '/';

/// The mode a [`NestedShardStore`] is opened in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreMode {
    /// Every mutating operation fails with [`StorageError::ReadOnly`]. Shard reads skip the shard locks.
    ReadOnly,
    /// Reads and writes.
    #[default]
    ReadWrite,
}

/// Options for use with [`NestedShardStore`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct NestedShardStoreOptions {
    normalize_keys: bool,
    dimension_separator: char,
    write_direct: bool,
    container_ext: String,
    shard_depth: usize,
    shard_locks: Option<ShardLocks>,
    consolidate: bool,
    consolidate_parallel: bool,
    verify_writes: bool,
    mode: StoreMode,
}

impl Default for NestedShardStoreOptions {
    fn default() -> Self {
        Self {
            normalize_keys: false,
            dimension_separator: DIMENSION_SEPARATOR,
            write_direct: true,
            container_ext: "shard".to_string(),
            shard_depth: 3,
            shard_locks: None,
            consolidate: false,
            consolidate_parallel: true,
            verify_writes: false,
            mode: StoreMode::ReadWrite,
        }
    }
}

impl NestedShardStoreOptions {
    /// Set whether keys are lower cased before use. Defaults to false.
    pub fn normalize_keys(&mut self, normalize_keys: bool) -> &mut Self {
        self.normalize_keys = normalize_keys;
        self
    }

    /// Set the dimension separator of chunk keys. Only `/` is supported.
    pub fn dimension_separator(&mut self, dimension_separator: char) -> &mut Self {
        self.dimension_separator = dimension_separator;
        self
    }

    /// Set whether shard eligible chunks are written straight into shard containers. Defaults to true.
    ///
    /// Otherwise every write creates a plain file, and only [consolidation](NestedShardStore::consolidate) creates containers.
    pub fn write_direct(&mut self, write_direct: bool) -> &mut Self {
        self.write_direct = write_direct;
        self
    }

    /// Set the shard container file extension. Defaults to `shard`.
    pub fn container_ext(&mut self, container_ext: impl Into<String>) -> &mut Self {
        self.container_ext = container_ext.into();
        self
    }

    /// Set the shard depth. Defaults to 3.
    ///
    /// The last `shard_depth - 1` segments of a chunk key name its entry inside a container.
    pub fn shard_depth(&mut self, shard_depth: usize) -> &mut Self {
        self.shard_depth = shard_depth;
        self
    }

    /// Enable or disable cross process locking of shard containers with [`FileShardLocks`] in the default lock directory.
    ///
    /// Disabled by default, in which case concurrent writers must never target the same shard container.
    pub fn cross_process_locking(&mut self, enabled: bool) -> &mut Self {
        self.shard_locks = if enabled {
            Some(Arc::new(FileShardLocks::default()))
        } else {
            None
        };
        self
    }

    /// Set the locks guarding shard containers.
    ///
    /// Locks only take effect when [direct writes](Self::write_direct) are enabled.
    pub fn shard_locks(&mut self, shard_locks: ShardLocks) -> &mut Self {
        self.shard_locks = Some(shard_locks);
        self
    }

    /// Set whether the store is [consolidated](NestedShardStore::consolidate) when it is opened. Defaults to false.
    pub fn consolidate(&mut self, consolidate: bool) -> &mut Self {
        self.consolidate = consolidate;
        self
    }

    /// Set whether consolidation migrates shard containers in parallel. Defaults to true.
    pub fn consolidate_parallel(&mut self, consolidate_parallel: bool) -> &mut Self {
        self.consolidate_parallel = consolidate_parallel;
        self
    }

    /// Set whether every write is read back and repeated on mismatch. Defaults to false.
    pub fn verify_writes(&mut self, verify_writes: bool) -> &mut Self {
        self.verify_writes = verify_writes;
        self
    }

    /// Set the store mode. Defaults to [`StoreMode::ReadWrite`].
    pub fn mode(&mut self, mode: StoreMode) -> &mut Self {
        self.mode = mode;
        self
    }
}

/// Where the value of a key lives.
#[derive(Debug)]
enum KeyLocation {
    /// A plain file, which takes precedence over any shard entry.
    Raw(PathBuf),
    /// An entry of a shard container, which may or may not exist.
    Sharded(PathBuf, ShardLocation),
    /// Nowhere: there is no plain file and the key cannot be sharded.
    Absent,
}

/// A synchronous store of plain files and shard containers.
///
/// Keys map to files below the base path, as in a nested directory store, except that chunks are grouped into shard containers.
/// A key is shard eligible if
///  - it is not metadata (no segment starts with `.`),
///  - it lies below an array root (a directory holding `.zarray`), and
///  - it has at least [shard depth](NestedShardStoreOptions::shard_depth) coordinate segments below that root, none containing a `.`.
///
/// With a shard depth of 3, chunk `array/0/0/4/6/7` is entry `6.7` of container `array/0/0/4.shard`.
///
/// A plain file always takes precedence over a shard entry for the same key.
/// Writes to a key that already has a plain file overwrite the file, so a partially consolidated store keeps working.
/// Plain files are replaced atomically. Shard containers are guarded by the configured [`ShardLocks`].
#[derive(Debug)]
pub struct NestedShardStore {
    base_path: PathBuf,
    codec: ShardKeyCodec,
    options: NestedShardStoreOptions,
    locks: ShardLocks,
    writer: AtomicFileWriter,
    containers: ShardContainers,
}

impl NestedShardStore {
    /// Create a new nested shard store at a given `base_path` with default options.
    ///
    /// # Errors
    /// Returns a [`NestedShardStoreCreateError`] if `base_path` is not valid or points to an existing file rather than a directory.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, NestedShardStoreCreateError> {
        Self::new_with_options(base_path, NestedShardStoreOptions::default())
    }

    /// Create a new nested shard store at a given `base_path` and `options`.
    ///
    /// If the options request consolidation on open, the store is consolidated before it is returned.
    /// A consolidation that leaves some containers unmigrated is logged and does not fail the store creation.
    ///
    /// # Errors
    /// Returns a [`NestedShardStoreCreateError`] if
    ///  - `base_path` is not valid or points to an existing file rather than a directory,
    ///  - the dimension separator is not `/`,
    ///  - the container extension is empty,
    ///  - the shard depth is less than 2,
    ///  - the shard locks are unusable, or
    ///  - consolidation fails outright.
    pub fn new_with_options<P: AsRef<Path>>(
        base_path: P,
        options: NestedShardStoreOptions,
    ) -> Result<Self, NestedShardStoreCreateError> {
        let base_path = base_path.as_ref();
        if base_path.to_str().is_none() {
            return Err(NestedShardStoreCreateError::InvalidBasePath(
                base_path.to_path_buf(),
            ));
        }
        let base_path = if base_path.is_absolute() {
            base_path.to_path_buf()
        } else {
            std::env::current_dir()?.join(base_path)
        };
        if base_path.exists() && !base_path.is_dir() {
            return Err(NestedShardStoreCreateError::NotADirectory(base_path));
        }
        if options.dimension_separator != DIMENSION_SEPARATOR {
            return Err(NestedShardStoreCreateError::InvalidDimensionSeparator(
                options.dimension_separator,
            ));
        }
        let codec = ShardKeyCodec::new(options.shard_depth, &options.container_ext)?;

        let locks: ShardLocks = match &options.shard_locks {
            Some(locks) if options.write_direct => locks.clone(),
            _ => Arc::new(DisabledShardLocks),
        };
        if locks.is_enabled() {
            locks.probe()?;
        }

        let store = Self {
            base_path,
            codec,
            writer: AtomicFileWriter::new(options.verify_writes),
            containers: ShardContainers::new(options.verify_writes),
            locks,
            options,
        };

        if store.options.consolidate {
            if store.is_read_only() {
                log::warn!(
                    "not consolidating read only store {}",
                    store.base_path.display()
                );
            } else {
                let report = store.consolidate()?;
                if !report.is_complete() {
                    log::warn!(
                        "consolidation of {} left {} shard containers unmigrated: {:?}",
                        store.base_path.display(),
                        report.failures.len(),
                        report.failures
                    );
                }
            }
        }
        Ok(store)
    }

    /// Returns the base path of the store.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the codec mapping chunk keys to shard containers.
    #[must_use]
    pub fn codec(&self) -> &ShardKeyCodec {
        &self.codec
    }

    /// Returns the store mode.
    #[must_use]
    pub fn mode(&self) -> StoreMode {
        self.options.mode
    }

    fn is_read_only(&self) -> bool {
        self.options.mode == StoreMode::ReadOnly
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.is_read_only() {
            Err(StorageError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn normalize_key<'a>(&self, key: &'a StoreKey) -> Cow<'a, StoreKey> {
        if self.options.normalize_keys {
            Cow::Owned(key.to_lowercase())
        } else {
            Cow::Borrowed(key)
        }
    }

    fn normalize_prefix<'a>(&self, prefix: &'a StorePrefix) -> Cow<'a, StorePrefix> {
        if self.options.normalize_keys {
            Cow::Owned(prefix.to_lowercase())
        } else {
            Cow::Borrowed(prefix)
        }
    }

    /// Maps a [`StoreKey`] to the filesystem [`PathBuf`] of its plain file.
    #[must_use]
    pub fn key_to_fspath(&self, key: &StoreKey) -> PathBuf {
        self.base_path.join(key.as_str())
    }

    /// Maps a filesystem [`PathBuf`] to a [`StoreKey`].
    fn fspath_to_key(&self, path: &Path) -> Result<StoreKey, StoreKeyError> {
        let path = pathdiff::diff_paths(path, &self.base_path)
            .ok_or_else(|| StoreKeyError::from(path.to_string_lossy().into_owned()))?;
        let path_str = path.to_string_lossy();
        #[cfg(target_os = "windows")]
        {
            StoreKey::new(path_str.replace('\\', "/"))
        }
        #[cfg(not(target_os = "windows"))]
        {
            StoreKey::new(path_str)
        }
    }

    /// Maps a [`StorePrefix`] to the filesystem [`PathBuf`] of its directory.
    #[must_use]
    pub fn prefix_to_fspath(&self, prefix: &StorePrefix) -> PathBuf {
        self.base_path
            .join(prefix.as_str().strip_suffix('/').unwrap_or_default())
    }

    /// The path a container standing in for the directory at `path` would have.
    fn container_file_name(&self, path: &Path) -> Option<PathBuf> {
        let name = path.file_name()?.to_str()?;
        Some(path.with_file_name(format!("{name}{}", self.codec.container_ext())))
    }

    /// The shard container the directory at `path` is folded into, if that name is a container under an array root.
    ///
    /// A file of the same name elsewhere is a plain key and is left alone.
    fn sibling_container(&self, path: &Path) -> Option<PathBuf> {
        let container = self.container_file_name(path)?;
        let file_name = container.file_name()?.to_str()?;
        let parent = path.parent()?;
        if !parent.starts_with(&self.base_path) {
            return None;
        }
        let relative = pathdiff::diff_paths(parent, &self.base_path)?;
        let parents: Vec<&str> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<_>>()?;
        self.is_container(&parents, file_name).then_some(container)
    }

    fn container_path(&self, location: &ShardLocation) -> PathBuf {
        self.base_path.join(location.container())
    }

    /// Returns the number of leading `segments` naming the nearest directory holding array metadata.
    fn array_root(&self, segments: &[&str]) -> Option<usize> {
        (0..=segments.len()).rev().find(|&len| {
            let mut path = self.base_path.clone();
            path.extend(&segments[..len]);
            path.push(ARRAY_METADATA_FILE);
            path.is_file()
        })
    }

    /// Returns the shard location of `key` if it is shard eligible.
    fn shard_location(&self, key: &StoreKey) -> Option<ShardLocation> {
        if key.is_metadata() {
            return None;
        }
        let segments: Vec<&str> = key.segments().collect();
        let (_, parents) = segments.split_last()?;
        let root = self.array_root(parents)?;
        if !self
            .codec
            .is_shardable(segments[root..].iter().copied())
        {
            return None;
        }
        self.codec.decode(key)
    }

    /// Returns true if the file `name` in the directory of `parents` is a shard container.
    fn is_container(&self, parents: &[&str], name: &str) -> bool {
        self.codec.container_stem(name).is_some() && self.array_root(parents).is_some()
    }

    fn locate(&self, key: &StoreKey) -> KeyLocation {
        let path = self.key_to_fspath(key);
        if path.is_file() {
            return KeyLocation::Raw(path);
        }
        match self.shard_location(key) {
            Some(location) => KeyLocation::Sharded(self.container_path(&location), location),
            None => KeyLocation::Absent,
        }
    }

    /// Run `op` while holding the lock of the shard container at `container`.
    fn with_shard_lock<T>(
        &self,
        container: &Path,
        op: impl FnOnce() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mutex = self.locks.mutex(container);
        let _guard = mutex.lock()?;
        op()
    }

    fn read_shard(
        &self,
        container: &Path,
        location: &ShardLocation,
    ) -> Result<MaybeBytes, StorageError> {
        if self.is_read_only() {
            self.containers.get(container, location.name())
        } else {
            self.with_shard_lock(container, || {
                self.containers.get(container, location.name())
            })
        }
    }

    fn set_raw(&self, key: &StoreKey, value: &[u8]) -> Result<(), StorageError> {
        let segments: Vec<&str> = key.segments().collect();
        if let Some((name, parents)) = segments.split_last() {
            if self.is_container(parents, name) {
                return Err(StoreKeyError::from(key.to_string()).into());
            }
        }

        let path = self.key_to_fspath(key);
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.writer.write(&path, value)
    }

    /// Returns a lazy iterator over every key in the store.
    ///
    /// Plain files are keys, and every shard container contributes one key per entry.
    /// Keys are yielded in no particular order, and a key held both as a plain file and as a shard entry is yielded twice.
    #[must_use]
    pub fn keys(&self) -> StoreKeysIter<'_> {
        StoreKeysIter::new(self, &self.base_path)
    }

    /// Returns the number of keys in the store.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the store cannot be enumerated.
    pub fn len(&self) -> Result<usize, StorageError> {
        self.keys().try_fold(0, |len, key| key.map(|_| len + 1))
    }

    /// Returns true if the store holds no keys.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the store cannot be enumerated.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.keys().next().transpose().map(|key| key.is_none())
    }

    /// Move everything under `src` to `dst`, including the shard container `src` would be folded into.
    ///
    /// Shard containers move as opaque files. Directories emptied by the move are removed.
    ///
    /// # Errors
    /// Returns [`StorageError::KeyNotFound`] if there is nothing at `src`, or a [`StorageError`] if the move fails.
    pub fn rename(&self, src: &StorePrefix, dst: &StorePrefix) -> Result<(), StorageError> {
        self.check_writable()?;
        let src = self.normalize_prefix(src);
        let dst = self.normalize_prefix(dst);
        if src.is_root() || dst.is_root() {
            return Err(StorageError::Other(
                "cannot rename the root of a store".to_string(),
            ));
        }

        let src_path = self.prefix_to_fspath(&src);
        let dst_path = self.prefix_to_fspath(&dst);
        let mut moves = vec![(src_path.clone(), dst_path.clone())];
        if let (Some(src_container), Some(dst_container)) = (
            self.sibling_container(&src_path),
            self.container_file_name(&dst_path),
        ) {
            moves.push((src_container, dst_container));
        }

        let mut moved = false;
        for (from, to) in moves {
            if !from.exists() {
                continue;
            }
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&from, &to)?;
            moved = true;
        }
        if !moved {
            return Err(StorageError::KeyNotFound(StoreKey::try_from(&*src)?));
        }
        self.prune_empty_parents(&src_path)
    }

    /// Remove the empty ancestors of `path`, up to the base path.
    fn prune_empty_parents(&self, path: &Path) -> Result<(), StorageError> {
        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir == self.base_path || !dir.starts_with(&self.base_path) {
                break;
            }
            match std::fs::read_dir(dir).map(|mut entries| entries.next().is_none()) {
                Ok(true) => std::fs::remove_dir(dir)?,
                Ok(false) => break,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            parent = dir.parent();
        }
        Ok(())
    }

    /// Remove everything in the store, including its base directory.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the store is read only or the removal fails.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.check_writable()?;
        remove_dir_all_if_exists(&self.base_path)
    }

    /// The children of `prefix` that live inside shard containers named by `prefix` or one of its ancestors.
    fn virtual_children(&self, prefix: &StorePrefix) -> Result<Vec<String>, StorageError> {
        let Ok(key) = StoreKey::try_from(prefix) else {
            return Ok(vec![]);
        };
        let segments: Vec<&str> = key.segments().collect();
        let mut children = Vec::new();
        for len in 1..=segments.len() {
            let (stem, rest) = segments.split_at(len);
            let Some((name, parents)) = stem.split_last() else {
                continue;
            };
            let file_name = format!("{name}{}", self.codec.container_ext());
            let mut container = self.base_path.clone();
            container.extend(parents);
            container.push(&file_name);
            if !container.is_file() || !self.is_container(parents, &file_name) {
                continue;
            }
            let rest = rest.join(".");
            for entry in self.containers.list_names(&container)? {
                let tail = if rest.is_empty() {
                    Some(entry.as_str())
                } else {
                    entry
                        .strip_prefix(rest.as_str())
                        .and_then(|tail| tail.strip_prefix('.'))
                };
                if let Some(child) = tail.and_then(|tail| tail.split('.').next()) {
                    children.push(child.to_string());
                }
            }
        }
        Ok(children)
    }
}

fn remove_dir_all_if_exists(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn is_digits(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|byte| byte.is_ascii_digit())
}

impl ReadableStorageTraits for NestedShardStore {
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        let key = self.normalize_key(key);
        match self.locate(&key) {
            KeyLocation::Raw(path) => atomic_file::read(&path),
            KeyLocation::Sharded(container, location) => self.read_shard(&container, &location),
            KeyLocation::Absent => Ok(None),
        }
    }

    fn contains(&self, key: &StoreKey) -> Result<bool, StorageError> {
        let key = self.normalize_key(key);
        match self.locate(&key) {
            KeyLocation::Raw(_) => Ok(true),
            KeyLocation::Sharded(container, location) => {
                if self.is_read_only() {
                    self.containers.contains(&container, location.name())
                } else {
                    self.with_shard_lock(&container, || {
                        self.containers.contains(&container, location.name())
                    })
                }
            }
            KeyLocation::Absent => Ok(false),
        }
    }

    /// Shard entries are not sized: returns [`None`] unless `key` is a plain file.
    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        let key = self.normalize_key(key);
        match self.locate(&key) {
            KeyLocation::Raw(path) => match std::fs::metadata(path) {
                Ok(metadata) => Ok(Some(metadata.len())),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            },
            KeyLocation::Sharded(..) | KeyLocation::Absent => Ok(None),
        }
    }
}

impl WritableStorageTraits for NestedShardStore {
    fn set(&self, key: &StoreKey, value: Bytes) -> Result<(), StorageError> {
        self.check_writable()?;
        let key = self.normalize_key(key);
        match self.locate(&key) {
            KeyLocation::Raw(path) => self.writer.write(&path, &value),
            KeyLocation::Sharded(container, location) if self.options.write_direct => self
                .with_shard_lock(&container, || {
                    self.containers.put(&container, location.name(), &value)
                }),
            KeyLocation::Sharded(..) | KeyLocation::Absent => self.set_raw(&key, &value),
        }
    }

    /// Erase `key` from both its plain file and its shard entry.
    ///
    /// If the plain path of `key` is a directory, the directory and the shard container it would be folded into are removed.
    fn erase(&self, key: &StoreKey) -> Result<(), StorageError> {
        self.check_writable()?;
        let key = self.normalize_key(key);
        let path = self.key_to_fspath(&key);

        let mut found = match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => {
                std::fs::remove_dir_all(&path)?;
                if let Some(container) = self.sibling_container(&path) {
                    atomic_file::remove(&container)?;
                }
                true
            }
            Ok(_) => atomic_file::remove(&path)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };

        if let Some(location) = self.shard_location(&key) {
            let container = self.container_path(&location);
            found |= self.with_shard_lock(&container, || {
                self.containers.delete(&container, location.name())
            })?;
        }

        if found {
            Ok(())
        } else {
            Err(StorageError::KeyNotFound(key.into_owned()))
        }
    }

    /// Erase everything under `prefix`, including the shard container `prefix` would be folded into.
    ///
    /// Erasing the root prefix removes the whole store.
    fn erase_prefix(&self, prefix: &StorePrefix) -> Result<(), StorageError> {
        self.check_writable()?;
        let prefix = self.normalize_prefix(prefix);
        let path = self.prefix_to_fspath(&prefix);
        remove_dir_all_if_exists(&path)?;
        if !prefix.is_root() {
            if let Some(container) = self.sibling_container(&path) {
                atomic_file::remove(&container)?;
            }
            self.prune_empty_parents(&path)?;
        }
        Ok(())
    }
}

impl ListableStorageTraits for NestedShardStore {
    /// Returns the sorted keys of the store.
    ///
    /// A key held both as a plain file and as a shard entry is listed once.
    fn list(&self) -> Result<StoreKeys, StorageError> {
        let mut keys = self.keys().collect::<Result<StoreKeys, _>>()?;
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Returns the sorted names of the children of `prefix`.
    ///
    /// Under an array root, numeric children are expanded into `.` joined chunk keys relative to the array,
    /// so the listing matches that of a nested directory store.
    /// Elsewhere a shard container is listed by the name of the directory it stands in for.
    fn list_dir(&self, prefix: &StorePrefix) -> Result<Vec<String>, StorageError> {
        let prefix = self.normalize_prefix(prefix);
        let dir = self.prefix_to_fspath(&prefix);
        let is_array = dir.join(ARRAY_METADATA_FILE).is_file();
        let prefix_key = StoreKey::try_from(&*prefix).ok();
        let parents: Vec<&str> = prefix_key
            .as_ref()
            .map(|key| key.segments().collect())
            .unwrap_or_default();

        let mut children = self.virtual_children(&prefix)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(children.into_iter().sorted().dedup().collect())
            }
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_partial(&path) {
                continue;
            }

            if entry.file_type()?.is_file() {
                let stem = self
                    .codec
                    .container_stem(&name)
                    .filter(|_| self.is_container(&parents, &name))
                    .map(str::to_string);
                match stem {
                    Some(stem) if is_array && is_digits(&stem) => {
                        for entry_name in self.containers.list_names(&path)? {
                            children.push(format!("{stem}.{entry_name}"));
                        }
                    }
                    Some(stem) => children.push(stem),
                    None => children.push(name),
                }
            } else if is_array && is_digits(&name) {
                for key in StoreKeysIter::new(self, &path) {
                    let key = key?;
                    if let Some(relative) = key.as_str().strip_prefix(prefix.as_str()) {
                        children.push(relative.replace('/', "."));
                    }
                }
            } else {
                children.push(name);
            }
        }
        Ok(children.into_iter().sorted().dedup().collect())
    }

    /// Returns the total size of the files under `prefix`, including the shard container `prefix` would be folded into.
    fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        let prefix = self.normalize_prefix(prefix);
        let path = self.prefix_to_fspath(&prefix);
        let mut size = 0;
        for entry in WalkDir::new(&path) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_not_found(&err) => continue,
                Err(err) => return Err(std::io::Error::from(err).into()),
            };
            if entry.file_type().is_file() && !is_partial(entry.path()) {
                size += entry.metadata().map_err(std::io::Error::from)?.len();
            }
        }
        if !prefix.is_root() {
            if let Some(container) = self.sibling_container(&path) {
                if let Ok(metadata) = std::fs::metadata(container) {
                    if metadata.is_file() {
                        size += metadata.len();
                    }
                }
            }
        }
        Ok(size)
    }
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|err| err.kind() == std::io::ErrorKind::NotFound)
}

/// A lazy iterator over the keys of a [`NestedShardStore`].
///
/// Returned by [`NestedShardStore::keys`].
pub struct StoreKeysIter<'a> {
    store: &'a NestedShardStore,
    walk: walkdir::IntoIter,
    pending: std::vec::IntoIter<StoreKey>,
}

impl<'a> StoreKeysIter<'a> {
    fn new(store: &'a NestedShardStore, path: &Path) -> Self {
        Self {
            store,
            walk: WalkDir::new(path).into_iter(),
            pending: Vec::new().into_iter(),
        }
    }

    /// The keys stored in the file at `path`.
    fn file_keys(&self, path: &Path) -> Result<Vec<StoreKey>, StorageError> {
        let key = self.store.fspath_to_key(path)?;
        let segments: Vec<&str> = key.segments().collect();
        match segments.split_last() {
            Some((name, parents)) if self.store.is_container(parents, name) => self
                .store
                .containers
                .list_names(path)?
                .iter()
                .map(|entry| Ok(self.store.codec.encode(key.as_str(), entry)?))
                .collect(),
            _ => Ok(vec![key]),
        }
    }
}

impl Iterator for StoreKeysIter<'_> {
    type Item = Result<StoreKey, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.pending.next() {
                return Some(Ok(key));
            }
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(err) if is_not_found(&err) => continue,
                Err(err) => return Some(Err(std::io::Error::from(err).into())),
            };
            if !entry.file_type().is_file() || is_partial(entry.path()) {
                continue;
            }
            match self.file_keys(entry.path()) {
                Ok(keys) => self.pending = keys.into_iter(),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// A nested shard store creation error.
#[derive(Debug, Error)]
pub enum NestedShardStoreCreateError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The path is not valid on this system.
    #[error("base path {0} is not valid")]
    InvalidBasePath(PathBuf),
    /// The path points to something other than a directory.
    #[error("base path {0} exists and is not a directory")]
    NotADirectory(PathBuf),
    /// The dimension separator is not supported.
    #[error("dimension separator {0:?} is not supported, only '/' is")]
    InvalidDimensionSeparator(char),
    /// The shard container extension is not usable.
    #[error("shard container extension {0:?} is not valid")]
    InvalidContainerExtension(String),
    /// The shard depth is too small.
    #[error("shard depth {0} is not valid, it must be at least 2")]
    InvalidShardDepth(usize),
    /// The shard locks could not be acquired.
    #[error("shard locks are unavailable: {0}")]
    LockUnavailable(#[from] ShardLockError),
    /// Consolidation on open failed.
    #[error("consolidation failed: {0}")]
    Consolidation(#[from] StorageError),
}
