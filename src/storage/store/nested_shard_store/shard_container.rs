//! Shard container files.
//!
//! A shard container is an append-only log of checksummed records behind an 8 byte magic:
//! ```text
//! header : b"NSHARD\x00\x01"
//! record : kind u8 | name_len u32 LE | value_len u64 LE | name | value | crc32c u32 LE
//! ```
//! The checksum covers everything in the record before it.
//! A put record (kind 1) replaces any earlier entry with the same name and a delete record (kind 2) removes it.
//!
//! Opening a container scans the record headers into an index of live entries.
//! The scan stops at the first record that is torn or unreadable, and a writer truncates that tail before appending,
//! so a crash part way through an append loses at most the records of that append.
//! Writers rewrite a container holding mostly dead records.
//!
//! Readers take a shared `flock` and writers an exclusive one.
//! A container held elsewhere is retried with backoff before it is reported as busy.

use std::{
    collections::{HashMap, HashSet},
    fs::{File, OpenOptions},
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{
    config::{global_config, RetryPolicy},
    storage::{store_lock::flock, Bytes, StorageError},
};

use super::atomic_file::AtomicFileWriter;

const MAGIC: &[u8; 8] = b"NSHARD\x00\x01";
const HEADER_LEN: u64 = MAGIC.len() as u64;
const RECORD_HEADER_LEN: usize = 13;
const CRC_LEN: usize = 4;
const MAX_NAME_LEN: usize = 4096;
const SCAN_BUFFER_LEN: usize = 64 * 1024;

/// A shard container error.
#[derive(Debug, Error)]
pub enum ShardContainerError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The container stayed locked by another reader or writer.
    #[error("shard container {path} is busy after {attempts} attempts")]
    Busy {
        /// The container path.
        path: PathBuf,
        /// The number of attempts to lock it.
        attempts: usize,
    },
    /// The container is not a shard container or an entry failed its checksum.
    #[error("shard container {path} is corrupt: {reason}")]
    Corrupt {
        /// The container path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
    /// The entry name cannot be stored in a container.
    #[error("invalid shard container entry name {0}")]
    InvalidEntryName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Put = 1,
    Delete = 2,
}

impl RecordKind {
    const fn from_u8(kind: u8) -> Option<Self> {
        match kind {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// The location of a live entry's record.
#[derive(Debug, Clone, Copy)]
struct Entry {
    offset: u64,
    record_len: u64,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, Entry>,
    /// The end of the last valid record, or zero if the header is missing.
    end: u64,
    /// The total length of the records of live entries.
    live: u64,
}

impl Index {
    fn apply(&mut self, kind: RecordKind, name: String, entry: Entry) {
        if let Some(replaced) = self.entries.remove(&name) {
            self.live -= replaced.record_len;
        }
        if kind == RecordKind::Put {
            self.live += entry.record_len;
            self.entries.insert(name, entry);
        }
    }

    fn dead(&self) -> u64 {
        self.end.saturating_sub(HEADER_LEN + self.live)
    }
}

fn parse_record_header(header: &[u8; RECORD_HEADER_LEN]) -> (Option<RecordKind>, u32, u64) {
    let kind = RecordKind::from_u8(header[0]);
    let name_len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    let value_len = u64::from_le_bytes([
        header[5], header[6], header[7], header[8], header[9], header[10], header[11],
        header[12],
    ]);
    (kind, name_len, value_len)
}

/// Append a record to `buf`, returning its length.
fn encode_record(
    buf: &mut Vec<u8>,
    kind: RecordKind,
    name: &str,
    value: &[u8],
) -> Result<u64, ShardContainerError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ShardContainerError::InvalidEntryName(name.to_string()));
    }
    let name_len = u32::try_from(name.len())
        .map_err(|_| ShardContainerError::InvalidEntryName(name.to_string()))?;
    let start = buf.len();
    buf.push(kind as u8);
    buf.extend_from_slice(&name_len.to_le_bytes());
    buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(value);
    let crc = crc32c::crc32c(&buf[start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok((buf.len() - start) as u64)
}

/// Scan the records of `file` into an index.
///
/// With `verify`, every record's checksum is checked and the scan stops at the first mismatch.
/// Otherwise only the record framing is checked and checksums are left to [`read_record`].
fn scan(file: &File, path: &Path, verify: bool) -> Result<Index, ShardContainerError> {
    let corrupt = |reason: &str| ShardContainerError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;
    if file_len < HEADER_LEN {
        // A new container, or one whose creation was interrupted
        let mut header = Vec::new();
        reader.read_to_end(&mut header)?;
        return if MAGIC.starts_with(&header) {
            Ok(Index::default())
        } else {
            Err(corrupt("bad magic"))
        };
    }
    let mut magic = [0; MAGIC.len()];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(corrupt("bad magic"));
    }

    let mut index = Index {
        end: HEADER_LEN,
        ..Index::default()
    };
    let mut buffer = vec![0; SCAN_BUFFER_LEN];
    loop {
        let offset = index.end;
        let remaining = file_len - offset;
        if remaining < (RECORD_HEADER_LEN + CRC_LEN) as u64 {
            break;
        }
        let mut header = [0; RECORD_HEADER_LEN];
        reader.read_exact(&mut header)?;
        let (kind, name_len, value_len) = parse_record_header(&header);
        let Some(kind) = kind else {
            break;
        };
        let name_len = name_len as usize;
        if name_len == 0 || name_len > MAX_NAME_LEN {
            break;
        }
        let Some(record_len) = value_len.checked_add((RECORD_HEADER_LEN + name_len + CRC_LEN) as u64)
        else {
            break;
        };
        if record_len > remaining {
            break;
        }

        let mut name = vec![0; name_len];
        reader.read_exact(&mut name)?;
        if verify {
            let mut crc = crc32c::crc32c_append(crc32c::crc32c(&header), &name);
            let mut value_remaining = value_len;
            while value_remaining > 0 {
                let chunk = usize::try_from(value_remaining)
                    .map_or(buffer.len(), |value_remaining| value_remaining.min(buffer.len()));
                reader.read_exact(&mut buffer[..chunk])?;
                crc = crc32c::crc32c_append(crc, &buffer[..chunk]);
                value_remaining -= chunk as u64;
            }
            let mut stored = [0; CRC_LEN];
            reader.read_exact(&mut stored)?;
            if crc != u32::from_le_bytes(stored) {
                break;
            }
        } else {
            let skip = i64::try_from(value_len + CRC_LEN as u64)
                .map_err(|_| corrupt("record too large"))?;
            reader.seek_relative(skip)?;
        }
        let Ok(name) = String::from_utf8(name) else {
            break;
        };

        index.apply(
            kind,
            name,
            Entry { offset, record_len },
        );
        index.end = offset + record_len;
    }
    Ok(index)
}

/// Read the raw bytes of the record of `entry`, checking its checksum.
fn read_record(
    file: &File,
    path: &Path,
    name: &str,
    entry: &Entry,
) -> Result<Vec<u8>, ShardContainerError> {
    let record_len = usize::try_from(entry.record_len).map_err(|_| ShardContainerError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("entry {name} is too large"),
    })?;
    let mut record = vec![0; record_len];
    let mut reader = file;
    reader.seek(SeekFrom::Start(entry.offset))?;
    reader.read_exact(&mut record)?;
    let (body, crc) = record.split_at(record_len - CRC_LEN);
    if crc32c::crc32c(body) != u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) {
        return Err(ShardContainerError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("checksum mismatch in entry {name}"),
        });
    }
    Ok(record)
}

/// Read the value of the entry `name`.
fn read_value(
    file: &File,
    path: &Path,
    name: &str,
    entry: &Entry,
) -> Result<Bytes, ShardContainerError> {
    let record = read_record(file, path, name, entry)?;
    let start = RECORD_HEADER_LEN + name.len();
    let end = record.len() - CRC_LEN;
    Ok(Bytes::from(record).slice(start..end))
}

/// Take a shared or exclusive lock on an open container, retrying while it is held elsewhere.
fn lock(file: &File, path: &Path, exclusive: bool) -> Result<(), ShardContainerError> {
    let policy = RetryPolicy::from_global();
    for attempt in 0..policy.attempts {
        if flock::try_lock(file, exclusive)? {
            return Ok(());
        }
        if attempt + 1 < policy.attempts {
            log::debug!(
                "shard container {} is busy, retrying (attempt {} of {})",
                path.display(),
                attempt + 1,
                policy.attempts
            );
            std::thread::sleep(policy.delay(attempt));
        }
    }
    Err(ShardContainerError::Busy {
        path: path.to_path_buf(),
        attempts: policy.attempts,
    })
}

/// Returns true if `path` still names the open `file`.
#[cfg(unix)]
fn is_current(file: &File, path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let opened = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(opened.dev() == current.dev() && opened.ino() == current.ino()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(not(unix))]
fn is_current(_file: &File, path: &Path) -> std::io::Result<bool> {
    Ok(path.exists())
}

fn open_reader(path: &Path) -> Result<Option<(File, Index)>, ShardContainerError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    lock(&file, path, false)?;
    let index = scan(&file, path, false)?;
    Ok(Some((file, index)))
}

/// An exclusively locked container.
struct ContainerWriter<'a> {
    path: &'a Path,
    file: File,
    index: Index,
    len: u64,
}

impl<'a> ContainerWriter<'a> {
    /// Open the container at `path` for writing, creating it if `create` is set.
    ///
    /// Returns [`None`] if the container does not exist and `create` is not set.
    fn open(path: &'a Path, create: bool) -> Result<Option<Self>, ShardContainerError> {
        let policy = RetryPolicy::from_global();
        for _ in 0..policy.attempts {
            if create {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = match OpenOptions::new()
                .read(true)
                .write(true)
                .create(create)
                .truncate(false)
                .open(path)
            {
                Ok(file) => file,
                Err(err) if !create && err.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(None)
                }
                Err(err) => return Err(err.into()),
            };
            lock(&file, path, true)?;

            // The container may have been rewritten or removed while waiting for the lock
            if is_current(&file, path)? {
                let index = scan(&file, path, true)?;
                let len = file.metadata()?.len();
                return Ok(Some(Self {
                    path,
                    file,
                    index,
                    len,
                }));
            }
        }
        Err(ShardContainerError::Busy {
            path: path.to_path_buf(),
            attempts: policy.attempts,
        })
    }

    fn append(&mut self, records: &[(RecordKind, &str, &[u8])]) -> Result<(), ShardContainerError> {
        let mut buf = Vec::new();
        let start = if self.index.end < HEADER_LEN {
            buf.extend_from_slice(MAGIC);
            0
        } else {
            self.index.end
        };

        let mut offset = start + buf.len() as u64;
        let mut entries = Vec::with_capacity(records.len());
        for (kind, name, value) in records {
            let record_len = encode_record(&mut buf, *kind, name, value)?;
            entries.push((
                *kind,
                *name,
                Entry { offset, record_len },
            ));
            offset += record_len;
        }

        if self.len != start {
            if self.len > start {
                log::warn!(
                    "discarding {} bytes of torn records from shard container {}",
                    self.len - start,
                    self.path.display()
                );
            }
            self.file.set_len(start)?;
        }
        self.file.seek(SeekFrom::Start(start))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;

        for (kind, name, entry) in entries {
            self.index.apply(kind, name.to_string(), entry);
        }
        self.index.end = offset;
        self.len = offset;
        Ok(())
    }

    /// Returns true if every entry reads back as the last value given for its name.
    fn verify(&self, entries: &[(&str, &[u8])]) -> Result<bool, ShardContainerError> {
        let mut seen = HashSet::new();
        for (name, value) in entries.iter().rev() {
            if !seen.insert(*name) {
                continue;
            }
            let Some(entry) = self.index.entries.get(*name) else {
                return Ok(false);
            };
            match read_value(&self.file, self.path, name, entry) {
                Ok(written) if written == *value => {}
                Ok(_) | Err(ShardContainerError::Corrupt { .. }) => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Rewrite the container with only its live entries if it is large and mostly dead.
    fn compact_if_needed(&self, threshold: u64) -> Result<(), StorageError> {
        if self.len <= threshold || self.index.dead() <= self.index.live {
            return Ok(());
        }

        let mut entries: Vec<_> = self.index.entries.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.offset);
        let capacity = usize::try_from(HEADER_LEN + self.index.live).unwrap_or_default();
        let mut buf = Vec::with_capacity(capacity);
        buf.extend_from_slice(MAGIC);
        for (name, entry) in entries {
            buf.extend_from_slice(&read_record(&self.file, self.path, name, entry)?);
        }
        AtomicFileWriter::default().write(self.path, &buf)?;
        log::debug!(
            "compacted shard container {} from {} to {} bytes",
            self.path.display(),
            self.len,
            buf.len()
        );
        Ok(())
    }
}

/// Reads and writes entries of shard container files.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShardContainers {
    verify: bool,
    compaction_threshold: u64,
}

impl ShardContainers {
    /// Create a new container reader/writer. With `verify`, every put is read back and repeated on mismatch.
    ///
    /// The compaction threshold is the global [compaction threshold](crate::config::Config#compaction-threshold).
    pub(crate) fn new(verify: bool) -> Self {
        Self {
            verify,
            compaction_threshold: global_config().compaction_threshold(),
        }
    }

    /// Set the container size above which mostly dead containers are compacted.
    #[cfg(test)]
    pub(crate) const fn with_compaction_threshold(mut self, threshold: u64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Read entry `name` of the container at `path`.
    ///
    /// Returns [`None`] if the container or entry does not exist.
    pub(crate) fn get(&self, path: &Path, name: &str) -> Result<Option<Bytes>, StorageError> {
        let Some((file, index)) = open_reader(path)? else {
            return Ok(None);
        };
        match index.entries.get(name) {
            Some(entry) => Ok(Some(read_value(&file, path, name, entry)?)),
            None => Ok(None),
        }
    }

    /// Returns true if the container at `path` exists and holds entry `name`.
    pub(crate) fn contains(&self, path: &Path, name: &str) -> Result<bool, StorageError> {
        Ok(open_reader(path)?.is_some_and(|(_, index)| index.entries.contains_key(name)))
    }

    /// Returns the sorted entry names of the container at `path`, or an empty list if it does not exist.
    pub(crate) fn list_names(&self, path: &Path) -> Result<Vec<String>, StorageError> {
        let Some((_, index)) = open_reader(path)? else {
            return Ok(vec![]);
        };
        let mut names: Vec<String> = index.entries.into_keys().collect();
        names.sort();
        Ok(names)
    }

    /// Write entry `name` to the container at `path`, creating the container and its parent directories if needed.
    pub(crate) fn put(&self, path: &Path, name: &str, value: &[u8]) -> Result<(), StorageError> {
        self.put_many(path, &[(name, value)])
    }

    /// Write a batch of entries to the container at `path` with a single sync.
    ///
    /// If a name appears more than once, the last value wins.
    pub(crate) fn put_many(
        &self,
        path: &Path,
        entries: &[(&str, &[u8])],
    ) -> Result<(), StorageError> {
        let mut writer = ContainerWriter::open(path, true)?.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("shard container {} was not created", path.display()),
            )
        })?;
        let records: Vec<_> = entries
            .iter()
            .map(|(name, value)| (RecordKind::Put, *name, *value))
            .collect();

        let attempts = if self.verify {
            global_config().verify_attempts()
        } else {
            1
        };
        for attempt in 1..=attempts {
            writer.append(&records)?;
            if !self.verify || writer.verify(entries)? {
                return writer.compact_if_needed(self.compaction_threshold);
            }
            log::warn!(
                "verification of shard container {} failed (attempt {attempt} of {attempts})",
                path.display()
            );
        }
        Err(StorageError::VerificationFailed {
            path: path.to_path_buf(),
            attempts,
        })
    }

    /// Delete entry `name` from the container at `path`.
    ///
    /// Returns false if the container or entry does not exist. A container left with no entries is removed.
    pub(crate) fn delete(&self, path: &Path, name: &str) -> Result<bool, StorageError> {
        let Some(mut writer) = ContainerWriter::open(path, false)? else {
            return Ok(false);
        };
        if !writer.index.entries.contains_key(name) {
            return Ok(false);
        }
        writer.append(&[(RecordKind::Delete, name, &[] as &[u8])])?;
        if writer.index.entries.is_empty() {
            std::fs::remove_file(path)?;
            log::debug!("removed empty shard container {}", path.display());
        } else {
            writer.compact_if_needed(self.compaction_threshold)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn shard_container_put_get_delete() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("a").join("0.shard");
        let containers = ShardContainers::new(false);

        assert_eq!(containers.get(&path, "0.2")?, None);
        assert!(containers.list_names(&path)?.is_empty());
        assert!(!containers.delete(&path, "0.2")?);

        containers.put(&path, "0.2", &[1, 2])?;
        containers.put(&path, "0.3", &[])?;
        assert_eq!(containers.get(&path, "0.2")?, Some(Bytes::from_static(&[1, 2])));
        assert_eq!(containers.get(&path, "0.3")?, Some(Bytes::new()));
        assert_eq!(containers.get(&path, "0.4")?, None);
        assert!(containers.contains(&path, "0.3")?);
        assert_eq!(containers.list_names(&path)?, vec!["0.2", "0.3"]);

        containers.put(&path, "0.2", &[3])?;
        assert_eq!(containers.get(&path, "0.2")?, Some(Bytes::from_static(&[3])));
        assert_eq!(containers.list_names(&path)?, vec!["0.2", "0.3"]);

        assert!(containers.delete(&path, "0.2")?);
        assert!(!containers.delete(&path, "0.2")?);
        assert_eq!(containers.get(&path, "0.2")?, None);
        assert!(containers.delete(&path, "0.3")?);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn shard_container_put_many() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("0.shard");
        let containers = ShardContainers::new(true);
        let entries: [(&str, &[u8]); 3] = [("0.0", b"a"), ("0.1", b"b"), ("0.0", b"c")];
        containers.put_many(&path, &entries)?;
        assert_eq!(containers.get(&path, "0.0")?, Some(Bytes::from_static(b"c")));
        assert_eq!(containers.get(&path, "0.1")?, Some(Bytes::from_static(b"b")));
        assert!(containers.put(&path, "", b"x").is_err());
        Ok(())
    }

    #[test]
    fn shard_container_torn_tail() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("0.shard");
        let containers = ShardContainers::new(false);
        containers.put(&path, "1", b"intact")?;

        // An append that was interrupted part way
        let mut torn = Vec::new();
        encode_record(&mut torn, RecordKind::Put, "2", b"lost")?;
        torn.truncate(torn.len() - 3);
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&torn)?;
        drop(file);

        assert_eq!(containers.list_names(&path)?, vec!["1"]);
        assert_eq!(containers.get(&path, "2")?, None);
        containers.put(&path, "3", b"after")?;
        assert_eq!(containers.list_names(&path)?, vec!["1", "3"]);
        assert_eq!(containers.get(&path, "1")?, Some(Bytes::from_static(b"intact")));
        assert_eq!(containers.get(&path, "3")?, Some(Bytes::from_static(b"after")));
        Ok(())
    }

    #[test]
    fn shard_container_checksum() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("0.shard");
        let containers = ShardContainers::new(false);
        containers.put(&path, "1", b"value")?;
        containers.put(&path, "2", b"other")?;

        // Flip a byte of the first value
        let mut bytes = std::fs::read(&path)?;
        let position = HEADER_LEN as usize + RECORD_HEADER_LEN + 1;
        bytes[position] ^= 0xff;
        std::fs::write(&path, &bytes)?;
        assert!(matches!(
            containers.get(&path, "1"),
            Err(StorageError::ShardContainer(ShardContainerError::Corrupt { .. }))
        ));
        assert_eq!(containers.get(&path, "2")?, Some(Bytes::from_static(b"other")));
        Ok(())
    }

    #[test]
    fn shard_container_bad_magic() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("0.shard");
        std::fs::write(&path, b"not a shard container")?;
        let containers = ShardContainers::new(false);
        assert!(matches!(
            containers.get(&path, "0"),
            Err(StorageError::ShardContainer(ShardContainerError::Corrupt { .. }))
        ));
        assert!(containers.put(&path, "0", b"value").is_err());

        // An interrupted creation is an empty container
        std::fs::write(&path, &MAGIC[..3])?;
        assert!(containers.list_names(&path)?.is_empty());
        containers.put(&path, "0", b"value")?;
        assert_eq!(containers.get(&path, "0")?, Some(Bytes::from_static(b"value")));
        Ok(())
    }

    #[test]
    fn shard_container_compaction() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("0.shard");
        let containers = ShardContainers::new(false).with_compaction_threshold(0);
        let value = vec![7u8; 1000];
        containers.put(&path, "keep", b"kept")?;
        for _ in 0..10 {
            containers.put(&path, "overwritten", &value)?;
        }
        let len = std::fs::metadata(&path)?.len();
        assert!(len < 2 * 1000 + 100);
        assert_eq!(containers.list_names(&path)?, vec!["keep", "overwritten"]);
        assert_eq!(containers.get(&path, "keep")?, Some(Bytes::from_static(b"kept")));
        assert_eq!(containers.get(&path, "overwritten")?, Some(Bytes::from(value)));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn shard_container_busy() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("0.shard");
        let containers = ShardContainers::new(false);
        containers.put(&path, "0", b"value")?;

        let holder = File::open(&path)?;
        assert!(flock::try_lock(&holder, true)?);
        crate::config::global_config_mut().set_io_retry_initial_delay(std::time::Duration::ZERO);
        let result = containers.get(&path, "0");
        crate::config::global_config_mut()
            .set_io_retry_initial_delay(std::time::Duration::from_millis(10));
        assert!(matches!(
            result,
            Err(StorageError::ShardContainer(ShardContainerError::Busy { .. }))
        ));
        drop(holder);
        assert_eq!(containers.get(&path, "0")?, Some(Bytes::from_static(b"value")));
        Ok(())
    }
}
