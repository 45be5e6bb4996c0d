//! Storage: store keys and prefixes, the storage traits, shard locks, and the [`NestedShardStore`](store::NestedShardStore).
//!
//! A store maps [`StoreKey`]s to byte values.
//! The [`NestedShardStore`](store::NestedShardStore) keeps metadata and legacy chunks as one file per key,
//! and groups chunks that share a coordinate prefix into shard container files.

mod storage_sync;
pub mod store;
mod store_key;
pub mod store_lock;
mod store_prefix;

use std::path::PathBuf;

use thiserror::Error;

pub use store_key::{StoreKey, StoreKeyError, StoreKeys};
pub use store_prefix::{StorePrefix, StorePrefixError};

pub use self::storage_sync::{ListableStorageTraits, ReadableStorageTraits, WritableStorageTraits};

pub use self::store::ShardContainerError;
pub use self::store_lock::ShardLockError;

/// The type for bytes used in store set and get methods.
///
/// An alias for [`bytes::Bytes`].
pub type Bytes = bytes::Bytes;

/// An alias for bytes which may or may not be available.
///
/// When a value is read from a store, it returns `MaybeBytes` which is [`None`] if the key is not found.
pub type MaybeBytes = Option<Bytes>;

/// A storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A write operation was attempted on a read only store.
    #[error("a write operation was attempted on a read only store")]
    ReadOnly,
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// An invalid store prefix.
    #[error("invalid store prefix {0}")]
    StorePrefixError(#[from] StorePrefixError),
    /// An invalid store key.
    #[error("invalid store key {0}")]
    InvalidStoreKey(#[from] StoreKeyError),
    /// The key was found neither as a file nor in a shard container.
    #[error("key {0} not found")]
    KeyNotFound(StoreKey),
    /// A shard container error.
    #[error(transparent)]
    ShardContainer(#[from] ShardContainerError),
    /// A shard lock error.
    #[error(transparent)]
    Lock(#[from] ShardLockError),
    /// A written value did not read back identically within the verification budget.
    #[error("value written to {path} failed verification after {attempts} attempts")]
    VerificationFailed {
        /// The file or shard container that was written.
        path: PathBuf,
        /// The number of write-then-verify cycles attempted.
        attempts: usize,
    },
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

/// The Zarr V2 array metadata file name.
///
/// A directory holding this file is an array root.
pub const ARRAY_METADATA_FILE: &str = ".zarray";
