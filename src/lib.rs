//! A hybrid sharded filesystem store for nested [Zarr V2](https://zarr.dev) hierarchies.
//!
//! Storing one file per chunk overwhelms filesystems once arrays reach millions of chunks.
//! [`NestedShardStore`](storage::store::NestedShardStore) keeps the key layout of a nested directory store,
//! but groups chunks that share a coordinate prefix into a single shard container file.
//! Metadata (`.zarray`, `.zgroup`, `.zattrs`) and chunks written before sharding stay plain files,
//! and an existing store can be [consolidated](storage::store::NestedShardStore::consolidate) into shard containers after the fact.
//!
//! ## Example
//! ```rust
//! # use nested_shard_store::storage::{store::NestedShardStore, ReadableStorageTraits, StoreKey, WritableStorageTraits};
//! # let dir = tempfile::TempDir::new()?;
//! let store = NestedShardStore::new(dir.path())?;
//! store.set(&StoreKey::new("array/.zarray")?, b"{}".to_vec().into())?;
//!
//! // Chunk [0, 0, 2] is entry 0.2 of shard container array/0.shard
//! let key = StoreKey::new("array/0/0/2")?;
//! store.set(&key, vec![1, 2].into())?;
//! assert_eq!(store.get(&key)?.as_deref(), Some([1u8, 2].as_slice()));
//! assert!(dir.path().join("array/0.shard").is_file());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Concurrency
//! Operations on different shard containers never block each other.
//! By default nothing stops two writers from racing on the same container, so concurrent writers must own disjoint containers.
//! Enable [shard locks](storage::store_lock) to serialise access to a container between threads or processes.
//!
//! ## Logging
//! Retries, verification failures, and consolidation progress are logged with the [`log`] crate.
//!
//! ## Licence
//! `nested_shard_store` is licensed under either of
//!  - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license <http://opensource.org/licenses/MIT>, at your option.

#![warn(unused_variables)]
#![warn(dead_code)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]

pub mod config;
pub mod storage;
