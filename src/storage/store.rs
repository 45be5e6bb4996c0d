//! Stores.
//!
//! [`NestedShardStore`] is a filesystem store for Zarr V2 hierarchies that keeps metadata as plain files
//! and groups chunks into shard containers.

mod nested_shard_store;

pub use nested_shard_store::{
    ConsolidationReport, NestedShardStore, NestedShardStoreCreateError, NestedShardStoreOptions,
    ShardContainerError, ShardKeyCodec, ShardLocation, StoreKeysIter, StoreMode,
};
