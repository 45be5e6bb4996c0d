//! Mapping between chunk keys and shard container locations.

use crate::storage::{StoreKey, StoreKeyError};

use super::NestedShardStoreCreateError;

/// The location of a chunk inside a shard container.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ShardLocation {
    container: String,
    name: String,
}

impl ShardLocation {
    /// The container path relative to the store root, using `/` separators (e.g. `array/0/0/4.shard`).
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    /// The entry name inside the container (e.g. `6.7`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Maps chunk keys to shard container locations and back.
///
/// With a shard depth of `D`, the last `D - 1` segments of a key are joined with `.` to form the entry name,
/// and the remaining segments name the container file.
/// For `D = 3`, `array/0/0/4/6/7` maps to entry `6.7` of container `array/0/0/4.shard`.
/// Keys that differ only in their last `D - 1` segments share a container.
///
/// The codec is pure: deciding whether a key is eligible for sharding at all is left to the store.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ShardKeyCodec {
    depth: usize,
    container_ext: String,
}

impl ShardKeyCodec {
    /// Create a new codec for shard depth `depth` and container file extension `container_ext`.
    ///
    /// A leading `.` is added to the extension if it is missing.
    ///
    /// # Errors
    /// Returns [`NestedShardStoreCreateError`] if the extension is empty or contains a separator, or `depth` is less than 2.
    pub fn new(depth: usize, container_ext: &str) -> Result<Self, NestedShardStoreCreateError> {
        let ext = container_ext.strip_prefix('.').unwrap_or(container_ext);
        if ext.is_empty() || ext.contains(['.', '/', '\\']) {
            return Err(NestedShardStoreCreateError::InvalidContainerExtension(
                container_ext.to_string(),
            ));
        }
        if depth < 2 {
            return Err(NestedShardStoreCreateError::InvalidShardDepth(depth));
        }
        Ok(Self {
            depth,
            container_ext: format!(".{ext}"),
        })
    }

    /// The shard depth.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// The container file extension, including the leading `.`.
    #[must_use]
    pub fn container_ext(&self) -> &str {
        &self.container_ext
    }

    /// Returns true if `segment` can be a chunk coordinate segment.
    ///
    /// Coordinate segments are joined with `.` inside a container, so they must not contain one.
    #[must_use]
    pub fn is_coordinate(segment: &str) -> bool {
        !segment.is_empty() && !segment.contains('.')
    }

    /// Returns true if `coordinates`, the key segments below an array root, are deep enough and well formed enough to be sharded.
    #[must_use]
    pub fn is_shardable<'a>(&self, coordinates: impl ExactSizeIterator<Item = &'a str>) -> bool {
        coordinates.len() >= self.depth && coordinates.into_iter().all(Self::is_coordinate)
    }

    /// Map `key` to its shard location.
    ///
    /// Returns [`None`] if the key has too few segments to have one.
    #[must_use]
    pub fn decode(&self, key: &StoreKey) -> Option<ShardLocation> {
        let segments: Vec<&str> = key.segments().collect();
        let inner = self.depth - 1;
        if segments.len() <= inner {
            return None;
        }
        let (stem, name) = segments.split_at(segments.len() - inner);
        Some(ShardLocation {
            container: format!("{}{}", stem.join("/"), self.container_ext),
            name: name.join("."),
        })
    }

    /// Map a container path (relative to the store root) and entry name back to a key.
    ///
    /// # Errors
    /// Returns a [`StoreKeyError`] if `container` does not have the container extension or the result is not a valid key.
    pub fn encode(&self, container: &str, name: &str) -> Result<StoreKey, StoreKeyError> {
        let stem = container
            .strip_suffix(self.container_ext.as_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| StoreKeyError::from(container.to_string()))?;
        StoreKey::new(format!("{stem}/{}", name.replace('.', "/")))
    }

    /// If `file_name` names a shard container, returns its stem (the coordinate segment it stands in for).
    #[must_use]
    pub fn container_stem<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_suffix(self.container_ext.as_str())
            .filter(|stem| Self::is_coordinate(stem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> ShardKeyCodec {
        ShardKeyCodec::new(3, "shard").unwrap()
    }

    #[test]
    fn shard_key_decode() {
        let codec = codec();
        let location = codec
            .decode(&StoreKey::new("array/0/0/4/6/7").unwrap())
            .unwrap();
        assert_eq!(location.container(), "array/0/0/4.shard");
        assert_eq!(location.name(), "6.7");
        assert!(codec.decode(&StoreKey::new("6/7").unwrap()).is_none());
        assert_eq!(
            codec
                .decode(&StoreKey::new("a/0/0/2").unwrap())
                .unwrap()
                .container(),
            "a/0.shard"
        );
    }

    #[test]
    fn shard_key_grouping() {
        let codec = codec();
        let a = codec.decode(&StoreKey::new("arr/0/0/4/6/7").unwrap()).unwrap();
        let b = codec.decode(&StoreKey::new("arr/0/0/4/6/9").unwrap()).unwrap();
        let c = codec.decode(&StoreKey::new("arr/0/0/5/6/7").unwrap()).unwrap();
        assert_eq!(a.container(), b.container());
        assert_ne!(a.name(), b.name());
        assert_ne!(a.container(), c.container());
    }

    #[test]
    fn shard_key_encode_inverts_decode() {
        let codec = codec();
        for key in ["arr/0/0/4/6/7", "g/arr/1/2/3", "a/0/0/2", "x/10/200/3000"] {
            let key = StoreKey::new(key).unwrap();
            let location = codec.decode(&key).unwrap();
            assert_eq!(
                codec.encode(location.container(), location.name()).unwrap(),
                key
            );
        }
        assert!(codec.encode("arr/0/0/4.h5", "6.7").is_err());
    }

    #[test]
    fn shard_key_depth() {
        let codec = ShardKeyCodec::new(2, ".h5").unwrap();
        assert_eq!(codec.container_ext(), ".h5");
        let location = codec.decode(&StoreKey::new("a/1/2").unwrap()).unwrap();
        assert_eq!(location.container(), "a/1.h5");
        assert_eq!(location.name(), "2");
        assert!(ShardKeyCodec::new(1, "h5").is_err());
        assert!(ShardKeyCodec::new(3, "").is_err());
        assert!(ShardKeyCodec::new(3, ".").is_err());
    }

    #[test]
    fn shard_key_shardable() {
        let codec = codec();
        assert!(codec.is_shardable(["0", "0", "2"].into_iter()));
        assert!(!codec.is_shardable(["0", "2"].into_iter()));
        assert!(!codec.is_shardable(["0", "0.1", "2"].into_iter()));
        assert_eq!(codec.container_stem("4.shard"), Some("4"));
        assert_eq!(codec.container_stem("4.h5"), None);
        assert_eq!(codec.container_stem(".shard"), None);
    }
}
