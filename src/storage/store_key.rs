use derive_more::{Display, From};
use thiserror::Error;

use super::StorePrefix;

/// A store key.
///
/// A key is a `/` separated path relative to the root of a store, e.g. `group/array/0/3/7` or `group/array/.zarray`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub struct StoreKey(String);

/// An invalid store key.
#[derive(Debug, From, Error)]
#[error("invalid store key {0}")]
pub struct StoreKeyError(String);

/// A list of [`StoreKey`].
pub type StoreKeys = Vec<StoreKey>;

impl StoreKey {
    /// Create a new store key from `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreKeyError`] if `key` is not valid according to [`StoreKey::validate()`].
    pub fn new(key: impl Into<String>) -> Result<Self, StoreKeyError> {
        let key = key.into();
        if Self::validate(&key) {
            Ok(Self(key))
        } else {
            Err(StoreKeyError(key))
        }
    }

    /// Extracts a string slice of the underlying Key [String].
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a key.
    ///
    /// A key is a non-empty string that does not start or end with `/`.
    /// Every `/` separated segment must be non-empty and must not be `.` or `..`, so a key can never address a path outside of the store.
    #[must_use]
    pub fn validate(key: &str) -> bool {
        !key.is_empty()
            && !key.starts_with('/')
            && !key.ends_with('/')
            && key
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
    }

    /// Returns an iterator over the `/` separated segments of the key.
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('/')
    }

    /// Returns true if the key refers to metadata, i.e. any segment starts with `.` (e.g. `.zarray`, `.zgroup`, `.zattrs`).
    ///
    /// Metadata keys are always stored as plain files.
    #[must_use]
    pub fn is_metadata(&self) -> bool {
        self.segments().any(|segment| segment.starts_with('.'))
    }

    /// Returns true if the key has prefix `prefix`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &StorePrefix) -> bool {
        self.0.starts_with(prefix.as_str())
    }

    /// Returns a lower case copy of this key.
    #[must_use]
    pub fn to_lowercase(&self) -> Self {
        Self(self.0.to_lowercase())
    }
}

impl TryFrom<&str> for StoreKey {
    type Error = StoreKeyError;

    fn try_from(key: &str) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl TryFrom<&StorePrefix> for StoreKey {
    type Error = StoreKeyError;

    fn try_from(prefix: &StorePrefix) -> Result<Self, Self::Error> {
        let prefix = prefix.as_str();
        Self::new(prefix.strip_suffix('/').unwrap_or(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_key() {
        assert!(StoreKey::new("a").is_ok());
        assert_eq!(StoreKey::new("a").unwrap().to_string(), "a");
        assert!(StoreKey::new("a/").is_err());
        assert_eq!(
            StoreKey::new("a/").unwrap_err().to_string(),
            "invalid store key a/"
        );
        assert!(StoreKey::new("/a").is_err());
        assert!(StoreKey::new("").is_err());
        assert!(StoreKey::new("a//b").is_err());
        assert!(StoreKey::new("a/../b").is_err());
        assert!(StoreKey::new("./a").is_err());
        assert!(StoreKey::new("a/b").unwrap().has_prefix(&StorePrefix::new("a/").unwrap()));
        assert_eq!(
            StoreKey::try_from(&StorePrefix::new("a/b/").unwrap()).unwrap(),
            StoreKey::new("a/b").unwrap()
        );
        assert!(StoreKey::try_from(&StorePrefix::root()).is_err());
    }

    #[test]
    fn store_key_metadata() {
        assert!(StoreKey::new("a/.zarray").unwrap().is_metadata());
        assert!(StoreKey::new(".zgroup").unwrap().is_metadata());
        assert!(StoreKey::new("a/.hidden/0").unwrap().is_metadata());
        assert!(!StoreKey::new("a/0/0/1").unwrap().is_metadata());
        assert!(!StoreKey::new("a/0.0").unwrap().is_metadata());
    }
}
