//! Cache key construction
//!
//! Entity keys have the shape `prefix:entity:id[:subkey]`. Partitioned keys
//! have the shape `prefix::partition`, where the partition is a coarse
//! context such as a season, so that a context rollover only changes the
//! key namespace.

use std::fmt;

/// A fully rendered cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// `prefix:entity:id`
    pub fn entity(prefix: &str, entity: &str, id: impl fmt::Display) -> Self {
        Self(format!("{}:{}:{}", prefix, entity, id))
    }

    /// `prefix::partition`
    pub fn partitioned(prefix: &str, partition: impl fmt::Display) -> Self {
        Self(format!("{}::{}", prefix, partition))
    }

    /// Append `:subkey`
    pub fn with_subkey(self, subkey: impl fmt::Display) -> Self {
        Self(format!("{}:{}", self.0, subkey))
    }

    /// Rendered key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
