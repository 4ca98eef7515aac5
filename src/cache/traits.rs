//! Key-value cache backend trait and related types

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Statistics about backend usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of live entries
    pub entries: u64,
    /// Total size of all stored values in bytes
    pub total_size_bytes: u64,
    /// Number of lookups that found a live entry
    pub hits: u64,
    /// Number of lookups that found nothing (or an expired entry)
    pub misses: u64,
    /// Number of entries removed because their TTL elapsed
    pub expirations: u64,
}

impl CacheStats {
    /// Creates new empty cache statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Fast key-value store behind the cache-aside layer
///
/// Values are opaque bytes; encoding is the caller's concern. The backend
/// may be shared across processes, so no operation is assumed to be
/// transactional with respect to other writers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the name of this backend
    fn name(&self) -> &str;

    /// Retrieves a value by key
    ///
    /// Returns `Ok(None)` if the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Stores a value, overwriting any existing one
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Stores several values in one round-trip
    async fn set_many(
        &self,
        entries: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Deletes a value; succeeds even if the key doesn't exist
    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// Checks whether a live value exists for the key
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Returns statistics about backend usage
    async fn stats(&self) -> CacheStats;

    /// Deletes all entries
    async fn purge(&self) -> Result<(), CacheError>;

    /// Deletes all expired entries and returns how many were removed
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}
