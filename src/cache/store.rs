//! Generic cache-aside store
//!
//! Reads check the backend first and fall back to a caller-supplied loader
//! on a miss. Writes go through to the backend right after the durable
//! store commits. Backend failures never reach the caller of a read: they
//! are logged and the read behaves as a miss.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::otel::Metrics;

use super::key::CacheKey;
use super::traits::CacheBackend;

/// Serialized form of a cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,
    /// When the entry was written
    pub cached_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    /// Wrap a value, stamped with the current time
    pub fn new(value: V) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
        }
    }
}

/// Counters of one store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Reads answered from the backend
    pub hits: u64,
    /// Reads that missed (absent, undecodable or backend failure)
    pub misses: u64,
    /// Loader invocations
    pub loads: u64,
    /// Backend reads or writes that failed
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    errors: AtomicU64,
}

/// Cache-aside store for values of type `V`
///
/// `namespace` labels logs and metrics; keys are fully rendered by the
/// caller through `CacheKey`.
pub struct CacheStore<V> {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    ttl: Option<Duration>,
    counters: Counters,
    metrics: Option<Arc<Metrics>>,
    _value: PhantomData<fn() -> V>,
}

impl<V> CacheStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a store over a shared backend with a default TTL
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            ttl,
            counters: Counters::default(),
            metrics: None,
            _value: PhantomData,
        }
    }

    /// Report hits and misses to the given metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Look up a value; any failure is reported as a miss
    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        let bytes = match self.backend.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.record_miss();
                return None;
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(namespace = %self.namespace, key = %key, error = %e, "Cache read failed");
                self.record_miss();
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry<V>>(&bytes) {
            Ok(entry) => {
                self.record_hit();
                debug!(namespace = %self.namespace, key = %key, cached_at = %entry.cached_at, "Cache hit");
                Some(entry.value)
            }
            Err(e) => {
                warn!(namespace = %self.namespace, key = %key, error = %e, "Undecodable cache entry");
                self.record_miss();
                None
            }
        }
    }

    /// Store a value, using the store TTL unless one is given
    pub async fn set(&self, key: &CacheKey, value: &V, ttl: Option<Duration>) -> Result<(), CacheError> {
        let bytes = encode(value)?;
        let result = self
            .backend
            .set(key.as_str(), bytes, ttl.or(self.ttl))
            .await;
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Write a value after a durable write, logging instead of failing
    pub async fn write_through(&self, key: &CacheKey, value: &V) {
        if let Err(e) = self.set(key, value, None).await {
            warn!(namespace = %self.namespace, key = %key, error = %e, "Cache write-through failed");
        }
    }

    /// Return the cached value, or load, cache and return it
    ///
    /// The loader runs at most once per call, and only on a miss. Its error
    /// is returned unchanged; cache population failures are only logged.
    pub async fn get_or_load<F, Fut, E>(&self, key: &CacheKey, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        let value = loader().await?;
        self.write_through(key, &value).await;
        Ok(value)
    }

    /// Bulk read-through
    ///
    /// Hits are answered from the backend; the loader is called once with
    /// every missing key and returns the values it found. Keys the loader
    /// does not return are absent from the result.
    pub async fn get_all_or_load<F, Fut, E>(
        &self,
        keys: &[CacheKey],
        loader: F,
    ) -> Result<HashMap<CacheKey, V>, E>
    where
        F: FnOnce(Vec<CacheKey>) -> Fut,
        Fut: Future<Output = Result<Vec<(CacheKey, V)>, E>>,
    {
        let mut found = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        let mut seen = HashSet::with_capacity(keys.len());

        for key in keys {
            if !seen.insert(key) {
                continue;
            }
            match self.get(key).await {
                Some(value) => {
                    found.insert(key.clone(), value);
                }
                None => missing.push(key.clone()),
            }
        }

        if missing.is_empty() {
            return Ok(found);
        }

        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        let loaded = loader(missing).await?;
        self.cache_many(&loaded).await;
        found.extend(loaded);
        Ok(found)
    }

    /// Write several values in one backend round-trip, logging failures
    pub async fn cache_many(&self, entries: &[(CacheKey, V)]) {
        if entries.is_empty() {
            return;
        }

        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match encode(value) {
                Ok(bytes) => encoded.push((key.as_str().to_string(), bytes)),
                Err(e) => {
                    warn!(namespace = %self.namespace, key = %key, error = %e, "Skipping unencodable value");
                }
            }
        }

        if let Err(e) = self.backend.set_many(encoded, self.ttl).await {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                namespace = %self.namespace,
                count = entries.len(),
                error = %e,
                "Bulk cache write failed"
            );
        }
    }

    /// Remove a value so the next read reloads it
    pub async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        debug!(namespace = %self.namespace, key = %key, "Invalidating cache entry");
        let result = self.backend.del(key.as_str()).await;
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Populate the cache from a bulk loader; returns how many values were loaded
    pub async fn warm_up<F, Fut, E>(&self, loader: F) -> Result<usize, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<(CacheKey, V)>, E>>,
    {
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        let entries = loader().await?;
        self.cache_many(&entries).await;
        debug!(namespace = %self.namespace, count = entries.len(), "Cache warmed up");
        Ok(entries.len())
    }

    /// Snapshot of this store's counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Namespace label
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn record_hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_hit(&self.namespace);
        }
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_miss(&self.namespace);
        }
    }
}

fn encode<V: Serialize>(value: &V) -> Result<Bytes, CacheError> {
    serde_json::to_vec(&CacheEntry::new(value))
        .map(Bytes::from)
        .map_err(|e| CacheError::Serialization(e.to_string()))
}
