//! In-process cache backend
//!
//! Keeps values in a `HashMap` behind a tokio `RwLock`. Entries with a TTL
//! expire lazily: an expired entry is dropped by the lookup that finds it
//! or by `purge_expired`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::CacheError;

use super::traits::{CacheBackend, CacheStats};

struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
struct CacheState {
    storage: HashMap<String, StoredValue>,
    hits: u64,
    misses: u64,
    expirations: u64,
}

/// In-memory cache backend
#[derive(Clone, Default)]
pub struct MemoryCache {
    state: Arc<RwLock<CacheState>>,
}

impl MemoryCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|ttl| Instant::now() + ttl)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        let lookup = state
            .storage
            .get(key)
            .map(|value| (value.is_expired(now), value.data.clone()));

        match lookup {
            Some((false, data)) => {
                state.hits += 1;
                Ok(Some(data))
            }
            Some((true, _)) => {
                state.storage.remove(key);
                state.expirations += 1;
                state.misses += 1;
                Ok(None)
            }
            None => {
                state.misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state.storage.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at: Self::expiry(ttl),
            },
        );
        Ok(())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expires_at = Self::expiry(ttl);
        let mut state = self.state.write().await;
        for (key, data) in entries {
            state.storage.insert(key, StoredValue { data, expires_at });
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().await.storage.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let state = self.state.read().await;
        Ok(state
            .storage
            .get(key)
            .is_some_and(|value| !value.is_expired(now)))
    }

    async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.state.read().await;
        let live = state.storage.values().filter(|v| !v.is_expired(now));

        let (entries, total_size_bytes) =
            live.fold((0u64, 0u64), |(n, size), v| (n + 1, size + v.data.len() as u64));

        CacheStats {
            entries,
            total_size_bytes,
            hits: state.hits,
            misses: state.misses,
            expirations: state.expirations,
        }
    }

    async fn purge(&self) -> Result<(), CacheError> {
        self.state.write().await.storage.clear();
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let before = state.storage.len();

        state.storage.retain(|_, value| !value.is_expired(now));

        let removed = (before - state.storage.len()) as u64;
        state.expirations += removed;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Cache name
    #[test]
    fn test_cache_name() {
        assert_eq!(MemoryCache::new().name(), "memory");
    }

    // Test 2: Set and get round-trip
    #[tokio::test]
    async fn test_set_and_get() {
        let cache = MemoryCache::new();

        cache
            .set("fpl:entry:1", Bytes::from("team"), None)
            .await
            .unwrap();

        assert_eq!(
            cache.get("fpl:entry:1").await.unwrap(),
            Some(Bytes::from("team"))
        );
        assert!(cache.exists("fpl:entry:1").await.unwrap());
    }

    // Test 3: Missing keys are misses
    #[tokio::test]
    async fn test_get_nonexistent() {
        let cache = MemoryCache::new();

        assert!(cache.get("fpl:entry:404").await.unwrap().is_none());
        assert!(!cache.exists("fpl:entry:404").await.unwrap());

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    // Test 4: Delete removes the entry and tolerates missing keys
    #[tokio::test]
    async fn test_del() {
        let cache = MemoryCache::new();
        cache.set("k", Bytes::from("v"), None).await.unwrap();

        cache.del("k").await.unwrap();
        cache.del("never-set").await.unwrap();

        assert!(cache.get("k").await.unwrap().is_none());
    }

    // Test 5: Entries expire after their TTL
    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache
            .set("k", Bytes::from("v"), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.exists("k").await.unwrap());
        assert!(cache.get("k").await.unwrap().is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entries, 0);
    }

    // Test 6: set_many writes every entry with the shared TTL
    #[tokio::test(start_paused = true)]
    async fn test_set_many() {
        let cache = MemoryCache::new();
        cache
            .set_many(
                vec![
                    ("a".to_string(), Bytes::from("1")),
                    ("b".to_string(), Bytes::from("22")),
                ],
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_size_bytes, 3);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 2);
    }

    // Test 7: purge_expired keeps live entries
    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_keeps_live() {
        let cache = MemoryCache::new();
        cache
            .set("short", Bytes::from("x"), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        cache.set("forever", Bytes::from("y"), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.exists("forever").await.unwrap());
    }

    // Test 8: purge clears everything
    #[tokio::test]
    async fn test_purge() {
        let cache = MemoryCache::new();
        cache.set("a", Bytes::from("1"), None).await.unwrap();
        cache.set("b", Bytes::from("2"), None).await.unwrap();

        cache.purge().await.unwrap();

        assert_eq!(cache.stats().await.entries, 0);
    }

    // Test 9: Clones share storage
    #[tokio::test]
    async fn test_clones_share_state() {
        let cache = MemoryCache::new();
        let other = cache.clone();

        cache.set("shared", Bytes::from("v"), None).await.unwrap();

        assert!(other.exists("shared").await.unwrap());
    }
}
