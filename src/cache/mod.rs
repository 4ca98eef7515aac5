//! Cache-aside layer for fpl-sync
//!
//! A generic `CacheStore<V>` sits in front of a key-value `CacheBackend`.
//! The default backend keeps everything in process memory.

pub mod key;
pub mod memory;
pub mod store;
pub mod traits;

pub use key::CacheKey;
pub use memory::MemoryCache;
pub use store::{CacheEntry, CacheStore, StoreStats};
pub use traits::{CacheBackend, CacheStats};

#[cfg(test)]
pub use traits::MockCacheBackend;
