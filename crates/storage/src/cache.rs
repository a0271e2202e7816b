//! Cache store trait definition.
//!
//! [`CacheStore`] is the key-value abstraction behind API-key mappings and
//! rate-limit counters. It mirrors the small command set of a Redis-style
//! cache: plain reads, writes with a TTL, deletes, an atomic counter and
//! expiry management.
//!
//! # Design Philosophy
//!
//! - **Keys and values are bytes**: no assumptions about serialization format
//! - **Async by default**: a networked cache is one round trip per call
//! - **Expiry is first-class**: expired keys behave exactly like absent keys
//!
//! See [`MemoryCache`](crate::MemoryCache) for a reference implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Abstract key-value cache with TTL support.
///
/// Implementations must be thread-safe (`Send + Sync`); a single instance is
/// shared across every in-flight request.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](CacheStore::get) | Retrieve a single value by key |
/// | [`set_with_ttl`](CacheStore::set_with_ttl) | Store with automatic expiration |
/// | [`delete`](CacheStore::delete) | Remove a key |
/// | [`increment`](CacheStore::increment) | Atomic increment-and-read |
/// | [`expire_if_unset`](CacheStore::expire_if_unset) | Attach a TTL to a key that has none |
/// | [`ttl`](CacheStore::ttl) | Remaining lifetime of a key |
/// | [`health_check`](CacheStore::health_check) | Verify store availability |
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use tavern_storage::{CacheStore, MemoryCache};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let cache = MemoryCache::new();
///
/// cache.set_with_ttl(b"session:1".to_vec(), b"alice".to_vec(), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(cache.get(b"session:1").await.unwrap(), Some(Bytes::from("alice")));
///
/// assert_eq!(cache.increment(b"hits").await.unwrap(), 1);
/// assert_eq!(cache.increment(b"hits").await.unwrap(), 2);
/// # });
/// ```
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists and has not expired
    /// - `Ok(None)` if the key doesn't exist or has expired
    /// - `Err(...)` on store errors
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair that expires after `ttl`.
    ///
    /// Overwrites any existing value and replaces any existing TTL.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;

    /// Deletes a key.
    ///
    /// If the key doesn't exist, this is a no-op (returns `Ok(())`).
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Atomically increments the integer stored at `key` and returns the new
    /// value.
    ///
    /// An absent or expired key is created with the value `1` and no TTL.
    /// An existing key keeps its TTL. The read and the write happen as one
    /// step: two concurrent callers always observe two distinct results.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Serialization`](crate::StorageError::Serialization) if the stored value
    ///   is not a decimal integer.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn increment(&self, key: &[u8]) -> StorageResult<i64>;

    /// Sets a TTL on `key` only if the key exists and has no TTL yet.
    ///
    /// Returns `true` if a TTL was attached, `false` if the key is absent or
    /// already expiring.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn expire_if_unset(&self, key: &[u8], ttl: Duration) -> StorageResult<bool>;

    /// Returns the remaining lifetime of `key`.
    ///
    /// `None` means the key is absent, expired, or never expires.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn ttl(&self, key: &[u8]) -> StorageResult<Option<Duration>>;

    /// Verifies that the store can serve requests.
    #[must_use = "health check results indicate availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}

#[async_trait]
impl<C: CacheStore + ?Sized> CacheStore for std::sync::Arc<C> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        (**self).set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        (**self).delete(key).await
    }

    async fn increment(&self, key: &[u8]) -> StorageResult<i64> {
        (**self).increment(key).await
    }

    async fn expire_if_unset(&self, key: &[u8], ttl: Duration) -> StorageResult<bool> {
        (**self).expire_if_unset(key, ttl).await
    }

    async fn ttl(&self, key: &[u8]) -> StorageResult<Option<Duration>> {
        (**self).ttl(key).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        (**self).health_check().await
    }
}
