//! Shared test utilities for cache and directory testing.
//!
//! This module provides fixture builders, failing and instrumented store
//! doubles, and assertion macros for [`StorageResult`] values. It is
//! feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! tavern-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tavern_storage::testutil::{FailingCache, CountingDirectory, test_user};
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    cache::CacheStore,
    directory::{MemoryUserDirectory, UserDirectory},
    error::{StorageError, StorageResult},
    types::{Tier, UserId},
    user::UserRecord,
};

/// Builds a user with a deterministic email and API key derived from `id`.
///
/// Produces `user{id}@example.com` with API key `key-{id}`.
#[must_use]
pub fn test_user(id: i64, tier: Tier) -> UserRecord {
    UserRecord::builder()
        .id(UserId(id))
        .email(format!("user{id}@example.com"))
        .subscription_tier(tier)
        .api_key(format!("key-{id}"))
        .build()
}

/// Creates a [`MemoryUserDirectory`] holding `users`.
///
/// # Panics
///
/// Panics if two users conflict.
#[must_use]
pub fn seeded_directory(users: impl IntoIterator<Item = UserRecord>) -> MemoryUserDirectory {
    MemoryUserDirectory::with_users(users).expect("seed users must not conflict")
}

fn unreachable_error() -> StorageError {
    StorageError::connection("store unreachable")
}

/// A [`CacheStore`] whose every operation fails with
/// [`StorageError::Connection`], simulating an unreachable cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCache;

#[async_trait]
impl CacheStore for FailingCache {
    async fn get(&self, _key: &[u8]) -> StorageResult<Option<Bytes>> {
        Err(unreachable_error())
    }

    async fn set_with_ttl(&self, _key: Vec<u8>, _value: Vec<u8>, _ttl: Duration) -> StorageResult<()> {
        Err(unreachable_error())
    }

    async fn delete(&self, _key: &[u8]) -> StorageResult<()> {
        Err(unreachable_error())
    }

    async fn increment(&self, _key: &[u8]) -> StorageResult<i64> {
        Err(unreachable_error())
    }

    async fn expire_if_unset(&self, _key: &[u8], _ttl: Duration) -> StorageResult<bool> {
        Err(unreachable_error())
    }

    async fn ttl(&self, _key: &[u8]) -> StorageResult<Option<Duration>> {
        Err(unreachable_error())
    }

    async fn health_check(&self) -> StorageResult<()> {
        Err(unreachable_error())
    }
}

/// A [`UserDirectory`] whose every lookup fails with
/// [`StorageError::Connection`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingDirectory;

#[async_trait]
impl UserDirectory for FailingDirectory {
    async fn find_by_id(&self, _id: UserId) -> StorageResult<Option<UserRecord>> {
        Err(unreachable_error())
    }

    async fn find_by_email(&self, _email: &str) -> StorageResult<Option<UserRecord>> {
        Err(unreachable_error())
    }

    async fn find_by_api_key(&self, _api_key: &str) -> StorageResult<Option<UserRecord>> {
        Err(unreachable_error())
    }
}

/// Lookup counters recorded by [`CountingDirectory`].
#[derive(Debug, Default)]
pub struct LookupCounts {
    /// Calls to `find_by_id`.
    pub by_id: AtomicUsize,
    /// Calls to `find_by_email`.
    pub by_email: AtomicUsize,
    /// Calls to `find_by_api_key`.
    pub by_api_key: AtomicUsize,
}

/// A [`UserDirectory`] wrapper that counts lookups per index.
///
/// Lets tests tell a cache hit (only `find_by_id`) from a cache miss
/// (`find_by_api_key`).
#[derive(Debug, Clone)]
pub struct CountingDirectory<D> {
    inner: D,
    counts: Arc<LookupCounts>,
}

impl<D> CountingDirectory<D> {
    /// Wraps `inner` with zeroed counters.
    pub fn new(inner: D) -> Self {
        Self { inner, counts: Arc::new(LookupCounts::default()) }
    }

    /// Number of `find_by_id` calls so far.
    #[must_use]
    pub fn by_id(&self) -> usize {
        self.counts.by_id.load(Ordering::SeqCst)
    }

    /// Number of `find_by_email` calls so far.
    #[must_use]
    pub fn by_email(&self) -> usize {
        self.counts.by_email.load(Ordering::SeqCst)
    }

    /// Number of `find_by_api_key` calls so far.
    #[must_use]
    pub fn by_api_key(&self) -> usize {
        self.counts.by_api_key.load(Ordering::SeqCst)
    }

    /// The wrapped directory.
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

#[async_trait]
impl<D: UserDirectory> UserDirectory for CountingDirectory<D> {
    async fn find_by_id(&self, id: UserId) -> StorageResult<Option<UserRecord>> {
        self.counts.by_id.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>> {
        self.counts.by_email.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_email(email).await
    }

    async fn find_by_api_key(&self, api_key: &str) -> StorageResult<Option<UserRecord>> {
        self.counts.by_api_key.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_api_key(api_key).await
    }
}

/// Assert that a [`StorageResult`] is an error of the given
/// [`StorageError`] variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tavern_storage::{assert_storage_error, StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::not_found("missing"));
/// assert_storage_error!(result, NotFound);
/// ```
#[macro_export]
macro_rules! assert_storage_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            concat!("expected StorageError::", stringify!($variant), ", got: {:?}"),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            concat!("{}: expected StorageError::", stringify!($variant), ", got: {:?}"),
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok`.
///
/// Returns the inner value on success, panics with a descriptive message
/// on failure.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_is_deterministic() {
        let user = test_user(5, Tier::Pro);
        assert_eq!(user.email, "user5@example.com");
        assert_eq!(user.api_key.as_deref(), Some("key-5"));
        assert_eq!(user.subscription_tier, Tier::Pro);
    }

    #[tokio::test]
    async fn failing_cache_fails_everything() {
        let cache = FailingCache;
        assert_storage_error!(cache.get(b"k").await, Connection);
        assert_storage_error!(cache.increment(b"k").await, Connection);
        assert_storage_error!(cache.health_check().await, Connection);
    }

    #[tokio::test]
    async fn counting_directory_counts_per_index() {
        let dir = CountingDirectory::new(seeded_directory([test_user(1, Tier::Free)]));
        dir.find_by_id(UserId(1)).await.unwrap();
        dir.find_by_api_key("key-1").await.unwrap();
        dir.find_by_api_key("key-2").await.unwrap();

        assert_eq!(dir.by_id(), 1);
        assert_eq!(dir.by_api_key(), 2);
        assert_eq!(dir.by_email(), 0);
    }

    #[test]
    fn test_assert_storage_ok_macro() {
        let result: StorageResult<i32> = Ok(42);
        assert_eq!(assert_storage_ok!(result), 42);
    }

    #[test]
    fn test_assert_storage_error_macro() {
        let result: StorageResult<()> = Err(StorageError::timeout());
        assert_storage_error!(result, Timeout);
    }
}
