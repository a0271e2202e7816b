//! In-memory cache store implementation.
//!
//! This module provides [`MemoryCache`], an in-memory implementation of
//! [`CacheStore`] suitable for tests, development and single-process
//! deployments.
//!
//! # Features
//!
//! - **Thread-safe**: a single [`parking_lot::RwLock`] guards values and expiries together, so
//!   [`increment`](CacheStore::increment) is atomic with respect to every other operation
//! - **TTL support**: expired keys read as absent immediately; a background task reclaims them
//! - **Test clock**: expiry uses [`tokio::time::Instant`], so `tokio::time::pause` and
//!   `tokio::time::advance` control it in tests
//!
//! # Example
//!
//! ```
//! use tavern_storage::{CacheStore, MemoryCache};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = MemoryCache::new();
//!     assert_eq!(cache.increment(b"counter").await.unwrap(), 1);
//!     assert_eq!(cache.increment(b"counter").await.unwrap(), 2);
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Entries are not shared between processes
//! - The sweep runs every second, so memory is reclaimed lazily

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;
use tokio::{
    select,
    sync::watch,
    time::{Instant, sleep},
};

use crate::{
    cache::CacheStore,
    error::{StorageError, StorageResult},
};

/// Interval between background sweeps of expired keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the sweep task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory cache store.
///
/// # Cloning
///
/// `MemoryCache` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying entries.
///
/// # Shutdown
///
/// The background sweep stops automatically when all clones are dropped.
/// [`shutdown`](Self::shutdown) stops it explicitly.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Entry>>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache").field("len", &self.entries.read().len()).finish()
    }
}

impl MemoryCache {
    /// Creates a new in-memory cache and spawns its expiry sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let cache = Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        // The task holds only the entry map, not the guard, so dropping the
        // last handle closes the channel.
        let entries = Arc::clone(&cache.entries);
        tokio::spawn(async move {
            Self::sweep_expired(entries, shutdown_rx).await;
        });

        cache
    }

    async fn sweep_expired(
        entries: Arc<RwLock<BTreeMap<Vec<u8>, Entry>>>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        loop {
            select! {
                _ = sleep(SWEEP_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    return;
                }
            }

            let now = Instant::now();
            let has_expired = entries.read().values().any(|entry| entry.is_expired(now));
            if has_expired {
                entries.write().retain(|_, entry| !entry.is_expired(now));
            }
        }
    }

    /// Explicitly signals the background sweep to stop.
    ///
    /// The cache remains usable; expired keys are still hidden from reads
    /// but are no longer reclaimed.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_counter(value: &Bytes) -> StorageResult<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| StorageError::serialization("value is not an integer"))
}

#[async_trait]
impl CacheStore for MemoryCache {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        fail_point!("cache-get", |_| Err(StorageError::connection("injected cache-get failure")));

        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries.get(key).filter(|entry| !entry.is_expired(now)).map(|entry| entry.value.clone()))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(ttl_secs = ttl.as_secs()))]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        let entry = Entry { value: Bytes::from(value), expires_at: Some(Instant::now() + ttl) };
        self.entries.write().insert(key, entry);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn increment(&self, key: &[u8]) -> StorageResult<i64> {
        fail_point!("cache-increment", |_| {
            Err(StorageError::connection("injected cache-increment failure"))
        });

        let now = Instant::now();
        let mut entries = self.entries.write();

        let (next, expires_at) = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let current = parse_counter(&entry.value)?;
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| StorageError::serialization("counter overflow"))?;
                (next, entry.expires_at)
            },
            _ => (1, None),
        };

        entries.insert(key.to_vec(), Entry { value: Bytes::from(next.to_string()), expires_at });
        Ok(next)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(ttl_secs = ttl.as_secs()))]
    async fn expire_if_unset(&self, key: &[u8], ttl: Duration) -> StorageResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) && entry.expires_at.is_none() => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn ttl(&self, key: &[u8]) -> StorageResult<Option<Duration>> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn health_check(&self) -> StorageResult<()> {
        // Acquiring the read lock proves the store is not deadlocked.
        let _unused = self.entries.read();
        Ok(())
    }
}
