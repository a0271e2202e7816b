//! Cache store and user directory abstractions for Tavern services.
//!
//! This crate provides the two storage dependencies of the authentication
//! pipeline: the [`CacheStore`] (API-key mappings and rate-limit counters)
//! and the [`UserDirectory`] (the system of record for users). Both are
//! traits so that services pass in a concrete store at construction and
//! tests substitute fakes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      tavern-gate                            │
//! │              (HTTP middleware, extractors)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      tavern-authn                           │
//! │   Resolver │ Policy Engine │ Rate Limiter │ Token Verifier  │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │        CacheStore            │        UserDirectory         │
//! │ (get, set_with_ttl, delete,  │ (find_by_id, find_by_email,  │
//! │  increment, expire_if_unset) │  find_by_api_key)            │
//! ├──────────────────────────────┼──────────────────────────────┤
//! │        MemoryCache           │     MemoryUserDirectory      │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use tavern_storage::{CacheStore, MemoryCache, MemoryUserDirectory, Tier, UserDirectory, UserId, UserRecord};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = MemoryUserDirectory::new();
//!     directory
//!         .create_user(UserRecord::builder().id(UserId(1)).email("bard@example.com").api_key("k1").build())
//!         .await?;
//!
//!     let user = directory.find_by_api_key("k1").await?.ok_or("missing")?;
//!     assert_eq!(user.subscription_tier, Tier::Free);
//!
//!     let cache = MemoryCache::new();
//!     cache.set_with_ttl(b"apikey:k1".to_vec(), b"1".to_vec(), Duration::from_secs(3600)).await?;
//!     assert_eq!(cache.increment(b"ratelimit:1").await?, 1);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Store
//!
//! 1. Implement [`CacheStore`] or [`UserDirectory`]
//! 2. Make [`CacheStore::increment`] a single atomic step in the backing store
//! 3. Map backend-specific errors to [`StorageError`]
//!
//! See the [`memory`] module source for a reference implementation.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (user fixtures, failing
//!   and counting store doubles, assertion macros).
//! - **`failpoints`**: Compiles `fail` injection points into the in-memory stores
//!   (`cache-get`, `cache-increment`, `directory-find`).

#![deny(unsafe_code)]

pub mod cache;
pub mod directory;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;
pub mod user;

// Re-export primary types at crate root for convenience
pub use cache::CacheStore;
pub use directory::{MemoryUserDirectory, UserDirectory};
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryCache;
pub use types::{Tier, UnknownTier, UserId};
pub use user::UserRecord;
