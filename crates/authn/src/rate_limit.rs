//! Tiered fixed-window rate limiting.
//!
//! Each identity gets one counter in the [`CacheStore`] under
//! `ratelimit:{user_id}`. The first request of a window creates the counter
//! and attaches a TTL equal to the tier's window; the window does not slide,
//! and the counter disappears when the TTL runs out.
//!
//! Anonymous requests are never metered. If the cache fails, the request is
//! allowed and a warning is logged (fail-open).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tavern_authn::rate_limit::{RateLimiter, TierPolicies};
//! use tavern_storage::MemoryCache;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let limiter = RateLimiter::new(Arc::new(MemoryCache::new()), TierPolicies::default());
//!
//! // Anonymous callers are never metered
//! let decision = limiter.check_and_consume(None).await;
//! assert!(decision.allowed);
//! assert!(decision.quota.is_none());
//! # });
//! ```

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tavern_storage::{CacheStore, StorageResult, Tier, UserId};

use crate::{
    error::{AuthError, ConfigError},
    identity::Identity,
};

/// Prefix of rate-limit counter keys.
pub const RATE_LIMIT_KEY_PREFIX: &str = "ratelimit:";

/// Default window length for every tier.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Cache key of the counter for `user_id`.
#[must_use]
pub fn rate_limit_key(user_id: UserId) -> Vec<u8> {
    format!("{RATE_LIMIT_KEY_PREFIX}{user_id}").into_bytes()
}

fn default_window() -> Duration {
    DEFAULT_WINDOW
}

/// Request allowance of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierPolicy {
    /// Requests allowed per window.
    pub requests_per_window: u64,
    /// Window length, counted from the first request.
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
}

impl TierPolicy {
    /// Free tier: 100 requests per hour.
    pub const FREE: Self = Self::new(100, DEFAULT_WINDOW);
    /// Pro tier: 1 000 requests per hour.
    pub const PRO: Self = Self::new(1_000, DEFAULT_WINDOW);
    /// Enterprise tier: 10 000 requests per hour.
    pub const ENTERPRISE: Self = Self::new(10_000, DEFAULT_WINDOW);

    /// Creates a policy.
    #[must_use]
    pub const fn new(requests_per_window: u64, window: Duration) -> Self {
        Self { requests_per_window, window }
    }

    /// The built-in policy of `tier`.
    #[must_use]
    pub const fn default_for(tier: Tier) -> Self {
        match tier {
            Tier::Free => Self::FREE,
            Tier::Pro => Self::PRO,
            Tier::Enterprise => Self::ENTERPRISE,
        }
    }
}

/// Per-tier policy table.
///
/// A tier without an entry is limited by the `free` entry, and by
/// [`TierPolicy::FREE`] if that is missing too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierPolicies(BTreeMap<Tier, TierPolicy>);

impl Default for TierPolicies {
    fn default() -> Self {
        Self(Tier::ALL.into_iter().map(|tier| (tier, TierPolicy::default_for(tier))).collect())
    }
}

impl TierPolicies {
    /// A table with no entries; every tier falls back to [`TierPolicy::FREE`].
    #[must_use]
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the table with `tier` set to `policy`.
    #[must_use]
    pub fn with(mut self, tier: Tier, policy: TierPolicy) -> Self {
        self.0.insert(tier, policy);
        self
    }

    /// The configured policy of `tier`, if any.
    #[must_use]
    pub fn get(&self, tier: Tier) -> Option<&TierPolicy> {
        self.0.get(&tier)
    }

    /// The effective policy of `tier`, falling back to `free`.
    #[must_use]
    pub fn for_tier(&self, tier: Tier) -> TierPolicy {
        self.0.get(&tier).or_else(|| self.0.get(&Tier::Free)).copied().unwrap_or(TierPolicy::FREE)
    }

    /// Rejects zero limits and zero windows.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending tier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (tier, policy) in &self.0 {
            if policy.requests_per_window == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate limit for tier '{tier}' must allow at least one request"
                )));
            }
            if policy.window.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "rate limit window for tier '{tier}' must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Quota state reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    /// Requests allowed per window.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
}

impl Quota {
    /// Window end as Unix seconds.
    #[must_use]
    pub fn reset_epoch_seconds(&self) -> i64 {
        self.reset_at.timestamp()
    }

    /// Whole seconds until the window ends, at least 1.
    #[must_use]
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let secs = (self.reset_at - now).num_seconds();
        u64::try_from(secs).unwrap_or(0).max(1)
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Quota state; `None` when the request was not metered (anonymous
    /// caller or cache failure).
    pub quota: Option<Quota>,
}

impl RateLimitDecision {
    /// An allowed, unmetered decision.
    #[must_use]
    pub const fn unmetered() -> Self {
        Self { allowed: true, quota: None }
    }

    /// Returns `true` if a counter was consulted.
    #[must_use]
    pub fn is_metered(&self) -> bool {
        self.quota.is_some()
    }
}

/// Fixed-window rate limiter sized by subscription tier.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
    policies: TierPolicies,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("policies", &self.policies).finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter over `cache` with the given policy table.
    pub fn new(cache: Arc<dyn CacheStore>, policies: TierPolicies) -> Self {
        Self { cache, policies }
    }

    /// The policy table.
    #[must_use]
    pub fn policies(&self) -> &TierPolicies {
        &self.policies
    }

    /// Counts one request for `identity` and decides whether it may proceed.
    ///
    /// Anonymous requests are always allowed. Cache failures allow the
    /// request and log a warning.
    #[tracing::instrument(skip_all, fields(user_id = identity.map(|i| i.id.0)))]
    pub async fn check_and_consume(&self, identity: Option<&Identity>) -> RateLimitDecision {
        let Some(identity) = identity else {
            return RateLimitDecision::unmetered();
        };

        let policy = self.policies.for_tier(identity.subscription_tier);
        match self.consume(identity.id, policy).await {
            Ok(decision) => {
                if !decision.allowed {
                    tracing::info!(
                        user_id = %identity.id,
                        tier = %identity.subscription_tier,
                        limit = policy.requests_per_window,
                        "rate limit exceeded"
                    );
                }
                decision
            },
            Err(e) => {
                tracing::warn!(
                    user_id = %identity.id,
                    error = %e,
                    "rate limit check failed, allowing request"
                );
                RateLimitDecision::unmetered()
            },
        }
    }

    /// Like [`check_and_consume`](Self::check_and_consume), but turns a
    /// denial into [`AuthError::RateLimitExceeded`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RateLimitExceeded`] when the quota is used up.
    pub async fn enforce(&self, identity: Option<&Identity>) -> Result<RateLimitDecision, AuthError> {
        let decision = self.check_and_consume(identity).await;
        match (decision.allowed, decision.quota) {
            (false, Some(quota)) => Err(AuthError::RateLimitExceeded { quota }),
            _ => Ok(decision),
        }
    }

    async fn consume(&self, user_id: UserId, policy: TierPolicy) -> StorageResult<RateLimitDecision> {
        let key = rate_limit_key(user_id);
        let count = u64::try_from(self.cache.increment(&key).await?).unwrap_or(0);

        let reset_in = if count == 1 {
            self.cache.expire_if_unset(&key, policy.window).await?;
            policy.window
        } else {
            match self.cache.ttl(&key).await? {
                Some(ttl) => ttl,
                None => {
                    // A counter without expiry would never reset.
                    self.cache.expire_if_unset(&key, policy.window).await?;
                    policy.window
                },
            }
        };

        let reset_at = Utc::now()
            + chrono::Duration::from_std(reset_in).unwrap_or_else(|_| chrono::Duration::zero());
        let limit = policy.requests_per_window;

        Ok(RateLimitDecision {
            allowed: count <= limit,
            quota: Some(Quota { limit, remaining: limit.saturating_sub(count), reset_at }),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use tavern_storage::{MemoryCache, testutil::FailingCache};
    use tokio::time::advance;

    use super::*;
    use crate::testutil::test_identity;

    fn limiter(cache: MemoryCache) -> RateLimiter {
        RateLimiter::new(Arc::new(cache), TierPolicies::default())
    }

    #[tokio::test]
    async fn test_anonymous_always_allowed() {
        let cache = MemoryCache::new();
        let limiter = limiter(cache.clone());

        for _ in 0..500 {
            let decision = limiter.check_and_consume(None).await;
            assert!(decision.allowed);
            assert!(!decision.is_metered());
        }
        assert!(cache.is_empty(), "anonymous checks must not touch the cache");
    }

    #[tokio::test]
    async fn test_stored_tier_names_size_the_quota() {
        let limiter = limiter(MemoryCache::new());
        for (id, stored, limit) in [(1, "premium", 100), (2, "Pro", 1_000), (3, "ENTERPRISE", 10_000)] {
            let json = format!(
                r#"{{"id":{id},"email":"u{id}@example.com","subscription_tier":"{stored}","created_at":"2024-01-01T00:00:00Z"}}"#
            );
            let user: tavern_storage::UserRecord = serde_json::from_str(&json).unwrap();
            let identity = Identity::from(user);

            let quota = limiter.check_and_consume(Some(&identity)).await.quota.unwrap();
            assert_eq!(quota.limit, limit, "stored tier {stored}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_tier_boundary_and_window_reset() {
        let limiter = limiter(MemoryCache::new());
        let identity = test_identity(1, Tier::Free);

        for n in 1..=99u64 {
            let decision = limiter.check_and_consume(Some(&identity)).await;
            assert!(decision.allowed);
            assert_eq!(decision.quota.unwrap().remaining, 100 - n);
        }

        let hundredth = limiter.check_and_consume(Some(&identity)).await;
        assert!(hundredth.allowed);
        assert_eq!(hundredth.quota.unwrap().remaining, 0);

        let denied = limiter.enforce(Some(&identity)).await;
        match denied {
            Err(AuthError::RateLimitExceeded { quota }) => {
                assert_eq!(quota.limit, 100);
                assert_eq!(quota.remaining, 0);
            },
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }

        advance(DEFAULT_WINDOW).await;

        let fresh = limiter.check_and_consume(Some(&identity)).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.quota.unwrap().remaining, 99);
    }

    #[tokio::test]
    async fn test_tier_sizes_limit() {
        let limiter = limiter(MemoryCache::new());

        let pro = limiter.check_and_consume(Some(&test_identity(2, Tier::Pro))).await;
        assert_eq!(pro.quota.unwrap().limit, 1_000);

        let enterprise = limiter.check_and_consume(Some(&test_identity(3, Tier::Enterprise))).await;
        assert_eq!(enterprise.quota.unwrap().limit, 10_000);
    }

    #[tokio::test]
    async fn test_unconfigured_tier_falls_back_to_free() {
        let policies = TierPolicies::empty().with(Tier::Free, TierPolicy::new(5, DEFAULT_WINDOW));
        let limiter = RateLimiter::new(Arc::new(MemoryCache::new()), policies);

        let decision = limiter.check_and_consume(Some(&test_identity(4, Tier::Enterprise))).await;
        assert_eq!(decision.quota.unwrap().limit, 5);

        let bare = RateLimiter::new(Arc::new(MemoryCache::new()), TierPolicies::empty());
        let decision = bare.check_and_consume(Some(&test_identity(4, Tier::Pro))).await;
        assert_eq!(decision.quota.unwrap().limit, 100);
    }

    #[tokio::test]
    async fn test_reset_time_tracks_window_start() {
        let limiter = limiter(MemoryCache::new());
        let identity = test_identity(5, Tier::Free);

        let before = Utc::now();
        let first = limiter.check_and_consume(Some(&identity)).await.quota.unwrap();
        let second = limiter.check_and_consume(Some(&identity)).await.quota.unwrap();

        let expected = before + chrono::Duration::seconds(3600);
        assert!((first.reset_at - expected).num_seconds().abs() <= 1);
        assert!((second.reset_at - first.reset_at).num_seconds().abs() <= 1);
        assert!(first.reset_epoch_seconds() > before.timestamp());
    }

    #[tokio::test]
    async fn test_counter_without_ttl_gets_one() {
        let cache = MemoryCache::new();
        let limiter = limiter(cache.clone());
        let identity = test_identity(6, Tier::Free);
        let key = rate_limit_key(identity.id);

        // Counter created without the expiry step
        cache.increment(&key).await.unwrap();
        assert_eq!(cache.ttl(&key).await.unwrap(), None);

        limiter.check_and_consume(Some(&identity)).await;
        assert!(cache.ttl(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(FailingCache), TierPolicies::default());
        let identity = test_identity(7, Tier::Free);

        for _ in 0..200 {
            let decision = limiter.enforce(Some(&identity)).await.unwrap();
            assert!(decision.allowed);
            assert!(decision.quota.is_none());
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(TierPolicies::default().validate().is_ok());
        assert!(
            TierPolicies::default().with(Tier::Pro, TierPolicy::new(0, DEFAULT_WINDOW)).validate().is_err()
        );
        assert!(
            TierPolicies::default().with(Tier::Pro, TierPolicy::new(10, Duration::ZERO)).validate().is_err()
        );
    }

    #[test]
    fn test_policies_deserialize_from_tier_names() {
        let json = r#"{"free": {"requests_per_window": 50, "window": "30m"}, "pro": {"requests_per_window": 500}}"#;
        let policies: TierPolicies = serde_json::from_str(json).unwrap();
        assert_eq!(policies.for_tier(Tier::Free), TierPolicy::new(50, Duration::from_secs(1800)));
        assert_eq!(policies.for_tier(Tier::Pro), TierPolicy::new(500, DEFAULT_WINDOW));
        assert_eq!(policies.for_tier(Tier::Enterprise).requests_per_window, 50);
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let now = Utc::now();
        let quota = Quota { limit: 1, remaining: 0, reset_at: now };
        assert_eq!(quota.retry_after_secs(now), 1);
        let later = Quota { reset_at: now + chrono::Duration::seconds(90), ..quota };
        assert_eq!(later.retry_after_secs(now), 90);
    }
}
