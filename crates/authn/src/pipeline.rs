//! Request admission: resolve, authorize, then rate limit.
//!
//! [`Gatekeeper`] runs the three stages in a fixed order for one request
//! and one [`AccessRequirement`]. The first failing stage ends the request;
//! later stages never run, so a rejected credential consumes no quota.
//!
//! ```text
//! Credentials ──► AuthResolver ──► PolicyEngine ──► RateLimiter ──► Admission
//!                   │ 401/500        │ 401/403        │ 429
//! ```

use std::sync::Arc;

use tavern_storage::{CacheStore, Tier, UserDirectory};

use crate::{
    audit::{AuditLogger, TracingAuditLogger},
    config::AuthConfig,
    error::{ConfigError, Result},
    identity::{Credentials, Identity},
    jwt::TokenVerifier,
    policy::PolicyEngine,
    rate_limit::{RateLimitDecision, RateLimiter},
    resolver::AuthResolver,
};

/// Access rules of one route.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct AccessRequirement {
    /// Reject anonymous requests. When `false`, failed resolution is
    /// treated as anonymous.
    #[builder(default = true)]
    pub require_auth: bool,
    /// The identity must hold at least one of these roles. Empty means no
    /// role check.
    #[builder(default, with = |roles: impl IntoIterator<Item = impl Into<String>>| {
        roles.into_iter().map(Into::into).collect()
    })]
    pub roles: Vec<String>,
    /// Minimum subscription tier.
    pub min_tier: Option<Tier>,
    /// Restrict to administrators.
    #[builder(default)]
    pub admin: bool,
}

impl Default for AccessRequirement {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AccessRequirement {
    /// Authentication required, nothing else.
    #[must_use]
    pub fn authenticated() -> Self {
        Self::builder().build()
    }

    /// Authentication optional.
    #[must_use]
    pub fn optional() -> Self {
        Self::builder().require_auth(false).build()
    }

    fn has_policy(&self) -> bool {
        !self.roles.is_empty() || self.min_tier.is_some() || self.admin
    }
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// The caller, or `None` on an optional-auth route.
    pub identity: Option<Identity>,
    /// Rate-limit state after counting this request.
    pub rate_limit: RateLimitDecision,
}

/// Composes the resolver, policy engine and rate limiter.
#[derive(Debug, Clone)]
pub struct Gatekeeper {
    resolver: AuthResolver,
    policy: PolicyEngine,
    limiter: RateLimiter,
}

impl Gatekeeper {
    /// Creates a gatekeeper from already built stages.
    pub fn new(resolver: AuthResolver, policy: PolicyEngine, limiter: RateLimiter) -> Self {
        Self { resolver, policy, limiter }
    }

    /// Wires every stage from `config` and the two stores, auditing through
    /// [`TracingAuditLogger`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn from_config(
        config: &AuthConfig,
        cache: Arc<dyn CacheStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let verifier: Arc<dyn TokenVerifier> = Arc::new(config.jwt().build_verifier()?);
        let audit: Arc<dyn AuditLogger> = Arc::new(TracingAuditLogger);

        let resolver = AuthResolver::builder()
            .cache(Arc::clone(&cache))
            .directory(directory)
            .verifier(verifier)
            .audit(Arc::clone(&audit))
            .api_key_ttl(config.api_key_cache_ttl())
            .build();
        let limiter = RateLimiter::new(cache, config.tier_policies().clone());

        Ok(Self::new(resolver, PolicyEngine::new(audit), limiter))
    }

    /// The credential resolver.
    #[must_use]
    pub fn resolver(&self) -> &AuthResolver {
        &self.resolver
    }

    /// The policy engine.
    #[must_use]
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// The rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Admits or rejects one request.
    ///
    /// On an optional-auth route an anonymous caller passes when the route
    /// has no role, tier or admin rule. Anonymous callers are never rate
    /// limited.
    ///
    /// # Errors
    ///
    /// The first failing stage's [`AuthError`](crate::AuthError).
    #[tracing::instrument(skip_all, fields(path = %credentials.path, user_id = tracing::field::Empty))]
    pub async fn admit(
        &self,
        credentials: &Credentials,
        requirement: &AccessRequirement,
    ) -> Result<Admission> {
        let identity = if requirement.require_auth {
            Some(self.resolver.resolve(credentials).await?)
        } else {
            self.resolver.resolve_optional(credentials).await
        };
        if let Some(identity) = &identity {
            tracing::Span::current().record("user_id", identity.id.0);
        }

        if requirement.has_policy() {
            self.authorize(identity.as_ref(), requirement, &credentials.path).await?;
        }

        let rate_limit = self.limiter.enforce(identity.as_ref()).await?;
        Ok(Admission { identity, rate_limit })
    }

    async fn authorize(
        &self,
        identity: Option<&Identity>,
        requirement: &AccessRequirement,
        path: &str,
    ) -> Result<()> {
        if requirement.admin {
            self.policy.require_admin(identity, path).await?;
        }
        if !requirement.roles.is_empty() {
            self.policy.check_role(identity, requirement.roles.as_slice(), path).await?;
        }
        if let Some(min_tier) = requirement.min_tier {
            self.policy.check_tier(identity, min_tier)?;
        }
        Ok(())
    }
}
