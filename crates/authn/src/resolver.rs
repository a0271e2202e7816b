//! Credential resolution.
//!
//! [`AuthResolver`] turns the [`Credentials`] of a request into an
//! [`Identity`]. A bearer token wins over an API key when both are present.
//!
//! API keys are mapped to user ids through the [`CacheStore`] under a blind
//! index (`apikey:{sha256 hex}`), so a hit costs one cache read plus one
//! directory lookup by id. The identity itself is never cached: every
//! resolution reads the user record again.
//!
//! ```text
//!   bearer ──► TokenVerifier ──► find_by_id ──────────────┐
//!                                                         ├──► Identity
//!   api key ─► cache get ─┬─ hit ──► find_by_id ──────────┤
//!                         └─ miss ─► find_by_api_key ─────┘
//!                                    └─► cache set (ttl)
//! ```

use std::{fmt, sync::Arc, time::Duration};

use sha2::{Digest, Sha256};
use tavern_storage::{CacheStore, UserDirectory, UserId, UserRecord};

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, NoopAuditLogger},
    error::{AuthError, Result},
    identity::{Credentials, Identity},
    jwt::TokenVerifier,
};

/// Prefix of API-key mapping keys in the cache.
pub const API_KEY_PREFIX: &str = "apikey:";

/// Default lifetime of a cached API-key mapping.
pub const DEFAULT_API_KEY_TTL: Duration = Duration::from_secs(3600);

/// Cache key holding the user id for `api_key`.
///
/// The raw key never appears in the cache key space.
#[must_use]
pub fn api_key_cache_key(api_key: &str) -> Vec<u8> {
    format!("{API_KEY_PREFIX}{:x}", Sha256::digest(api_key.as_bytes())).into_bytes()
}

/// Resolves request credentials to identities.
#[derive(Clone)]
pub struct AuthResolver {
    cache: Arc<dyn CacheStore>,
    directory: Arc<dyn UserDirectory>,
    verifier: Arc<dyn TokenVerifier>,
    audit: Arc<dyn AuditLogger>,
    api_key_ttl: Duration,
}

impl fmt::Debug for AuthResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResolver").field("api_key_ttl", &self.api_key_ttl).finish_non_exhaustive()
    }
}

#[bon::bon]
impl AuthResolver {
    /// Creates a resolver over the given stores and verifier.
    #[builder]
    pub fn new(
        cache: Arc<dyn CacheStore>,
        directory: Arc<dyn UserDirectory>,
        verifier: Arc<dyn TokenVerifier>,
        #[builder(default = Arc::new(NoopAuditLogger))] audit: Arc<dyn AuditLogger>,
        #[builder(default = DEFAULT_API_KEY_TTL)] api_key_ttl: Duration,
    ) -> Self {
        Self { cache, directory, verifier, audit, api_key_ttl }
    }
}

impl AuthResolver {
    /// Lifetime of cached API-key mappings.
    #[must_use]
    pub fn api_key_ttl(&self) -> Duration {
        self.api_key_ttl
    }

    /// Resolves `credentials` to an identity.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingCredential`] if no usable credential is present
    /// - [`AuthError::InvalidCredential`] if the token is rejected, the API key is unknown, or the
    ///   user no longer exists
    /// - [`AuthError::AuthInfrastructureFailure`] if the cache, directory or key material failed
    #[tracing::instrument(skip_all, fields(path = %credentials.path))]
    pub async fn resolve(&self, credentials: &Credentials) -> Result<Identity> {
        if let Some(token) = credentials.bearer() {
            return self.resolve_bearer(token).await;
        }
        if let Some(api_key) = credentials.api_key() {
            return self.resolve_api_key(api_key).await;
        }
        Err(AuthError::MissingCredential)
    }

    /// Resolves `credentials`, treating every failure as anonymous.
    pub async fn resolve_optional(&self, credentials: &Credentials) -> Option<Identity> {
        match self.resolve(credentials).await {
            Ok(identity) => Some(identity),
            Err(AuthError::MissingCredential) => None,
            Err(e) => {
                tracing::debug!(error = %e, code = e.code(), "optional authentication failed");
                None
            },
        }
    }

    /// Drops the cached mapping for `api_key`.
    ///
    /// Call this after rotating or deleting a key so the old key stops
    /// resolving before its mapping expires.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AuthInfrastructureFailure`] if the cache fails.
    #[tracing::instrument(skip_all)]
    pub async fn revoke_api_key(&self, api_key: &str, actor: &str) -> Result<()> {
        let key = api_key_cache_key(api_key);
        let outcome = self.cache.delete(&key).await;

        let result = match &outcome {
            Ok(()) => AuditResult::Success,
            Err(e) => AuditResult::Failure(e.to_string()),
        };
        let event = AuditEvent::builder()
            .actor(actor)
            .action(AuditAction::ApiKeyRevoked)
            .resource(String::from_utf8_lossy(&key))
            .result(result)
            .build();
        self.audit.log(&event).await;

        outcome.map_err(AuthError::from)
    }

    async fn resolve_bearer(&self, token: &str) -> Result<Identity> {
        let verified = self.verifier.verify(token).await?;
        match self.directory.find_by_id(verified.user_id).await? {
            Some(user) => Ok(Identity::from(user)),
            None => {
                tracing::debug!(user_id = %verified.user_id, "token subject no longer exists");
                Err(AuthError::invalid_credential("user not found"))
            },
        }
    }

    async fn resolve_api_key(&self, api_key: &str) -> Result<Identity> {
        let cache_key = api_key_cache_key(api_key);

        if let Some(cached) = self.cache.get(&cache_key).await? {
            match parse_user_id(&cached) {
                Some(user_id) => {
                    if let Some(user) = self.directory.find_by_id(user_id).await? {
                        return Ok(Identity::from(user));
                    }
                    tracing::debug!(user_id = %user_id, "cached API key maps to a missing user");
                    self.cache.delete(&cache_key).await?;
                    return Err(AuthError::invalid_credential("user not found"));
                },
                None => {
                    tracing::warn!("discarding unreadable API key mapping");
                    self.cache.delete(&cache_key).await?;
                },
            }
        }

        let Some(user) = self.directory.find_by_api_key(api_key).await? else {
            return Err(AuthError::invalid_credential("unknown API key"));
        };
        self.remember(cache_key, &user).await?;
        Ok(Identity::from(user))
    }

    async fn remember(&self, cache_key: Vec<u8>, user: &UserRecord) -> Result<()> {
        self.cache
            .set_with_ttl(cache_key, user.id.to_string().into_bytes(), self.api_key_ttl)
            .await?;
        Ok(())
    }
}

fn parse_user_id(bytes: &[u8]) -> Option<UserId> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
