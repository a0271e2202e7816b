//! Resolved identities and raw request credentials.

use std::{collections::BTreeSet, net::SocketAddr};

use serde::Serialize;
use tavern_storage::{Tier, UserId, UserRecord};

/// The authenticated caller of one request.
///
/// Built fresh from the [`UserDirectory`](tavern_storage::UserDirectory) on
/// every resolution and never cached, so role, tier and admin changes take
/// effect on the next request. The API key is never printed by `Debug` or
/// serialized.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// User id.
    pub id: UserId,
    /// Login email.
    pub email: String,
    /// Subscription tier.
    pub subscription_tier: Tier,
    /// The user's API key, if one is assigned.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Role names.
    pub roles: BTreeSet<String>,
    /// Administrator flag.
    pub is_admin: bool,
}

impl Identity {
    /// Returns `true` if the identity holds at least one of `roles`.
    #[must_use]
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.roles.contains(role.as_ref()))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("subscription_tier", &self.subscription_tier)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("roles", &self.roles)
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

impl From<UserRecord> for Identity {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email,
            subscription_tier: user.subscription_tier,
            api_key: user.api_key,
            roles: user.roles,
            is_admin: user.is_admin,
        }
    }
}

/// Credentials presented by a request, as extracted by the transport layer.
///
/// Empty strings are treated the same as absent values.
#[derive(Clone, bon::Builder)]
pub struct Credentials {
    /// Bearer token from `Authorization: Bearer <token>`.
    #[builder(into)]
    pub bearer: Option<String>,
    /// API key from `X-API-Key`.
    #[builder(into)]
    pub api_key: Option<String>,
    /// Request path, used for audit records.
    #[builder(into, default = String::from("/"))]
    pub path: String,
    /// Peer address, when known.
    pub remote_addr: Option<SocketAddr>,
}

impl Credentials {
    /// The bearer token, if present and non-empty.
    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// The API key, if present and non-empty.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    /// Returns `true` if neither credential is usable.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.bearer().is_none() && self.api_key().is_none()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bearer", &self.bearer().map(|_| "[REDACTED]"))
            .field("api_key", &self.api_key().map(|_| "[REDACTED]"))
            .field("path", &self.path)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}
