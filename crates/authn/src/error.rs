//! Authentication error types.
//!
//! This module defines three error families:
//!
//! - [`AuthError`]: the outcome of authenticating or authorizing a request. Every variant has a
//!   stable machine [`code`](AuthError::code) and an HTTP [`status_code`](AuthError::status_code).
//! - [`TokenError`]: why a bearer token could not be verified. Only
//!   [`TokenError::KeyUnavailable`] is an infrastructure failure; everything else is an invalid
//!   credential.
//! - [`ConfigError`]: invalid configuration detected at startup.

use std::sync::Arc;

use tavern_storage::{BoxError, StorageError, Tier};
use thiserror::Error;

use crate::rate_limit::Quota;

/// Authentication and authorization errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`: new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Neither a bearer token nor an API key was supplied.
    #[error("Missing credential")]
    MissingCredential,

    /// The supplied credential is malformed, expired, unknown, or refers to
    /// a user that no longer exists.
    #[error("Invalid credential: {reason}")]
    InvalidCredential {
        /// Human-readable reason, safe to return to the caller.
        reason: String,
    },

    /// A dependency (cache, directory, verification keys) failed while
    /// resolving the credential.
    ///
    /// Never reported as an invalid credential: the caller's credential may
    /// well be valid.
    #[error("Authentication infrastructure failure: {message}")]
    AuthInfrastructureFailure {
        /// Description of the failing operation.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// A policy check required an identity but the request is anonymous.
    #[error("Authentication required")]
    Unauthenticated,

    /// The identity holds none of the required roles.
    #[error("Insufficient permissions: requires one of [{}]", .required.join(", "))]
    InsufficientPermissions {
        /// Roles that would have granted access.
        required: Vec<String>,
        /// Roles the identity actually holds.
        actual: Vec<String>,
    },

    /// The identity's subscription tier ranks below the route's minimum.
    #[error("Tier upgrade required: {current} < {required}")]
    TierUpgradeRequired {
        /// The identity's tier.
        current: Tier,
        /// The minimum tier of the route.
        required: Tier,
    },

    /// The route is restricted to administrators.
    #[error("Administrator access required")]
    AdminRequired,

    /// The identity has used up its request quota for the current window.
    #[error("Rate limit exceeded: {} requests per window", .quota.limit)]
    RateLimitExceeded {
        /// Quota state at the time of denial.
        quota: Quota,
    },
}

impl AuthError {
    /// Creates an `InvalidCredential` error.
    #[must_use]
    pub fn invalid_credential(reason: impl Into<String>) -> Self {
        Self::InvalidCredential { reason: reason.into() }
    }

    /// Creates an `AuthInfrastructureFailure` error without a source.
    #[must_use]
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::AuthInfrastructureFailure { message: message.into(), source: None }
    }

    /// Creates an `AuthInfrastructureFailure` error with a source.
    #[must_use]
    pub fn infrastructure_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::AuthInfrastructureFailure { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates an `InsufficientPermissions` error.
    #[must_use]
    pub fn insufficient_permissions(
        required: impl IntoIterator<Item = impl Into<String>>,
        actual: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::InsufficientPermissions {
            required: required.into_iter().map(Into::into).collect(),
            actual: actual.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a `TierUpgradeRequired` error.
    #[must_use]
    pub fn tier_upgrade_required(current: Tier, required: Tier) -> Self {
        Self::TierUpgradeRequired { current, required }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential { .. } => "invalid_credential",
            Self::AuthInfrastructureFailure { .. } => "auth_infrastructure_failure",
            Self::Unauthenticated => "unauthenticated",
            Self::InsufficientPermissions { .. } => "insufficient_permissions",
            Self::TierUpgradeRequired { .. } => "tier_upgrade_required",
            Self::AdminRequired => "admin_required",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
        }
    }

    /// HTTP status code for this error.
    ///
    /// | Status | Variants |
    /// |--------|----------|
    /// | 401 | `MissingCredential`, `InvalidCredential`, `Unauthenticated` |
    /// | 403 | `InsufficientPermissions`, `TierUpgradeRequired`, `AdminRequired` |
    /// | 429 | `RateLimitExceeded` |
    /// | 500 | `AuthInfrastructureFailure` |
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingCredential | Self::InvalidCredential { .. } | Self::Unauthenticated => 401,
            Self::InsufficientPermissions { .. }
            | Self::TierUpgradeRequired { .. }
            | Self::AdminRequired => 403,
            Self::RateLimitExceeded { .. } => 429,
            Self::AuthInfrastructureFailure { .. } => 500,
        }
    }

    /// Returns `true` for errors caused by a failing dependency rather than
    /// by the request.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::AuthInfrastructureFailure { .. })
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        Self::infrastructure_with_source("storage operation failed", err)
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        if err.is_unavailable() {
            Self::infrastructure_with_source("token verification unavailable", err)
        } else {
            tracing::debug!(error = %err, "bearer token rejected");
            Self::invalid_credential(err.public_reason())
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Bearer token verification errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// Token cannot be decoded.
    #[error("Invalid token format: {0}")]
    Malformed(String),

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Token has expired.
    #[error("Token expired")]
    Expired,

    /// Token not yet valid (nbf claim in future).
    #[error("Token not yet valid")]
    NotYetValid,

    /// Issuer doesn't match the configured issuer.
    #[error("Invalid issuer")]
    InvalidIssuer,

    /// Audience doesn't match the configured audience.
    #[error("Invalid audience")]
    InvalidAudience,

    /// Algorithm not accepted, or not the configured one.
    #[error("Unsupported algorithm: {message}")]
    UnsupportedAlgorithm {
        /// Description of the rejected algorithm.
        message: String,
    },

    /// The `sub` claim is missing or not a user id.
    #[error("Invalid subject: {message}")]
    InvalidSubject {
        /// Description of the problem.
        message: String,
    },

    /// Verification key material could not be obtained or used.
    #[error("Verification key unavailable: {message}")]
    KeyUnavailable {
        /// Description of the key problem.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl TokenError {
    /// Creates a `Malformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Creates an `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { message: message.into() }
    }

    /// Creates an `InvalidSubject` error.
    #[must_use]
    pub fn invalid_subject(message: impl Into<String>) -> Self {
        Self::InvalidSubject { message: message.into() }
    }

    /// Creates a `KeyUnavailable` error.
    #[must_use]
    pub fn key_unavailable(message: impl Into<String>) -> Self {
        Self::KeyUnavailable { message: message.into(), source: None }
    }

    /// Fixed description of the rejection, safe to return to the caller.
    ///
    /// Unlike `Display`, it never carries decoder output, claim values or
    /// algorithm names.
    #[must_use]
    pub fn public_reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "Malformed token",
            Self::InvalidSignature => "Invalid signature",
            Self::Expired => "Token expired",
            Self::NotYetValid => "Token not yet valid",
            Self::InvalidIssuer => "Invalid issuer",
            Self::InvalidAudience => "Invalid audience",
            Self::UnsupportedAlgorithm { .. } => "Unsupported algorithm",
            Self::InvalidSubject { .. } => "Invalid subject",
            Self::KeyUnavailable { .. } => "Token verification unavailable",
        }
    }

    /// Returns `true` if verification could not be attempted, as opposed to
    /// the token being rejected.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::KeyUnavailable { .. })
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        if matches!(
            err.kind(),
            ErrorKind::InvalidKeyFormat | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidRsaKey(_)
        ) {
            let message = format!("unusable verification key: {err}");
            return TokenError::KeyUnavailable { message, source: Some(Arc::new(err)) };
        }

        match err.kind() {
            ErrorKind::InvalidToken => TokenError::Malformed("Invalid JWT structure".into()),
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            ErrorKind::InvalidAudience => TokenError::InvalidAudience,
            ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::unsupported_algorithm("Algorithm not supported")
            },
            ErrorKind::MissingRequiredClaim(claim) => {
                TokenError::Malformed(format!("Missing required claim: {claim}"))
            },
            _ => TokenError::Malformed(format!("JWT error: {err}")),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A configuration value is missing or out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Key material could not be decoded.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}
