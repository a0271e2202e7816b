//! # Tavern Authentication
//!
//! Request authentication, access policy and tiered rate limiting for
//! Tavern services.
//!
//! This crate provides:
//! - **Token verification**: JWT validation with `jsonwebtoken` (HMAC or EdDSA), plus a matching
//!   issuer
//! - **Credential resolution**: bearer tokens and API keys to [`Identity`], with a TTL-bounded
//!   API-key mapping cache
//! - **Access policy**: role, tier and admin checks with audit records for denials
//! - **Rate limiting**: fixed-window counters sized by subscription tier, failing open when the
//!   cache is unreachable
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Credentials  │──►│ AuthResolver  │──►│ PolicyEngine │──►│ RateLimiter │──► handler
//! └──────────────┘   └───────┬───────┘   └──────────────┘   └──────┬──────┘
//!                            │                                     │
//!               TokenVerifier, UserDirectory,              CacheStore counters
//!               CacheStore (API-key mappings)
//! ```
//!
//! [`Gatekeeper`] composes the three stages.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tavern_authn::{AccessRequirement, AuthConfig, Credentials, Gatekeeper, config::JwtConfig};
//! use tavern_storage::{MemoryCache, MemoryUserDirectory, UserId, UserRecord};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = MemoryUserDirectory::new();
//! directory
//!     .create_user(UserRecord::builder().id(UserId(1)).email("bard@example.com").api_key("lute").build())
//!     .await?;
//!
//! let config = AuthConfig::builder()
//!     .jwt(JwtConfig::builder().secret("0123456789abcdef0123456789abcdef").build())
//!     .build()?;
//! let gatekeeper =
//!     Gatekeeper::from_config(&config, Arc::new(MemoryCache::new()), Arc::new(directory))?;
//!
//! let credentials = Credentials::builder().api_key("lute").path("/sheets").build();
//! let admission = gatekeeper.admit(&credentials, &AccessRequirement::authenticated()).await?;
//! assert_eq!(admission.identity.map(|i| i.id), Some(UserId(1)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (key pairs, token helpers, identity fixtures,
//!   a recording audit logger, `assert_auth_error!`).
//! - **`failpoints`**: Enables the storage fail-points for fault-injection tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Audit records for denials and revocations.
pub mod audit;
/// Configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Identities and request credentials.
pub mod identity;
/// JWT verification and issuance.
pub mod jwt;
/// Request admission pipeline.
pub mod pipeline;
/// Role, tier and admin checks.
pub mod policy;
/// Tiered rate limiting.
pub mod rate_limit;
/// Credential resolution.
pub mod resolver;
/// Shared test helpers.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// Algorithm validation.
pub mod validation;

// Re-export key types for convenience
pub use audit::{AuditLogger, TracingAuditLogger};
pub use config::AuthConfig;
pub use error::{AuthError, ConfigError, Result, TokenError};
pub use identity::{Credentials, Identity};
pub use jwt::{JwtVerifier, TokenIssuer, TokenVerifier, VerifiedToken};
pub use pipeline::{AccessRequirement, Admission, Gatekeeper};
pub use policy::PolicyEngine;
pub use rate_limit::{Quota, RateLimitDecision, RateLimiter, TierPolicies, TierPolicy};
pub use resolver::AuthResolver;
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
