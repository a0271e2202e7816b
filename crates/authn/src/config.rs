//! Configuration for the authentication pipeline.
//!
//! [`AuthConfig`] holds the token settings, the API-key cache lifetime and
//! the per-tier rate-limit table. It deserializes from any `serde` format;
//! durations use `humantime` syntax (`"30s"`, `"1h"`).
//!
//! ```
//! use std::time::Duration;
//! use tavern_authn::config::AuthConfig;
//!
//! let config: AuthConfig = serde_json::from_str(r#"{
//!     "jwt": { "algorithm": "HS256", "secret": "0123456789abcdef0123456789abcdef" },
//!     "api_key_cache_ttl": "15m",
//!     "tier_policies": { "free": { "requests_per_window": 50, "window": "1h" } }
//! }"#).unwrap();
//!
//! config.validate().unwrap();
//! assert_eq!(config.api_key_cache_ttl(), Duration::from_secs(900));
//! ```

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::ConfigError,
    jwt::{
        DEFAULT_LEEWAY, DEFAULT_TOKEN_LIFETIME, IssuerKey, JwtVerifier, TokenIssuer,
        VerificationKey,
    },
    rate_limit::TierPolicies,
    resolver::DEFAULT_API_KEY_TTL,
};

/// Minimum length of an HMAC secret, in bytes.
pub const MIN_HMAC_SECRET_LEN: usize = 32;

fn default_algorithm() -> Algorithm {
    Algorithm::HS256
}

fn default_leeway() -> Duration {
    DEFAULT_LEEWAY
}

fn default_token_lifetime() -> Duration {
    DEFAULT_TOKEN_LIFETIME
}

fn default_api_key_cache_ttl() -> Duration {
    DEFAULT_API_KEY_TTL
}

/// Bearer token settings.
///
/// HMAC algorithms need `secret`. `EdDSA` needs `public_key` (base64url,
/// 32 bytes) to verify, and `private_key` (standard base64 PKCS#8 DER) to
/// issue tokens.
#[derive(Clone, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct JwtConfig {
    /// Signing algorithm.
    #[serde(default = "default_algorithm")]
    #[builder(default = default_algorithm())]
    pub algorithm: Algorithm,

    /// HMAC shared secret.
    #[serde(default, skip_serializing)]
    #[builder(with = |s: impl Into<String>| Zeroizing::new(s.into()))]
    pub secret: Option<Zeroizing<String>>,

    /// Ed25519 public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub public_key: Option<String>,

    /// Ed25519 private key.
    #[serde(default, skip_serializing)]
    #[builder(with = |s: impl Into<String>| Zeroizing::new(s.into()))]
    pub private_key: Option<Zeroizing<String>>,

    /// Required `iss` claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub issuer: Option<String>,

    /// Required `aud` claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub audience: Option<String>,

    /// Clock skew tolerance.
    #[serde(with = "humantime_serde", default = "default_leeway")]
    #[builder(default = default_leeway())]
    pub leeway: Duration,

    /// Lifetime of issued tokens.
    #[serde(with = "humantime_serde", default = "default_token_lifetime")]
    #[builder(default = default_token_lifetime())]
    pub token_lifetime: Duration,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("algorithm", &self.algorithm)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("public_key", &self.public_key)
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway", &self.leeway)
            .field("token_lifetime", &self.token_lifetime)
            .finish()
    }
}

impl JwtConfig {
    /// Checks that the key material matches the algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.verification_key()?;
        if self.token_lifetime.is_zero() {
            return Err(ConfigError::Invalid("token_lifetime must be positive".into()));
        }
        Ok(())
    }

    /// Key material for the verifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the material required by the algorithm is
    /// missing or too weak.
    pub fn verification_key(&self) -> Result<VerificationKey, ConfigError> {
        match self.algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = self.hmac_secret()?;
                Ok(VerificationKey::hmac(self.algorithm, secret.as_bytes()))
            },
            Algorithm::EdDSA => {
                let public_key = self.public_key.as_deref().ok_or_else(|| {
                    ConfigError::Invalid("jwt.public_key is required for EdDSA".into())
                })?;
                Ok(VerificationKey::ed25519(public_key))
            },
            other => Err(ConfigError::Invalid(format!("unsupported JWT algorithm: {other:?}"))),
        }
    }

    /// Key material for the issuer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if no signing material is configured.
    pub fn issuer_key(&self) -> Result<IssuerKey, ConfigError> {
        match self.algorithm {
            Algorithm::EdDSA => {
                let encoded = self.private_key.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("jwt.private_key is required to issue EdDSA tokens".into())
                })?;
                let der = Zeroizing::new(STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                    ConfigError::InvalidKey(format!("jwt.private_key is not base64: {e}"))
                })?);
                Ok(IssuerKey::ed25519(der.to_vec()))
            },
            _ => {
                let secret = self.hmac_secret()?;
                Ok(IssuerKey::hmac(self.algorithm, secret.as_bytes()))
            },
        }
    }

    /// Builds the verifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the key material is unusable.
    pub fn build_verifier(&self) -> Result<JwtVerifier, ConfigError> {
        JwtVerifier::builder()
            .key(self.verification_key()?)
            .maybe_issuer(self.issuer.clone())
            .maybe_audience(self.audience.clone())
            .leeway(self.leeway)
            .build()
    }

    /// Builds an issuer whose tokens the verifier from
    /// [`build_verifier`](Self::build_verifier) accepts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if signing material is missing or unusable.
    pub fn build_issuer(&self) -> Result<TokenIssuer, ConfigError> {
        TokenIssuer::builder()
            .key(self.issuer_key()?)
            .lifetime(self.token_lifetime)
            .maybe_issuer(self.issuer.clone())
            .maybe_audience(self.audience.clone())
            .build()
    }

    fn hmac_secret(&self) -> Result<&Zeroizing<String>, ConfigError> {
        let secret = self.secret.as_ref().ok_or_else(|| {
            ConfigError::Invalid(format!("jwt.secret is required for {:?}", self.algorithm))
        })?;
        if secret.len() < MIN_HMAC_SECRET_LEN {
            return Err(ConfigError::InvalidKey(format!(
                "jwt.secret must be at least {MIN_HMAC_SECRET_LEN} bytes"
            )));
        }
        Ok(secret)
    }
}

/// Top-level authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Bearer token settings.
    pub(crate) jwt: JwtConfig,

    /// Lifetime of cached API-key mappings.
    #[serde(with = "humantime_serde", default = "default_api_key_cache_ttl")]
    pub(crate) api_key_cache_ttl: Duration,

    /// Per-tier rate limits.
    #[serde(default)]
    pub(crate) tier_policies: TierPolicies,
}

#[bon::bon]
impl AuthConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if [`validate`](Self::validate) fails.
    #[builder]
    pub fn new(
        jwt: JwtConfig,
        #[builder(default = default_api_key_cache_ttl())] api_key_cache_ttl: Duration,
        #[builder(default)] tier_policies: TierPolicies,
    ) -> Result<Self, ConfigError> {
        let config = Self { jwt, api_key_cache_ttl, tier_policies };
        config.validate()?;
        Ok(config)
    }
}

impl AuthConfig {
    /// Validates a configuration, typically one that was deserialized.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jwt.validate()?;
        if self.api_key_cache_ttl.is_zero() {
            return Err(ConfigError::Invalid("api_key_cache_ttl must be positive".into()));
        }
        self.tier_policies.validate()
    }

    /// Bearer token settings.
    #[must_use]
    pub fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }

    /// Lifetime of cached API-key mappings.
    #[must_use]
    pub fn api_key_cache_ttl(&self) -> Duration {
        self.api_key_cache_ttl
    }

    /// Per-tier rate limits.
    #[must_use]
    pub fn tier_policies(&self) -> &TierPolicies {
        &self.tier_policies
    }
}
