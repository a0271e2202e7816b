//! Bearer token verification and issuance.
//!
//! This module provides the [`TokenVerifier`] abstraction used by the
//! [`AuthResolver`](crate::AuthResolver), a [`JwtVerifier`] implementation
//! backed by `jsonwebtoken`, and a [`TokenIssuer`] that mints tokens the
//! verifier accepts.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use jsonwebtoken::Algorithm;
//! use tavern_authn::jwt::{IssuerKey, JwtVerifier, TokenIssuer, TokenVerifier, VerificationKey};
//! use tavern_storage::UserId;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let secret = b"an-example-secret-of-sufficient-length";
//! let issuer = TokenIssuer::builder()
//!     .key(IssuerKey::hmac(Algorithm::HS256, secret.to_vec()))
//!     .lifetime(Duration::from_secs(900))
//!     .build()
//!     .unwrap();
//! let verifier = JwtVerifier::builder()
//!     .key(VerificationKey::hmac(Algorithm::HS256, secret.to_vec()))
//!     .build()
//!     .unwrap();
//!
//! let issued = issuer.issue(UserId(42)).unwrap();
//! let verified = verifier.verify(&issued.token).await.unwrap();
//! assert_eq!(verified.user_id, UserId(42));
//! # });
//! ```

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tavern_storage::UserId;
use zeroize::Zeroizing;

use crate::{
    error::{ConfigError, TokenError},
    validation::{validate_algorithm, validate_subject},
};

/// Default clock skew tolerance for `exp` and `nbf`.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(30);

/// Default lifetime of issued tokens.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// JWT claims structure.
///
/// ```json
/// {
///   "sub": "42",
///   "exp": 1234567890,
///   "iat": 1234567800,
///   "iss": "https://tavern.example.com",
///   "aud": "tavern-api",
///   "jti": "b3JjaXNo"
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject - the user id as a decimal string.
    pub sub: String,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
    /// Issued at (seconds since epoch).
    #[serde(default)]
    pub iat: u64,
    /// Not before (optional, seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    /// Issuer (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// JWT ID (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// The verified content of a bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedToken {
    /// User the token was issued to.
    pub user_id: UserId,
    /// When the token stops being valid.
    pub expires_at: DateTime<Utc>,
    /// The `jti` claim, if present.
    pub token_id: Option<String>,
}

/// Verifies bearer tokens.
///
/// Implementations return [`TokenError::KeyUnavailable`] only when they
/// could not attempt verification (for example, a remote key set is
/// unreachable). Every other error means the token itself is unacceptable.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verifies `token` and returns the user it was issued to.
    #[must_use = "token verification results must be checked"]
    async fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError>;
}

#[async_trait]
impl<V: TokenVerifier + ?Sized> TokenVerifier for Arc<V> {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        (**self).verify(token).await
    }
}

/// Key material used to verify tokens.
#[derive(Clone)]
pub enum VerificationKey {
    /// HMAC shared secret (HS256, HS384 or HS512).
    Hmac {
        /// One of the HMAC algorithms.
        algorithm: Algorithm,
        /// The shared secret.
        secret: Zeroizing<Vec<u8>>,
    },
    /// Ed25519 public key, base64url-encoded without padding (32 bytes).
    Ed25519 {
        /// The encoded public key.
        public_key: String,
    },
}

impl VerificationKey {
    /// Creates an HMAC verification key.
    #[must_use]
    pub fn hmac(algorithm: Algorithm, secret: impl Into<Vec<u8>>) -> Self {
        Self::Hmac { algorithm, secret: Zeroizing::new(secret.into()) }
    }

    /// Creates an Ed25519 verification key from its base64url encoding.
    #[must_use]
    pub fn ed25519(public_key: impl Into<String>) -> Self {
        Self::Ed25519 { public_key: public_key.into() }
    }

    /// The only algorithm this key verifies.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Hmac { algorithm, .. } => *algorithm,
            Self::Ed25519 { .. } => Algorithm::EdDSA,
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey, ConfigError> {
        match self {
            Self::Hmac { algorithm, secret } => {
                if !is_hmac(*algorithm) {
                    return Err(ConfigError::InvalidKey(format!(
                        "{algorithm:?} is not an HMAC algorithm"
                    )));
                }
                if secret.is_empty() {
                    return Err(ConfigError::InvalidKey("HMAC secret is empty".into()));
                }
                Ok(DecodingKey::from_secret(secret))
            },
            Self::Ed25519 { public_key } => {
                let bytes = URL_SAFE_NO_PAD.decode(public_key).map_err(|e| {
                    ConfigError::InvalidKey(format!("Ed25519 public key is not base64url: {e}"))
                })?;
                if bytes.len() != 32 {
                    return Err(ConfigError::InvalidKey(format!(
                        "Ed25519 public key must be 32 bytes, got {}",
                        bytes.len()
                    )));
                }
                DecodingKey::from_ed_components(public_key).map_err(|e| {
                    ConfigError::InvalidKey(format!("Ed25519 public key rejected: {e}"))
                })
            },
        }
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hmac { algorithm, .. } => f
                .debug_struct("Hmac")
                .field("algorithm", algorithm)
                .field("secret", &"[REDACTED]")
                .finish(),
            Self::Ed25519 { public_key } => {
                f.debug_struct("Ed25519").field("public_key", public_key).finish()
            },
        }
    }
}

fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Extract the `alg` header value without parsing it into an [`Algorithm`].
///
/// `jsonwebtoken` cannot represent `none`, so the raw string is read first
/// to reject it explicitly.
fn header_algorithm(token: &str) -> Result<String, TokenError> {
    #[derive(Deserialize)]
    struct RawHeader {
        alg: String,
    }

    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::malformed("JWT must have 3 parts separated by dots"));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| TokenError::malformed(format!("Failed to decode JWT header: {e}")))?;
    let raw: RawHeader = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::malformed(format!("Failed to parse JWT header: {e}")))?;
    Ok(raw.alg)
}

/// [`TokenVerifier`] for JWTs signed with a single configured key.
///
/// Checks, in order:
/// 1. The header algorithm is accepted and equals the key's algorithm
/// 2. The signature
/// 3. `exp` (always) and `nbf` (when present), with leeway
/// 4. `iss` and `aud` when configured
/// 5. `sub` is a user id
pub struct JwtVerifier {
    algorithm: Algorithm,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.validation.iss)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl JwtVerifier {
    /// Creates a verifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidKey`] if the key material is unusable
    /// (empty secret, non-HMAC algorithm for a secret, malformed Ed25519 key).
    #[builder]
    pub fn new(
        key: VerificationKey,
        #[builder(into)] issuer: Option<String>,
        #[builder(into)] audience: Option<String>,
        #[builder(default = DEFAULT_LEEWAY)] leeway: Duration,
    ) -> Result<Self, ConfigError> {
        let algorithm = key.algorithm();
        let decoding_key = key.decoding_key()?;

        let mut validation = Validation::new(algorithm);
        validation.algorithms = vec![algorithm];
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = leeway.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);
        match &issuer {
            Some(iss) => validation.set_issuer(&[iss]),
            None => validation.iss = None,
        }
        match &audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Ok(Self { algorithm, decoding_key, validation })
    }
}

impl JwtVerifier {
    /// The algorithm this verifier accepts.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn verify_sync(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let alg = header_algorithm(token)?;
        let algorithm = validate_algorithm(&alg)?;
        if algorithm != self.algorithm {
            return Err(TokenError::unsupported_algorithm(format!(
                "Algorithm '{alg}' does not match the configured algorithm"
            )));
        }

        let data = decode::<JwtClaims>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        let user_id = validate_subject(&claims.sub)?;
        let exp = i64::try_from(claims.exp)
            .map_err(|_| TokenError::malformed("exp claim out of range"))?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| TokenError::malformed("exp claim out of range"))?;

        Ok(VerifiedToken { user_id, expires_at, token_id: claims.jti })
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    #[tracing::instrument(skip_all, fields(algorithm = ?self.algorithm))]
    async fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let result = self.verify_sync(token);
        match &result {
            Ok(verified) => tracing::debug!(user_id = %verified.user_id, "bearer token verified"),
            Err(e) => tracing::debug!(error = %e, "bearer token rejected"),
        }
        result
    }
}

/// Key material used to sign tokens.
#[derive(Clone)]
pub enum IssuerKey {
    /// HMAC shared secret.
    Hmac {
        /// One of the HMAC algorithms.
        algorithm: Algorithm,
        /// The shared secret.
        secret: Zeroizing<Vec<u8>>,
    },
    /// Ed25519 private key in PKCS#8 DER form.
    Ed25519 {
        /// The DER-encoded private key.
        pkcs8_der: Zeroizing<Vec<u8>>,
    },
}

impl IssuerKey {
    /// Creates an HMAC signing key.
    #[must_use]
    pub fn hmac(algorithm: Algorithm, secret: impl Into<Vec<u8>>) -> Self {
        Self::Hmac { algorithm, secret: Zeroizing::new(secret.into()) }
    }

    /// Creates an Ed25519 signing key from PKCS#8 DER bytes.
    #[must_use]
    pub fn ed25519(pkcs8_der: impl Into<Vec<u8>>) -> Self {
        Self::Ed25519 { pkcs8_der: Zeroizing::new(pkcs8_der.into()) }
    }

    fn algorithm(&self) -> Algorithm {
        match self {
            Self::Hmac { algorithm, .. } => *algorithm,
            Self::Ed25519 { .. } => Algorithm::EdDSA,
        }
    }

    fn encoding_key(&self) -> Result<EncodingKey, ConfigError> {
        match self {
            Self::Hmac { algorithm, secret } => {
                if !is_hmac(*algorithm) {
                    return Err(ConfigError::InvalidKey(format!(
                        "{algorithm:?} is not an HMAC algorithm"
                    )));
                }
                if secret.is_empty() {
                    return Err(ConfigError::InvalidKey("HMAC secret is empty".into()));
                }
                Ok(EncodingKey::from_secret(secret))
            },
            Self::Ed25519 { pkcs8_der } => {
                if pkcs8_der.is_empty() {
                    return Err(ConfigError::InvalidKey("Ed25519 private key is empty".into()));
                }
                Ok(EncodingKey::from_ed_der(pkcs8_der))
            },
        }
    }
}

impl fmt::Debug for IssuerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerKey")
            .field("algorithm", &self.algorithm())
            .field("material", &"[REDACTED]")
            .finish()
    }
}

/// A freshly signed token.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    /// The compact JWT.
    pub token: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
    /// The random `jti` claim.
    pub token_id: String,
}

/// Signs bearer tokens for users.
pub struct TokenIssuer {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    lifetime: Duration,
    issuer: Option<String>,
    audience: Option<String>,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &self.algorithm)
            .field("lifetime", &self.lifetime)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl TokenIssuer {
    /// Creates an issuer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the key is unusable or `lifetime` is zero.
    #[builder]
    pub fn new(
        key: IssuerKey,
        #[builder(default = DEFAULT_TOKEN_LIFETIME)] lifetime: Duration,
        #[builder(into)] issuer: Option<String>,
        #[builder(into)] audience: Option<String>,
    ) -> Result<Self, ConfigError> {
        if lifetime.is_zero() {
            return Err(ConfigError::Invalid("token lifetime must be positive".into()));
        }
        Ok(Self {
            algorithm: key.algorithm(),
            encoding_key: key.encoding_key()?,
            lifetime,
            issuer,
            audience,
        })
    }
}

impl TokenIssuer {
    /// Signs a token for `user_id` valid for the configured lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if signing fails.
    #[tracing::instrument(skip(self))]
    pub fn issue(&self, user_id: UserId) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(self.lifetime)
            .map_err(|_| TokenError::malformed("token lifetime out of range"))?;
        let expires_at = now + lifetime;

        let mut jti = [0u8; 16];
        OsRng.fill_bytes(&mut jti);
        let token_id = URL_SAFE_NO_PAD.encode(jti);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            exp: expires_at.timestamp().unsigned_abs(),
            iat: now.timestamp().unsigned_abs(),
            nbf: None,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Some(token_id.clone()),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?;
        Ok(IssuedToken { token, expires_at, token_id })
    }
}
