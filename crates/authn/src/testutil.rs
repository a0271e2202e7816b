//! Shared test utilities for authentication testing.
//!
//! This module provides helpers for generating Ed25519 key pairs, signing
//! and crafting JWTs (including attack tokens), building identities, and
//! recording audit events. It is feature-gated behind `testutil` to prevent
//! leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! tavern-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tavern_authn::testutil::{bearer_token, craft_raw_jwt, test_identity};
//! ```

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use rand_core::OsRng;
use tavern_storage::{Tier, UserId};
use zeroize::Zeroizing;

use crate::{
    audit::{AuditEvent, AuditLogger},
    identity::Identity,
    jwt::{IssuerKey, JwtVerifier, TokenIssuer, VerificationKey},
};

/// HMAC secret shared by [`test_verifier`] and [`bearer_token`].
pub const TEST_SECRET: &[u8] = b"tavern-test-secret-0123456789abcdef";

/// Generates a test Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)` where:
/// - `pkcs8_der` is the private key in PKCS#8 DER format wrapped in [`Zeroizing`] (suitable for
///   [`IssuerKey::ed25519`])
/// - `public_key_base64url` is the 32-byte public key encoded as base64url without padding
///   (suitable for [`VerificationKey::ed25519`])
///
/// Each call generates a fresh random key pair.
pub fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_b64 = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// HS256 verifier keyed with [`TEST_SECRET`], no issuer or audience.
///
/// # Panics
///
/// Never in practice; the key is valid.
pub fn test_verifier() -> JwtVerifier {
    JwtVerifier::builder()
        .key(VerificationKey::hmac(Algorithm::HS256, TEST_SECRET))
        .build()
        .expect("test verifier key is valid")
}

/// HS256 issuer keyed with [`TEST_SECRET`].
///
/// # Panics
///
/// Never in practice; the key is valid.
pub fn test_issuer() -> TokenIssuer {
    TokenIssuer::builder()
        .key(IssuerKey::hmac(Algorithm::HS256, TEST_SECRET))
        .build()
        .expect("test issuer key is valid")
}

/// A one-hour bearer token for user `id` that [`test_verifier`] accepts.
///
/// # Panics
///
/// Panics if signing fails.
pub fn bearer_token(id: i64) -> String {
    test_issuer().issue(UserId(id)).expect("signing test token").token
}

/// Signs arbitrary claims with an HMAC secret.
///
/// Useful for tokens the issuer would never produce (expired, missing
/// claims, wrong issuer).
///
/// # Panics
///
/// Panics if encoding fails.
pub fn sign_hmac_claims(algorithm: Algorithm, secret: &[u8], claims: &serde_json::Value) -> String {
    jsonwebtoken::encode(&Header::new(algorithm), claims, &EncodingKey::from_secret(secret))
        .expect("Failed to encode test JWT")
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Identity matching [`tavern_storage::testutil::test_user`] for the same
/// `id` and `tier`.
pub fn test_identity(id: i64, tier: Tier) -> Identity {
    Identity::from(tavern_storage::testutil::test_user(id, tier))
}

/// [`AuditLogger`] that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditLogger {
    /// Snapshot of the recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AuditLogger for RecordingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Asserts that a [`Result<T, AuthError>`](crate::error::AuthError) is an
/// `Err` matching the given variant.
///
/// Works with any `AuthError` variant. On failure, prints the expected
/// variant and the actual result for debugging.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tavern_authn::assert_auth_error;
/// use tavern_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::AdminRequired);
/// assert_auth_error!(result, AdminRequired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            result,
        );
    }};
    ($result:expr, $variant:ident, $msg:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            result,
        );
    }};
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{error::AuthError, jwt::TokenVerifier};

    #[test]
    fn test_generate_test_keypair_produces_valid_key() {
        let (pkcs8_der, public_key_b64) = generate_test_keypair();
        // PKCS#8 DER for Ed25519 is 48 bytes (16 header + 32 key)
        assert_eq!(pkcs8_der.len(), 48);
        // Base64url of 32 bytes = 43 characters (no padding)
        assert_eq!(public_key_b64.len(), 43);
    }

    #[test]
    fn test_generate_test_keypair_unique() {
        let (_, pk1) = generate_test_keypair();
        let (_, pk2) = generate_test_keypair();
        assert_ne!(pk1, pk2, "each call should produce a unique key pair");
    }

    #[tokio::test]
    async fn test_bearer_token_verifies() {
        let verified = test_verifier().verify(&bearer_token(12)).await.unwrap();
        assert_eq!(verified.user_id, UserId(12));
    }

    #[test]
    fn test_craft_raw_jwt_format() {
        let jwt = craft_raw_jwt(&json!({"alg": "none", "typ": "JWT"}), &json!({"sub": "1"}));
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].is_empty(), "signature should be empty for raw JWTs");
    }

    #[test]
    fn test_identity_matches_storage_fixture() {
        let identity = test_identity(4, Tier::Pro);
        assert_eq!(identity.email, "user4@example.com");
        assert_eq!(identity.api_key.as_deref(), Some("key-4"));
    }

    #[test]
    fn test_assert_auth_error_with_message() {
        let result: Result<(), AuthError> = Err(AuthError::MissingCredential);
        assert_auth_error!(result, MissingCredential, "no credentials were supplied");
    }
}
