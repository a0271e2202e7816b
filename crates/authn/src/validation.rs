//! JWT algorithm and subject validation.
//!
//! These checks run on the unverified token before any signature work:
//! a token naming a forbidden or unknown algorithm is rejected without
//! touching key material.
//!
//! # Security
//!
//! - `none` is always rejected
//! - Only algorithms in [`ACCEPTED_ALGORITHMS`] are parsed; everything else is rejected
//! - The verifier additionally requires the header algorithm to equal its configured algorithm,
//!   which blocks HMAC/EdDSA confusion

use jsonwebtoken::Algorithm;
use tavern_storage::UserId;

use crate::error::TokenError;

/// Forbidden JWT algorithms that are never accepted for security reasons.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none"];

/// Accepted JWT algorithms.
///
/// HMAC with a shared secret (HS256, HS384, HS512) for single-service
/// deployments, and EdDSA (Ed25519) when tokens are minted elsewhere.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512", "EdDSA"];

/// Validate a JWT header algorithm against the accepted list.
///
/// # Errors
///
/// Returns [`TokenError::UnsupportedAlgorithm`] if:
/// - Algorithm is `none` (compared case-insensitively)
/// - Algorithm is not in [`ACCEPTED_ALGORITHMS`]
///
/// # Examples
///
/// ```
/// use jsonwebtoken::Algorithm;
/// use tavern_authn::validation::validate_algorithm;
///
/// assert_eq!(validate_algorithm("HS256").unwrap(), Algorithm::HS256);
/// assert_eq!(validate_algorithm("EdDSA").unwrap(), Algorithm::EdDSA);
/// assert!(validate_algorithm("none").is_err());
/// assert!(validate_algorithm("RS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<Algorithm, TokenError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|forbidden| forbidden.eq_ignore_ascii_case(alg)) {
        return Err(TokenError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    match alg {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        "EdDSA" => Ok(Algorithm::EdDSA),
        other => Err(TokenError::unsupported_algorithm(format!(
            "Algorithm '{other}' is not in accepted list"
        ))),
    }
}

/// Parse the `sub` claim into a [`UserId`].
///
/// # Errors
///
/// Returns [`TokenError::InvalidSubject`] if the subject is empty or not an
/// integer.
pub fn validate_subject(sub: &str) -> Result<UserId, TokenError> {
    if sub.trim().is_empty() {
        return Err(TokenError::invalid_subject("subject is empty"));
    }
    sub.parse::<UserId>()
        .map_err(|_| TokenError::invalid_subject(format!("'{sub}' is not a user id")))
}
